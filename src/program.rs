//! Program descriptors handed to the verifier core
//!
//! The ELF/section loader (outside this crate) extracts a raw instruction
//! buffer plus the map and program-type metadata the analysis needs. Nothing
//! here is process-global: callers thread a [`ProgramInfo`] through the
//! decoder and CFG builder explicitly, so several programs can be analyzed
//! side by side.

use std::collections::HashMap;

/// One 64-bit instruction word as laid out on the wire:
/// `{opcode:8, dst:4, src:4, offset:s16, imm:s32}`, little-endian.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawInsn {
    pub opcode: u8,
    pub dst: u8,
    pub src: u8,
    pub offset: i16,
    pub imm: i32,
}

impl RawInsn {
    pub fn from_le_bytes(bytes: [u8; 8]) -> RawInsn {
        RawInsn {
            opcode: bytes[0],
            dst: bytes[1] & 0x0f,
            src: bytes[1] >> 4,
            offset: i16::from_le_bytes([bytes[2], bytes[3]]),
            imm: i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    pub fn to_le_bytes(self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        bytes[0] = self.opcode;
        bytes[1] = (self.src << 4) | (self.dst & 0x0f);
        bytes[2..4].copy_from_slice(&self.offset.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.imm.to_le_bytes());
        bytes
    }
}

/// What a map's values hold, as far as the verifier cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapValueKind {
    /// Plain data.
    Any,
    /// Inner maps (map-in-map).
    Map,
    /// Program file descriptors (tail-call arrays).
    Program,
}

/// Shape of one map as declared in the ELF file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapDescriptor {
    pub original_fd: i32,
    /// Platform-specific type value.
    pub map_type: u32,
    pub key_size: u32,
    pub value_size: u32,
    pub max_entries: u32,
    pub inner_map_fd: u32,
}

/// Program type inferred from the section name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramType {
    /// For display only; the analysis keys off the other fields.
    pub name: String,
    /// Platform-specific program type value.
    pub platform_specific_data: u64,
    pub is_privileged: bool,
}

impl Default for ProgramType {
    fn default() -> ProgramType {
        ProgramType {
            name: "unspec".to_string(),
            platform_specific_data: 0,
            is_privileged: false,
        }
    }
}

/// Map shapes that the analyzer may treat as interchangeable.
pub type EquivalenceKey = (MapValueKind, u32, u32, u32);

/// Everything the analysis needs to know about the program besides its code.
#[derive(Debug, Clone, Default)]
pub struct ProgramInfo {
    pub map_descriptors: Vec<MapDescriptor>,
    pub program_type: ProgramType,
    cache: HashMap<EquivalenceKey, i32>,
}

impl ProgramInfo {
    pub fn new(map_descriptors: Vec<MapDescriptor>, program_type: ProgramType) -> ProgramInfo {
        ProgramInfo {
            map_descriptors,
            program_type,
            cache: HashMap::new(),
        }
    }

    /// Descriptor registered under `fd`, if any.
    pub fn map_descriptor(&self, fd: i32) -> Option<&MapDescriptor> {
        self.map_descriptors.iter().find(|d| d.original_fd == fd)
    }

    /// Small-integer representative for a map shape. Maps with equal keys
    /// share a representative, letting the analyzer deduplicate descriptors.
    pub fn equivalence_class(&mut self, key: EquivalenceKey) -> i32 {
        let next = self.cache.len() as i32;
        *self.cache.entry(key).or_insert(next)
    }
}

/// A program as delivered by the loader: code plus metadata.
#[derive(Debug, Clone, Default)]
pub struct RawProgram {
    /// Diagnostic only.
    pub filename: String,
    pub section: String,
    pub insns: Vec<RawInsn>,
    pub info: ProgramInfo,
}

impl RawProgram {
    /// Split a byte buffer into instruction words. Returns `None` when the
    /// length is not a multiple of 8.
    pub fn parse_words(bytes: &[u8]) -> Option<Vec<RawInsn>> {
        if bytes.len() % 8 != 0 {
            return None;
        }
        Some(
            bytes
                .chunks_exact(8)
                .map(|c| RawInsn::from_le_bytes(c.try_into().expect("chunk of 8")))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_insn_roundtrips_wire_layout() {
        let raw = RawInsn {
            opcode: 0xb7,
            dst: 1,
            src: 0,
            offset: -2,
            imm: 42,
        };
        let bytes = raw.to_le_bytes();
        assert_eq!(bytes, [0xb7, 0x01, 0xfe, 0xff, 0x2a, 0x00, 0x00, 0x00]);
        assert_eq!(RawInsn::from_le_bytes(bytes), raw);
    }

    #[test]
    fn parse_words_rejects_truncated_buffers() {
        assert!(RawProgram::parse_words(&[0u8; 12]).is_none());
        assert_eq!(RawProgram::parse_words(&[0u8; 16]).unwrap().len(), 2);
    }

    #[test]
    fn equivalence_classes_are_interned() {
        let mut info = ProgramInfo::default();
        let a = info.equivalence_class((MapValueKind::Any, 4, 8, 1024));
        let b = info.equivalence_class((MapValueKind::Any, 4, 8, 2048));
        let again = info.equivalence_class((MapValueKind::Any, 4, 8, 1024));
        assert_eq!(a, again);
        assert_ne!(a, b);
    }
}
