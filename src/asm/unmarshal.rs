//! Raw instruction decoding
//!
//! Turns the 64-bit words of a [`RawProgram`] into the structured
//! [`Instruction`] model. Structural violations (truncated or malformed
//! `lddw`, bad jump targets, reserved fields) abort decoding with an error;
//! merely suspicious encodings (unknown opcodes, legacy packet modes) decode
//! to something inspectable and leave a note against the instruction index.

use thiserror::Error;
use tracing::debug;

use crate::asm::syntax::{
    BinOp, CondOp, Condition, Deref, Instruction, InstructionSeq, Label, Reg, UnOp, Value, Width,
};
use crate::program::{RawInsn, RawProgram};

// Instruction classes (opcode & 0x07)
const CLS_LD: u8 = 0x00;
const CLS_LDX: u8 = 0x01;
const CLS_ST: u8 = 0x02;
const CLS_STX: u8 = 0x03;
const CLS_ALU: u8 = 0x04;
const CLS_JMP: u8 = 0x05;
const CLS_JMP32: u8 = 0x06;
const CLS_ALU64: u8 = 0x07;

// Memory modes (opcode & 0xe0)
const MODE_IMM: u8 = 0x00;
const MODE_ABS: u8 = 0x20;
const MODE_IND: u8 = 0x40;
const MODE_MEM: u8 = 0x60;
const MODE_XADD: u8 = 0xc0;

/// Decode notes, one vector per raw instruction index.
pub type Notes = Vec<Vec<String>>;

/// A structural decoding failure. Advisory conditions are notes, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnmarshalError {
    #[error("{filename}: section {section} has no instructions")]
    EmptyProgram { filename: String, section: String },

    #[error("instruction {pc}: register index {reg} out of range")]
    BadRegister { pc: usize, reg: u8 },

    #[error("instruction {pc}: r10 is read-only")]
    ReadonlyRegister { pc: usize },

    #[error("instruction {pc}: reserved {field} field is set")]
    ReservedField { pc: usize, field: &'static str },

    #[error("instruction {pc}: lddw needs a second slot")]
    TruncatedLddw { pc: usize },

    #[error("instruction {pc}: jump target {target} out of range")]
    JumpOutOfRange { pc: usize, target: i64 },

    #[error("instruction {pc}: jump target {target} lands inside an lddw pair")]
    JumpIntoLddw { pc: usize, target: usize },

    #[error("instruction {pc}: map fd {fd} has no descriptor")]
    UnknownMapFd { pc: usize, fd: i32 },

    #[error("instruction {pc}: BPF-to-BPF calls are not supported")]
    LocalCall { pc: usize },
}

/// Decode a raw program, appending advisory notes to `notes`.
///
/// `notes` is reset to one (possibly empty) vector per raw instruction
/// index; it is filled even when decoding fails partway through.
pub fn unmarshal(raw: &RawProgram, notes: &mut Notes) -> Result<InstructionSeq, UnmarshalError> {
    notes.clear();
    notes.resize(raw.insns.len(), Vec::new());
    Unmarshaler { raw, notes }.run()
}

/// [`unmarshal`] for callers that do not care about notes.
pub fn unmarshal_program(raw: &RawProgram) -> Result<InstructionSeq, UnmarshalError> {
    let mut notes = Notes::new();
    unmarshal(raw, &mut notes)
}

struct Unmarshaler<'a> {
    raw: &'a RawProgram,
    notes: &'a mut Notes,
}

impl Unmarshaler<'_> {
    fn run(mut self) -> Result<InstructionSeq, UnmarshalError> {
        if self.raw.insns.is_empty() {
            return Err(UnmarshalError::EmptyProgram {
                filename: self.raw.filename.clone(),
                section: self.raw.section.clone(),
            });
        }

        let len = self.raw.insns.len();
        let mut seq = InstructionSeq::new();
        // Second slots of lddw pairs: no label may point at them.
        let mut lddw_mid = vec![false; len];
        let mut pc = 0;
        while pc < len {
            let word = self.raw.insns[pc];
            let (inst, slots) = self.decode_one(pc, word)?;
            if slots == 2 {
                lddw_mid[pc + 1] = true;
            }
            seq.push((Label::new(pc), inst));
            pc += slots;
        }

        for (label, inst) in &seq {
            if let Some(target) = inst.jump_target() {
                if lddw_mid[target.pc()] {
                    return Err(UnmarshalError::JumpIntoLddw {
                        pc: label.pc(),
                        target: target.pc(),
                    });
                }
            }
        }

        Ok(seq)
    }

    fn note(&mut self, pc: usize, msg: impl Into<String>) {
        let msg = msg.into();
        debug!(pc, note = %msg, "decode note");
        self.notes[pc].push(msg);
    }

    fn reg(pc: usize, idx: u8) -> Result<Reg, UnmarshalError> {
        Reg::from_index(idx).ok_or(UnmarshalError::BadRegister { pc, reg: idx })
    }

    fn writable_reg(pc: usize, idx: u8) -> Result<Reg, UnmarshalError> {
        match Self::reg(pc, idx)? {
            Reg::R10 => Err(UnmarshalError::ReadonlyRegister { pc }),
            r => Ok(r),
        }
    }

    fn width(size_bits: u8) -> Option<Width> {
        match size_bits & 0x18 {
            0x00 => Some(Width::W),
            0x08 => Some(Width::H),
            0x10 => Some(Width::B),
            0x18 => Some(Width::DW),
            _ => unreachable!(),
        }
    }

    fn branch_target(&self, pc: usize, offset: i16) -> Result<Label, UnmarshalError> {
        let target = pc as i64 + i64::from(offset) + 1;
        if target < 0 || target >= self.raw.insns.len() as i64 {
            return Err(UnmarshalError::JumpOutOfRange { pc, target });
        }
        Ok(Label::new(target as usize))
    }

    /// Decode the instruction at `pc`, returning it and the number of raw
    /// slots it occupied (2 only for lddw).
    fn decode_one(&mut self, pc: usize, raw: RawInsn) -> Result<(Instruction, usize), UnmarshalError> {
        match raw.opcode & 0x07 {
            CLS_LD => self.decode_ld(pc, raw),
            CLS_LDX => Ok((self.decode_ldx(pc, raw)?, 1)),
            CLS_ST | CLS_STX => Ok((self.decode_store(pc, raw)?, 1)),
            CLS_ALU => Ok((self.decode_alu(pc, raw, false)?, 1)),
            CLS_ALU64 => Ok((self.decode_alu(pc, raw, true)?, 1)),
            CLS_JMP => Ok((self.decode_jmp(pc, raw)?, 1)),
            CLS_JMP32 => {
                self.note(pc, "32-bit jump class is not supported");
                Ok((Instruction::Undefined { opcode: raw.opcode }, 1))
            }
            _ => unreachable!(),
        }
    }

    fn decode_ld(&mut self, pc: usize, raw: RawInsn) -> Result<(Instruction, usize), UnmarshalError> {
        match raw.opcode & 0xe0 {
            MODE_IMM => {
                if raw.opcode & 0x18 != 0x18 {
                    self.note(pc, format!("bad load-immediate size in {:#04x}", raw.opcode));
                    return Ok((Instruction::Undefined { opcode: raw.opcode }, 1));
                }
                self.decode_lddw(pc, raw)
            }
            MODE_ABS | MODE_IND => {
                let width = Self::width(raw.opcode).expect("size bits");
                let reg = if raw.opcode & 0xe0 == MODE_IND {
                    Some(Self::reg(pc, raw.src)?)
                } else {
                    None
                };
                self.note(pc, "legacy packet access; use direct packet pointers");
                Ok((
                    Instruction::Packet {
                        width,
                        reg,
                        offset: raw.imm,
                    },
                    1,
                ))
            }
            _ => {
                self.note(pc, format!("unknown load mode in {:#04x}", raw.opcode));
                Ok((Instruction::Undefined { opcode: raw.opcode }, 1))
            }
        }
    }

    fn decode_lddw(&mut self, pc: usize, raw: RawInsn) -> Result<(Instruction, usize), UnmarshalError> {
        let dst = Self::writable_reg(pc, raw.dst)?;
        let Some(hi) = self.raw.insns.get(pc + 1).copied() else {
            return Err(UnmarshalError::TruncatedLddw { pc });
        };
        if hi.opcode != 0 || hi.dst != 0 || hi.src != 0 || hi.offset != 0 {
            return Err(UnmarshalError::ReservedField {
                pc: pc + 1,
                field: "lddw continuation",
            });
        }
        if raw.offset != 0 {
            return Err(UnmarshalError::ReservedField { pc, field: "offset" });
        }
        match raw.src {
            0 => {
                let imm = u64::from(raw.imm as u32) | (u64::from(hi.imm as u32) << 32);
                Ok((
                    Instruction::Bin {
                        op: BinOp::Mov,
                        is64: true,
                        dst,
                        v: Value::Imm(imm as i64),
                        lddw: true,
                    },
                    2,
                ))
            }
            1 => {
                if self.raw.info.map_descriptor(raw.imm).is_none() {
                    return Err(UnmarshalError::UnknownMapFd { pc, fd: raw.imm });
                }
                Ok((Instruction::LoadMapFd { dst, map_fd: raw.imm }, 2))
            }
            _ => Err(UnmarshalError::ReservedField { pc, field: "lddw src" }),
        }
    }

    fn decode_ldx(&mut self, pc: usize, raw: RawInsn) -> Result<Instruction, UnmarshalError> {
        if raw.opcode & 0xe0 != MODE_MEM {
            self.note(pc, format!("unsupported ldx mode in {:#04x}", raw.opcode));
            return Ok(Instruction::Undefined { opcode: raw.opcode });
        }
        if raw.imm != 0 {
            return Err(UnmarshalError::ReservedField { pc, field: "imm" });
        }
        let width = Self::width(raw.opcode).expect("mem size bits");
        let dst = Self::writable_reg(pc, raw.dst)?;
        let base = Self::reg(pc, raw.src)?;
        Ok(Instruction::Mem {
            access: Deref {
                width,
                base,
                offset: raw.offset,
            },
            value: Value::Reg(dst),
            is_load: true,
        })
    }

    fn decode_store(&mut self, pc: usize, raw: RawInsn) -> Result<Instruction, UnmarshalError> {
        let is_stx = raw.opcode & 0x07 == CLS_STX;
        let width = Self::width(raw.opcode).expect("mem size bits");
        match raw.opcode & 0xe0 {
            MODE_MEM => {
                let base = Self::reg(pc, raw.dst)?;
                let value = if is_stx {
                    if raw.imm != 0 {
                        return Err(UnmarshalError::ReservedField { pc, field: "imm" });
                    }
                    Value::Reg(Self::reg(pc, raw.src)?)
                } else {
                    if raw.src != 0 {
                        return Err(UnmarshalError::ReservedField { pc, field: "src" });
                    }
                    Value::Imm(i64::from(raw.imm))
                };
                Ok(Instruction::Mem {
                    access: Deref {
                        width,
                        base,
                        offset: raw.offset,
                    },
                    value,
                    is_load: false,
                })
            }
            MODE_XADD if is_stx => {
                if !matches!(width, Width::W | Width::DW) {
                    self.note(pc, "lock add must be word or doubleword sized");
                    return Ok(Instruction::Undefined { opcode: raw.opcode });
                }
                if raw.imm != 0 {
                    return Err(UnmarshalError::ReservedField { pc, field: "imm" });
                }
                Ok(Instruction::LockAdd {
                    access: Deref {
                        width,
                        base: Self::reg(pc, raw.dst)?,
                        offset: raw.offset,
                    },
                    value: Self::reg(pc, raw.src)?,
                })
            }
            _ => {
                self.note(pc, format!("unsupported store mode in {:#04x}", raw.opcode));
                Ok(Instruction::Undefined { opcode: raw.opcode })
            }
        }
    }

    fn decode_alu(&mut self, pc: usize, raw: RawInsn, is64: bool) -> Result<Instruction, UnmarshalError> {
        let op = match raw.opcode & 0xf0 {
            0x00 => BinOp::Add,
            0x10 => BinOp::Sub,
            0x20 => BinOp::Mul,
            0x30 => BinOp::Div,
            0x40 => BinOp::Or,
            0x50 => BinOp::And,
            0x60 => BinOp::Lsh,
            0x70 => BinOp::Rsh,
            0x80 => {
                // NEG ignores the source bit
                if raw.offset != 0 {
                    return Err(UnmarshalError::ReservedField { pc, field: "offset" });
                }
                let dst = Self::writable_reg(pc, raw.dst)?;
                return Ok(Instruction::Un { op: UnOp::Neg, dst });
            }
            0x90 => BinOp::Mod,
            0xa0 => BinOp::Xor,
            0xb0 => BinOp::Mov,
            0xc0 => BinOp::Arsh,
            0xd0 => {
                // Byte-swap family lives in the 32-bit class only.
                if is64 {
                    self.note(pc, format!("unknown alu64 opcode {:#04x}", raw.opcode));
                    return Ok(Instruction::Undefined { opcode: raw.opcode });
                }
                let dst = Self::writable_reg(pc, raw.dst)?;
                let big_endian = raw.opcode & 0x08 != 0;
                let op = match (raw.imm, big_endian) {
                    (16, false) => UnOp::Le16,
                    (32, false) => UnOp::Le32,
                    (64, false) => UnOp::Le64,
                    (16, true) => UnOp::Be16,
                    (32, true) => UnOp::Be32,
                    (64, true) => UnOp::Be64,
                    _ => {
                        self.note(pc, format!("bad byte-swap width {}", raw.imm));
                        return Ok(Instruction::Undefined { opcode: raw.opcode });
                    }
                };
                return Ok(Instruction::Un { op, dst });
            }
            _ => {
                self.note(pc, format!("unknown alu opcode {:#04x}", raw.opcode));
                return Ok(Instruction::Undefined { opcode: raw.opcode });
            }
        };

        if raw.offset != 0 {
            return Err(UnmarshalError::ReservedField { pc, field: "offset" });
        }
        let dst = Self::writable_reg(pc, raw.dst)?;
        let v = if raw.opcode & 0x08 != 0 {
            if raw.imm != 0 {
                return Err(UnmarshalError::ReservedField { pc, field: "imm" });
            }
            Value::Reg(Self::reg(pc, raw.src)?)
        } else {
            if raw.src != 0 {
                return Err(UnmarshalError::ReservedField { pc, field: "src" });
            }
            Value::Imm(i64::from(raw.imm))
        };
        if matches!(op, BinOp::Div | BinOp::Mod) && v == Value::Imm(0) {
            self.note(pc, "division by zero immediate");
        }
        Ok(Instruction::Bin {
            op,
            is64,
            dst,
            v,
            lddw: false,
        })
    }

    fn decode_jmp(&mut self, pc: usize, raw: RawInsn) -> Result<Instruction, UnmarshalError> {
        let op = match raw.opcode & 0xf0 {
            0x00 => {
                if raw.dst != 0 || raw.src != 0 || raw.imm != 0 {
                    return Err(UnmarshalError::ReservedField { pc, field: "ja operand" });
                }
                return Ok(Instruction::Jmp {
                    cond: None,
                    target: self.branch_target(pc, raw.offset)?,
                });
            }
            0x80 => {
                if raw.src == 1 {
                    return Err(UnmarshalError::LocalCall { pc });
                }
                if raw.dst != 0 || raw.src != 0 || raw.offset != 0 {
                    return Err(UnmarshalError::ReservedField { pc, field: "call operand" });
                }
                return Ok(Instruction::Call { func: raw.imm });
            }
            0x90 => {
                if raw.dst != 0 || raw.src != 0 || raw.offset != 0 || raw.imm != 0 {
                    return Err(UnmarshalError::ReservedField { pc, field: "exit operand" });
                }
                return Ok(Instruction::Exit);
            }
            0x10 => CondOp::Eq,
            0x20 => CondOp::Gt,
            0x30 => CondOp::Ge,
            0x40 => CondOp::Set,
            0x50 => CondOp::Ne,
            0x60 => CondOp::SGt,
            0x70 => CondOp::SGe,
            0xa0 => CondOp::Lt,
            0xb0 => CondOp::Le,
            0xc0 => CondOp::SLt,
            0xd0 => CondOp::SLe,
            _ => {
                self.note(pc, format!("unknown jump opcode {:#04x}", raw.opcode));
                return Ok(Instruction::Undefined { opcode: raw.opcode });
            }
        };

        let left = Self::reg(pc, raw.dst)?;
        let right = if raw.opcode & 0x08 != 0 {
            if raw.imm != 0 {
                return Err(UnmarshalError::ReservedField { pc, field: "imm" });
            }
            Value::Reg(Self::reg(pc, raw.src)?)
        } else {
            if raw.src != 0 {
                return Err(UnmarshalError::ReservedField { pc, field: "src" });
            }
            Value::Imm(i64::from(raw.imm))
        };
        Ok(Instruction::Jmp {
            cond: Some(Condition { op, left, right }),
            target: self.branch_target(pc, raw.offset)?,
        })
    }
}
