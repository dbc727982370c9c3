//! Static verifier core for eBPF bytecode
//!
//! This crate turns a raw eBPF instruction buffer into the typed analysis
//! CFG an abstract-interpretation engine runs over, and provides the
//! weighted-graph substrate such an engine uses for difference-bound
//! reasoning:
//!
//! - **Decoding**: raw 64-bit words to a structured instruction model, with
//!   structural validation and per-instruction advisory notes
//! - **Control flow**: a label-keyed ASM CFG, its rewriting into
//!   non-deterministic form (branches become complementary `assume`s, risky
//!   instructions gain `assert`s), and simplification passes
//! - **Typed IR**: numeric statements over typed variables, the analysis
//!   CFG with forward and reverse views
//! - **Graph substrate**: an adaptive sparse weighted digraph with
//!   saturating edge arithmetic
//!
//! ## Quick Start
//!
//! ```
//! use ebpf_verify::program::RawProgram;
//! use ebpf_verify::{prepare, VerifierOptions};
//!
//! // r0 = 0; exit
//! let raw = RawProgram {
//!     filename: "demo.o".to_string(),
//!     section: "socket".to_string(),
//!     insns: RawProgram::parse_words(&[
//!         0xb7, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
//!         0x95, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
//!     ])
//!     .unwrap(),
//!     info: Default::default(),
//! };
//!
//! let prepared = prepare(&raw, &VerifierOptions::default()).unwrap();
//! assert!(prepared.cfg.exit().is_some());
//! ```
//!
//! The ELF loader that produces [`program::RawProgram`], the helper-function
//! registry, and the abstract domains themselves live outside this crate.

pub mod asm;
pub mod graph;
pub mod ir;
pub mod lower;
pub mod program;

pub use asm::cfg::{AsmCfg, CfgStats};
pub use asm::syntax::{Instruction, InstructionSeq, Label};
pub use asm::unmarshal::{unmarshal, unmarshal_program, Notes, UnmarshalError};
pub use graph::{AdaptGraph, AdaptMap, SafeI64};
pub use ir::{Cfg, CfgRev, Statement, VariableFactory};
pub use lower::lower;
pub use program::{ProgramInfo, RawProgram};

/// Knobs of the preparation pipeline.
#[derive(Debug, Clone, Copy)]
pub struct VerifierOptions {
    /// Lower atomic adds to load/add/store sequences.
    pub expand_locks: bool,
    /// Run the CFG simplification passes after lowering.
    pub simplify: bool,
}

impl Default for VerifierOptions {
    fn default() -> VerifierOptions {
        VerifierOptions {
            expand_locks: false,
            simplify: true,
        }
    }
}

/// Everything the downstream abstract domain needs to start iterating.
#[derive(Debug)]
pub struct Prepared {
    pub cfg: Cfg,
    pub vars: VariableFactory,
    pub notes: Notes,
}

/// The full front-end pipeline: decode, build the ASM CFG, rewrite to
/// non-deterministic form, lower to the typed CFG, and optionally simplify.
pub fn prepare(raw: &RawProgram, options: &VerifierOptions) -> Result<Prepared, UnmarshalError> {
    let mut notes = Notes::new();
    let seq = unmarshal(raw, &mut notes)?;
    let asm = AsmCfg::make(&seq).to_nondet(options.expand_locks);
    let mut vars = VariableFactory::new();
    let mut cfg = lower(&asm, &raw.filename, &mut vars);
    if options.simplify {
        cfg.simplify();
    }
    Ok(Prepared { cfg, vars, notes })
}
