//! End-to-end pipeline tests: raw words through decoding, CFG construction,
//! non-deterministic rewriting, and lowering to the analysis CFG.

use ebpf_verify::asm::cfg::AsmCfg;
use ebpf_verify::asm::syntax::{Instruction, Label};
use ebpf_verify::asm::unmarshal::{unmarshal, unmarshal_program, Notes, UnmarshalError};
use ebpf_verify::ir::Statement;
use ebpf_verify::program::{RawInsn, RawProgram};
use ebpf_verify::{prepare, VerifierOptions};

fn ri(opcode: u8, dst: u8, src: u8, offset: i16, imm: i32) -> RawInsn {
    RawInsn {
        opcode,
        dst,
        src,
        offset,
        imm,
    }
}

fn prog(insns: Vec<RawInsn>) -> RawProgram {
    RawProgram {
        filename: "test.o".to_string(),
        section: "xdp".to_string(),
        insns,
        info: Default::default(),
    }
}

const EXIT: RawInsn = RawInsn {
    opcode: 0x95,
    dst: 0,
    src: 0,
    offset: 0,
    imm: 0,
};

#[test]
fn empty_program_pipeline() {
    // A bare exit: one instruction, one block, no edges, and simplify is
    // idempotent on it.
    let raw = prog(vec![EXIT]);
    let seq = unmarshal_program(&raw).unwrap();
    assert_eq!(seq.len(), 1);

    let cfg = AsmCfg::make(&seq);
    assert_eq!(cfg.len(), 1);
    assert!(cfg.block(Label::new(0)).next().is_empty());

    let mut nondet = cfg.to_nondet(false);
    nondet.simplify();
    let blocks = nondet.len();
    nondet.simplify();
    assert_eq!(nondet.len(), blocks);

    let prepared = prepare(&raw, &VerifierOptions::default()).unwrap();
    assert_eq!(prepared.cfg.exit(), Some(Label::EXIT));
}

#[test]
fn forward_branch_becomes_complementary_assumes() {
    // r0 = 0; if r0 == 0 goto +1; r0 = 1; exit
    let raw = prog(vec![
        ri(0xb7, 0, 0, 0, 0),
        ri(0x15, 0, 0, 1, 0),
        ri(0xb7, 0, 0, 0, 1),
        EXIT,
    ]);
    let seq = unmarshal_program(&raw).unwrap();
    let nondet = AsmCfg::make(&seq).to_nondet(false);

    // No conditional jump instruction survives.
    for &l in nondet.labels() {
        assert!(!nondet
            .block(l)
            .insts
            .iter()
            .any(|i| matches!(i, Instruction::Jmp { cond: Some(_), .. })));
    }

    // The branch block forks into the two assume arms, which rejoin at exit.
    let branch = nondet.block(Label::new(1));
    assert_eq!(branch.next().len(), 2);
    let mut arm_targets = Vec::new();
    for &arm in branch.next() {
        let ab = nondet.block(arm);
        assert!(matches!(ab.insts[0], Instruction::Assume { .. }));
        arm_targets.extend(ab.next().iter().copied());
    }
    arm_targets.sort();
    assert_eq!(arm_targets, vec![Label::new(2), Label::new(3)]);
}

#[test]
fn lddw_pipeline_keeps_labels_addressing_first_slots() {
    let raw = prog(vec![
        RawInsn::from_le_bytes([0x18, 0x01, 0x00, 0x00, 0x78, 0x56, 0x34, 0x12]),
        RawInsn::from_le_bytes([0x00, 0x00, 0x00, 0x00, 0x12, 0x00, 0x00, 0x00]),
        EXIT,
    ]);
    let seq = unmarshal_program(&raw).unwrap();
    assert_eq!(seq.len(), 2);
    assert_eq!(seq[0].0, Label::new(0));
    assert_eq!(seq[1].0, Label::new(2));

    let cfg = AsmCfg::make(&seq);
    assert_eq!(cfg.block(Label::new(0)).next(), &[Label::new(2)]);
}

#[test]
fn jump_into_lddw_is_rejected_not_undefined() {
    let err = unmarshal_program(&prog(vec![
        ri(0x05, 0, 0, 1, 0),
        ri(0x18, 1, 0, 0, 7),
        ri(0x00, 0, 0, 0, 0),
        EXIT,
    ]));
    assert!(matches!(err, Err(UnmarshalError::JumpIntoLddw { .. })));
}

#[test]
fn decode_preserves_instruction_multiset_through_cfg() {
    let raw = prog(vec![
        ri(0xb7, 1, 0, 0, 10),
        ri(0x07, 1, 0, 0, -2),
        ri(0x15, 1, 0, 1, 0),
        ri(0xb7, 0, 0, 0, 1),
        EXIT,
    ]);
    let seq = unmarshal_program(&raw).unwrap();
    let cfg = AsmCfg::make(&seq);

    let mut from_seq: Vec<String> = seq.iter().map(|(_, i)| i.to_string()).collect();
    let mut from_cfg: Vec<String> = cfg
        .labels()
        .iter()
        .flat_map(|&l| cfg.block(l).insts.iter().map(|i| i.to_string()))
        .collect();
    from_seq.sort();
    from_cfg.sort();
    assert_eq!(from_seq, from_cfg);

    // Jump-target topology survives construction.
    for (label, inst) in &seq {
        if let Instruction::Jmp { target, .. } = inst {
            assert!(cfg.block(*label).next().contains(target));
        }
    }
}

#[test]
fn full_pipeline_produces_an_analyzable_cfg() {
    // r1 = 10; r1 -= 2; store r1 on the stack; load it back; exit
    let raw = prog(vec![
        ri(0xb7, 1, 0, 0, 10),
        ri(0x17, 1, 0, 0, 2),
        ri(0x7b, 10, 1, -8, 0),
        ri(0x79, 2, 10, -8, 0),
        EXIT,
    ]);
    let prepared = prepare(&raw, &VerifierOptions::default()).unwrap();
    let cfg = &prepared.cfg;
    assert_eq!(cfg.exit(), Some(Label::EXIT));

    // A straight-line program simplifies to entry + exit.
    assert_eq!(cfg.len(), 2);
    let stmts = cfg.block(cfg.entry()).statements();
    assert!(stmts
        .iter()
        .any(|s| matches!(s, Statement::ArrayStore { .. })));
    assert!(stmts
        .iter()
        .any(|s| matches!(s, Statement::ArrayLoad { .. })));
    // Frame-bound assertions from both stack accesses survive.
    let asserts = stmts
        .iter()
        .filter(|s| matches!(s, Statement::Assert { .. }))
        .count();
    assert_eq!(asserts, 4);
}

#[test]
fn lock_expansion_is_observable_end_to_end() {
    // lock *(u64*)(r10 - 8) += r1
    let raw = prog(vec![ri(0xdb, 10, 1, -8, 0), EXIT]);

    let expanded = prepare(
        &raw,
        &VerifierOptions {
            expand_locks: true,
            simplify: false,
        },
    )
    .unwrap();
    let stmts = expanded.cfg.block(Label::new(0)).statements();
    // load, add, store over the scratch register
    assert!(stmts
        .iter()
        .any(|s| matches!(s, Statement::ArrayLoad { .. })));
    assert!(stmts
        .iter()
        .any(|s| matches!(s, Statement::ArrayStore { .. })));
    assert!(stmts
        .iter()
        .any(|s| matches!(s, Statement::BinaryOp { .. })));
}

#[test]
fn notes_travel_with_the_prepared_program() {
    // A legacy packet load produces a note but still decodes and lowers.
    let raw = prog(vec![ri(0x20, 0, 0, 0, 14), EXIT]);
    let mut notes = Notes::new();
    let seq = unmarshal(&raw, &mut notes).unwrap();
    assert!(matches!(seq[0].1, Instruction::Packet { .. }));
    assert!(!notes[0].is_empty());

    let prepared = prepare(&raw, &VerifierOptions::default()).unwrap();
    assert_eq!(prepared.notes[0], notes[0]);
}

#[test]
fn collect_stats_summarizes_the_program() {
    let raw = prog(vec![
        ri(0xb7, 1, 0, 0, 0),
        ri(0x7b, 10, 1, -8, 0),
        ri(0x79, 2, 10, -8, 0),
        ri(0x15, 2, 0, 1, 0),
        ri(0xb7, 0, 0, 0, 1),
        EXIT,
    ]);
    let seq = unmarshal_program(&raw).unwrap();
    let stats = AsmCfg::make(&seq).collect_stats();
    assert_eq!(stats.count, 6);
    assert_eq!(stats.stores, 1);
    assert_eq!(stats.loads, 1);
    assert_eq!(stats.jumps, 1);
    assert_eq!(stats.joins, 1);
}
