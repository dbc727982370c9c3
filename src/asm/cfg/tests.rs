use super::*;
use crate::asm::syntax::{CondOp, Condition, Deref, Width};

fn label(pc: usize) -> Label {
    Label::new(pc)
}

/// r0 = 0; if r0 == 0 goto +1; r0 = 1; exit
fn branchy_seq() -> InstructionSeq {
    let cond = Condition {
        op: CondOp::Eq,
        left: Reg::R0,
        right: Value::Imm(0),
    };
    vec![
        (
            label(0),
            Instruction::Bin {
                op: BinOp::Mov,
                is64: true,
                dst: Reg::R0,
                v: Value::Imm(0),
                lddw: false,
            },
        ),
        (
            label(1),
            Instruction::Jmp {
                cond: Some(cond),
                target: label(3),
            },
        ),
        (
            label(2),
            Instruction::Bin {
                op: BinOp::Mov,
                is64: true,
                dst: Reg::R0,
                v: Value::Imm(1),
                lddw: false,
            },
        ),
        (label(3), Instruction::Exit),
    ]
}

#[test]
fn make_wires_fallthrough_and_targets() {
    let cfg = AsmCfg::make(&branchy_seq());
    assert_eq!(cfg.len(), 4);
    assert_eq!(cfg.entry(), label(0));
    assert_eq!(cfg.block(label(0)).next(), &[label(1)]);
    assert_eq!(cfg.block(label(1)).next(), &[label(2), label(3)]);
    assert_eq!(cfg.block(label(2)).next(), &[label(3)]);
    assert!(cfg.block(label(3)).next().is_empty());
    // Symmetric prev lists: 3 is a join of the two branch arms.
    assert_eq!(cfg.block(label(3)).prev(), &[label(1), label(2)]);
}

#[test]
fn single_exit_program_has_one_block_no_edges() {
    let cfg = AsmCfg::make(&vec![(label(0), Instruction::Exit)]);
    assert_eq!(cfg.len(), 1);
    assert!(cfg.block(label(0)).next().is_empty());
    assert!(cfg.block(label(0)).prev().is_empty());
}

#[test]
fn to_nondet_expands_branches_into_assume_pairs() {
    let cfg = AsmCfg::make(&branchy_seq()).to_nondet(false);

    // No conditional jump survives.
    for &l in cfg.labels() {
        for inst in &cfg.block(l).insts {
            assert!(
                !matches!(inst, Instruction::Jmp { cond: Some(_), .. }),
                "conditional jump left at {l}"
            );
        }
    }

    let branch = cfg.block(label(1));
    assert_eq!(branch.next().len(), 2);
    let taken = Label::synthetic(1, 1);
    let skipped = Label::synthetic(1, 2);
    assert_eq!(branch.next(), &[taken, skipped]);

    let cond = Condition {
        op: CondOp::Eq,
        left: Reg::R0,
        right: Value::Imm(0),
    };
    assert_eq!(
        cfg.block(taken).insts,
        vec![Instruction::Assume { cond }]
    );
    assert_eq!(
        cfg.block(skipped).insts,
        vec![Instruction::Assume {
            cond: cond.negate()
        }]
    );
    // The arms rejoin before exit.
    assert_eq!(cfg.block(taken).next(), &[label(3)]);
    assert_eq!(cfg.block(skipped).next(), &[label(2)]);
}

#[test]
fn to_nondet_asserts_before_memory_accesses() {
    let access = Deref {
        width: Width::W,
        base: Reg::R1,
        offset: 0,
    };
    let seq = vec![
        (
            label(0),
            Instruction::Mem {
                access,
                value: Value::Reg(Reg::R2),
                is_load: true,
            },
        ),
        (label(1), Instruction::Exit),
    ];
    let cfg = AsmCfg::make(&seq).to_nondet(false);
    assert_eq!(
        cfg.block(label(0)).insts,
        vec![
            Instruction::Assert {
                check: AssertionCheck::ValidAccess { access }
            },
            Instruction::Mem {
                access,
                value: Value::Reg(Reg::R2),
                is_load: true,
            },
        ]
    );
}

#[test]
fn to_nondet_asserts_before_calls_and_divisions() {
    let seq = vec![
        (label(0), Instruction::Call { func: 1 }),
        (
            label(1),
            Instruction::Bin {
                op: BinOp::Div,
                is64: true,
                dst: Reg::R0,
                v: Value::Reg(Reg::R3),
                lddw: false,
            },
        ),
        (label(2), Instruction::Exit),
    ];
    let cfg = AsmCfg::make(&seq).to_nondet(false);
    assert_eq!(
        cfg.block(label(0)).insts[0],
        Instruction::Assert {
            check: AssertionCheck::ValidCall { func: 1 }
        }
    );
    assert_eq!(
        cfg.block(label(1)).insts[0],
        Instruction::Assert {
            check: AssertionCheck::NonZero {
                value: Value::Reg(Reg::R3)
            }
        }
    );
}

#[test]
fn to_nondet_expands_locks_when_asked() {
    let access = Deref {
        width: Width::DW,
        base: Reg::R1,
        offset: 8,
    };
    let seq = vec![
        (
            label(0),
            Instruction::LockAdd {
                access,
                value: Reg::R2,
            },
        ),
        (label(1), Instruction::Exit),
    ];

    let plain = AsmCfg::make(&seq).to_nondet(false);
    assert!(plain
        .block(label(0))
        .insts
        .contains(&Instruction::LockAdd {
            access,
            value: Reg::R2
        }));

    let expanded = AsmCfg::make(&seq).to_nondet(true);
    assert_eq!(
        expanded.block(label(0)).insts,
        vec![
            Instruction::Assert {
                check: AssertionCheck::ValidAccess { access }
            },
            Instruction::Mem {
                access,
                value: Value::Reg(Reg::R11),
                is_load: true,
            },
            Instruction::Bin {
                op: BinOp::Add,
                is64: true,
                dst: Reg::R11,
                v: Value::Reg(Reg::R2),
                lddw: false,
            },
            Instruction::Mem {
                access,
                value: Value::Reg(Reg::R11),
                is_load: false,
            },
        ]
    );
}

#[test]
fn simplify_merges_straight_line_chains() {
    let mov = |imm| Instruction::Bin {
        op: BinOp::Mov,
        is64: true,
        dst: Reg::R0,
        v: Value::Imm(imm),
        lddw: false,
    };
    let seq = vec![
        (label(0), mov(0)),
        (label(1), mov(1)),
        (label(2), mov(2)),
        (label(3), Instruction::Exit),
    ];
    let mut cfg = AsmCfg::make(&seq);
    cfg.simplify();
    // The mov chain collapses into the entry block; exit stays its own
    // block because it has no successor to rewire.
    assert_eq!(cfg.len(), 2);
    assert_eq!(cfg.block(label(0)).insts, vec![mov(0), mov(1), mov(2)]);
    assert_eq!(cfg.block(label(0)).next(), &[label(3)]);
    assert!(!cfg.labels().contains(&label(1)));
    assert!(!cfg.labels().contains(&label(2)));
}

#[test]
fn simplify_keeps_branch_structure() {
    let mut cfg = AsmCfg::make(&branchy_seq());
    cfg.simplify();
    // Neither arm can merge: the branch block has two children and the
    // join block two parents.
    assert_eq!(cfg.len(), 4);
}

#[test]
fn simplify_is_idempotent_on_single_block() {
    let mut cfg = AsmCfg::make(&vec![(label(0), Instruction::Exit)]);
    cfg.simplify();
    assert_eq!(cfg.len(), 1);
    cfg.simplify();
    assert_eq!(cfg.len(), 1);
}

#[test]
fn simplify_prunes_unreachable_blocks() {
    // goto +1 skips a dead mov.
    let seq = vec![
        (
            label(0),
            Instruction::Jmp {
                cond: None,
                target: label(2),
            },
        ),
        (
            label(1),
            Instruction::Bin {
                op: BinOp::Mov,
                is64: true,
                dst: Reg::R0,
                v: Value::Imm(9),
                lddw: false,
            },
        ),
        (label(2), Instruction::Exit),
    ];
    let mut cfg = AsmCfg::make(&seq);
    assert_eq!(cfg.len(), 3);
    cfg.simplify();
    assert!(!cfg.labels().contains(&label(1)));
}

#[test]
fn stats_count_shapes() {
    let access = Deref {
        width: Width::W,
        base: Reg::R1,
        offset: 0,
    };
    let seq = vec![
        (
            label(0),
            Instruction::Mem {
                access,
                value: Value::Reg(Reg::R2),
                is_load: true,
            },
        ),
        (
            label(1),
            Instruction::Mem {
                access,
                value: Value::Reg(Reg::R2),
                is_load: false,
            },
        ),
        (label(2), Instruction::Exit),
    ];
    let stats = AsmCfg::make(&seq).collect_stats();
    assert_eq!(
        stats,
        CfgStats {
            count: 3,
            stores: 1,
            loads: 1,
            jumps: 0,
            joins: 0,
        }
    );

    let stats = AsmCfg::make(&branchy_seq()).collect_stats();
    assert_eq!(stats.jumps, 1);
    assert_eq!(stats.joins, 1);
}
