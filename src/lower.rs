//! Translation from the non-deterministic ASM CFG to the analysis CFG
//!
//! Registers become int variables, the stack becomes an int array indexed
//! through the frame pointer, and the synthetic `Assume`/`Assert`
//! instructions become their typed statement counterparts. Whatever the
//! affine constraint language cannot express (bit tests, region typing of
//! non-stack pointers) is left to the downstream domain: values it cannot
//! track are havocked, never silently constrained.

use crate::asm::cfg::AsmCfg;
use crate::asm::syntax::{
    AssertionCheck, BinOp, CondOp, Condition, Deref, Instruction, Label, Reg, UnOp, Value,
};
use crate::ir::cfg::{BasicBlock, Cfg};
use crate::ir::types::{
    DebugInfo, LinearConstraint, LinearExpr, VarType, Variable, VariableFactory,
};

/// Stack frame size guaranteed to every eBPF program, in bytes.
pub const STACK_SIZE: i64 = 512;

/// The numeric variables standing in for the machine state.
struct Machine {
    regs: [Variable; 12],
    stack: Variable,
    packet_size: Variable,
}

impl Machine {
    fn new(vars: &mut VariableFactory) -> Machine {
        let regs = std::array::from_fn(|i| vars.make(&format!("r{i}"), VarType::Int));
        Machine {
            regs,
            stack: vars.make("stack", VarType::ArrayInt),
            packet_size: vars.make("packet_size", VarType::Int),
        }
    }

    fn reg(&self, r: Reg) -> Variable {
        self.regs[r.as_u8() as usize]
    }

    fn value(&self, v: Value) -> LinearExpr {
        match v {
            Value::Reg(r) => LinearExpr::var(self.reg(r)),
            Value::Imm(n) => LinearExpr::constant(n),
        }
    }

    /// Index of a frame-pointer-relative access into the stack array.
    fn stack_index(&self, access: Deref) -> LinearExpr {
        LinearExpr::var(self.reg(Reg::R10)).plus_const(i64::from(access.offset))
    }
}

/// Translate a non-deterministic ASM CFG into the typed analysis CFG.
///
/// `filename` seeds the debug info carried by assertions. The caller keeps
/// the factory: the downstream domain interns its ghost variables there.
///
/// # Panics
/// Panics if the input still contains conditional jumps; run
/// [`AsmCfg::to_nondet`] first.
pub fn lower(asm: &AsmCfg, filename: &str, vars: &mut VariableFactory) -> Cfg {
    let m = Machine::new(vars);
    let mut cfg = Cfg::new(asm.entry());
    cfg.set_exit(Label::EXIT);
    for &label in asm.labels() {
        cfg.insert(label);
    }

    // Entry preamble: the frame pointer sits at the top of the stack and the
    // packet has some nonnegative size.
    let entry = cfg.block_mut(asm.entry());
    entry.assign(m.reg(Reg::R10), LinearExpr::constant(STACK_SIZE));
    entry.assume(LinearConstraint::ge(m.packet_size, LinearExpr::constant(0)));

    for &label in asm.labels() {
        let src = asm.block(label);
        let block = cfg.block_mut(label);
        for inst in &src.insts {
            lower_inst(block, &m, label, inst, filename);
        }
        for &n in src.next() {
            cfg.add_edge(label, n);
        }
        if src.next().is_empty() {
            cfg.add_edge(label, Label::EXIT);
        }
    }
    cfg
}

fn lower_inst(bb: &mut BasicBlock, m: &Machine, label: Label, inst: &Instruction, filename: &str) {
    match *inst {
        Instruction::Bin { op, is64, dst, v, .. } => lower_bin(bb, m, op, is64, dst, v),
        Instruction::Un { op, dst } => match op {
            // Negation is affine; byte swaps are not.
            UnOp::Neg => bb.mul(m.reg(dst), m.reg(dst), LinearExpr::constant(-1)),
            _ => bb.havoc(m.reg(dst)),
        },
        Instruction::LoadMapFd { dst, map_fd } => {
            bb.assign(m.reg(dst), LinearExpr::constant(map_fd))
        }
        Instruction::Call { .. } => {
            // r0 receives the result, r1-r5 are clobbered by the call.
            for r in [Reg::R0, Reg::R1, Reg::R2, Reg::R3, Reg::R4, Reg::R5] {
                bb.havoc(m.reg(r));
            }
        }
        Instruction::Exit => {}
        Instruction::Jmp { cond: None, .. } => {}
        Instruction::Jmp { cond: Some(_), .. } => {
            panic!("conditional jump at {label} survived the nondet rewriting")
        }
        Instruction::Mem {
            access,
            value,
            is_load,
        } => lower_mem(bb, m, access, value, is_load),
        Instruction::Packet { .. } => bb.havoc(m.reg(Reg::R0)),
        Instruction::LockAdd { access, value } => {
            if access.base == Reg::R10 {
                let idx = m.stack_index(access);
                let width = LinearExpr::constant(access.width.bytes() as i64);
                let scratch = m.reg(Reg::R11);
                bb.array_load(scratch, m.stack, idx.clone(), width.clone());
                bb.add(scratch, scratch, m.value(Value::Reg(value)));
                bb.array_store(m.stack, idx, scratch, width, true);
            }
            // Other regions are the pointer domain's business.
        }
        Instruction::Undefined { .. } => {
            // An undecodable instruction can never be proven safe.
            bb.assertion(
                LinearConstraint::always_false(),
                debug_at(filename, label),
            );
        }
        Instruction::Assume { cond } => lower_assume(bb, m, cond),
        Instruction::Assert { check } => lower_check(bb, m, check, filename, label),
    }
}

fn lower_bin(bb: &mut BasicBlock, m: &Machine, op: BinOp, is64: bool, dst: Reg, v: Value) {
    let d = m.reg(dst);
    if !is64 {
        // 32-bit ops truncate the destination; only a constant move keeps a
        // value the affine domain can trust.
        match (op, v) {
            (BinOp::Mov, Value::Imm(n)) => {
                bb.assign(d, LinearExpr::constant(n as u32 as i64));
            }
            _ => bb.havoc(d),
        }
        return;
    }
    let rhs = m.value(v);
    match op {
        BinOp::Mov => bb.assign(d, rhs),
        BinOp::Add => bb.add(d, d, rhs),
        BinOp::Sub => bb.sub(d, d, rhs),
        BinOp::Mul => bb.mul(d, d, rhs),
        // eBPF division and modulo are unsigned.
        BinOp::Div => bb.udiv(d, d, rhs),
        BinOp::Mod => bb.urem(d, d, rhs),
        BinOp::Or => bb.bitwise_or(d, d, rhs),
        BinOp::And => bb.bitwise_and(d, d, rhs),
        BinOp::Xor => bb.bitwise_xor(d, d, rhs),
        BinOp::Lsh => bb.shl(d, d, rhs),
        BinOp::Rsh => bb.lshr(d, d, rhs),
        BinOp::Arsh => bb.ashr(d, d, rhs),
    }
}

fn lower_mem(bb: &mut BasicBlock, m: &Machine, access: Deref, value: Value, is_load: bool) {
    let width = LinearExpr::constant(access.width.bytes() as i64);
    if access.base == Reg::R10 {
        let idx = m.stack_index(access);
        if is_load {
            match value {
                Value::Reg(r) => bb.array_load(m.reg(r), m.stack, idx, width),
                Value::Imm(_) => unreachable!("loads target a register"),
            }
        } else {
            bb.array_store(m.stack, idx, m.value(value), width, true);
        }
    } else if is_load {
        // Loads from ctx/map/packet regions give values this layer cannot
        // track; region typing belongs to the pointer domain.
        if let Value::Reg(r) = value {
            bb.havoc(m.reg(r));
        }
    }
}

fn lower_assume(bb: &mut BasicBlock, m: &Machine, cond: Condition) {
    if cond.op.is_unsigned() {
        // Unsigned comparisons only translate on the nonnegative range.
        bb.assume(LinearConstraint::ge(
            m.reg(cond.left),
            LinearExpr::constant(0),
        ));
    }
    if let Some(c) = constraint_of(m, cond) {
        bb.assume(c);
    }
}

fn constraint_of(m: &Machine, cond: Condition) -> Option<LinearConstraint> {
    let l = LinearExpr::var(m.reg(cond.left));
    let r = m.value(cond.right);
    Some(match cond.op {
        CondOp::Eq => LinearConstraint::eq(l, r),
        CondOp::Ne => LinearConstraint::ne(l, r),
        CondOp::Gt | CondOp::SGt => LinearConstraint::gt(l, r),
        CondOp::Ge | CondOp::SGe => LinearConstraint::ge(l, r),
        CondOp::Lt | CondOp::SLt => LinearConstraint::lt(l, r),
        CondOp::Le | CondOp::SLe => LinearConstraint::le(l, r),
        // Bit tests have no affine form.
        CondOp::Set | CondOp::NSet => return None,
    })
}

fn lower_check(
    bb: &mut BasicBlock,
    m: &Machine,
    check: AssertionCheck,
    filename: &str,
    label: Label,
) {
    let di = debug_at(filename, label);
    match check {
        AssertionCheck::NonZero { value } => {
            let c = match value {
                Value::Reg(r) => LinearConstraint::ne(m.reg(r), LinearExpr::constant(0)),
                Value::Imm(0) => LinearConstraint::always_false(),
                Value::Imm(_) => LinearConstraint::always_true(),
            };
            bb.assertion(c, di);
        }
        AssertionCheck::ValidAccess { access } if access.base == Reg::R10 => {
            // The whole access stays inside the frame.
            let idx = m.stack_index(access);
            let width = access.width.bytes() as i64;
            bb.assertion(
                LinearConstraint::ge(idx.clone(), LinearExpr::constant(0)),
                di.clone(),
            );
            bb.assertion(
                LinearConstraint::le(
                    idx.plus_const(width),
                    LinearExpr::constant(STACK_SIZE),
                ),
                di,
            );
        }
        AssertionCheck::ValidAccess { access } => {
            // Elsewhere the numeric layer can only insist on a non-null base;
            // bounds come from the region domain.
            bb.assertion(
                LinearConstraint::ne(m.reg(access.base), LinearExpr::constant(0)),
                di,
            );
        }
        AssertionCheck::PacketAccess { width } => {
            bb.assertion(
                LinearConstraint::ge(
                    m.packet_size,
                    LinearExpr::constant(width.bytes() as i64),
                ),
                di,
            );
        }
        AssertionCheck::ValidCall { .. } => {
            // Argument typing is discharged by the helper registry outside
            // this layer; record the obligation as already met.
            bb.assertion(LinearConstraint::always_true(), di);
        }
    }
}

fn debug_at(filename: &str, label: Label) -> DebugInfo {
    DebugInfo::new(filename, label.pc() as u32, 0)
}
