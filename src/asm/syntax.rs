//! Structured eBPF instruction model
//!
//! The decoder turns raw 64-bit words into this closed instruction variant;
//! every later stage pattern-matches on it exhaustively. `Assume` and
//! `Assert` never come out of the decoder: they are synthesized when the CFG
//! is rewritten into non-deterministic form.

use std::fmt;

/// Identifies a program point and keys both CFGs.
///
/// Primary labels address a raw instruction index; synthetic labels are
/// minted when a branch is expanded into assume-blocks, and sort after the
/// primary label they were split from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
    pc: u32,
    sub: u32,
}

impl Label {
    /// The synthetic exit label every returning path is wired to.
    pub const EXIT: Label = Label {
        pc: u32::MAX,
        sub: 0,
    };

    /// Label of the instruction at raw index `pc`.
    pub fn new(pc: usize) -> Label {
        Label {
            pc: pc as u32,
            sub: 0,
        }
    }

    /// Synthetic label `pc.sub`, distinct from the primary label at `pc`.
    pub fn synthetic(pc: usize, sub: u32) -> Label {
        debug_assert!(sub > 0);
        Label {
            pc: pc as u32,
            sub,
        }
    }

    pub fn pc(self) -> usize {
        self.pc as usize
    }

    pub fn is_synthetic(self) -> bool {
        self.sub != 0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Label::EXIT {
            write!(f, "exit")
        } else if self.sub == 0 {
            write!(f, "{}", self.pc)
        } else {
            write!(f, "{}.{}", self.pc, self.sub)
        }
    }
}

/// eBPF register identifiers.
///
/// `R11` is not encodable in the ISA; it is the verifier-internal scratch
/// register used when lock-add instructions are expanded into load/add/store
/// sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Reg {
    /// Return value, exit code
    R0 = 0,
    /// First helper argument, context pointer on entry
    R1 = 1,
    R2 = 2,
    R3 = 3,
    R4 = 4,
    R5 = 5,
    R6 = 6,
    R7 = 7,
    R8 = 8,
    R9 = 9,
    /// Frame pointer (read-only)
    R10 = 10,
    /// Verifier-internal scratch
    R11 = 11,
}

impl Reg {
    /// Decode a 4-bit register field. `R11` is not part of the wire format.
    pub fn from_index(idx: u8) -> Option<Reg> {
        use Reg::*;
        Some(match idx {
            0 => R0,
            1 => R1,
            2 => R2,
            3 => R3,
            4 => R4,
            5 => R5,
            6 => R6,
            7 => R7,
            8 => R8,
            9 => R9,
            10 => R10,
            _ => return None,
        })
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.as_u8())
    }
}

/// Access width of a memory operation, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    B,
    H,
    W,
    DW,
}

impl Width {
    pub const fn bytes(self) -> u64 {
        match self {
            Width::B => 1,
            Width::H => 2,
            Width::W => 4,
            Width::DW => 8,
        }
    }
}

/// A register-relative memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Deref {
    pub width: Width,
    pub base: Reg,
    pub offset: i16,
}

impl fmt::Display for Deref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let w = self.width.bytes();
        if self.offset < 0 {
            write!(f, "*(u{}*)({} - {})", w * 8, self.base, -i32::from(self.offset))
        } else {
            write!(f, "*(u{}*)({} + {})", w * 8, self.base, self.offset)
        }
    }
}

/// Second operand of ALU and jump instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    Reg(Reg),
    Imm(i64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Reg(r) => write!(f, "{r}"),
            Value::Imm(n) => write!(f, "{n}"),
        }
    }
}

/// ALU operation of a [`Instruction::Bin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Mov,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Or,
    And,
    Xor,
    Lsh,
    Rsh,
    Arsh,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Mov => "=",
            BinOp::Add => "+=",
            BinOp::Sub => "-=",
            BinOp::Mul => "*=",
            BinOp::Div => "/=",
            BinOp::Mod => "%=",
            BinOp::Or => "|=",
            BinOp::And => "&=",
            BinOp::Xor => "^=",
            BinOp::Lsh => "<<=",
            BinOp::Rsh => ">>=",
            BinOp::Arsh => ">>>=",
        }
    }
}

/// Unary operation of a [`Instruction::Un`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    Le16,
    Le32,
    Le64,
    Be16,
    Be32,
    Be64,
}

/// Comparison of a conditional jump or an assumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CondOp {
    Eq,
    Ne,
    /// `left & right != 0`
    Set,
    /// `left & right == 0`; never decoded, only produced by negation
    NSet,
    Gt,
    Ge,
    Lt,
    Le,
    SGt,
    SGe,
    SLt,
    SLe,
}

impl CondOp {
    pub fn negate(self) -> CondOp {
        use CondOp::*;
        match self {
            Eq => Ne,
            Ne => Eq,
            Set => NSet,
            NSet => Set,
            Gt => Le,
            Le => Gt,
            Ge => Lt,
            Lt => Ge,
            SGt => SLe,
            SLe => SGt,
            SGe => SLt,
            SLt => SGe,
        }
    }

    /// Whether the comparison reads its operands as unsigned.
    pub fn is_unsigned(self) -> bool {
        matches!(self, CondOp::Gt | CondOp::Ge | CondOp::Lt | CondOp::Le)
    }

    fn symbol(self) -> &'static str {
        use CondOp::*;
        match self {
            Eq => "==",
            Ne => "!=",
            Set => "&==",
            NSet => "&!=",
            Gt => ">",
            Ge => ">=",
            Lt => "<",
            Le => "<=",
            SGt => "s>",
            SGe => "s>=",
            SLt => "s<",
            SLe => "s<=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Condition {
    pub op: CondOp,
    pub left: Reg,
    pub right: Value,
}

impl Condition {
    pub fn negate(self) -> Condition {
        Condition {
            op: self.op.negate(),
            ..self
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.op.symbol(), self.right)
    }
}

/// A safety obligation attached ahead of a risky instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssertionCheck {
    /// The dereference stays inside its memory region.
    ValidAccess { access: Deref },
    /// A direct packet access of `width` bytes stays inside the packet.
    PacketAccess { width: Width },
    /// The helper call's arguments are well-typed.
    ValidCall { func: i32 },
    /// The divisor is non-zero.
    NonZero { value: Value },
}

impl fmt::Display for AssertionCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssertionCheck::ValidAccess { access } => write!(f, "valid_access({access})"),
            AssertionCheck::PacketAccess { width } => {
                write!(f, "packet_access({})", width.bytes())
            }
            AssertionCheck::ValidCall { func } => write!(f, "valid_call({func})"),
            AssertionCheck::NonZero { value } => write!(f, "{value} != 0"),
        }
    }
}

/// One decoded eBPF instruction.
///
/// The variant is closed: adding a case must be answered by every consumer,
/// which is the point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// ALU operation `dst op= v`. `lddw` marks the two-slot 64-bit
    /// immediate move.
    Bin {
        op: BinOp,
        is64: bool,
        dst: Reg,
        v: Value,
        lddw: bool,
    },
    /// Unary operation on `dst`.
    Un { op: UnOp, dst: Reg },
    /// Two-slot load of a map file descriptor.
    LoadMapFd { dst: Reg, map_fd: i32 },
    /// Helper function call.
    Call { func: i32 },
    Exit,
    /// Jump to `target`; unconditional when `cond` is `None`.
    Jmp {
        cond: Option<Condition>,
        target: Label,
    },
    /// Load or store through a register-relative address.
    Mem {
        access: Deref,
        value: Value,
        is_load: bool,
    },
    /// Legacy absolute/indirect packet access; result lands in `r0`.
    Packet {
        width: Width,
        reg: Option<Reg>,
        offset: i32,
    },
    /// Atomic `*access += value`.
    LockAdd { access: Deref, value: Reg },
    /// Unrecognized opcode, preserved for diagnostics.
    Undefined { opcode: u8 },
    /// Filter: execution continues only where `cond` holds. Synthetic.
    Assume { cond: Condition },
    /// Obligation the downstream domain must discharge. Synthetic.
    Assert { check: AssertionCheck },
}

impl Instruction {
    /// Jump target, if this is any kind of jump.
    pub fn jump_target(&self) -> Option<Label> {
        match self {
            Instruction::Jmp { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// Whether control cannot fall through to the next instruction.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Exit | Instruction::Jmp { cond: None, .. }
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Bin { op, is64, dst, v, .. } => {
                if *is64 {
                    write!(f, "{dst} {} {v}", op.symbol())
                } else {
                    write!(f, "w{} {} {v}", dst.as_u8(), op.symbol())
                }
            }
            Instruction::Un { op, dst } => match op {
                UnOp::Neg => write!(f, "{dst} = -{dst}"),
                UnOp::Le16 => write!(f, "{dst} = le16 {dst}"),
                UnOp::Le32 => write!(f, "{dst} = le32 {dst}"),
                UnOp::Le64 => write!(f, "{dst} = le64 {dst}"),
                UnOp::Be16 => write!(f, "{dst} = be16 {dst}"),
                UnOp::Be32 => write!(f, "{dst} = be32 {dst}"),
                UnOp::Be64 => write!(f, "{dst} = be64 {dst}"),
            },
            Instruction::LoadMapFd { dst, map_fd } => write!(f, "{dst} = map_fd {map_fd}"),
            Instruction::Call { func } => write!(f, "call {func}"),
            Instruction::Exit => write!(f, "exit"),
            Instruction::Jmp { cond: None, target } => write!(f, "goto {target}"),
            Instruction::Jmp {
                cond: Some(cond),
                target,
            } => write!(f, "if {cond} goto {target}"),
            Instruction::Mem {
                access,
                value,
                is_load: true,
            } => write!(f, "{value} = {access}"),
            Instruction::Mem {
                access,
                value,
                is_load: false,
            } => write!(f, "{access} = {value}"),
            Instruction::Packet { width, reg, offset } => {
                write!(f, "r0 = packet[{}", offset)?;
                if let Some(r) = reg {
                    write!(f, " + {r}")?;
                }
                write!(f, "]:{}", width.bytes())
            }
            Instruction::LockAdd { access, value } => {
                write!(f, "lock {access} += {value}")
            }
            Instruction::Undefined { opcode } => write!(f, "undefined #{opcode:#04x}"),
            Instruction::Assume { cond } => write!(f, "assume {cond}"),
            Instruction::Assert { check } => write!(f, "assert {check}"),
        }
    }
}

/// Decoded program: `(Label, Instruction)` pairs in program order.
pub type InstructionSeq = Vec<(Label, Instruction)>;
