//! Typed numeric statements
//!
//! The closed statement variant of the analysis CFG. Statements are plain
//! values: constructing one never mutates anything, and consumers take them
//! apart by exhaustive match.

use std::fmt;

use super::types::{DebugInfo, LinearConstraint, LinearExpr, Variable};

/// Arithmetic and bitwise operations of a [`Statement::BinaryOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperation {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

impl BinaryOperation {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOperation::Add => "+",
            BinaryOperation::Sub => "-",
            BinaryOperation::Mul => "*",
            BinaryOperation::SDiv => "/",
            BinaryOperation::UDiv => "/u",
            BinaryOperation::SRem => "%",
            BinaryOperation::URem => "%u",
            BinaryOperation::And => "&",
            BinaryOperation::Or => "|",
            BinaryOperation::Xor => "^",
            BinaryOperation::Shl => "<<",
            BinaryOperation::LShr => ">>",
            BinaryOperation::AShr => ">>a",
        }
    }
}

/// One statement of an analysis basic block.
///
/// Array statements carry an `elem_size` expression rather than a constant:
/// eBPF frontends sometimes only know the accessed width in a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `lhs = left op right`
    BinaryOp {
        lhs: Variable,
        op: BinaryOperation,
        left: LinearExpr,
        right: LinearExpr,
    },
    /// `lhs = rhs`
    Assign { lhs: Variable, rhs: LinearExpr },
    /// Filter the abstract state by `constraint`.
    Assume { constraint: LinearConstraint },
    /// `lhs = if cond then on_true else on_false`
    Select {
        lhs: Variable,
        cond: LinearConstraint,
        on_true: LinearExpr,
        on_false: LinearExpr,
    },
    /// A proof obligation; failure is a verification error, not a crash.
    Assert {
        constraint: LinearConstraint,
        debug: DebugInfo,
    },
    /// Forget everything known about `lhs`.
    Havoc { lhs: Variable },
    /// `array[lb..ub] := value` for every `elem_size`-aligned index, with
    /// all other cells undefined afterwards.
    ArrayInit {
        array: Variable,
        elem_size: LinearExpr,
        lb: LinearExpr,
        ub: LinearExpr,
        value: LinearExpr,
    },
    /// `array[lb..ub] := value`. `is_singleton` promises the range covers
    /// exactly one cell, which lets the array domain do a strong update.
    ArrayStore {
        array: Variable,
        elem_size: LinearExpr,
        lb: LinearExpr,
        ub: LinearExpr,
        value: LinearExpr,
        is_singleton: bool,
    },
    /// `lhs = array[index]`
    ArrayLoad {
        lhs: Variable,
        array: Variable,
        elem_size: LinearExpr,
        index: LinearExpr,
    },
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::BinaryOp {
                lhs,
                op,
                left,
                right,
            } => write!(f, "{lhs} = {left} {} {right}", op.symbol()),
            Statement::Assign { lhs, rhs } => write!(f, "{lhs} = {rhs}"),
            Statement::Assume { constraint } => write!(f, "assume({constraint})"),
            Statement::Select {
                lhs,
                cond,
                on_true,
                on_false,
            } => write!(f, "{lhs} = ite({cond}, {on_true}, {on_false})"),
            Statement::Assert { constraint, debug } => {
                write!(f, "assert({constraint})")?;
                if debug.has_debug() {
                    write!(f, " // {debug}")?;
                }
                Ok(())
            }
            Statement::Havoc { lhs } => write!(f, "havoc({lhs})"),
            Statement::ArrayInit {
                array,
                lb,
                ub,
                value,
                ..
            } => write!(f, "{array}[{lb}...{ub}] := {value}"),
            Statement::ArrayStore {
                array,
                elem_size,
                lb,
                ub,
                value,
                ..
            } => {
                if lb == ub {
                    write!(f, "array_store({array}, {lb}, {value}, sz={elem_size})")
                } else {
                    write!(
                        f,
                        "array_store({array}, {lb}..{ub}, {value}, sz={elem_size})"
                    )
                }
            }
            Statement::ArrayLoad {
                lhs,
                array,
                elem_size,
                index,
            } => write!(f, "{lhs} = array_load({array}, {index}, sz={elem_size})"),
        }
    }
}
