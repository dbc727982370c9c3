//! Typed intermediate representation for abstract interpretation
//!
//! The analysis CFG carries strongly typed numeric statements instead of
//! machine instructions: only variables are typed, literals take their type
//! from the variable they appear next to, and the type lattice is flat.
//! This is the substrate every abstract-interpretation pass runs over.

pub mod cfg;
pub mod stmt;
pub mod types;

pub use cfg::{BasicBlock, Cfg, CfgRev};
pub use stmt::{BinaryOperation, Statement};
pub use types::{
    DebugInfo, LinearConstraint, LinearExpr, Relation, VarType, Variable, VariableFactory,
};
