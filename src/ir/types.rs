//! Variables, linear expressions, and constraints

use std::collections::HashMap;
use std::fmt;

use num_bigint::BigInt;
use num_traits::Zero;

/// Type of a numeric variable. The lattice is flat: there is no subtyping,
/// and literals are typed by the variable they appear next to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VarType {
    Bool,
    Int,
    Real,
    Ptr,
    ArrayBool,
    ArrayInt,
    ArrayReal,
    ArrayPtr,
}

impl VarType {
    pub fn is_array(self) -> bool {
        matches!(
            self,
            VarType::ArrayBool | VarType::ArrayInt | VarType::ArrayReal | VarType::ArrayPtr
        )
    }
}

/// A typed variable. Cheap to copy, compare, and hash; the name lives in the
/// [`VariableFactory`] that minted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Variable {
    id: u32,
    ty: VarType,
}

impl Variable {
    pub fn ty(self) -> VarType {
        self.ty
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.id)
    }
}

/// Mints and interns variables. One factory per analyzed program; the
/// downstream domain keeps it to intern its own ghost variables.
#[derive(Debug, Default)]
pub struct VariableFactory {
    vars: Vec<(String, VarType)>,
    index: HashMap<String, u32>,
}

impl VariableFactory {
    pub fn new() -> VariableFactory {
        VariableFactory::default()
    }

    /// The variable named `name`, minting it on first use.
    ///
    /// # Panics
    /// Panics if `name` was previously minted with a different type; a
    /// variable's type never changes.
    pub fn make(&mut self, name: &str, ty: VarType) -> Variable {
        if let Some(&id) = self.index.get(name) {
            let minted = self.vars[id as usize].1;
            assert!(
                minted == ty,
                "variable {name} minted as {minted:?}, requested as {ty:?}"
            );
            return Variable { id, ty };
        }
        let id = self.vars.len() as u32;
        self.vars.push((name.to_string(), ty));
        self.index.insert(name.to_string(), id);
        Variable { id, ty }
    }

    /// The name a variable was minted under.
    pub fn name(&self, var: Variable) -> &str {
        &self.vars[var.id as usize].0
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// An affine form over typed variables with arbitrary-precision
/// coefficients: `c1*x1 + ... + cn*xn + k`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearExpr {
    terms: Vec<(Variable, BigInt)>,
    constant: BigInt,
}

impl LinearExpr {
    pub fn constant(n: impl Into<BigInt>) -> LinearExpr {
        LinearExpr {
            terms: Vec::new(),
            constant: n.into(),
        }
    }

    pub fn var(v: Variable) -> LinearExpr {
        LinearExpr {
            terms: vec![(v, BigInt::from(1))],
            constant: BigInt::zero(),
        }
    }

    /// `self + coeff * v`, merging with an existing term for `v`.
    pub fn add_term(mut self, v: Variable, coeff: impl Into<BigInt>) -> LinearExpr {
        let coeff = coeff.into();
        match self.terms.iter_mut().find(|(tv, _)| *tv == v) {
            Some((_, c)) => *c += coeff,
            None => self.terms.push((v, coeff)),
        }
        self.normalize()
    }

    pub fn add(mut self, other: LinearExpr) -> LinearExpr {
        for (v, c) in other.terms {
            self = self.add_term(v, c);
        }
        self.constant += other.constant;
        self
    }

    pub fn sub(self, other: LinearExpr) -> LinearExpr {
        self.add(other.negate())
    }

    pub fn negate(mut self) -> LinearExpr {
        for (_, c) in &mut self.terms {
            *c = -std::mem::take(c);
        }
        self.constant = -self.constant;
        self
    }

    pub fn scale(mut self, k: impl Into<BigInt>) -> LinearExpr {
        let k = k.into();
        for (_, c) in &mut self.terms {
            *c *= &k;
        }
        self.constant *= k;
        self.normalize()
    }

    pub fn plus_const(mut self, n: impl Into<BigInt>) -> LinearExpr {
        self.constant += n.into();
        self
    }

    fn normalize(mut self) -> LinearExpr {
        self.terms.retain(|(_, c)| !c.is_zero());
        self
    }

    pub fn terms(&self) -> &[(Variable, BigInt)] {
        &self.terms
    }

    pub fn constant_part(&self) -> &BigInt {
        &self.constant
    }

    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    /// Variables mentioned with a non-zero coefficient.
    pub fn variables(&self) -> impl Iterator<Item = Variable> + '_ {
        self.terms.iter().map(|&(v, _)| v)
    }
}

impl From<Variable> for LinearExpr {
    fn from(v: Variable) -> LinearExpr {
        LinearExpr::var(v)
    }
}

impl From<i64> for LinearExpr {
    fn from(n: i64) -> LinearExpr {
        LinearExpr::constant(n)
    }
}

impl fmt::Display for LinearExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (v, c) in &self.terms {
            if c.is_zero() {
                continue;
            }
            if first {
                if *c == BigInt::from(1) {
                    write!(f, "{v}")?;
                } else if *c == BigInt::from(-1) {
                    write!(f, "-{v}")?;
                } else {
                    write!(f, "{c}*{v}")?;
                }
                first = false;
            } else if *c == BigInt::from(1) {
                write!(f, " + {v}")?;
            } else if *c == BigInt::from(-1) {
                write!(f, " - {v}")?;
            } else if c.sign() == num_bigint::Sign::Minus {
                write!(f, " - {}*{v}", -c)?;
            } else {
                write!(f, " + {c}*{v}")?;
            }
        }
        if first {
            write!(f, "{}", self.constant)?;
        } else if !self.constant.is_zero() {
            if self.constant.sign() == num_bigint::Sign::Minus {
                write!(f, " - {}", -self.constant.clone())?;
            } else {
                write!(f, " + {}", self.constant)?;
            }
        }
        Ok(())
    }
}

/// How a constraint's expression relates to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    /// `e == 0`
    Eq,
    /// `e <= 0`
    Le,
    /// `e < 0`
    Lt,
    /// `e != 0`
    Ne,
}

/// A comparison of an affine expression against zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConstraint {
    pub expr: LinearExpr,
    pub relation: Relation,
}

impl LinearConstraint {
    /// `lhs == rhs`
    pub fn eq(lhs: impl Into<LinearExpr>, rhs: impl Into<LinearExpr>) -> LinearConstraint {
        LinearConstraint {
            expr: lhs.into().sub(rhs.into()),
            relation: Relation::Eq,
        }
    }

    /// `lhs != rhs`
    pub fn ne(lhs: impl Into<LinearExpr>, rhs: impl Into<LinearExpr>) -> LinearConstraint {
        LinearConstraint {
            expr: lhs.into().sub(rhs.into()),
            relation: Relation::Ne,
        }
    }

    /// `lhs <= rhs`
    pub fn le(lhs: impl Into<LinearExpr>, rhs: impl Into<LinearExpr>) -> LinearConstraint {
        LinearConstraint {
            expr: lhs.into().sub(rhs.into()),
            relation: Relation::Le,
        }
    }

    /// `lhs < rhs`
    pub fn lt(lhs: impl Into<LinearExpr>, rhs: impl Into<LinearExpr>) -> LinearConstraint {
        LinearConstraint {
            expr: lhs.into().sub(rhs.into()),
            relation: Relation::Lt,
        }
    }

    /// `lhs >= rhs`
    pub fn ge(lhs: impl Into<LinearExpr>, rhs: impl Into<LinearExpr>) -> LinearConstraint {
        LinearConstraint::le(rhs, lhs)
    }

    /// `lhs > rhs`
    pub fn gt(lhs: impl Into<LinearExpr>, rhs: impl Into<LinearExpr>) -> LinearConstraint {
        LinearConstraint::lt(rhs, lhs)
    }

    /// The constraint that always holds.
    pub fn always_true() -> LinearConstraint {
        LinearConstraint::eq(LinearExpr::constant(0), LinearExpr::constant(0))
    }

    /// The constraint that never holds.
    pub fn always_false() -> LinearConstraint {
        LinearConstraint::eq(LinearExpr::constant(1), LinearExpr::constant(0))
    }

    pub fn negate(self) -> LinearConstraint {
        match self.relation {
            Relation::Eq => LinearConstraint {
                expr: self.expr,
                relation: Relation::Ne,
            },
            Relation::Ne => LinearConstraint {
                expr: self.expr,
                relation: Relation::Eq,
            },
            // not (e <= 0)  <=>  e > 0  <=>  -e < 0
            Relation::Le => LinearConstraint {
                expr: self.expr.negate(),
                relation: Relation::Lt,
            },
            // not (e < 0)  <=>  e >= 0  <=>  -e <= 0
            Relation::Lt => LinearConstraint {
                expr: self.expr.negate(),
                relation: Relation::Le,
            },
        }
    }
}

impl fmt::Display for LinearConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rel = match self.relation {
            Relation::Eq => "==",
            Relation::Le => "<=",
            Relation::Lt => "<",
            Relation::Ne => "!=",
        };
        write!(f, "{} {rel} 0", self.expr)
    }
}

/// Source position carried by assertions, for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugInfo {
    pub file: String,
    pub line: u32,
    pub col: u32,
}

impl DebugInfo {
    pub fn new(file: impl Into<String>, line: u32, col: u32) -> DebugInfo {
        DebugInfo {
            file: file.into(),
            line,
            col,
        }
    }

    pub fn has_debug(&self) -> bool {
        !self.file.is_empty()
    }
}

impl fmt::Display for DebugInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}
