use std::fmt;
use std::ops::{Add, Neg, Sub};

/// Signed 64-bit integer with explicit overflow semantics.
///
/// `i64::MAX` and `i64::MIN` are reserved as +∞ and −∞ sentinels. Arithmetic
/// that overflows saturates to the sentinel of the matching sign, and a
/// sentinel absorbs further arithmetic (∞ + x = ∞). Adding two infinities of
/// opposite sign has no meaningful result and panics.
///
/// All edge-weight arithmetic in [`AdaptGraph`](super::AdaptGraph) goes
/// through this type so a bound relaxation can never silently wrap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SafeI64(i64);

impl SafeI64 {
    /// Positive infinity sentinel.
    pub const INFINITY: SafeI64 = SafeI64(i64::MAX);
    /// Negative infinity sentinel.
    pub const NEG_INFINITY: SafeI64 = SafeI64(i64::MIN);
    /// The zero weight.
    pub const ZERO: SafeI64 = SafeI64(0);

    /// Wrap a finite value. `i64::MAX` / `i64::MIN` map onto the infinities.
    pub const fn new(v: i64) -> SafeI64 {
        SafeI64(v)
    }

    pub const fn is_finite(self) -> bool {
        self.0 != i64::MAX && self.0 != i64::MIN
    }

    pub const fn is_infinite(self) -> bool {
        !self.is_finite()
    }

    /// The underlying value, or `None` for an infinity.
    pub const fn finite_value(self) -> Option<i64> {
        if self.is_finite() {
            Some(self.0)
        } else {
            None
        }
    }

    /// The smaller of two weights. Used by the relaxation step of closure.
    pub fn min(self, other: SafeI64) -> SafeI64 {
        std::cmp::Ord::min(self, other)
    }
}

impl From<i64> for SafeI64 {
    fn from(v: i64) -> SafeI64 {
        SafeI64::new(v)
    }
}

impl Add for SafeI64 {
    type Output = SafeI64;

    fn add(self, rhs: SafeI64) -> SafeI64 {
        if self.is_infinite() || rhs.is_infinite() {
            if self.is_infinite() && rhs.is_infinite() && self != rhs {
                panic!("SafeI64: sum of opposite infinities is undefined");
            }
            return if self.is_infinite() { self } else { rhs };
        }
        // Saturation lands exactly on a sentinel, which is the intended
        // reading: the true sum is unrepresentable, so it is an infinity.
        SafeI64(self.0.saturating_add(rhs.0))
    }
}

impl Sub for SafeI64 {
    type Output = SafeI64;

    fn sub(self, rhs: SafeI64) -> SafeI64 {
        self + (-rhs)
    }
}

impl Neg for SafeI64 {
    type Output = SafeI64;

    fn neg(self) -> SafeI64 {
        match self {
            SafeI64::INFINITY => SafeI64::NEG_INFINITY,
            SafeI64::NEG_INFINITY => SafeI64::INFINITY,
            SafeI64(v) => SafeI64(-v),
        }
    }
}

impl fmt::Display for SafeI64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SafeI64::INFINITY => write!(f, "+oo"),
            SafeI64::NEG_INFINITY => write!(f, "-oo"),
            SafeI64(v) => write!(f, "{v}"),
        }
    }
}
