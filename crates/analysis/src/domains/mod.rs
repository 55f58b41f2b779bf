//! Abstract domains
//!
//! Three lattices approximate concrete values: sign, nullability, and an
//! integer interval. [`AbstractValue`] composes them into the joint triple
//! every variable maps to.

pub mod nullability;
pub mod range;
pub mod sign;

pub use nullability::Nullability;
pub use range::{Bound, Interval};
pub use sign::Sign;

use crate::ast::Const;
use crate::config::AnalysisConfig;

/// Operations every abstract domain provides. Join must be commutative,
/// associative, and idempotent, with bottom as identity and top as
/// absorbing element.
pub trait Lattice: Clone + PartialEq + Sized {
    fn bottom() -> Self;
    fn top() -> Self;
    fn is_bottom(&self) -> bool;
    fn is_top(&self) -> bool;
    fn join(&self, other: &Self) -> Self;
    fn meet(&self, other: &Self) -> Self;
    /// Widen `self` (the previous value at a loop header) by `new` (the
    /// freshly joined incoming value). `iteration` counts prior visits to
    /// that header; widening proper starts once it reaches `threshold`.
    fn widen(&self, new: &Self, iteration: usize, threshold: usize) -> Self;
}

/// The joint abstract value of one variable
///
/// A null or non-numeric value legitimately carries bottom numeric
/// components; reachability is a property of whole states, not of
/// individual triples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AbstractValue {
    pub sign: Sign,
    pub null: Nullability,
    pub range: Interval,
}

impl AbstractValue {
    pub fn top() -> Self {
        AbstractValue {
            sign: Sign::top(),
            null: Nullability::top(),
            range: Interval::top(),
        }
    }

    pub fn bottom() -> Self {
        AbstractValue {
            sign: Sign::bottom(),
            null: Nullability::bottom(),
            range: Interval::bottom(),
        }
    }

    /// A value known not to be null with unknown numeric content
    pub fn not_null() -> Self {
        AbstractValue {
            sign: Sign::top(),
            null: Nullability::NotNull,
            range: Interval::top(),
        }
    }

    /// The null sentinel: definitely null, no numeric content
    pub fn null() -> Self {
        AbstractValue {
            sign: Sign::bottom(),
            null: Nullability::DefinitelyNull,
            range: Interval::bottom(),
        }
    }

    /// A non-null object with no numeric model (strings, fresh objects)
    pub fn object() -> Self {
        AbstractValue {
            sign: Sign::bottom(),
            null: Nullability::NotNull,
            range: Interval::bottom(),
        }
    }

    pub fn of_int(value: i64) -> Self {
        AbstractValue {
            sign: Sign::of(value),
            null: Nullability::NotNull,
            range: Interval::constant(value),
        }
    }

    pub fn of_float(value: f64) -> Self {
        AbstractValue {
            sign: Sign::of_float(value),
            null: Nullability::NotNull,
            range: Interval::of_float(value),
        }
    }

    /// Booleans coerce to {0, 1}
    pub fn of_bool(value: bool) -> Self {
        AbstractValue {
            sign: if value { Sign::Pos } else { Sign::Zero },
            null: Nullability::NotNull,
            range: Interval::constant(i64::from(value)),
        }
    }

    pub fn of_const(value: &Const) -> Self {
        match value {
            Const::Int(k) => AbstractValue::of_int(*k),
            Const::Float(f) => AbstractValue::of_float(*f),
            Const::Bool(b) => AbstractValue::of_bool(*b),
            Const::Null => AbstractValue::null(),
            Const::Other => AbstractValue::object(),
        }
    }

    /// The value a function returns when it falls off the end
    pub fn implicit_return() -> Self {
        AbstractValue {
            sign: Sign::bottom(),
            null: Nullability::top(),
            range: Interval::bottom(),
        }
    }

    pub fn is_top(&self) -> bool {
        self.sign.is_top() && self.null.is_top() && self.range.is_top()
    }

    /// True when no concrete value at all is described: the variable can
    /// be neither null nor any number nor an object. Nullability bottom
    /// is the authoritative signal; numeric bottoms alone only rule the
    /// numbers out.
    pub fn is_impossible(&self) -> bool {
        self.null.is_bottom()
    }

    /// True when the numeric half is empty, meaning the value cannot be a
    /// number. Branch refinement on a comparison uses this to prune.
    pub fn has_no_number(&self) -> bool {
        self.sign.is_bottom() || self.range.is_bottom()
    }

    pub fn join(&self, other: &Self) -> Self {
        AbstractValue {
            sign: self.sign.join(&other.sign),
            null: self.null.join(&other.null),
            range: self.range.join(&other.range),
        }
    }

    pub fn meet(&self, other: &Self) -> Self {
        AbstractValue {
            sign: self.sign.meet(&other.sign),
            null: self.null.meet(&other.null),
            range: self.range.meet(&other.range),
        }
    }

    pub fn widen(&self, new: &Self, iteration: usize, threshold: usize) -> Self {
        AbstractValue {
            sign: self.sign.widen(&new.sign, iteration, threshold),
            null: self.null.widen(&new.null, iteration, threshold),
            range: self.range.widen(&new.range, iteration, threshold),
        }
    }

    /// Pin the components of disabled domains to top, so a disabled
    /// domain is indistinguishable from one that always answers top.
    pub fn masked(mut self, config: &AnalysisConfig) -> Self {
        if !config.enable_sign_domain {
            self.sign = Sign::top();
        }
        if !config.enable_nullability_domain {
            self.null = Nullability::top();
        }
        if !config.enable_range_domain {
            self.range = Interval::top();
        }
        self
    }

    /// Truncated shape used in context keys
    pub fn truncate_for_context(&self) -> Self {
        AbstractValue {
            sign: self.sign,
            null: self.null,
            range: self.range.truncate_for_context(),
        }
    }
}
