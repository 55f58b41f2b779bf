//! Nullability lattice
//!
//! Tracks whether a variable may hold the null sentinel. `NotNull` and
//! `DefinitelyNull` are incomparable; `Nullable` is top.

use super::Lattice;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nullability {
    Bottom,
    NotNull,
    DefinitelyNull,
    Nullable,
}

impl Lattice for Nullability {
    fn bottom() -> Self {
        Nullability::Bottom
    }

    fn top() -> Self {
        Nullability::Nullable
    }

    fn is_bottom(&self) -> bool {
        *self == Nullability::Bottom
    }

    fn is_top(&self) -> bool {
        *self == Nullability::Nullable
    }

    fn join(&self, other: &Self) -> Self {
        match (*self, *other) {
            (Nullability::Bottom, x) | (x, Nullability::Bottom) => x,
            (a, b) if a == b => a,
            _ => Nullability::Nullable,
        }
    }

    fn meet(&self, other: &Self) -> Self {
        match (*self, *other) {
            (Nullability::Nullable, x) | (x, Nullability::Nullable) => x,
            (a, b) if a == b => a,
            _ => Nullability::Bottom,
        }
    }

    /// The lattice is finite with height 2, so widening is plain join.
    fn widen(&self, new: &Self, _iteration: usize, _threshold: usize) -> Self {
        self.join(new)
    }
}

impl Nullability {
    pub fn may_be_null(self) -> bool {
        matches!(self, Nullability::DefinitelyNull | Nullability::Nullable)
    }
}
