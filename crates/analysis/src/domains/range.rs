//! Integer interval lattice
//!
//! Closed intervals with endpoints in ℤ ∪ {−∞, +∞}. Empty intervals are
//! canonicalized to the dedicated bottom. Endpoint arithmetic saturates
//! outward instead of wrapping.

use super::Lattice;

/// Interval endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bound {
    NegInf,
    Finite(i64),
    PosInf,
}

impl Bound {
    /// Largest value strictly below this bound. Used to refine `x < b`.
    pub fn pred(self) -> Bound {
        match self {
            Bound::Finite(k) => match k.checked_sub(1) {
                Some(p) => Bound::Finite(p),
                None => Bound::NegInf,
            },
            inf => inf,
        }
    }

    /// Smallest value strictly above this bound. Used to refine `x > b`.
    pub fn succ(self) -> Bound {
        match self {
            Bound::Finite(k) => match k.checked_add(1) {
                Some(s) => Bound::Finite(s),
                None => Bound::PosInf,
            },
            inf => inf,
        }
    }

    fn to_ext(self) -> Ext {
        match self {
            Bound::NegInf => Ext::NInf,
            Bound::Finite(k) => Ext::Fin(k as i128),
            Bound::PosInf => Ext::PInf,
        }
    }
}

/// Extended integer used for endpoint arithmetic. Products and sums of
/// i64 endpoints always fit in i128, so only the final clamp back to
/// `Bound` can saturate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Ext {
    NInf,
    Fin(i128),
    PInf,
}

impl Ext {
    fn add(self, other: Ext) -> Ext {
        match (self, other) {
            (Ext::Fin(a), Ext::Fin(b)) => Ext::Fin(a + b),
            (Ext::NInf, _) | (_, Ext::NInf) => Ext::NInf,
            _ => Ext::PInf,
        }
    }

    /// Multiplication with the 0 · ∞ = 0 convention
    fn mul(self, other: Ext) -> Ext {
        match (self, other) {
            (Ext::Fin(0), _) | (_, Ext::Fin(0)) => Ext::Fin(0),
            (Ext::Fin(a), Ext::Fin(b)) => Ext::Fin(a * b),
            (Ext::PInf, Ext::PInf) | (Ext::NInf, Ext::NInf) => Ext::PInf,
            (Ext::PInf, Ext::NInf) | (Ext::NInf, Ext::PInf) => Ext::NInf,
            (Ext::PInf, Ext::Fin(b)) | (Ext::Fin(b), Ext::PInf) => {
                if b > 0 { Ext::PInf } else { Ext::NInf }
            }
            (Ext::NInf, Ext::Fin(b)) | (Ext::Fin(b), Ext::NInf) => {
                if b > 0 { Ext::NInf } else { Ext::PInf }
            }
        }
    }

    /// Quotient for a divisor endpoint known to be nonzero
    fn div(self, other: Ext) -> Ext {
        match (self, other) {
            (Ext::Fin(a), Ext::Fin(b)) => Ext::Fin(a / b),
            (Ext::Fin(_), _) => Ext::Fin(0),
            (Ext::PInf, Ext::PInf) | (Ext::NInf, Ext::NInf) => Ext::PInf,
            (Ext::PInf, Ext::NInf) | (Ext::NInf, Ext::PInf) => Ext::NInf,
            (Ext::PInf, Ext::Fin(b)) => {
                if b > 0 { Ext::PInf } else { Ext::NInf }
            }
            (Ext::NInf, Ext::Fin(b)) => {
                if b > 0 { Ext::NInf } else { Ext::PInf }
            }
        }
    }

    /// Clamp to a lower bound. A value above i64::MAX still admits
    /// i64::MAX as a sound lower bound; a value below i64::MIN does not,
    /// so that side saturates to −∞.
    fn clamp_low(self) -> Bound {
        match self {
            Ext::NInf => Bound::NegInf,
            Ext::PInf => Bound::PosInf,
            Ext::Fin(v) => {
                if v < i64::MIN as i128 {
                    Bound::NegInf
                } else if v > i64::MAX as i128 {
                    Bound::Finite(i64::MAX)
                } else {
                    Bound::Finite(v as i64)
                }
            }
        }
    }

    /// Clamp to an upper bound, saturating to +∞ on the growing side
    fn clamp_high(self) -> Bound {
        match self {
            Ext::NInf => Bound::NegInf,
            Ext::PInf => Bound::PosInf,
            Ext::Fin(v) => {
                if v > i64::MAX as i128 {
                    Bound::PosInf
                } else if v < i64::MIN as i128 {
                    Bound::Finite(i64::MIN)
                } else {
                    Bound::Finite(v as i64)
                }
            }
        }
    }
}

/// An interval, or the canonical empty bottom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    Empty,
    Range { lo: Bound, hi: Bound },
}

impl Lattice for Interval {
    fn bottom() -> Self {
        Interval::Empty
    }

    fn top() -> Self {
        Interval::Range {
            lo: Bound::NegInf,
            hi: Bound::PosInf,
        }
    }

    fn is_bottom(&self) -> bool {
        *self == Interval::Empty
    }

    fn is_top(&self) -> bool {
        matches!(
            self,
            Interval::Range {
                lo: Bound::NegInf,
                hi: Bound::PosInf
            }
        )
    }

    fn join(&self, other: &Self) -> Self {
        match (*self, *other) {
            (Interval::Empty, x) | (x, Interval::Empty) => x,
            (Interval::Range { lo: a, hi: b }, Interval::Range { lo: c, hi: d }) => {
                Interval::new(a.min(c), b.max(d))
            }
        }
    }

    fn meet(&self, other: &Self) -> Self {
        match (*self, *other) {
            (Interval::Empty, _) | (_, Interval::Empty) => Interval::Empty,
            (Interval::Range { lo: a, hi: b }, Interval::Range { lo: c, hi: d }) => {
                Interval::new(a.max(c), b.min(d))
            }
        }
    }

    fn widen(&self, new: &Self, iteration: usize, threshold: usize) -> Self {
        if iteration < threshold {
            return self.join(new);
        }
        match (*self, *new) {
            (Interval::Empty, x) | (x, Interval::Empty) => x,
            (
                Interval::Range { lo: olo, hi: ohi },
                Interval::Range { lo: nlo, hi: nhi },
            ) => {
                let lo = if nlo >= olo { nlo } else { Bound::NegInf };
                let hi = if nhi <= ohi { nhi } else { Bound::PosInf };
                Interval::new(lo, hi)
            }
        }
    }
}

impl Interval {
    /// Construct with canonicalization: an inverted or purely-infinite
    /// degenerate pair collapses to `Empty`.
    pub fn new(lo: Bound, hi: Bound) -> Self {
        if lo > hi || lo == Bound::PosInf || hi == Bound::NegInf {
            Interval::Empty
        } else {
            Interval::Range { lo, hi }
        }
    }

    pub fn constant(value: i64) -> Self {
        Interval::Range {
            lo: Bound::Finite(value),
            hi: Bound::Finite(value),
        }
    }

    /// `[−∞, hi]`
    pub fn at_most(hi: Bound) -> Self {
        Interval::new(Bound::NegInf, hi)
    }

    /// `[lo, +∞]`
    pub fn at_least(lo: Bound) -> Self {
        Interval::new(lo, Bound::PosInf)
    }

    /// Floor/ceil lift of a float literal
    pub fn of_float(value: f64) -> Self {
        if !value.is_finite() {
            return Interval::top();
        }
        // `as` casts saturate at the i64 limits
        Interval::new(
            Bound::Finite(value.floor() as i64),
            Bound::Finite(value.ceil() as i64),
        )
    }

    pub fn contains(&self, value: i64) -> bool {
        match *self {
            Interval::Empty => false,
            Interval::Range { lo, hi } => lo <= Bound::Finite(value) && Bound::Finite(value) <= hi,
        }
    }

    pub fn contains_zero(&self) -> bool {
        self.contains(0)
    }

    pub fn as_singleton(&self) -> Option<i64> {
        match *self {
            Interval::Range {
                lo: Bound::Finite(a),
                hi: Bound::Finite(b),
            } if a == b => Some(a),
            _ => None,
        }
    }

    pub fn lo(&self) -> Option<Bound> {
        match *self {
            Interval::Empty => None,
            Interval::Range { lo, .. } => Some(lo),
        }
    }

    pub fn hi(&self) -> Option<Bound> {
        match *self {
            Interval::Empty => None,
            Interval::Range { hi, .. } => Some(hi),
        }
    }

    pub fn add(&self, other: &Self) -> Self {
        self.lift2(other, |a, b, c, d| {
            (a.add(c).clamp_low(), b.add(d).clamp_high())
        })
    }

    pub fn neg(&self) -> Self {
        match *self {
            Interval::Empty => Interval::Empty,
            Interval::Range { lo, hi } => {
                let nlo = hi.to_ext().mul(Ext::Fin(-1));
                let nhi = lo.to_ext().mul(Ext::Fin(-1));
                Interval::new(nlo.clamp_low(), nhi.clamp_high())
            }
        }
    }

    pub fn sub(&self, other: &Self) -> Self {
        self.add(&other.neg())
    }

    pub fn mul(&self, other: &Self) -> Self {
        self.lift2(other, |a, b, c, d| {
            let products = [a.mul(c), a.mul(d), b.mul(c), b.mul(d)];
            let lo = *products.iter().min().unwrap();
            let hi = *products.iter().max().unwrap();
            (lo.clamp_low(), hi.clamp_high())
        })
    }

    /// Quotient approximation. A divisor interval containing zero yields
    /// top; the caller is responsible for the divide-by-zero diagnostic.
    pub fn div(&self, other: &Self) -> Self {
        if other.is_bottom() || self.is_bottom() {
            return Interval::Empty;
        }
        if other.contains_zero() {
            return Interval::top();
        }
        self.lift2(other, |a, b, c, d| {
            let quotients = [a.div(c), a.div(d), b.div(c), b.div(d)];
            let lo = *quotients.iter().min().unwrap();
            let hi = *quotients.iter().max().unwrap();
            (lo.clamp_low(), hi.clamp_high())
        })
    }

    /// Remainder approximation: bounded by the divisor magnitude
    pub fn rem(&self, other: &Self) -> Self {
        if other.is_bottom() || self.is_bottom() {
            return Interval::Empty;
        }
        match *other {
            Interval::Range {
                lo: Bound::Finite(c),
                hi: Bound::Finite(d),
            } => {
                let m = c.unsigned_abs().max(d.unsigned_abs());
                if m == 0 {
                    return Interval::top();
                }
                let m = (m - 1).min(i64::MAX as u64) as i64;
                Interval::new(Bound::Finite(-m), Bound::Finite(m))
            }
            _ => Interval::top(),
        }
    }

    fn lift2(&self, other: &Self, f: impl Fn(Ext, Ext, Ext, Ext) -> (Bound, Bound)) -> Self {
        match (*self, *other) {
            (Interval::Empty, _) | (_, Interval::Empty) => Interval::Empty,
            (Interval::Range { lo: a, hi: b }, Interval::Range { lo: c, hi: d }) => {
                let (lo, hi) = f(a.to_ext(), b.to_ext(), c.to_ext(), d.to_ext());
                Interval::new(lo, hi)
            }
        }
    }

    /// Collapse to one of the representative shapes used in context keys:
    /// bottom, a small singleton, `[0, +∞]`, `[−∞, 0]`, or top.
    pub fn truncate_for_context(&self) -> Self {
        const SMALL: i64 = 16;
        match *self {
            Interval::Empty => Interval::Empty,
            Interval::Range { lo, hi } => {
                if let Some(k) = self.as_singleton()
                    && (-SMALL..=SMALL).contains(&k)
                {
                    return Interval::constant(k);
                }
                if lo >= Bound::Finite(0) {
                    Interval::at_least(Bound::Finite(0))
                } else if hi <= Bound::Finite(0) {
                    Interval::at_most(Bound::Finite(0))
                } else {
                    Interval::top()
                }
            }
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interval::Empty => write!(f, "empty"),
            Interval::Range { lo, hi } => {
                match lo {
                    Bound::NegInf => write!(f, "[-inf, ")?,
                    Bound::Finite(k) => write!(f, "[{}, ", k)?,
                    Bound::PosInf => write!(f, "[+inf, ")?,
                }
                match hi {
                    Bound::NegInf => write!(f, "-inf]"),
                    Bound::Finite(k) => write!(f, "{}]", k),
                    Bound::PosInf => write!(f, "+inf]"),
                }
            }
        }
    }
}
