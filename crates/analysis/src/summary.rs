//! Function summaries and the context-keyed summary cache
//!
//! A summary is the compact abstract contract of one function under one
//! calling context: what it assumes about parameters, what it leaves them
//! as, what it returns, and what it found along the way.

use crate::diagnostics::Diagnostic;
use crate::domains::{AbstractValue, Interval, Lattice, Nullability, Sign};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSummary {
    /// Parameter values assumed at entry under this context
    pub preconditions: BTreeMap<String, AbstractValue>,
    /// Parameter values at the exit block
    pub post_states: BTreeMap<String, AbstractValue>,
    /// Join of all returned values
    pub ret: AbstractValue,
    /// Global-like names written by this function or its callees
    pub modifies: BTreeSet<String>,
    pub may_do_io: bool,
    /// Findings produced while analyzing under this context
    pub diagnostics: Vec<Diagnostic>,
}

impl FunctionSummary {
    /// The conservative summary: anything may come back, anything may
    /// have happened. Used for unresolvable callees and for functions
    /// whose analysis failed.
    pub fn top() -> Self {
        FunctionSummary {
            preconditions: BTreeMap::new(),
            post_states: BTreeMap::new(),
            ret: AbstractValue::top(),
            modifies: BTreeSet::new(),
            may_do_io: true,
            diagnostics: Vec::new(),
        }
    }

    /// Unknown callee under `treat_unknown_callees_as_pure`: no side
    /// effects and a non-null result, numerics still unknown.
    pub fn pure_unknown() -> Self {
        FunctionSummary {
            preconditions: BTreeMap::new(),
            post_states: BTreeMap::new(),
            ret: AbstractValue {
                sign: Sign::top(),
                null: Nullability::NotNull,
                range: Interval::top(),
            },
            modifies: BTreeSet::new(),
            may_do_io: false,
            diagnostics: Vec::new(),
        }
    }

    /// Seed for the recursive-SCC fixpoint: the return value is bottom so
    /// the first round only sees base cases.
    pub fn seed() -> Self {
        FunctionSummary {
            preconditions: BTreeMap::new(),
            post_states: BTreeMap::new(),
            ret: AbstractValue::bottom(),
            modifies: BTreeSet::new(),
            may_do_io: false,
            diagnostics: Vec::new(),
        }
    }

    /// Semantic equality, ignoring diagnostics. The SCC fixpoint iterates
    /// on this; diagnostics are deterministic replays and would only mask
    /// convergence.
    pub fn same_shape(&self, other: &Self) -> bool {
        self.preconditions == other.preconditions
            && self.post_states == other.post_states
            && self.ret == other.ret
            && self.modifies == other.modifies
            && self.may_do_io == other.may_do_io
    }

    /// Summary-level widening: components of the return value and the
    /// parameter post-states that are still changing are forced to top.
    pub fn widen_unstable(&mut self, old: &Self) {
        self.ret = force_top_changed(&old.ret, &self.ret);
        for (name, value) in self.post_states.iter_mut() {
            if let Some(old_value) = old.post_states.get(name) {
                *value = force_top_changed(old_value, value);
            }
        }
    }
}

fn force_top_changed(old: &AbstractValue, new: &AbstractValue) -> AbstractValue {
    AbstractValue {
        sign: if old.sign == new.sign {
            new.sign
        } else {
            Sign::top()
        },
        null: if old.null == new.null {
            new.null
        } else {
            Nullability::top()
        },
        range: if old.range == new.range {
            new.range
        } else {
            Interval::top()
        },
    }
}

/// Cache key: the truncated joint values of the positional arguments.
/// Sign and nullability are used exactly; ranges collapse to the small
/// set of representative shapes, which bounds the number of distinct
/// contexts per function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey {
    args: Vec<AbstractValue>,
}

impl ContextKey {
    pub fn from_args(args: &[AbstractValue]) -> Self {
        ContextKey {
            args: args.iter().map(AbstractValue::truncate_for_context).collect(),
        }
    }

    /// The context of a function analyzed without caller information
    pub fn entry(param_count: usize) -> Self {
        ContextKey {
            args: vec![AbstractValue::top(); param_count],
        }
    }

    pub fn args(&self) -> &[AbstractValue] {
        &self.args
    }
}

/// Per-function LRU cache of summaries, keyed by context.
///
/// Eviction only costs recomputation; no observable semantics depend on
/// it. Inserts are the single mutation point, so a driver sharing the
/// cache across threads serializes here.
#[derive(Debug)]
pub struct SummaryCache {
    capacity: usize,
    functions: HashMap<String, FunctionEntry>,
}

#[derive(Debug, Default)]
struct FunctionEntry {
    summaries: HashMap<ContextKey, FunctionSummary>,
    /// Least-recently-used first
    order: VecDeque<ContextKey>,
}

impl SummaryCache {
    pub fn new(capacity: usize) -> Self {
        SummaryCache {
            capacity: capacity.max(1),
            functions: HashMap::new(),
        }
    }

    pub fn get(&mut self, function: &str, key: &ContextKey) -> Option<&FunctionSummary> {
        let entry = self.functions.get_mut(function)?;
        if !entry.summaries.contains_key(key) {
            return None;
        }
        entry.order.retain(|k| k != key);
        entry.order.push_back(key.clone());
        entry.summaries.get(key)
    }

    pub fn contains(&self, function: &str, key: &ContextKey) -> bool {
        self.functions
            .get(function)
            .is_some_and(|e| e.summaries.contains_key(key))
    }

    pub fn insert(&mut self, function: &str, key: ContextKey, summary: FunctionSummary) {
        let entry = self.functions.entry(function.to_string()).or_default();
        if !entry.summaries.contains_key(&key) {
            entry.order.push_back(key.clone());
        }
        entry.summaries.insert(key, summary);
        while entry.order.len() > self.capacity {
            if let Some(evicted) = entry.order.pop_front() {
                entry.summaries.remove(&evicted);
                debug!(function, "evicted summary context");
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::Bound;

    fn key_of_int(k: i64) -> ContextKey {
        ContextKey::from_args(&[AbstractValue::of_int(k)])
    }

    #[test]
    fn test_context_key_truncates_large_constants() {
        // two large constants collapse to the same [0, +inf] shape
        let a = key_of_int(1000);
        let b = key_of_int(2000);
        assert_eq!(a, b);
        // small constants stay distinguishable
        assert_ne!(key_of_int(1), key_of_int(2));
    }

    #[test]
    fn test_context_key_keeps_sign_exact() {
        let pos = ContextKey::from_args(&[AbstractValue {
            sign: Sign::Pos,
            null: Nullability::NotNull,
            range: Interval::top(),
        }]);
        let top = ContextKey::from_args(&[AbstractValue::not_null()]);
        assert_ne!(pos, top);
    }

    #[test]
    fn test_entry_key_is_all_top() {
        let key = ContextKey::entry(2);
        assert!(key.args().iter().all(|v| v.is_top()));
    }

    #[test]
    fn test_same_shape_ignores_diagnostics() {
        use crate::ast::SourceLoc;
        use crate::diagnostics::ErrorKind;

        let a = FunctionSummary::top();
        let mut b = FunctionSummary::top();
        b.diagnostics.push(Diagnostic::new(
            ErrorKind::DivByZero,
            "x",
            "f",
            SourceLoc::new("t.mica", 0, 0),
        ));
        assert!(a.same_shape(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_widen_unstable_forces_changed_components_to_top() {
        let old = FunctionSummary {
            ret: AbstractValue::of_int(1),
            ..FunctionSummary::seed()
        };
        let mut new = FunctionSummary {
            ret: AbstractValue::of_int(1).join(&AbstractValue::of_int(2)),
            ..FunctionSummary::seed()
        };
        new.widen_unstable(&old);
        assert!(new.ret.range.is_top());
        assert!(new.ret.sign == Sign::Pos || new.ret.sign.is_top());
        // nullability did not change, so it is untouched
        assert_eq!(new.ret.null, Nullability::NotNull);
    }

    #[test]
    fn test_cache_round_trip() {
        let mut cache = SummaryCache::new(4);
        let key = key_of_int(1);
        cache.insert("f", key.clone(), FunctionSummary::top());
        assert!(cache.get("f", &key).is_some());
        assert!(cache.get("g", &key).is_none());
    }

    #[test]
    fn test_cache_evicts_least_recently_used() {
        let mut cache = SummaryCache::new(2);
        cache.insert("f", key_of_int(1), FunctionSummary::top());
        cache.insert("f", key_of_int(2), FunctionSummary::top());
        // touch key 1 so key 2 becomes the eviction candidate
        assert!(cache.get("f", &key_of_int(1)).is_some());
        cache.insert("f", key_of_int(3), FunctionSummary::top());
        assert!(cache.contains("f", &key_of_int(1)));
        assert!(!cache.contains("f", &key_of_int(2)));
        assert!(cache.contains("f", &key_of_int(3)));
    }

    #[test]
    fn test_widen_unstable_checks_range_growth() {
        let old = FunctionSummary {
            ret: AbstractValue {
                sign: Sign::Pos,
                null: Nullability::NotNull,
                range: Interval::new(Bound::Finite(1), Bound::Finite(3)),
            },
            ..FunctionSummary::seed()
        };
        let mut same = old.clone();
        same.widen_unstable(&old);
        assert!(same.same_shape(&old));
    }
}
