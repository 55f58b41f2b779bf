//! Joint abstract state
//!
//! Maps variable names to joint abstract values at one program point. A
//! missing variable is implicitly top in all components, and top bindings
//! are never stored, so map equality is state equality.
//!
//! Unreachable program points are not a state shape; the solver models
//! them as `Option<AbstractState>::None`.

use crate::domains::AbstractValue;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AbstractState {
    vars: BTreeMap<String, AbstractValue>,
}

impl AbstractState {
    pub fn new() -> Self {
        AbstractState::default()
    }

    pub fn get(&self, name: &str) -> AbstractValue {
        self.vars
            .get(name)
            .copied()
            .unwrap_or_else(AbstractValue::top)
    }

    /// Bind a variable, keeping the map canonical: top bindings are
    /// dropped rather than stored.
    pub fn set(&mut self, name: &str, value: AbstractValue) {
        if value.is_top() {
            self.vars.remove(name);
        } else {
            self.vars.insert(name.to_string(), value);
        }
    }

    /// True when some variable has an impossible value, meaning the point
    /// this state describes cannot be reached with these bindings.
    pub fn has_impossible_binding(&self) -> bool {
        self.vars.values().any(|v| v.is_impossible())
    }

    /// Pointwise join over the union of variable names. A variable bound
    /// on one side only joins with implicit top, so only variables bound
    /// on both sides survive.
    pub fn join(&self, other: &Self) -> Self {
        let mut vars = BTreeMap::new();
        for (name, value) in &self.vars {
            if let Some(other_value) = other.vars.get(name) {
                let joined = value.join(other_value);
                if !joined.is_top() {
                    vars.insert(name.clone(), joined);
                }
            }
        }
        AbstractState { vars }
    }

    /// Pointwise widening; variables bound on one side only widen with
    /// implicit top and drop out, mirroring `join`.
    pub fn widen(&self, new: &Self, iteration: usize, threshold: usize) -> Self {
        let mut vars = BTreeMap::new();
        for (name, old_value) in &self.vars {
            if let Some(new_value) = new.vars.get(name) {
                let widened = old_value.widen(new_value, iteration, threshold);
                if !widened.is_top() {
                    vars.insert(name.clone(), widened);
                }
            }
        }
        AbstractState { vars }
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, &AbstractValue)> {
        self.vars.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
