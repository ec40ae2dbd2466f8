// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! The derived-value graph: [Mapping] (a directed propagation edge between
//! parameters) and [MetaParameter] (a parameter whose value is a pure
//! function of others). A [Mapping] carries a fired-this-tick latch, held
//! from the moment it fires until the engine resets it at the end of the
//! tick, so a feedback loop between mappings can't re-fire within the same
//! tick. A [MetaParameter] carries a plain synchronous re-entrancy guard
//! around its setter instead, since that only needs to survive one call
//! stack, not the rest of the tick.
//!
//! The two are kept as separate concepts rather than merged into one
//! getter/setter object: a [Mapping] is a pure propagation edge with no
//! value of its own, while a [MetaParameter] owns a value computed on
//! demand. That split is what lets mappings support conditions, inverses,
//! and dependency ordering without every derived value needing to behave
//! like a settable parameter too.

use crate::value::Value;
use std::cell::Cell;

/// A dotted path to a parameter, e.g. `["lights", "intensity"]` for a
/// parameter owned by a submodule, or `["volume"]` for one owned directly.
pub type ParamPath = Vec<String>;

/// A directed propagation edge: one or more source parameters feed a
/// transform whose output is written to one or more destination parameters.
pub struct Mapping {
    /// Parameters that trigger this mapping when they change.
    pub sources: Vec<ParamPath>,
    /// Parameters this mapping writes to.
    pub destinations: Vec<ParamPath>,
    /// Takes the sources' current values (in `sources` order) and returns
    /// the values to write to `destinations` (in `destinations` order).
    pub transform: Box<dyn Fn(&[Value]) -> Vec<Value> + Send + Sync>,
    /// If set, the transform is skipped while this parameter's value is
    /// falsy.
    pub condition: Option<ParamPath>,
    /// Set once this mapping's edge has fired during the current tick.
    /// Unlike a simple re-entrancy guard, this is *not* cleared when the
    /// transform returns — it stays set until [Mapping::reset_latch] is
    /// called once per tick, at the end of the dirty-parameter drain. That
    /// is what breaks feedback cycles: a mapping pair that keeps re-dirtying
    /// each other's sources within one tick still only fires each edge
    /// once, rather than looping until convergence (which may never come).
    firing: Cell<bool>,
}

impl Mapping {
    /// Builds an unconditional mapping.
    pub fn new(
        sources: Vec<ParamPath>,
        destinations: Vec<ParamPath>,
        transform: impl Fn(&[Value]) -> Vec<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            sources,
            destinations,
            transform: Box::new(transform),
            condition: None,
            firing: Cell::new(false),
        }
    }

    /// Attaches a condition parameter; the transform only runs while its
    /// value is truthy.
    pub fn with_condition(mut self, condition: ParamPath) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Whether `path` is one of this mapping's source parameters.
    pub fn depends_on(&self, path: &[String]) -> bool {
        self.sources.iter().any(|s| s == path)
    }

    /// Whether this mapping's destination set overlaps `other`'s source
    /// set, used by the dependency comparator.
    pub fn feeds_into(&self, other: &Mapping) -> bool {
        self.destinations
            .iter()
            .any(|d| other.sources.iter().any(|s| s == d))
    }

    /// Whether this mapping has already fired during the current tick.
    pub fn is_firing(&self) -> bool {
        self.firing.get()
    }

    /// Attempts to claim this mapping's fired-this-tick latch. Returns
    /// `true` if the latch was unclaimed (and is now held until
    /// [Mapping::reset_latch] is called), `false` if this edge already
    /// fired earlier in the current tick.
    pub fn try_fire(&self) -> bool {
        !self.firing.replace(true)
    }

    /// Releases the fired-this-tick latch. Called exactly once per mapping,
    /// at the end of a tick's dirty-parameter drain.
    pub fn reset_latch(&self) {
        self.firing.set(false);
    }

    /// Evaluates whether `condition_value` (if any) is truthy.
    pub fn condition_allows(condition_value: Option<&Value>) -> bool {
        match condition_value {
            None => true,
            Some(Value::False) | Some(Value::Nil) => false,
            Some(Value::Int(0)) | Some(Value::Long(0)) => false,
            Some(Value::Double(d)) if *d == 0.0 => false,
            Some(Value::Float(f)) if *f == 0.0 => false,
            Some(_) => true,
        }
    }
}

/// Sorts `mappings` so that if A's destination set overlaps B's source set,
/// A runs first; among mappings with no such dependency, the one with
/// fewer sources runs first. Ties beyond that preserve registration order
/// (stable sort).
pub fn sort_by_dependency(mappings: &mut [Mapping]) {
    mappings.sort_by(|a, b| {
        let a_before_b = a.feeds_into(b);
        let b_before_a = b.feeds_into(a);
        if a_before_b && !b_before_a {
            std::cmp::Ordering::Less
        } else if b_before_a && !a_before_b {
            std::cmp::Ordering::Greater
        } else {
            a.sources.len().cmp(&b.sources.len())
        }
    });
}

/// A parameter whose value is a pure function of one or more source
/// parameters, possibly in submodules, plus a user setter that decomposes a
/// value assignment into source-parameter writes.
///
/// Unlike a [Mapping], a meta-parameter is addressable and gettable like
/// any other parameter; only its value is computed rather than stored
/// directly.
pub struct MetaParameter {
    /// Parameters this meta-parameter's value is computed from.
    pub sources: Vec<ParamPath>,
    /// Computes the meta-parameter's value from the sources' current
    /// values, in `sources` order.
    pub getter: Box<dyn Fn(&[Value]) -> Vec<Value> + Send + Sync>,
    /// Decomposes a user-assigned value into writes for each source
    /// parameter, in `sources` order.
    pub setter: Box<dyn Fn(&[Value]) -> Vec<Vec<Value>> + Send + Sync>,
    /// Held while the setter is running, so the getter's resulting
    /// `parameter_changed` doesn't re-invoke the setter.
    setter_running: Cell<bool>,
}

impl MetaParameter {
    /// Builds a meta-parameter. Its arity is derived from `sources.len()`.
    pub fn new(
        sources: Vec<ParamPath>,
        getter: impl Fn(&[Value]) -> Vec<Value> + Send + Sync + 'static,
        setter: impl Fn(&[Value]) -> Vec<Vec<Value>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            sources,
            getter: Box::new(getter),
            setter: Box::new(setter),
            setter_running: Cell::new(false),
        }
    }

    /// Whether `path` is one of this meta-parameter's sources.
    pub fn depends_on(&self, path: &[String]) -> bool {
        self.sources.iter().any(|s| s == path)
    }

    /// Runs `body` (a setter invocation) with the re-entrancy guard held,
    /// skipping it if the guard is already held.
    pub fn guarded<T>(&self, body: impl FnOnce() -> T) -> Option<T> {
        if self.setter_running.replace(true) {
            return None;
        }
        let result = body();
        self.setter_running.set(false);
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feeds_into_detects_overlap() {
        let a = Mapping::new(vec![vec!["a".into()]], vec![vec!["b".into()]], |v| v.to_vec());
        let b = Mapping::new(vec![vec!["b".into()]], vec![vec!["a".into()]], |v| v.to_vec());
        assert!(a.feeds_into(&b));
        assert!(b.feeds_into(&a));
    }

    #[test]
    fn sort_prefers_fewer_sources_when_independent() {
        let mut mappings = vec![
            Mapping::new(
                vec![vec!["x".into()], vec!["y".into()]],
                vec![vec!["z".into()]],
                |v| v.to_vec(),
            ),
            Mapping::new(vec![vec!["w".into()]], vec![vec!["q".into()]], |v| v.to_vec()),
        ];
        sort_by_dependency(&mut mappings);
        assert_eq!(mappings[0].sources.len(), 1);
    }

    #[test]
    fn latch_blocks_refiring_until_reset() {
        let m = Mapping::new(vec![vec!["a".into()]], vec![vec!["b".into()]], |v| v.to_vec());
        assert!(m.try_fire());
        // Still latched: a second attempt within the same tick is refused,
        // even though the first call's transform already returned.
        assert!(!m.try_fire());
        assert!(!m.try_fire());
        m.reset_latch();
        assert!(m.try_fire());
    }

    #[test]
    fn condition_truthiness() {
        assert!(Mapping::condition_allows(None));
        assert!(!Mapping::condition_allows(Some(&Value::False)));
        assert!(!Mapping::condition_allows(Some(&Value::Int(0))));
        assert!(Mapping::condition_allows(Some(&Value::Int(1))));
    }
}
