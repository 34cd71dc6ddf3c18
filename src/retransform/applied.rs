// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Instrumentation state each unit was last woven with.

use dashmap::DashMap;

use crate::rules::ClassInstrumentationConfiguration;
use crate::types::{Unit, UnitId, WeakUnit};

#[derive(Debug, Clone)]
struct AppliedEntry {
    unit: WeakUnit,
    configuration: ClassInstrumentationConfiguration,
    generation: u64,
}

/// Applied per-unit state, keyed by unit id.
///
/// Units without an entry carry no instrumentation.
#[derive(Debug, Default)]
pub struct AppliedStateStore {
    entries: DashMap<UnitId, AppliedEntry>,
}

impl AppliedStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record what a unit was woven with. An empty configuration clears it.
    pub fn record(&self, unit: &Unit, configuration: ClassInstrumentationConfiguration, generation: u64) {
        if configuration.is_empty() {
            self.entries.remove(&unit.id());
            return;
        }
        self.entries.insert(
            unit.id(),
            AppliedEntry {
                unit: unit.downgrade(),
                configuration,
                generation,
            },
        );
    }

    /// Applied state of a unit; the empty configuration when none.
    pub fn get(&self, unit: UnitId) -> ClassInstrumentationConfiguration {
        self.entries
            .get(&unit)
            .map(|e| e.configuration.clone())
            .unwrap_or_default()
    }

    /// Configuration generation the unit was last woven under.
    pub fn generation(&self, unit: UnitId) -> Option<u64> {
        self.entries.get(&unit).map(|e| e.generation)
    }

    pub fn remove(&self, unit: UnitId) {
        self.entries.remove(&unit);
    }

    /// Drop the entries of unloaded units; returns how many were dropped.
    pub fn prune_unloaded(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.unit.is_dead());
        before.saturating_sub(self.entries.len())
    }

    /// Live units that currently carry instrumentation.
    ///
    /// Entries of unloaded units are pruned on the way.
    pub fn instrumented_units(&self) -> Vec<Unit> {
        self.prune_unloaded();
        let mut units: Vec<Unit> = self.entries.iter().filter_map(|e| e.unit.upgrade()).collect();
        units.sort_by_key(Unit::id);
        units
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleDefinition;
    use crate::types::{LoaderId, TypeDescriptor};
    use std::sync::Arc;

    fn unit(id: u64) -> Unit {
        Unit::new(UnitId(id), LoaderId::Application(1), TypeDescriptor::new(format!("U{id}")))
    }

    fn config() -> ClassInstrumentationConfiguration {
        ClassInstrumentationConfiguration {
            active_rules: vec![Arc::new(RuleDefinition::new("r"))],
            ..Default::default()
        }
    }

    #[test]
    fn test_record_and_clear() {
        let store = AppliedStateStore::new();
        let u = unit(1);
        store.record(&u, config(), 3);
        assert_eq!(store.get(u.id()), config());
        assert_eq!(store.generation(u.id()), Some(3));

        store.record(&u, ClassInstrumentationConfiguration::none(), 4);
        assert!(store.get(u.id()).is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_instrumented_units_prunes_dead() {
        let store = AppliedStateStore::new();
        let a = unit(1);
        store.record(&a, config(), 1);
        store.record(&unit(2), config(), 1);

        assert_eq!(store.instrumented_units(), vec![a]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_prune_unloaded() {
        let store = AppliedStateStore::new();
        let kept = unit(1);
        let dropped = unit(2);
        store.record(&kept, config(), 1);
        store.record(&dropped, config(), 1);
        assert_eq!(store.prune_unloaded(), 0);

        drop(dropped);
        assert_eq!(store.prune_unloaded(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(kept.id()), config());
    }
}
