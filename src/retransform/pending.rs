// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Concurrent set of units awaiting a staleness check.

use dashmap::DashMap;

use crate::types::{Unit, UnitId, WeakUnit};

/// Why a unit is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PendingMarker {
    /// Check after an instrumentation update was applied.
    Revalidate,
    /// Discovery, an explicit request or a configuration change.
    Requested,
}

#[derive(Debug, Clone)]
struct PendingEntry {
    unit: WeakUnit,
    marker: PendingMarker,
}

/// Units suspected to need a configuration update.
///
/// Many producers insert concurrently; the scheduler is the only consumer.
/// Entries hold weak references and unloaded units are dropped when popped.
#[derive(Debug, Default)]
pub struct PendingSet {
    entries: DashMap<UnitId, PendingEntry>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit. A `Requested` marker wins over `Revalidate`.
    pub fn add(&self, unit: &Unit, marker: PendingMarker) {
        self.entries
            .entry(unit.id())
            .and_modify(|entry| {
                entry.marker = entry.marker.max(marker);
                entry.unit = unit.downgrade();
            })
            .or_insert_with(|| PendingEntry {
                unit: unit.downgrade(),
                marker,
            });
    }

    /// Add several units with the same marker.
    pub fn add_all<'a, I>(&self, units: I, marker: PendingMarker) -> usize
    where
        I: IntoIterator<Item = &'a Unit>,
    {
        units.into_iter().fold(0, |count, unit| {
            self.add(unit, marker);
            count + 1
        })
    }

    /// Remove and return up to `limit` entries, in no particular order.
    ///
    /// Entries of unloaded units count toward the limit and are discarded.
    pub fn pop(&self, limit: usize) -> Vec<(Unit, PendingMarker)> {
        let keys: Vec<UnitId> = self.entries.iter().take(limit).map(|e| *e.key()).collect();
        keys.into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .filter_map(|(_, entry)| entry.unit.upgrade().map(|unit| (unit, entry.marker)))
            .collect()
    }

    pub fn contains(&self, unit: UnitId) -> bool {
        self.entries.contains_key(&unit)
    }

    pub fn marker(&self, unit: UnitId) -> Option<PendingMarker> {
        self.entries.get(&unit).map(|e| e.marker)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LoaderId, TypeDescriptor};
    use std::sync::Arc;

    fn unit(id: u64) -> Unit {
        Unit::new(UnitId(id), LoaderId::Application(1), TypeDescriptor::new(format!("U{id}")))
    }

    #[test]
    fn test_pop_respects_limit() {
        let set = PendingSet::new();
        let units: Vec<Unit> = (0..5).map(unit).collect();
        set.add_all(&units, PendingMarker::Requested);

        assert_eq!(set.pop(3).len(), 3);
        assert_eq!(set.len(), 2);
        assert_eq!(set.pop(10).len(), 2);
        assert!(set.is_empty());
    }

    #[test]
    fn test_requested_wins_over_revalidate() {
        let set = PendingSet::new();
        let u = unit(1);
        set.add(&u, PendingMarker::Requested);
        set.add(&u, PendingMarker::Revalidate);
        assert_eq!(set.marker(u.id()), Some(PendingMarker::Requested));
        assert_eq!(set.len(), 1);

        let v = unit(2);
        set.add(&v, PendingMarker::Revalidate);
        set.add(&v, PendingMarker::Requested);
        assert_eq!(set.marker(v.id()), Some(PendingMarker::Requested));
    }

    #[test]
    fn test_unloaded_units_are_dropped() {
        let set = PendingSet::new();
        let kept = unit(1);
        set.add(&kept, PendingMarker::Requested);
        set.add(&unit(2), PendingMarker::Requested);

        let popped = set.pop(10);
        assert_eq!(popped.len(), 1);
        assert_eq!(popped[0].0, kept);
    }

    #[test]
    fn test_concurrent_producers() {
        let set = Arc::new(PendingSet::new());
        let units: Arc<Vec<Unit>> = Arc::new((0..400).map(unit).collect());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let set = set.clone();
                let units = units.clone();
                std::thread::spawn(move || {
                    for unit in units.iter().skip(t * 100).take(100) {
                        set.add(unit, PendingMarker::Requested);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(set.len(), 400);
    }
}
