// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The published unit → method → hook mapping and its update protocol.
//!
//! Readers load the current immutable snapshot and do two hash lookups. The
//! single writer works on a private copy and publishes it with one atomic
//! pointer swap, so a reader sees either all of an update or none of it.
//!
//! ```text
//!   start_update ──▶ working copy (actions reset) ──▶ update_hooks_for_unit* ──▶ commit
//!        │ slot taken                                                          │
//!        ▼                                                                     ▼
//!   UpdateInProgress                                              ArcSwap::store(snapshot)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::error::RegistryError;
use crate::rules::{rules_for_method, ClassInstrumentationConfiguration};
use crate::telemetry::{metrics::operations, AgentMetrics, TimedOperation};
use crate::types::{Unit, UnitId, WeakUnit};

use super::builder::build_method_configuration;
use super::factory::HookFactory;
use super::hook::Hook;

// ============================================================================
// Snapshot
// ============================================================================

/// Hooks of one unit, keyed by method signature.
#[derive(Debug, Clone)]
pub struct UnitHooks {
    unit: WeakUnit,
    methods: HashMap<String, Arc<Hook>>,
}

impl UnitHooks {
    pub fn unit(&self) -> &WeakUnit {
        &self.unit
    }

    pub fn method(&self, signature: &str) -> Option<&Arc<Hook>> {
        self.methods.get(signature)
    }

    /// Hooked method signatures, sorted.
    pub fn signatures(&self) -> Vec<&str> {
        let mut signatures: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        signatures.sort_unstable();
        signatures
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Immutable published state of the registry.
#[derive(Debug, Default)]
pub struct HookSnapshot {
    units: HashMap<UnitId, UnitHooks>,
}

impl HookSnapshot {
    pub fn unit(&self, unit: UnitId) -> Option<&UnitHooks> {
        self.units.get(&unit)
    }

    pub fn hook(&self, unit: UnitId, signature: &str) -> Option<&Arc<Hook>> {
        self.units.get(&unit).and_then(|hooks| hooks.method(signature))
    }

    /// Ids of all hooked units.
    pub fn unit_ids(&self) -> Vec<UnitId> {
        let mut ids: Vec<UnitId> = self.units.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn hook_count(&self) -> usize {
        self.units.values().map(UnitHooks::len).sum()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Holds the published hook snapshot.
pub struct HookRegistry {
    snapshot: ArcSwap<HookSnapshot>,
    writer: Mutex<()>,
    factory: HookFactory,
    metrics: Option<Arc<AgentMetrics>>,
}

impl HookRegistry {
    /// Create an empty registry.
    pub fn new(factory: HookFactory) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(HookSnapshot::default()),
            writer: Mutex::new(()),
            factory,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AgentMetrics>) -> Self {
        self.factory = self.factory.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    /// Hook for one method, or the no-op hook.
    ///
    /// Lock-free: one atomic load and two hash lookups.
    #[inline]
    pub fn lookup(&self, unit: UnitId, signature: &str) -> Arc<Hook> {
        self.snapshot
            .load()
            .hook(unit, signature)
            .cloned()
            .unwrap_or_else(Hook::noop)
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<HookSnapshot> {
        self.snapshot.load_full()
    }

    /// Begin an update.
    ///
    /// The working copy shares action objects with the published hooks but
    /// every action starts active again. Units that were unloaded are pruned.
    pub fn start_update(&self) -> Result<HookUpdate<'_>, RegistryError> {
        let guard = self.writer.try_lock().ok_or(RegistryError::UpdateInProgress)?;
        let timer = TimedOperation::start(operations::HOOK_UPDATE, self.metrics.clone());

        let current = self.snapshot.load();
        let mut pruned = 0usize;
        let working: HashMap<UnitId, UnitHooks> = current
            .units
            .iter()
            .filter(|(_, hooks)| {
                let alive = !hooks.unit.is_dead();
                if !alive {
                    pruned += 1;
                }
                alive
            })
            .map(|(id, hooks)| {
                let methods = hooks
                    .methods
                    .iter()
                    .map(|(sig, hook)| (sig.clone(), Arc::new(hook.reset_copy())))
                    .collect();
                (
                    *id,
                    UnitHooks {
                        unit: hooks.unit.clone(),
                        methods,
                    },
                )
            })
            .collect();

        if pruned > 0 {
            trace!(pruned, "Pruned hooks of unloaded units");
        }

        Ok(HookUpdate {
            registry: self,
            _guard: guard,
            _timer: timer,
            working,
            report: UpdateReport::default(),
        })
    }

    /// Whether an update is currently in progress.
    pub fn is_updating(&self) -> bool {
        self.writer.is_locked()
    }
}

/// Cheap cloneable read handle for call-site dispatch.
#[derive(Clone)]
pub struct HookLookup {
    registry: Arc<HookRegistry>,
}

impl HookLookup {
    pub fn new(registry: Arc<HookRegistry>) -> Self {
        Self { registry }
    }

    #[inline]
    pub fn lookup(&self, unit: UnitId, signature: &str) -> Arc<Hook> {
        self.registry.lookup(unit, signature)
    }
}

// ============================================================================
// Update
// ============================================================================

/// Per-unit outcome of an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitUpdateReport {
    pub added: usize,
    pub replaced: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Methods left unhooked because their hook could not be built.
    pub failed: usize,
}

impl UnitUpdateReport {
    fn merge(&mut self, other: &UnitUpdateReport) {
        self.added += other.added;
        self.replaced += other.replaced;
        self.removed += other.removed;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
    }
}

/// Aggregated outcome of a committed update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub units: usize,
    pub methods: UnitUpdateReport,
}

/// An in-flight update holding the writer slot.
///
/// Dropping it without calling [`commit`](Self::commit) discards every change.
pub struct HookUpdate<'a> {
    registry: &'a HookRegistry,
    _guard: MutexGuard<'a, ()>,
    _timer: TimedOperation,
    working: HashMap<UnitId, UnitHooks>,
    report: UpdateReport,
}

impl HookUpdate<'_> {
    /// Recompute the hooks of one unit from its applied configuration.
    pub fn update_hooks_for_unit(
        &mut self,
        unit: &Unit,
        applied: &ClassInstrumentationConfiguration,
    ) -> UnitUpdateReport {
        let mut report = UnitUpdateReport::default();
        let previous = self.working.remove(&unit.id());
        let mut previous_methods = previous.map(|hooks| hooks.methods).unwrap_or_default();
        let mut methods: HashMap<String, Arc<Hook>> = HashMap::new();

        let descriptor = unit.descriptor();
        if !applied.active_rules.is_empty() {
            for method in &descriptor.methods {
                let rules = rules_for_method(&applied.active_rules, descriptor, method);
                if rules.is_empty() {
                    continue;
                }
                let signature = method.signature();
                let existing = previous_methods.remove(&signature);

                let configuration = match build_method_configuration(descriptor, method, &rules) {
                    Ok(configuration) if configuration.is_empty() => {
                        if existing.is_some() {
                            report.removed += 1;
                        }
                        continue;
                    }
                    Ok(configuration) => configuration,
                    Err(err) => {
                        self.build_failed(unit, &signature, &err);
                        if existing.is_some() {
                            report.removed += 1;
                        }
                        report.failed += 1;
                        continue;
                    }
                };

                if let Some(hook) = existing.as_ref().filter(|h| h.configuration() == Some(&configuration)) {
                    methods.insert(signature, hook.clone());
                    report.unchanged += 1;
                    continue;
                }

                match self.registry.factory.create(unit, &signature, configuration) {
                    Ok(hook) => {
                        if existing.is_some() {
                            report.replaced += 1;
                        } else {
                            report.added += 1;
                        }
                        methods.insert(signature, Arc::new(hook));
                    }
                    Err(err) => {
                        self.build_failed(unit, &signature, &err);
                        if existing.is_some() {
                            report.removed += 1;
                        }
                        report.failed += 1;
                    }
                }
            }
        }

        report.removed += previous_methods.len();
        if !methods.is_empty() {
            self.working.insert(
                unit.id(),
                UnitHooks {
                    unit: unit.downgrade(),
                    methods,
                },
            );
        }

        trace!(
            unit = %unit,
            added = report.added,
            replaced = report.replaced,
            removed = report.removed,
            unchanged = report.unchanged,
            failed = report.failed,
            "Updated unit hooks"
        );

        self.report.units += 1;
        self.report.methods.merge(&report);
        report
    }

    /// Drop all hooks of one unit.
    pub fn remove_unit(&mut self, unit: UnitId) -> bool {
        self.working.remove(&unit).is_some()
    }

    /// Drop every hook.
    pub fn clear(&mut self) {
        self.working.clear();
    }

    /// Number of units with hooks in the working copy.
    pub fn unit_count(&self) -> usize {
        self.working.len()
    }

    /// Publish the working copy.
    pub fn commit(self) -> UpdateReport {
        let HookUpdate {
            registry,
            _guard,
            _timer,
            working,
            report,
        } = self;

        let snapshot = HookSnapshot { units: working };
        debug!(
            units = snapshot.unit_count(),
            hooks = snapshot.hook_count(),
            updated = report.units,
            "Committing hook snapshot"
        );
        registry.snapshot.store(Arc::new(snapshot));

        #[cfg(feature = "telemetry")]
        {
            if let Some(metrics) = &registry.metrics {
                metrics.record_hook_commit();
            }
        }

        report
    }

    fn build_failed(&self, unit: &Unit, signature: &str, err: &crate::error::HookBuildError) {
        warn!(unit = %unit, method = signature, error = %err, "Leaving method unhooked");
        #[cfg(feature = "telemetry")]
        {
            if let Some(metrics) = &self.registry.metrics {
                metrics.record_hook_build_failure();
            }
        }
    }
}
