// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Batched re-instrumentation of loaded units.
//!
//! Each cycle pops a bounded number of pending units, drops the ones whose
//! applied state already matches the current configuration, and rewrites the
//! rest in one host call. A failed batch falls back to one call per unit so a
//! single bad unit cannot block the others. Completed weaves are then turned
//! into hooks in one registry update.
//!
//! ```text
//!   pending ──pop(check_limit)──▶ re-check ──▶ batch(retransform_limit) ──▶ host
//!      ▲                             │ excess                                │ weave / on_unit_woven
//!      └─────────────────────────────┘                                       ▼
//!                                                       registry start_update → update → commit
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::error::{RegistryError, RetransformError};
use crate::hooks::HookRegistry;
use crate::rules::{ClassInstrumentationConfiguration, ConfigurationResolver, InstrumentationConfiguration};
use crate::runtime::{HostRuntime, Retransformer, WeavePlan, Weaver};
use crate::telemetry::{metrics::operations, AgentMetrics, TimedOperation};
use crate::types::{Unit, UnitId, WeakUnit};

use super::applied::AppliedStateStore;
use super::pending::{PendingMarker, PendingSet};

/// Outcome of one scheduler cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Units popped from the pending set and re-checked.
    pub checked: usize,
    /// Re-checked units whose applied state was already current.
    pub up_to_date: usize,
    /// Units that needed a rewrite but did not fit into the batch.
    pub deferred: usize,
    /// Units rewritten successfully.
    pub retransformed: usize,
    /// Units whose rewrite failed even on its own.
    pub failed: usize,
    /// Whether the batch call failed and per-unit fallback ran.
    pub batch_failed: bool,
    /// Units whose hooks were updated after weaving.
    pub hooks_updated: usize,
}

/// Outcome of removing instrumentation at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Units rewritten back to their uninstrumented form.
    pub restored: usize,
    /// Units that could not be restored.
    pub abandoned: usize,
    /// Failed attempts that were retried.
    pub retries: usize,
}

#[derive(Debug, Clone)]
struct InFlight {
    unit: WeakUnit,
    configuration: ClassInstrumentationConfiguration,
    generation: u64,
}

/// Drives the pending set to the host's retransform facility.
pub struct RetransformScheduler {
    runtime: Arc<dyn HostRuntime>,
    retransformer: Arc<dyn Retransformer>,
    resolver: Arc<ConfigurationResolver>,
    registry: Arc<HookRegistry>,
    config: watch::Receiver<Arc<InstrumentationConfiguration>>,
    pending: PendingSet,
    applied: AppliedStateStore,
    in_flight: DashMap<UnitId, InFlight>,
    woven: Mutex<Vec<WeakUnit>>,
    draining: AtomicBool,
    metrics: Option<Arc<AgentMetrics>>,
}

impl RetransformScheduler {
    pub fn new(
        runtime: Arc<dyn HostRuntime>,
        retransformer: Arc<dyn Retransformer>,
        resolver: Arc<ConfigurationResolver>,
        registry: Arc<HookRegistry>,
        config: watch::Receiver<Arc<InstrumentationConfiguration>>,
    ) -> Self {
        Self {
            runtime,
            retransformer,
            resolver,
            registry,
            config,
            pending: PendingSet::new(),
            applied: AppliedStateStore::new(),
            in_flight: DashMap::new(),
            woven: Mutex::new(Vec::new()),
            draining: AtomicBool::new(false),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AgentMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn pending(&self) -> &PendingSet {
        &self.pending
    }

    pub fn applied(&self) -> &AppliedStateStore {
        &self.applied
    }

    pub fn resolver(&self) -> &ConfigurationResolver {
        &self.resolver
    }

    /// The configuration currently in effect.
    pub fn current_config(&self) -> Arc<InstrumentationConfiguration> {
        self.config.borrow().clone()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------------
    // Producers
    // ------------------------------------------------------------------------

    /// Mark a unit as possibly stale.
    pub fn request_recheck(&self, unit: &Unit) {
        self.pending.add(unit, PendingMarker::Requested);
    }

    /// Mark every loaded unit as possibly stale.
    pub fn recheck_all_loaded(&self) -> usize {
        let units = self.runtime.all_loaded_units();
        let count = self.pending.add_all(&units, PendingMarker::Requested);
        debug!(count, "Queued all loaded units for re-check");
        count
    }

    // ------------------------------------------------------------------------
    // Weaving callbacks
    // ------------------------------------------------------------------------

    /// Desired state of a unit under the current configuration.
    pub fn desired_configuration(&self, unit: &Unit) -> ClassInstrumentationConfiguration {
        if self.is_draining() {
            return ClassInstrumentationConfiguration::none();
        }
        self.resolver.class_configuration(unit, &self.current_config())
    }

    /// Whether the unit's applied state differs from the desired state.
    pub fn needs_retransform(&self, unit: &Unit, config: &InstrumentationConfiguration) -> bool {
        let desired = if self.is_draining() {
            ClassInstrumentationConfiguration::none()
        } else {
            self.resolver.class_configuration(unit, config)
        };
        desired != self.applied.get(unit.id())
    }

    /// The host is about to rewrite a unit; returns the state to weave in.
    pub fn begin_weave(&self, unit: &Unit) -> ClassInstrumentationConfiguration {
        let config = self.current_config();
        let configuration = if self.is_draining() {
            ClassInstrumentationConfiguration::none()
        } else {
            self.resolver.class_configuration(unit, &config)
        };
        self.in_flight.insert(
            unit.id(),
            InFlight {
                unit: unit.downgrade(),
                configuration: configuration.clone(),
                generation: config.generation,
            },
        );
        configuration
    }

    /// The host finished rewriting a unit.
    ///
    /// Records the woven state and queues a hook update. When the
    /// configuration changed while the unit was being woven, the unit is
    /// queued for revalidation so the next cycle catches the newer state.
    pub fn complete_weave(&self, unit: &Unit) {
        let current = self.current_config();
        let (configuration, generation) = match self.in_flight.remove(&unit.id()) {
            Some((_, in_flight)) => (in_flight.configuration, in_flight.generation),
            None => (self.desired_configuration(unit), current.generation),
        };

        trace!(unit = %unit, rules = configuration.active_rules.len(), "Unit woven");
        self.applied.record(unit, configuration, generation);
        self.woven.lock().push(unit.downgrade());

        if generation != current.generation && !self.is_draining() {
            debug!(unit = %unit, woven = generation, current = current.generation, "Configuration changed during weave");
            self.pending.add(unit, PendingMarker::Revalidate);
        }
    }

    // ------------------------------------------------------------------------
    // Batch cycle
    // ------------------------------------------------------------------------

    /// Run one scheduler cycle.
    pub fn run_batch(&self) -> BatchReport {
        let mut report = BatchReport::default();
        if self.is_draining() {
            return report;
        }
        let _timer = TimedOperation::start(operations::RETRANSFORM_BATCH, self.metrics.clone());
        self.prune_unloaded();

        let config = self.current_config();
        let settings = &config.scheduler;
        let popped = self.pending.pop(settings.check_limit);
        report.checked = popped.len();

        let mut batch: Vec<Unit> = Vec::new();
        for (unit, marker) in popped {
            if !self.needs_retransform(&unit, &config) {
                trace!(unit = %unit, ?marker, "Unit is up to date");
                report.up_to_date += 1;
                continue;
            }
            if batch.len() < settings.retransform_limit {
                batch.push(unit);
            } else {
                self.pending.add(&unit, marker);
                report.deferred += 1;
            }
        }

        if !batch.is_empty() {
            self.retransform(&batch, &mut report);
        }
        report.hooks_updated = self.flush_hook_updates();

        #[cfg(feature = "telemetry")]
        {
            if let Some(metrics) = &self.metrics {
                metrics.record_units_checked(report.checked as u64);
                metrics.record_units_retransformed(report.retransformed as u64);
            }
        }

        if report.checked > 0 {
            debug!(
                checked = report.checked,
                up_to_date = report.up_to_date,
                deferred = report.deferred,
                retransformed = report.retransformed,
                failed = report.failed,
                remaining = self.pending.len(),
                "Retransform batch finished"
            );
        }
        report
    }

    /// Forget applied and in-flight state of units the host has unloaded.
    ///
    /// In-flight entries of definition-time weaves whose completion never
    /// arrived are dropped here once their unit is gone.
    pub fn prune_unloaded(&self) -> usize {
        let applied = self.applied.prune_unloaded();
        let before = self.in_flight.len();
        self.in_flight.retain(|_, in_flight| !in_flight.unit.is_dead());
        let in_flight = before.saturating_sub(self.in_flight.len());
        if applied + in_flight > 0 {
            trace!(applied, in_flight, "Pruned state of unloaded units");
        }
        applied + in_flight
    }

    fn retransform(&self, batch: &[Unit], report: &mut BatchReport) {
        match self.retransformer.retransform_batch(batch, self) {
            Ok(()) => report.retransformed = batch.len(),
            Err(err) => {
                warn!(units = batch.len(), error = %err, "Batch retransform failed, retrying units one by one");
                report.batch_failed = true;
                for unit in batch {
                    match self.retransformer.retransform(unit, self) {
                        Ok(()) => report.retransformed += 1,
                        Err(err) => {
                            self.unit_failed(unit, &err);
                            report.failed += 1;
                        }
                    }
                }
            }
        }
    }

    fn unit_failed(&self, unit: &Unit, err: &RetransformError) {
        warn!(unit = %unit, error = %err, "Retransform failed, keeping previous instrumentation");
        self.in_flight.remove(&unit.id());
        #[cfg(feature = "telemetry")]
        {
            if let Some(metrics) = &self.metrics {
                metrics.record_retransform_failure();
            }
        }
    }

    /// Apply queued weave completions to the hook registry.
    ///
    /// Returns the number of units updated. When another update holds the
    /// registry the queue is kept for the next cycle.
    pub fn flush_hook_updates(&self) -> usize {
        let woven: Vec<WeakUnit> = std::mem::take(&mut *self.woven.lock());
        if woven.is_empty() {
            return 0;
        }

        let mut update = match self.registry.start_update() {
            Ok(update) => update,
            Err(RegistryError::UpdateInProgress) => {
                debug!(units = woven.len(), "Hook registry busy, deferring hook update");
                self.woven.lock().extend(woven);
                return 0;
            }
        };

        let mut updated = 0;
        for unit in woven.iter().filter_map(WeakUnit::upgrade) {
            update.update_hooks_for_unit(&unit, &self.applied.get(unit.id()));
            updated += 1;
        }
        update.commit();
        updated
    }

    /// Poll the pending set until `shutdown` flips to true.
    ///
    /// Batches run on the blocking pool since host calls are synchronous.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("Retransform scheduler started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let scheduler = self.clone();
            if let Err(err) = tokio::task::spawn_blocking(move || scheduler.run_batch()).await {
                error!(error = %err, "Retransform batch panicked");
            }

            let delay = self.current_config().scheduler.batch_delay;
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!("Retransform scheduler stopped");
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Remove all instrumentation.
    ///
    /// Stops new batches, publishes an empty hook map and, unless the host
    /// process is terminating, rewrites every instrumented unit back to its
    /// original form. A unit is retried until it succeeds or is unloaded.
    pub async fn drain(&self) -> DrainReport {
        self.draining.store(true, Ordering::Release);
        self.pending.clear();
        let retry_delay = self.current_config().scheduler.removal_retry_delay;

        loop {
            if let Ok(mut update) = self.registry.start_update() {
                update.clear();
                update.commit();
                break;
            }
            tokio::time::sleep(retry_delay).await;
        }
        self.woven.lock().clear();

        let mut report = DrainReport::default();
        if self.runtime.is_terminating() {
            info!("Host is terminating, leaving rewritten units in place");
            return report;
        }

        let units: Vec<WeakUnit> = self
            .applied
            .instrumented_units()
            .iter()
            .map(Unit::downgrade)
            .collect();
        for weak in units {
            loop {
                // Re-upgrade per attempt so retries never keep a unit loaded.
                let Some(unit) = weak.upgrade() else {
                    self.applied.remove(weak.id());
                    break;
                };
                match self.retransformer.retransform(&unit, self) {
                    Ok(()) => {
                        self.applied.remove(unit.id());
                        report.restored += 1;
                        break;
                    }
                    Err(RetransformError::Unloaded(_)) => {
                        self.applied.remove(unit.id());
                        break;
                    }
                    Err(RetransformError::NotModifiable(reason)) => {
                        error!(unit = %unit, reason = %reason, "Cannot remove instrumentation from unit");
                        report.abandoned += 1;
                        break;
                    }
                    Err(err) => {
                        warn!(unit = %unit, error = %err, "Removing instrumentation failed, retrying");
                        report.retries += 1;
                        drop(unit);
                        tokio::time::sleep(retry_delay).await;
                    }
                }
            }
        }
        self.woven.lock().clear();

        info!(restored = report.restored, abandoned = report.abandoned, "Instrumentation removed");
        report
    }
}

impl Weaver for RetransformScheduler {
    fn weave(&self, unit: &Unit) -> WeavePlan {
        WeavePlan::for_unit(unit, self.begin_weave(unit))
    }

    fn on_unit_woven(&self, unit: &Unit) {
        self.complete_weave(unit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{HookFactory, HookServices};
    use crate::rules::{DataProviderCall, RuleDefinition, SchedulerSettings};
    use crate::scope::{Matcher, MethodPredicate, NameMatcher, ScopeDefinition, TypePredicate};
    use crate::types::{LoaderId, MethodDescriptor, TypeDescriptor};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct FakeRuntime {
        units: Mutex<Vec<Unit>>,
    }

    impl HostRuntime for FakeRuntime {
        fn all_loaded_units(&self) -> Vec<Unit> {
            self.units.lock().clone()
        }

        fn is_modifiable(&self, _unit: &Unit) -> bool {
            true
        }
    }

    /// Weaves synchronously, failing the batch call or single units on demand.
    #[derive(Default)]
    struct FakeHost {
        fail_batch: bool,
        fail_units: Vec<UnitId>,
        batch_calls: Mutex<Vec<usize>>,
        single_calls: AtomicUsize,
    }

    impl Retransformer for FakeHost {
        fn retransform_batch(&self, units: &[Unit], weaver: &dyn Weaver) -> Result<(), RetransformError> {
            self.batch_calls.lock().push(units.len());
            if self.fail_batch {
                return Err(RetransformError::Rejected("batch".into()));
            }
            for unit in units {
                weaver.weave(unit);
                weaver.on_unit_woven(unit);
            }
            Ok(())
        }

        fn retransform(&self, unit: &Unit, weaver: &dyn Weaver) -> Result<(), RetransformError> {
            self.single_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_units.contains(&unit.id()) {
                return Err(RetransformError::Rejected(unit.name().to_string()));
            }
            weaver.weave(unit);
            weaver.on_unit_woven(unit);
            Ok(())
        }
    }

    fn units(n: u64) -> Vec<Unit> {
        (0..n)
            .map(|i| {
                Unit::new(
                    UnitId(i),
                    LoaderId::Application(1),
                    TypeDescriptor::new(format!("com.acme.U{i}")).with_method(MethodDescriptor::new("handle")),
                )
            })
            .collect()
    }

    fn config(check_limit: usize, retransform_limit: usize) -> InstrumentationConfiguration {
        let scope = Arc::new(ScopeDefinition::new(
            "acme",
            Matcher::Is(TypePredicate::Name(NameMatcher::starts_with("com.acme."))),
            Matcher::Is(MethodPredicate::Name(NameMatcher::equals("handle"))),
        ));
        InstrumentationConfiguration {
            generation: 1,
            scheduler: SchedulerSettings {
                check_limit,
                retransform_limit,
                ..Default::default()
            },
            ..Default::default()
        }
        .with_rules([Arc::new(
            RuleDefinition::new("timing")
                .with_scope(scope)
                .with_entry("start", DataProviderCall::new("timestamp")),
        )])
    }

    fn scheduler(
        host: Arc<FakeHost>,
        config: InstrumentationConfiguration,
    ) -> (RetransformScheduler, Arc<HookRegistry>, watch::Sender<Arc<InstrumentationConfiguration>>) {
        let runtime: Arc<dyn HostRuntime> = Arc::new(FakeRuntime::default());
        let registry = Arc::new(HookRegistry::new(HookFactory::new(HookServices::default())));
        let (tx, rx) = watch::channel(Arc::new(config));
        let scheduler = RetransformScheduler::new(
            runtime.clone(),
            host,
            Arc::new(ConfigurationResolver::new(runtime)),
            registry.clone(),
            rx,
        );
        (scheduler, registry, tx)
    }

    #[test]
    fn test_single_batch_covers_all_pending() {
        let host = Arc::new(FakeHost::default());
        let (scheduler, registry, _tx) = scheduler(host.clone(), config(100, 100));
        let units = units(5);
        scheduler.pending().add_all(&units, PendingMarker::Requested);

        let report = scheduler.run_batch();

        assert_eq!(*host.batch_calls.lock(), vec![5]);
        assert_eq!(report.retransformed, 5);
        assert_eq!(report.hooks_updated, 5);
        assert!(scheduler.pending().is_empty());
        assert!(!registry.lookup(units[0].id(), "handle()").is_noop());
    }

    #[test]
    fn test_check_limit_bounds_each_cycle() {
        let host = Arc::new(FakeHost::default());
        let (scheduler, _registry, _tx) = scheduler(host, config(3, 10));
        let units = units(5);
        scheduler.pending().add_all(&units, PendingMarker::Requested);

        let report = scheduler.run_batch();
        assert_eq!(report.checked, 3);
        assert_eq!(scheduler.pending().len(), 2);
    }

    #[test]
    fn test_retransform_limit_defers_excess() {
        let host = Arc::new(FakeHost::default());
        let (scheduler, _registry, _tx) = scheduler(host.clone(), config(10, 2));
        let units = units(5);
        scheduler.pending().add_all(&units, PendingMarker::Requested);

        let report = scheduler.run_batch();
        assert_eq!(report.retransformed, 2);
        assert_eq!(report.deferred, 3);
        assert_eq!(scheduler.pending().len(), 3);
        assert_eq!(*host.batch_calls.lock(), vec![2]);
    }

    #[test]
    fn test_limits_follow_published_configuration() {
        let host = Arc::new(FakeHost::default());
        let (scheduler, _registry, tx) = scheduler(host.clone(), config(3, 10));
        let units = units(10);
        scheduler.pending().add_all(&units, PendingMarker::Requested);

        let first = scheduler.run_batch();
        assert_eq!(first.checked, 3);
        assert_eq!(first.retransformed, 3);

        let mut next = config(5, 2);
        next.generation = 2;
        tx.send(Arc::new(next)).unwrap();

        let second = scheduler.run_batch();
        assert_eq!(second.checked, 5);
        assert_eq!(second.retransformed, 2);
        assert_eq!(second.deferred, 3);
        assert_eq!(scheduler.pending().len(), 5);
        assert_eq!(*host.batch_calls.lock(), vec![3, 2]);
    }

    #[test]
    fn test_failed_batch_retries_each_unit_once() {
        let host = Arc::new(FakeHost {
            fail_batch: true,
            fail_units: vec![UnitId(2)],
            ..Default::default()
        });
        let (scheduler, registry, _tx) = scheduler(host.clone(), config(100, 100));
        let units = units(5);
        scheduler.pending().add_all(&units, PendingMarker::Requested);

        let report = scheduler.run_batch();

        assert!(report.batch_failed);
        assert_eq!(host.single_calls.load(Ordering::SeqCst), 5);
        assert_eq!(report.retransformed, 4);
        assert_eq!(report.failed, 1);
        assert!(scheduler.pending().is_empty());
        assert!(scheduler.applied().get(UnitId(2)).is_empty());
        assert!(registry.lookup(UnitId(2), "handle()").is_noop());
        assert!(!registry.lookup(UnitId(3), "handle()").is_noop());
    }

    #[test]
    fn test_up_to_date_units_are_not_rewritten() {
        let host = Arc::new(FakeHost::default());
        let (scheduler, _registry, _tx) = scheduler(host.clone(), config(100, 100));
        let units = units(3);
        scheduler.pending().add_all(&units, PendingMarker::Requested);
        scheduler.run_batch();

        scheduler.pending().add_all(&units, PendingMarker::Revalidate);
        let report = scheduler.run_batch();
        assert_eq!(report.up_to_date, 3);
        assert_eq!(host.batch_calls.lock().len(), 1);
    }

    #[test]
    fn test_config_change_during_weave_requeues() {
        let host = Arc::new(FakeHost::default());
        let (scheduler, _registry, tx) = scheduler(host, config(100, 100));
        let unit = units(1).remove(0);

        scheduler.weave(&unit);
        tx.send_modify(|current| {
            let mut next = (**current).clone();
            next.generation += 1;
            *current = Arc::new(next);
        });
        scheduler.on_unit_woven(&unit);

        assert_eq!(scheduler.pending().marker(unit.id()), Some(PendingMarker::Revalidate));
    }

    #[test]
    fn test_unloaded_units_leave_no_state_behind() {
        let host = Arc::new(FakeHost::default());
        let (scheduler, _registry, _tx) = scheduler(host, config(100, 100));

        for _ in 0..10 {
            let loaded = units(100);
            scheduler.pending().add_all(&loaded, PendingMarker::Requested);
            scheduler.run_batch();
            assert_eq!(scheduler.applied().len(), 100);

            // Woven at definition time, completion never reported.
            scheduler.weave(&loaded[0]);
            assert_eq!(scheduler.in_flight.len(), 1);

            drop(loaded);
            scheduler.run_batch();
            assert!(scheduler.applied().is_empty());
            assert!(scheduler.in_flight.is_empty());
        }
    }

    #[tokio::test]
    async fn test_drain_restores_units() {
        let host = Arc::new(FakeHost::default());
        let (scheduler, registry, _tx) = scheduler(host, config(100, 100));
        let units = units(2);
        scheduler.pending().add_all(&units, PendingMarker::Requested);
        scheduler.run_batch();
        assert_eq!(scheduler.applied().len(), 2);

        let report = scheduler.drain().await;
        assert_eq!(report.restored, 2);
        assert!(scheduler.applied().is_empty());
        assert_eq!(registry.snapshot().hook_count(), 0);
        assert_eq!(scheduler.run_batch(), BatchReport::default());
    }
}
