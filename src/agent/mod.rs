// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The instrumentation agent.
//!
//! Wires the lifecycle tracker, the retransformation scheduler and the hook
//! registry to one configuration source, and exposes the host-facing entry
//! points: weaving callbacks, discovery notifications and hook lookup.
//!
//! ```text
//!   host ──notify──▶ tracker ──new units──▶ pending ──▶ scheduler ──▶ host rewrite
//!                                              ▲                          │
//!   ConfigSource ──change──▶ recheck all ──────┘        weave / woven ◀───┘
//!                                                            │
//!                                      call sites ◀── lookup ◀── registry
//! ```
//!
//! Shutdown stops and joins the background tasks first and drains second,
//! the reverse of publishing the empty hook map before the timers stop. No
//! batch can then commit hooks after the empty map is out.

mod types;

pub use types::{AgentOptions, AgentPhase, AgentStatus};

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::ConfigSource;
use crate::error::AgentError;
use crate::hooks::{Hook, HookFactory, HookLookup, HookRegistry};
use crate::lifecycle::{ClassLifecycleTracker, DiscoveryListener};
use crate::retransform::{DrainReport, RetransformScheduler};
use crate::rules::{ConfigurationResolver, InstrumentationConfiguration};
use crate::runtime::{WeavePlan, Weaver};
use crate::telemetry::AgentMetrics;
use crate::types::{Unit, UnitId};

/// Feeds newly discovered units to the pending set.
struct PendingFeeder {
    scheduler: Arc<RetransformScheduler>,
}

impl DiscoveryListener for PendingFeeder {
    fn on_new_units(&self, units: &[Unit]) {
        for unit in units {
            self.scheduler.request_recheck(unit);
        }
    }
}

/// Host-facing facade over the instrumentation core.
pub struct InstrumentationAgent {
    config: Arc<ConfigSource>,
    registry: Arc<HookRegistry>,
    scheduler: Arc<RetransformScheduler>,
    tracker: Arc<ClassLifecycleTracker>,
    metrics: Arc<AgentMetrics>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    phase: Mutex<AgentPhase>,
}

impl InstrumentationAgent {
    /// Build an agent. Nothing runs until [`start`](Self::start).
    pub fn new(options: AgentOptions, config: Arc<ConfigSource>) -> Self {
        let AgentOptions {
            runtime,
            retransformer,
            services,
            sensors,
            metrics,
        } = options;
        let metrics = metrics.unwrap_or_else(|| Arc::new(AgentMetrics::new()));

        let resolver = sensors
            .into_iter()
            .fold(ConfigurationResolver::new(runtime.clone()), |resolver, sensor| {
                resolver.with_sensor(sensor)
            });
        let registry = Arc::new(HookRegistry::new(HookFactory::new(services)).with_metrics(metrics.clone()));
        let scheduler = Arc::new(
            RetransformScheduler::new(
                runtime.clone(),
                retransformer,
                Arc::new(resolver),
                registry.clone(),
                config.subscribe(),
            )
            .with_metrics(metrics.clone()),
        );
        let tracker = Arc::new(ClassLifecycleTracker::new(runtime).with_metrics(metrics.clone()));
        tracker.add_listener(Arc::new(PendingFeeder {
            scheduler: scheduler.clone(),
        }));

        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            registry,
            scheduler,
            tracker,
            metrics,
            shutdown,
            tasks: Mutex::new(Vec::new()),
            phase: Mutex::new(AgentPhase::Created),
        }
    }

    /// Queue every loaded unit and spawn the background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), AgentError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|e| AgentError::NoRuntime(e.to_string()))?;
        {
            let mut phase = self.phase.lock();
            match *phase {
                AgentPhase::Running => return Err(AgentError::AlreadyStarted),
                AgentPhase::Stopped => return Err(AgentError::ShuttingDown),
                AgentPhase::Created => *phase = AgentPhase::Running,
            }
        }

        let queued = self.scheduler.recheck_all_loaded();
        let mut tasks = self.tasks.lock();
        tasks.push(handle.spawn(
            self.tracker
                .clone()
                .run(self.config.subscribe(), self.shutdown.subscribe()),
        ));
        tasks.push(handle.spawn(self.scheduler.clone().run(self.shutdown.subscribe())));
        tasks.push(handle.spawn(watch_config(
            self.scheduler.clone(),
            self.config.subscribe(),
            self.shutdown.subscribe(),
        )));

        info!(generation = self.config.generation(), queued, "Instrumentation agent started");
        Ok(())
    }

    /// Remove all instrumentation and stop the background tasks.
    pub async fn shutdown(&self) -> DrainReport {
        *self.phase.lock() = AgentPhase::Stopped;
        let _ = self.shutdown.send(true);

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                error!(error = %err, "Agent task failed");
            }
        }

        let report = self.scheduler.drain().await;
        info!(restored = report.restored, abandoned = report.abandoned, "Instrumentation agent stopped");
        report
    }

    // ------------------------------------------------------------------------
    // Host-facing entry points
    // ------------------------------------------------------------------------

    /// Read handle for call-site dispatch.
    pub fn hooks(&self) -> HookLookup {
        HookLookup::new(self.registry.clone())
    }

    /// Hook for one method, or the no-op hook.
    pub fn lookup_hook(&self, unit: UnitId, signature: &str) -> Arc<Hook> {
        self.registry.lookup(unit, signature)
    }

    /// Weaving callback: what to splice into a unit being defined or rewritten.
    pub fn weave(&self, unit: &Unit) -> WeavePlan {
        self.scheduler.weave(unit)
    }

    /// Completion signal for [`weave`](Self::weave).
    ///
    /// Hooks for the unit are published with the next scheduler cycle.
    pub fn on_unit_woven(&self, unit: &Unit) {
        self.scheduler.on_unit_woven(unit);
    }

    /// Units found by the host outside the discovery scan.
    pub fn notify_new_units_discovered(&self, units: Vec<Unit>) {
        self.tracker.notify_new_units_discovered(units);
    }

    /// A unit is about to be defined; resumes discovery polling.
    pub fn notify_unit_about_to_be_defined(&self) {
        self.tracker.notify_unit_about_to_be_defined();
    }

    /// Mark a unit as possibly stale.
    pub fn request_recheck(&self, unit: &Unit) {
        self.scheduler.request_recheck(unit);
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn config(&self) -> &Arc<ConfigSource> {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<RetransformScheduler> {
        &self.scheduler
    }

    pub fn tracker(&self) -> &Arc<ClassLifecycleTracker> {
        &self.tracker
    }

    pub fn metrics(&self) -> &Arc<AgentMetrics> {
        &self.metrics
    }

    pub fn status(&self) -> AgentStatus {
        let snapshot = self.registry.snapshot();
        AgentStatus {
            phase: *self.phase.lock(),
            generation: self.config.generation(),
            pending: self.scheduler.pending().len(),
            instrumented: self.scheduler.applied().len(),
            hooked_units: snapshot.unit_count(),
            hooks: snapshot.hook_count(),
            known_units: self.tracker.known_count(),
            discovery_polling: self.tracker.is_polling(),
        }
    }
}

/// Re-queue every loaded unit whenever a new configuration is published.
async fn watch_config(
    scheduler: Arc<RetransformScheduler>,
    mut config: watch::Receiver<Arc<InstrumentationConfiguration>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            changed = config.changed() => {
                if changed.is_err() {
                    break;
                }
                let generation = config.borrow_and_update().generation;
                let queued = scheduler.recheck_all_loaded();
                debug!(generation, queued, "Configuration changed, re-checking loaded units");
            }
        }
    }
}
