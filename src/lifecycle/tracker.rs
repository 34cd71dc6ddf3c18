// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Discovery of newly loaded units by polling.
//!
//! While units keep appearing the tracker rescans the host every poll delay.
//! Once nothing new has shown up for longer than the inactivity threshold it
//! counts idle trials and, after too many, stops polling until the weaver
//! signals that a unit is about to be defined.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, trace};

use crate::rules::{DiscoverySettings, InstrumentationConfiguration};
use crate::runtime::HostRuntime;
use crate::telemetry::{metrics::operations, AgentMetrics};
use crate::types::{Unit, UnitId, WeakUnit};

/// Receiver of discovery events.
pub trait DiscoveryListener: Send + Sync {
    /// Called with units not seen before. Never called with an empty slice.
    fn on_new_units(&self, units: &[Unit]);
}

/// Result of one tracker step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The host was rescanned.
    Scanned { new_units: usize },
    /// No scan: nothing new appeared within the inactivity threshold.
    Idle { trials: u32 },
    /// Polling is stopped until the next about-to-define signal.
    Stopped,
}

#[derive(Debug)]
struct TrackerState {
    known: HashMap<UnitId, WeakUnit>,
    last_activity: Instant,
    inactive_trials: u32,
    polling: bool,
}

/// Tracks which loaded units have already been seen.
pub struct ClassLifecycleTracker {
    runtime: Arc<dyn HostRuntime>,
    state: Mutex<TrackerState>,
    listeners: RwLock<Vec<Arc<dyn DiscoveryListener>>>,
    wake: Notify,
    metrics: Option<Arc<AgentMetrics>>,
}

impl ClassLifecycleTracker {
    pub fn new(runtime: Arc<dyn HostRuntime>) -> Self {
        Self {
            runtime,
            state: Mutex::new(TrackerState {
                known: HashMap::new(),
                last_activity: Instant::now(),
                inactive_trials: 0,
                polling: true,
            }),
            listeners: RwLock::new(Vec::new()),
            wake: Notify::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AgentMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn add_listener(&self, listener: Arc<dyn DiscoveryListener>) {
        self.listeners.write().push(listener);
    }

    /// Number of live known units.
    pub fn known_count(&self) -> usize {
        self.state.lock().known.values().filter(|u| !u.is_dead()).count()
    }

    pub fn is_polling(&self) -> bool {
        self.state.lock().polling
    }

    /// The weaver is about to define a new unit.
    ///
    /// Restarts the inactivity clock and resumes polling if it had stopped.
    pub fn notify_unit_about_to_be_defined(&self) {
        self.notify_unit_about_to_be_defined_at(Instant::now());
    }

    pub(crate) fn notify_unit_about_to_be_defined_at(&self, now: Instant) {
        let resumed = {
            let mut state = self.state.lock();
            state.last_activity = now;
            state.inactive_trials = 0;
            !std::mem::replace(&mut state.polling, true)
        };
        if resumed {
            debug!("Resuming unit discovery");
        }
        self.wake.notify_one();
    }

    /// Units discovered by another channel.
    ///
    /// Only units not yet known are passed on to listeners.
    pub fn notify_new_units_discovered(&self, units: Vec<Unit>) {
        let fresh = {
            let mut state = self.state.lock();
            let fresh = Self::add_unknown(&mut state, units);
            if !fresh.is_empty() {
                state.last_activity = Instant::now();
                state.inactive_trials = 0;
            }
            fresh
        };
        self.fan_out(&fresh);
    }

    /// Run one discovery step at `now`.
    pub fn tick(&self, now: Instant, settings: &DiscoverySettings) -> TickOutcome {
        {
            let mut state = self.state.lock();
            if !state.polling {
                return TickOutcome::Stopped;
            }
            if now.saturating_duration_since(state.last_activity) >= settings.inactivity_threshold {
                state.inactive_trials += 1;
                if state.inactive_trials > settings.max_inactive_trials {
                    state.polling = false;
                    debug!(trials = state.inactive_trials, "Stopping unit discovery after inactivity");
                    return TickOutcome::Stopped;
                }
                return TickOutcome::Idle {
                    trials: state.inactive_trials,
                };
            }
        }

        let _timer = crate::timed!(operations::DISCOVERY_SCAN, self.metrics.clone());
        // Scan without holding the lock; the host call may be slow.
        let loaded = self.runtime.all_loaded_units();

        let fresh = {
            let mut state = self.state.lock();
            let before = state.known.len();
            state.known.retain(|_, unit| !unit.is_dead());
            let purged = before - state.known.len();
            if purged > 0 {
                trace!(purged, "Purged unloaded units");
            }
            let fresh = Self::add_unknown(&mut state, loaded);
            if !fresh.is_empty() {
                state.last_activity = now;
                state.inactive_trials = 0;
            }
            fresh
        };

        self.fan_out(&fresh);
        TickOutcome::Scanned {
            new_units: fresh.len(),
        }
    }

    /// Poll until `shutdown` flips to true.
    ///
    /// Discovery settings are re-read from `config` before every step.
    pub async fn run(
        self: Arc<Self>,
        config: watch::Receiver<Arc<InstrumentationConfiguration>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Unit discovery started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let settings = config.borrow().discovery.clone();
            let outcome = self.tick(Instant::now(), &settings);
            trace!(?outcome, "Discovery tick");

            let delay = poll_delay(&settings);
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.wake.notified(), if outcome == TickOutcome::Stopped => {}
                _ = tokio::time::sleep(delay), if outcome != TickOutcome::Stopped => {}
            }
        }
        debug!("Unit discovery stopped");
    }

    fn add_unknown(state: &mut TrackerState, units: Vec<Unit>) -> Vec<Unit> {
        units
            .into_iter()
            .filter(|unit| {
                let known = state.known.get(&unit.id()).is_some_and(|k| !k.is_dead());
                if !known {
                    state.known.insert(unit.id(), unit.downgrade());
                }
                !known
            })
            .collect()
    }

    fn fan_out(&self, units: &[Unit]) {
        if units.is_empty() {
            return;
        }
        debug!(count = units.len(), "Discovered new units");
        #[cfg(feature = "telemetry")]
        {
            if let Some(metrics) = &self.metrics {
                metrics.record_units_discovered(units.len() as u64);
            }
        }
        let listeners: Vec<_> = self.listeners.read().clone();
        for listener in listeners {
            listener.on_new_units(units);
        }
    }
}

fn poll_delay(settings: &DiscoverySettings) -> Duration {
    settings.poll_delay.max(Duration::from_millis(1))
}
