// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Global and per-unit instrumentation configuration.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use super::definition::RuleDefinition;

// ============================================================================
// Constants
// ============================================================================

/// Default number of pending units re-checked per batch.
pub const DEFAULT_CHECK_LIMIT: usize = 100;

/// Default number of units rewritten per batch.
pub const DEFAULT_RETRANSFORM_LIMIT: usize = 100;

/// Default delay between retransform batches.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(50);

/// Default delay between retries when removing instrumentation on shutdown.
pub const DEFAULT_REMOVAL_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Default delay between discovery scans.
pub const DEFAULT_POLL_DELAY: Duration = Duration::from_millis(500);

/// Default time without new units after which a scan counts as inactive.
pub const DEFAULT_INACTIVITY_THRESHOLD: Duration = Duration::from_secs(10);

/// Default number of inactive scans tolerated before polling stops.
pub const DEFAULT_MAX_INACTIVE_TRIALS: u32 = 10;

// ============================================================================
// Settings
// ============================================================================

/// Batch sizes and delays of the retransformation scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub check_limit: usize,
    pub retransform_limit: usize,
    pub batch_delay: Duration,
    pub removal_retry_delay: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            check_limit: DEFAULT_CHECK_LIMIT,
            retransform_limit: DEFAULT_RETRANSFORM_LIMIT,
            batch_delay: DEFAULT_BATCH_DELAY,
            removal_retry_delay: DEFAULT_REMOVAL_RETRY_DELAY,
        }
    }
}

/// Polling behaviour of the lifecycle tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverySettings {
    pub poll_delay: Duration,
    pub inactivity_threshold: Duration,
    pub max_inactive_trials: u32,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            poll_delay: DEFAULT_POLL_DELAY,
            inactivity_threshold: DEFAULT_INACTIVITY_THRESHOLD,
            max_inactive_trials: DEFAULT_MAX_INACTIVE_TRIALS,
        }
    }
}

/// The currently desired global instrumentation state.
///
/// Replaced wholesale on every configuration change; `generation` increases
/// with each published value.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentationConfiguration {
    pub generation: u64,
    /// Whether instrumentation is enabled at all.
    pub enabled: bool,
    /// Active rules, sorted by name.
    pub rules: Vec<Arc<RuleDefinition>>,
    /// Package prefixes that are never instrumented.
    pub ignored_packages: Vec<String>,
    /// Skip synthetic lambda units.
    pub exclude_lambdas: bool,
    pub scheduler: SchedulerSettings,
    pub discovery: DiscoverySettings,
}

impl Default for InstrumentationConfiguration {
    fn default() -> Self {
        Self {
            generation: 0,
            enabled: true,
            rules: Vec::new(),
            ignored_packages: Vec::new(),
            exclude_lambdas: true,
            scheduler: SchedulerSettings::default(),
            discovery: DiscoverySettings::default(),
        }
    }
}

impl InstrumentationConfiguration {
    /// A configuration that instruments nothing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Replace the rule set, keeping it sorted by name.
    pub fn with_rules<I>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = Arc<RuleDefinition>>,
    {
        let mut rules: Vec<_> = rules.into_iter().collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        self.rules = rules;
        self
    }

    /// Look up a rule by name.
    pub fn rule(&self, name: &str) -> Option<&Arc<RuleDefinition>> {
        self.rules
            .binary_search_by(|r| r.name.as_str().cmp(name))
            .ok()
            .map(|idx| &self.rules[idx])
    }
}

/// Resolved instrumentation state of one unit.
///
/// Compared by value against the state applied at the last weave to decide
/// whether the unit must be rewritten again.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClassInstrumentationConfiguration {
    pub active_sensors: BTreeSet<String>,
    /// Rules whose type matcher accepted the unit, sorted by name.
    pub active_rules: Vec<Arc<RuleDefinition>>,
}

impl ClassInstrumentationConfiguration {
    /// The state of a unit that carries no instrumentation.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.active_sensors.is_empty() && self.active_rules.is_empty()
    }

    pub fn rule_names(&self) -> impl Iterator<Item = &str> {
        self.active_rules.iter().map(|r| r.name.as_str())
    }
}
