// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Rule matching against units and methods.
//!
//! Everything here is a pure function of unit metadata and the given
//! configuration. The only outside input is the host's "is modifiable"
//! answer used for exclusion.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::trace;

use crate::runtime::HostRuntime;
use crate::types::{LoaderId, MethodDescriptor, TypeDescriptor, Unit};

use super::configuration::{ClassInstrumentationConfiguration, InstrumentationConfiguration};
use super::definition::RuleDefinition;

/// Marker in synthetic lambda unit names.
const LAMBDA_MARKER: &str = "$$Lambda";

/// A built-in instrumentation contributed by the agent itself rather than by
/// rule configuration.
pub trait Sensor: Send + Sync {
    /// Stable sensor name.
    fn name(&self) -> &str;

    /// Whether this sensor wants to instrument the given type.
    fn applies_to(&self, descriptor: &TypeDescriptor, config: &InstrumentationConfiguration) -> bool;
}

/// Rules whose type-level matcher accepts the descriptor, in name order.
pub fn matched_rules(
    descriptor: &TypeDescriptor,
    config: &InstrumentationConfiguration,
) -> Vec<Arc<RuleDefinition>> {
    config
        .rules
        .iter()
        .filter(|rule| rule.matches_type(descriptor))
        .cloned()
        .collect()
}

/// Rules that apply to one method, including transitively included rules.
///
/// `active` is the unit's set of type-matched rules. The result is sorted by
/// name and contains each rule once.
pub fn rules_for_method(
    active: &[Arc<RuleDefinition>],
    descriptor: &TypeDescriptor,
    method: &MethodDescriptor,
) -> Vec<Arc<RuleDefinition>> {
    let mut selected: BTreeMap<&str, &Arc<RuleDefinition>> = BTreeMap::new();
    let mut stack: Vec<&Arc<RuleDefinition>> = active
        .iter()
        .filter(|rule| rule.matches_method(descriptor, method))
        .collect();

    while let Some(rule) = stack.pop() {
        if selected.insert(rule.name.as_str(), rule).is_none() {
            stack.extend(rule.includes.iter());
        }
    }

    selected.into_values().cloned().collect()
}

/// Computes the desired instrumentation state of units.
pub struct ConfigurationResolver {
    runtime: Arc<dyn HostRuntime>,
    sensors: Vec<Arc<dyn Sensor>>,
}

impl ConfigurationResolver {
    /// Create a resolver without sensors.
    pub fn new(runtime: Arc<dyn HostRuntime>) -> Self {
        Self {
            runtime,
            sensors: Vec::new(),
        }
    }

    /// Register a sensor.
    pub fn with_sensor(mut self, sensor: Arc<dyn Sensor>) -> Self {
        self.sensors.push(sensor);
        self
    }

    /// Whether a unit is excluded from instrumentation before matching runs.
    pub fn is_ignored(&self, unit: &Unit, config: &InstrumentationConfiguration) -> bool {
        if unit.loader() == LoaderId::Agent {
            return true;
        }
        let name = unit.name();
        if config.exclude_lambdas && name.contains(LAMBDA_MARKER) {
            return true;
        }
        if config
            .ignored_packages
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
        {
            return true;
        }
        !self.runtime.is_modifiable(unit)
    }

    /// Resolve the desired state of one unit under the given configuration.
    pub fn class_configuration(
        &self,
        unit: &Unit,
        config: &InstrumentationConfiguration,
    ) -> ClassInstrumentationConfiguration {
        if !config.enabled || self.is_ignored(unit, config) {
            return ClassInstrumentationConfiguration::none();
        }

        let descriptor = unit.descriptor();
        let active_sensors: BTreeSet<String> = self
            .sensors
            .iter()
            .filter(|s| s.applies_to(descriptor, config))
            .map(|s| s.name().to_string())
            .collect();
        let active_rules = matched_rules(descriptor, config);

        trace!(
            unit = %unit,
            sensors = active_sensors.len(),
            rules = active_rules.len(),
            "Resolved unit configuration"
        );

        ClassInstrumentationConfiguration {
            active_sensors,
            active_rules,
        }
    }
}
