// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent options and status.

use std::sync::Arc;

use crate::hooks::HookServices;
use crate::rules::Sensor;
use crate::runtime::{HostRuntime, Retransformer};
use crate::telemetry::AgentMetrics;

/// Everything the agent needs from its host.
pub struct AgentOptions {
    /// Loaded-unit enumeration and modifiability checks.
    pub runtime: Arc<dyn HostRuntime>,
    /// The host's rewrite facility.
    pub retransformer: Arc<dyn Retransformer>,
    /// Providers and sinks used by hook actions.
    pub services: HookServices,
    /// Sensors contributing to unit configurations.
    pub sensors: Vec<Arc<dyn Sensor>>,
    /// Shared metrics; a fresh instance is created when absent.
    pub metrics: Option<Arc<AgentMetrics>>,
}

impl AgentOptions {
    pub fn new(runtime: Arc<dyn HostRuntime>, retransformer: Arc<dyn Retransformer>) -> Self {
        Self {
            runtime,
            retransformer,
            services: HookServices::default(),
            sensors: Vec::new(),
            metrics: None,
        }
    }

    pub fn with_services(mut self, services: HookServices) -> Self {
        self.services = services;
        self
    }

    pub fn with_sensor(mut self, sensor: Arc<dyn Sensor>) -> Self {
        self.sensors.push(sensor);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<AgentMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Lifecycle phase of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentPhase {
    #[default]
    Created,
    Running,
    Stopped,
}

/// Point-in-time view of an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStatus {
    pub phase: AgentPhase,
    /// Generation of the configuration in effect.
    pub generation: u64,
    /// Units awaiting a staleness check.
    pub pending: usize,
    /// Units currently carrying instrumentation.
    pub instrumented: usize,
    /// Units with published hooks.
    pub hooked_units: usize,
    /// Published method hooks.
    pub hooks: usize,
    /// Units seen by discovery.
    pub known_units: usize,
    /// Whether discovery is still polling.
    pub discovery_polling: bool,
}
