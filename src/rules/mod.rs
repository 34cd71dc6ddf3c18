// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Rules, the global instrumentation configuration, and rule matching.

mod configuration;
mod definition;
mod resolver;

pub use configuration::{
    ClassInstrumentationConfiguration, DiscoverySettings, InstrumentationConfiguration,
    SchedulerSettings, DEFAULT_BATCH_DELAY, DEFAULT_CHECK_LIMIT, DEFAULT_INACTIVITY_THRESHOLD,
    DEFAULT_MAX_INACTIVE_TRIALS, DEFAULT_POLL_DELAY, DEFAULT_REMOVAL_RETRY_DELAY,
    DEFAULT_RETRANSFORM_LIMIT,
};
pub use definition::{
    ArgumentSource, DataProviderCall, MetricRecording, RuleDefinition, RuleTracing, SpanKind,
};
pub use resolver::{matched_rules, rules_for_method, ConfigurationResolver, Sensor};
