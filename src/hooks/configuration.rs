// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Resolved per-method hook configuration.

use std::collections::BTreeMap;

use crate::rules::{DataProviderCall, MetricRecording, SpanKind};

/// A data provider call bound to the key its result is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BoundCall {
    pub key: String,
    pub call: DataProviderCall,
}

impl BoundCall {
    pub fn new(key: impl Into<String>, call: DataProviderCall) -> Self {
        Self {
            key: key.into(),
            call,
        }
    }
}

/// Merged tracing settings of all rules applying to a method.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TracingSettings {
    pub start_span: bool,
    pub end_span: bool,
    pub name_key: Option<String>,
    pub kind: SpanKind,
    /// Span attribute name to data key.
    pub attributes: BTreeMap<String, String>,
}

impl TracingSettings {
    pub fn is_enabled(&self) -> bool {
        self.start_span || self.end_span
    }
}

/// Everything a hook for one (unit, method) pair executes.
///
/// A value type: two configurations that compare equal produce hooks with
/// identical behaviour, which is how unchanged methods are detected during
/// an update.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MethodHookConfiguration {
    /// Entry calls in dependency order.
    pub entry: Vec<BoundCall>,
    /// Exit calls in dependency order.
    pub exit: Vec<BoundCall>,
    pub tracing: TracingSettings,
    /// Metric recordings, sorted and deduplicated.
    pub metrics: Vec<MetricRecording>,
}

impl MethodHookConfiguration {
    /// Whether the hook would do nothing at all.
    pub fn is_empty(&self) -> bool {
        self.entry.is_empty()
            && self.exit.is_empty()
            && !self.tracing.is_enabled()
            && self.metrics.is_empty()
    }

    /// Keys of the entry calls, in execution order.
    pub fn entry_keys(&self) -> Vec<&str> {
        self.entry.iter().map(|c| c.key.as_str()).collect()
    }

    /// Keys of the exit calls, in execution order.
    pub fn exit_keys(&self) -> Vec<&str> {
        self.exit.iter().map(|c| c.key.as_str()).collect()
    }
}
