// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Rule definitions and the data provider calls they bind.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::scope::ScopeDefinition;

/// Where the value of one provider argument comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArgumentSource {
    /// A literal configured value.
    Constant(String),
    /// The n-th argument of the instrumented method.
    Argument(usize),
    /// The receiver of the instrumented method.
    This,
    /// The return value (exit only).
    ReturnValue,
    /// The thrown error (exit only).
    Thrown,
    /// The instrumented method's name.
    MethodName,
    /// The instrumented unit's name.
    UnitName,
    /// The output of another data provider call.
    Data(String),
}

/// One invocation of a reusable data provider, bound to concrete argument sources.
///
/// Two calls are interchangeable exactly when they are equal: same provider,
/// same argument bindings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DataProviderCall {
    pub provider: String,
    #[serde(default)]
    pub arguments: BTreeMap<String, ArgumentSource>,
}

impl DataProviderCall {
    /// Create a call without arguments.
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            arguments: BTreeMap::new(),
        }
    }

    /// Bind an argument.
    pub fn with_arg(mut self, name: impl Into<String>, source: ArgumentSource) -> Self {
        self.arguments.insert(name.into(), source);
        self
    }

    /// Data keys this call reads.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.arguments.values().filter_map(|source| match source {
            ArgumentSource::Data(key) => Some(key.as_str()),
            _ => None,
        })
    }
}

/// Kind of span a rule starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    #[default]
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

/// Tracing contribution of one rule.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleTracing {
    pub start_span: bool,
    pub end_span: bool,
    /// Data key holding the span name; defaults to `Unit.method`.
    pub name_key: Option<String>,
    pub kind: SpanKind,
    /// Span attribute name to data key.
    pub attributes: BTreeMap<String, String>,
}

/// A metric recorded when the method exits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricRecording {
    pub metric: String,
    /// Data key holding the numeric value.
    pub value_key: String,
    /// Tag name to data key.
    pub tags: BTreeMap<String, String>,
}

impl MetricRecording {
    pub fn new(metric: impl Into<String>, value_key: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            value_key: value_key.into(),
            tags: BTreeMap::new(),
        }
    }
}

/// A named bundle of scopes and the monitoring actions to attach when any
/// of them match.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuleDefinition {
    pub name: String,
    pub scopes: Vec<Arc<ScopeDefinition>>,
    /// Rules applied wherever this rule applies.
    pub includes: Vec<Arc<RuleDefinition>>,
    pub entry: BTreeMap<String, DataProviderCall>,
    pub exit: BTreeMap<String, DataProviderCall>,
    pub tracing: Option<RuleTracing>,
    pub metrics: Vec<MetricRecording>,
}

impl RuleDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_scope(mut self, scope: Arc<ScopeDefinition>) -> Self {
        self.scopes.push(scope);
        self
    }

    pub fn with_include(mut self, rule: Arc<RuleDefinition>) -> Self {
        self.includes.push(rule);
        self
    }

    pub fn with_entry(mut self, key: impl Into<String>, call: DataProviderCall) -> Self {
        self.entry.insert(key.into(), call);
        self
    }

    pub fn with_exit(mut self, key: impl Into<String>, call: DataProviderCall) -> Self {
        self.exit.insert(key.into(), call);
        self
    }

    pub fn with_tracing(mut self, tracing: RuleTracing) -> Self {
        self.tracing = Some(tracing);
        self
    }

    pub fn with_metric(mut self, metric: MetricRecording) -> Self {
        self.metrics.push(metric);
        self
    }

    /// Whether any scope accepts the type.
    pub fn matches_type(&self, descriptor: &crate::types::TypeDescriptor) -> bool {
        self.scopes.iter().any(|s| s.matches_type(descriptor))
    }

    /// Whether any scope accepts both the type and the method.
    pub fn matches_method(
        &self,
        descriptor: &crate::types::TypeDescriptor,
        method: &crate::types::MethodDescriptor,
    ) -> bool {
        self.scopes.iter().any(|s| s.matches(descriptor, method))
    }
}
