// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! Raw settings as written in `hookline.json` or `hookline.yaml`. Scopes and
//! rules are referenced by name; [`super::resolve_settings`] links them and
//! compiles the matchers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::rules::{DataProviderCall, SpanKind};
use crate::scope::MatchMode;
use crate::types::Visibility;

/// Top-level instrumentation settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Whether instrumentation is enabled at all
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Package prefixes that are never instrumented
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored_packages: Option<Vec<String>>,

    /// Skip synthetic lambda units
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_lambdas: Option<bool>,

    /// Named scopes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scopes: BTreeMap<String, ScopeSettings>,

    /// Named rules
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rules: BTreeMap<String, RuleSettings>,

    /// Retransformation batch settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerConfig>,

    /// Unit discovery polling settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoveryConfig>,
}

/// A name pattern: either a plain string matched exactly or a detailed form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NamePattern {
    Exact(String),
    Detailed(NamePatternConfig),
}

/// Detailed name pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamePatternConfig {
    pub pattern: String,

    #[serde(default)]
    pub mode: MatchMode,

    #[serde(default)]
    pub ignore_case: bool,
}

/// Type-level part of a scope. All present fields must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMatcherConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<NamePattern>,

    /// Any class in the superclass chain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superclass: Option<NamePattern>,

    /// Any implemented interface
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<NamePattern>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<NamePattern>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_interface: Option<bool>,
}

/// Method-level part of a scope. All present fields must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodMatcherConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<NamePattern>,

    /// Allowed visibilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Vec<Visibility>>,

    /// Exact parameter type list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub argument_count: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<NamePattern>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<NamePattern>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_static: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_abstract: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_synchronized: Option<bool>,

    /// Match constructors only (`true`) or exclude them (`false`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_constructor: Option<bool>,

    /// Match the type initializer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_type_initializer: Option<bool>,

    /// Overrides or implements a method of a matching supertype
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inherited_from: Option<NamePattern>,
}

/// A named scope.
///
/// `methods` entries are alternatives; an empty list matches every method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeSettings {
    #[serde(default, rename = "type")]
    pub type_matcher: TypeMatcherConfig,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<MethodMatcherConfig>,
}

/// Span settings of a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracingConfig {
    #[serde(default)]
    pub start_span: bool,

    #[serde(default)]
    pub end_span: bool,

    /// Data key holding the span name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub kind: SpanKind,

    /// Span attribute name to data key
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// Metric recorded on method exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricConfig {
    pub metric: String,

    /// Data key holding the value
    pub value: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// A named rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSettings {
    /// Disabled rules are only applied through includes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,

    /// Rules applied wherever this rule applies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,

    /// Data collected before the method body runs
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub entry: BTreeMap<String, DataProviderCall>,

    /// Data collected after the method body runs
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exit: BTreeMap<String, DataProviderCall>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracing: Option<TracingConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<MetricConfig>,
}

impl RuleSettings {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

/// Retransformation batch settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    /// Pending units re-checked per batch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_limit: Option<usize>,

    /// Units rewritten per batch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retransform_limit: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_delay_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub removal_retry_delay_ms: Option<u64>,
}

/// Unit discovery polling settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_delay_ms: Option<u64>,

    /// Time without new units after which a scan counts as inactive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactivity_threshold_ms: Option<u64>,

    /// Inactive scans tolerated before polling stops
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_inactive_trials: Option<u32>,
}
