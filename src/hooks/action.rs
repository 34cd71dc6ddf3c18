// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Executable hook actions and the services they report to.
//!
//! A hook is a list of actions run at method entry and a list run at method
//! exit. Actions read the intercepted invocation, exchange values through a
//! per-invocation data map, and report spans and metrics to pluggable sinks.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::error::ActionError;
use crate::rules::{ArgumentSource, MetricRecording, SpanKind};
use crate::types::Unit;

/// Values produced by data provider calls, keyed by output name.
pub type DataValues = HashMap<String, Value>;

// ============================================================================
// Invocation context
// ============================================================================

/// One intercepted method invocation as seen by the hook.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub unit: &'a Unit,
    /// Method signature, as used for hook lookup.
    pub method: &'a str,
    pub this: Option<&'a Value>,
    pub arguments: &'a [Value],
    /// Set on exit only.
    pub return_value: Option<&'a Value>,
    /// Set on exit only, when the method threw.
    pub thrown: Option<&'a str>,
}

impl<'a> Invocation<'a> {
    pub fn new(unit: &'a Unit, method: &'a str, arguments: &'a [Value]) -> Self {
        Self {
            unit,
            method,
            this: None,
            arguments,
            return_value: None,
            thrown: None,
        }
    }

    pub fn with_this(mut self, this: &'a Value) -> Self {
        self.this = Some(this);
        self
    }

    pub fn returning(mut self, value: &'a Value) -> Self {
        self.return_value = Some(value);
        self
    }

    pub fn throwing(mut self, error: &'a str) -> Self {
        self.thrown = Some(error);
        self
    }
}

/// Mutable state an action works on during one entry or exit phase.
pub struct ExecutionContext<'a> {
    pub invocation: &'a Invocation<'a>,
    /// Values of the entry phase, available during exit.
    pub entry: Option<&'a DataValues>,
    /// Values of the current phase.
    pub values: &'a mut DataValues,
    /// Span opened at entry, if any.
    pub span: &'a mut Option<SpanId>,
}

impl ExecutionContext<'_> {
    /// Look up a data value, preferring the current phase.
    pub fn data(&self, key: &str) -> Option<&Value> {
        self.values
            .get(key)
            .or_else(|| self.entry.and_then(|entry| entry.get(key)))
    }

    /// Resolve an argument source against the invocation.
    pub fn resolve(&self, source: &ArgumentSource) -> Result<Value, ActionError> {
        let inv = self.invocation;
        Ok(match source {
            ArgumentSource::Constant(value) => Value::String(value.clone()),
            ArgumentSource::Argument(idx) => inv
                .arguments
                .get(*idx)
                .cloned()
                .ok_or_else(|| ActionError::MissingArgument(format!("argument {idx}")))?,
            ArgumentSource::This => inv.this.cloned().unwrap_or(Value::Null),
            ArgumentSource::ReturnValue => inv.return_value.cloned().unwrap_or(Value::Null),
            ArgumentSource::Thrown => inv
                .thrown
                .map(|e| Value::String(e.to_string()))
                .unwrap_or(Value::Null),
            ArgumentSource::MethodName => Value::String(inv.method.to_string()),
            ArgumentSource::UnitName => Value::String(inv.unit.name().to_string()),
            ArgumentSource::Data(key) => self.data(key).cloned().unwrap_or(Value::Null),
        })
    }
}

/// An executable step of a hook.
pub trait HookAction: Send + Sync {
    /// Name used in logs when the action fails.
    fn name(&self) -> &str;

    /// Run the action.
    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ActionError>;
}

// ============================================================================
// Data providers
// ============================================================================

/// Resolved arguments passed to a data provider.
#[derive(Debug, Default)]
pub struct ProviderArguments {
    values: BTreeMap<String, Value>,
}

impl ProviderArguments {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Get an argument that must be present and non-null.
    pub fn require(&self, name: &str) -> Result<&Value, ActionError> {
        match self.values.get(name) {
            Some(Value::Null) | None => Err(ActionError::MissingArgument(name.to_string())),
            Some(value) => Ok(value),
        }
    }

    /// Get a required numeric argument.
    pub fn number(&self, name: &str) -> Result<f64, ActionError> {
        let value = self.require(name)?;
        value.as_f64().ok_or_else(|| ActionError::InvalidArgument {
            name: name.to_string(),
            message: format!("expected a number, got {value}"),
        })
    }
}

/// A reusable function computing one data value.
pub trait DataProvider: Send + Sync {
    fn provide(&self, args: &ProviderArguments) -> Result<Value, ActionError>;
}

impl<F> DataProvider for F
where
    F: Fn(&ProviderArguments) -> Result<Value, ActionError> + Send + Sync,
{
    fn provide(&self, args: &ProviderArguments) -> Result<Value, ActionError> {
        self(args)
    }
}

/// Monotonic epoch shared by timestamp providers.
static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Named data providers available to rules.
#[derive(Clone, Default)]
pub struct ProviderCatalog {
    providers: HashMap<String, Arc<dyn DataProvider>>,
}

impl ProviderCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog holding the built-in providers:
    ///
    /// - `timestamp`: monotonic nanoseconds
    /// - `elapsed_millis`: `end - start` of two timestamps, in milliseconds
    /// - `identity`: its `value` argument unchanged
    /// - `to_string`: its `value` argument rendered as a string
    pub fn with_builtins() -> Self {
        Self::new()
            .with_provider("timestamp", |_: &ProviderArguments| -> Result<Value, ActionError> {
                Ok(Value::from(EPOCH.elapsed().as_nanos() as u64))
            })
            .with_provider("elapsed_millis", |args: &ProviderArguments| -> Result<Value, ActionError> {
                let start = args.number("start")?;
                let end = args.number("end")?;
                Ok(Value::from((end - start) / 1_000_000.0))
            })
            .with_provider("identity", |args: &ProviderArguments| -> Result<Value, ActionError> {
                Ok(args.get("value").cloned().unwrap_or(Value::Null))
            })
            .with_provider("to_string", |args: &ProviderArguments| -> Result<Value, ActionError> {
                Ok(Value::String(render(args.require("value")?)))
            })
    }

    /// Register a provider, replacing any provider of the same name.
    pub fn with_provider(mut self, name: impl Into<String>, provider: impl DataProvider + 'static) -> Self {
        self.register(name, provider);
        self
    }

    pub fn register(&mut self, name: impl Into<String>, provider: impl DataProvider + 'static) {
        self.providers.insert(name.into(), Arc::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DataProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ProviderCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCatalog")
            .field("providers", &self.names())
            .finish()
    }
}

/// Render a value for tags and string providers; strings lose their quotes.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Identifier of a span opened by a [`TraceSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(pub u64);

/// Receiver of spans produced by hooks.
pub trait TraceSink: Send + Sync {
    fn start_span(&self, name: &str, kind: SpanKind) -> SpanId;

    fn end_span(&self, span: SpanId, attributes: &BTreeMap<String, Value>);
}

/// Receiver of metric values produced by hooks.
pub trait MetricSink: Send + Sync {
    fn record(&self, metric: &str, value: f64, tags: &BTreeMap<String, String>);
}

/// Trace sink that only hands out span ids.
#[derive(Debug, Default)]
pub struct NoopTraceSink {
    next: AtomicU64,
}

impl TraceSink for NoopTraceSink {
    fn start_span(&self, _name: &str, _kind: SpanKind) -> SpanId {
        SpanId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    fn end_span(&self, _span: SpanId, _attributes: &BTreeMap<String, Value>) {}
}

/// Metric sink that discards everything.
#[derive(Debug, Default)]
pub struct NoopMetricSink;

impl MetricSink for NoopMetricSink {
    fn record(&self, _metric: &str, _value: f64, _tags: &BTreeMap<String, String>) {}
}

/// Trace sink that reports spans as `tracing` events.
#[derive(Debug, Default)]
pub struct LoggingTraceSink {
    next: AtomicU64,
}

impl TraceSink for LoggingTraceSink {
    fn start_span(&self, name: &str, kind: SpanKind) -> SpanId {
        let id = SpanId(self.next.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(span = id.0, name, kind = ?kind, "Hook span started");
        id
    }

    fn end_span(&self, span: SpanId, attributes: &BTreeMap<String, Value>) {
        tracing::debug!(span = span.0, attributes = ?attributes, "Hook span ended");
    }
}

/// Everything actions report to.
#[derive(Clone)]
pub struct HookServices {
    pub providers: Arc<ProviderCatalog>,
    pub traces: Arc<dyn TraceSink>,
    pub metrics: Arc<dyn MetricSink>,
}

impl HookServices {
    pub fn new(providers: ProviderCatalog) -> Self {
        Self {
            providers: Arc::new(providers),
            traces: Arc::new(NoopTraceSink::default()),
            metrics: Arc::new(NoopMetricSink),
        }
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.traces = sink;
        self
    }

    pub fn with_metric_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.metrics = sink;
        self
    }
}

impl Default for HookServices {
    fn default() -> Self {
        Self::new(ProviderCatalog::with_builtins())
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Invokes one data provider and stores its result under a key.
pub struct ProviderCallAction {
    key: String,
    label: String,
    provider: Arc<dyn DataProvider>,
    arguments: BTreeMap<String, ArgumentSource>,
}

impl ProviderCallAction {
    pub fn new(
        key: impl Into<String>,
        provider_name: &str,
        provider: Arc<dyn DataProvider>,
        arguments: BTreeMap<String, ArgumentSource>,
    ) -> Self {
        let key = key.into();
        Self {
            label: format!("{key} <- {provider_name}"),
            key,
            provider,
            arguments,
        }
    }
}

impl HookAction for ProviderCallAction {
    fn name(&self) -> &str {
        &self.label
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ActionError> {
        let mut values = BTreeMap::new();
        for (name, source) in &self.arguments {
            values.insert(name.clone(), ctx.resolve(source)?);
        }
        let value = self.provider.provide(&ProviderArguments::new(values))?;
        ctx.values.insert(self.key.clone(), value);
        Ok(())
    }
}

/// Opens a span at method entry.
pub struct SpanStartAction {
    kind: SpanKind,
    name_key: Option<String>,
    default_name: String,
    sink: Arc<dyn TraceSink>,
}

impl SpanStartAction {
    pub fn new(kind: SpanKind, name_key: Option<String>, default_name: String, sink: Arc<dyn TraceSink>) -> Self {
        Self {
            kind,
            name_key,
            default_name,
            sink,
        }
    }
}

impl HookAction for SpanStartAction {
    fn name(&self) -> &str {
        "span_start"
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ActionError> {
        let name = self
            .name_key
            .as_deref()
            .and_then(|key| ctx.data(key))
            .filter(|v| !v.is_null())
            .map(render)
            .unwrap_or_else(|| self.default_name.clone());
        *ctx.span = Some(self.sink.start_span(&name, self.kind));
        Ok(())
    }
}

/// Closes the entry span at method exit, attaching attributes.
pub struct SpanEndAction {
    attributes: BTreeMap<String, String>,
    sink: Arc<dyn TraceSink>,
}

impl SpanEndAction {
    pub fn new(attributes: BTreeMap<String, String>, sink: Arc<dyn TraceSink>) -> Self {
        Self { attributes, sink }
    }
}

impl HookAction for SpanEndAction {
    fn name(&self) -> &str {
        "span_end"
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ActionError> {
        let Some(span) = *ctx.span else {
            return Ok(());
        };
        let attributes: BTreeMap<String, Value> = self
            .attributes
            .iter()
            .filter_map(|(attr, key)| ctx.data(key).map(|v| (attr.clone(), v.clone())))
            .collect();
        *ctx.span = None;
        self.sink.end_span(span, &attributes);
        Ok(())
    }
}

/// Records a metric value at method exit.
pub struct MetricAction {
    recording: MetricRecording,
    sink: Arc<dyn MetricSink>,
}

impl MetricAction {
    pub fn new(recording: MetricRecording, sink: Arc<dyn MetricSink>) -> Self {
        Self { recording, sink }
    }
}

impl HookAction for MetricAction {
    fn name(&self) -> &str {
        &self.recording.metric
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ActionError> {
        let value = match ctx.data(&self.recording.value_key) {
            None | Some(Value::Null) => return Ok(()),
            Some(value) => value.as_f64().ok_or_else(|| ActionError::InvalidArgument {
                name: self.recording.value_key.clone(),
                message: format!("metric value must be numeric, got {value}"),
            })?,
        };
        let tags: BTreeMap<String, String> = self
            .recording
            .tags
            .iter()
            .filter_map(|(tag, key)| ctx.data(key).map(|v| (tag.clone(), render(v))))
            .collect();
        self.sink.record(&self.recording.metric, value, &tags);
        Ok(())
    }
}
