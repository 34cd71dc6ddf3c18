// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Turns method hook configurations into executable hooks.

use std::sync::Arc;

use crate::error::HookBuildError;
use crate::telemetry::AgentMetrics;
use crate::types::Unit;

use super::action::{
    HookAction, HookServices, MetricAction, ProviderCallAction, SpanEndAction, SpanStartAction,
};
use super::configuration::{BoundCall, MethodHookConfiguration};
use super::hook::Hook;

/// Builds hooks against one set of services.
#[derive(Clone)]
pub struct HookFactory {
    services: HookServices,
    metrics: Option<Arc<AgentMetrics>>,
}

impl HookFactory {
    pub fn new(services: HookServices) -> Self {
        Self {
            services,
            metrics: None,
        }
    }

    /// Report disabled actions of created hooks to the given metrics.
    pub fn with_metrics(mut self, metrics: Arc<AgentMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn services(&self) -> &HookServices {
        &self.services
    }

    /// Create the hook for one method.
    ///
    /// Entry runs the span start first so entry calls execute inside the
    /// span, unless the span name comes from an entry call: then the span
    /// starts right after that call, whose dependencies precede it in the
    /// ordered list. Exit runs the calls, then closes the span, then records
    /// metrics.
    pub fn create(
        &self,
        unit: &Unit,
        method: &str,
        configuration: MethodHookConfiguration,
    ) -> Result<Hook, HookBuildError> {
        let mut entry: Vec<Arc<dyn HookAction>> = Vec::with_capacity(configuration.entry.len() + 1);
        let mut exit: Vec<Arc<dyn HookAction>> =
            Vec::with_capacity(configuration.exit.len() + configuration.metrics.len() + 1);

        let tracing = &configuration.tracing;
        let mut span_start: Option<Arc<dyn HookAction>> = if tracing.start_span {
            Some(Arc::new(SpanStartAction::new(
                tracing.kind,
                tracing.name_key.clone(),
                default_span_name(unit, method),
                self.services.traces.clone(),
            )))
        } else {
            None
        };
        let name_position = tracing
            .name_key
            .as_deref()
            .and_then(|key| configuration.entry.iter().position(|call| call.key == key));
        if name_position.is_none() {
            entry.extend(span_start.take());
        }
        for (position, call) in configuration.entry.iter().enumerate() {
            entry.push(self.call_action(call)?);
            if name_position == Some(position) {
                entry.extend(span_start.take());
            }
        }

        for call in &configuration.exit {
            exit.push(self.call_action(call)?);
        }
        if tracing.end_span {
            exit.push(Arc::new(SpanEndAction::new(
                tracing.attributes.clone(),
                self.services.traces.clone(),
            )));
        }
        for recording in &configuration.metrics {
            exit.push(Arc::new(MetricAction::new(
                recording.clone(),
                self.services.metrics.clone(),
            )));
        }

        let hook = Hook::new(configuration, entry, exit);
        Ok(match &self.metrics {
            Some(metrics) => hook.with_metrics(metrics.clone()),
            None => hook,
        })
    }

    fn call_action(&self, bound: &BoundCall) -> Result<Arc<dyn HookAction>, HookBuildError> {
        let provider = self
            .services
            .providers
            .get(&bound.call.provider)
            .ok_or_else(|| HookBuildError::UnknownProvider {
                key: bound.key.clone(),
                provider: bound.call.provider.clone(),
            })?;
        Ok(Arc::new(ProviderCallAction::new(
            bound.key.clone(),
            &bound.call.provider,
            provider,
            bound.call.arguments.clone(),
        )))
    }
}

/// `SimpleName.method` for a unit name `pkg.SimpleName` and signature `method(..)`.
fn default_span_name(unit: &Unit, method: &str) -> String {
    let simple = unit.name().rsplit('.').next().unwrap_or_default();
    let method = method.split('(').next().unwrap_or(method);
    format!("{simple}.{method}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::configuration::TracingSettings;
    use crate::hooks::{Invocation, ProviderCatalog, SpanId, TraceSink};
    use crate::rules::{ArgumentSource, DataProviderCall, MetricRecording, SpanKind};
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::collections::BTreeMap;
    use crate::types::{LoaderId, TypeDescriptor, UnitId};

    fn unit() -> Unit {
        Unit::new(UnitId(1), LoaderId::Application(1), TypeDescriptor::new("com.acme.Orders"))
    }

    #[test]
    fn test_action_order() {
        let config = MethodHookConfiguration {
            entry: vec![BoundCall::new("start", DataProviderCall::new("timestamp"))],
            exit: vec![BoundCall::new("end", DataProviderCall::new("timestamp"))],
            tracing: TracingSettings {
                start_span: true,
                end_span: true,
                ..Default::default()
            },
            metrics: vec![MetricRecording::new("latency", "duration")],
        };
        let factory = HookFactory::new(HookServices::default());
        let hook = factory.create(&unit(), "place(int)", config).unwrap();

        assert_eq!(hook.entry_action_names(), vec!["span_start", "start <- timestamp"]);
        assert_eq!(hook.exit_action_names(), vec!["end <- timestamp", "span_end", "latency"]);
    }

    #[derive(Default)]
    struct RecordingTraces {
        names: Mutex<Vec<String>>,
    }

    impl TraceSink for RecordingTraces {
        fn start_span(&self, name: &str, _kind: SpanKind) -> SpanId {
            let mut names = self.names.lock();
            names.push(name.to_string());
            SpanId(names.len() as u64)
        }

        fn end_span(&self, _span: SpanId, _attributes: &BTreeMap<String, Value>) {}
    }

    #[test]
    fn test_span_name_from_entry_call() {
        let config = MethodHookConfiguration {
            entry: vec![
                BoundCall::new("start", DataProviderCall::new("timestamp")),
                BoundCall::new(
                    "span_name",
                    DataProviderCall::new("identity")
                        .with_arg("value", ArgumentSource::Constant("checkout".to_string())),
                ),
                BoundCall::new("stamp", DataProviderCall::new("timestamp")),
            ],
            tracing: TracingSettings {
                start_span: true,
                name_key: Some("span_name".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let traces = Arc::new(RecordingTraces::default());
        let factory = HookFactory::new(HookServices::default().with_trace_sink(traces.clone()));
        let hook = factory.create(&unit(), "place(int)", config).unwrap();

        assert_eq!(
            hook.entry_action_names(),
            vec!["start <- timestamp", "span_name <- identity", "span_start", "stamp <- timestamp"]
        );

        let u = unit();
        let inv = Invocation::new(&u, "place(int)", &[]);
        let frame = hook.on_enter(&inv);
        assert!(frame.span.is_some());
        assert_eq!(*traces.names.lock(), vec!["checkout"]);
    }

    #[test]
    fn test_span_name_key_without_entry_call_uses_default() {
        let config = MethodHookConfiguration {
            tracing: TracingSettings {
                start_span: true,
                name_key: Some("missing".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let traces = Arc::new(RecordingTraces::default());
        let factory = HookFactory::new(HookServices::default().with_trace_sink(traces.clone()));
        let hook = factory.create(&unit(), "place(int)", config).unwrap();

        let u = unit();
        let inv = Invocation::new(&u, "place(int)", &[]);
        hook.on_enter(&inv);
        assert_eq!(*traces.names.lock(), vec!["Orders.place"]);
    }

    #[test]
    fn test_unknown_provider() {
        let config = MethodHookConfiguration {
            entry: vec![BoundCall::new("x", DataProviderCall::new("does_not_exist"))],
            ..Default::default()
        };
        let factory = HookFactory::new(HookServices::new(ProviderCatalog::new()));
        let err = factory.create(&unit(), "m()", config).unwrap_err();
        assert!(matches!(err, HookBuildError::UnknownProvider { ref provider, .. } if provider == "does_not_exist"));
    }

    #[test]
    fn test_default_span_name() {
        assert_eq!(default_span_name(&unit(), "place(int,String)"), "Orders.place");
        let bare = Unit::new(UnitId(2), LoaderId::Bootstrap, TypeDescriptor::new("Main"));
        assert_eq!(default_span_name(&bare, "run"), "Main.run");
    }
}
