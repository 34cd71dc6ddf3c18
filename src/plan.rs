// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Dry-run hook planning.
//!
//! Shows which rules match a set of unit descriptions and the ordered hook
//! each method would receive, without a host runtime.

use std::sync::Arc;

use serde::Serialize;

use crate::hooks::build_method_configuration;
use crate::rules::{rules_for_method, ConfigurationResolver, InstrumentationConfiguration};
use crate::runtime::HostRuntime;
use crate::types::{LoaderId, TypeDescriptor, Unit, UnitId};

/// Runtime stand-in that treats every unit as modifiable.
struct OfflineRuntime;

impl HostRuntime for OfflineRuntime {
    fn all_loaded_units(&self) -> Vec<Unit> {
        Vec::new()
    }

    fn is_modifiable(&self, _unit: &Unit) -> bool {
        true
    }
}

/// Planned hook for one method.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodPlan {
    pub signature: String,
    pub rules: Vec<String>,
    /// Entry data keys in execution order.
    pub entry: Vec<String>,
    /// Exit data keys in execution order.
    pub exit: Vec<String>,
    pub starts_span: bool,
    pub ends_span: bool,
    pub metrics: Vec<String>,
    /// Why the method stays unhooked, if building failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Planned instrumentation of one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitPlan {
    pub unit: String,
    pub ignored: bool,
    pub rules: Vec<String>,
    pub sensors: Vec<String>,
    pub methods: Vec<MethodPlan>,
}

/// Plan hooks for every described unit under `config`.
pub fn plan_units(config: &InstrumentationConfiguration, descriptors: Vec<TypeDescriptor>) -> Vec<UnitPlan> {
    let runtime: Arc<dyn HostRuntime> = Arc::new(OfflineRuntime);
    let resolver = ConfigurationResolver::new(runtime);

    descriptors
        .into_iter()
        .enumerate()
        .map(|(index, descriptor)| {
            let unit = Unit::new(UnitId(index as u64), LoaderId::Application(0), descriptor);
            let ignored = resolver.is_ignored(&unit, config);
            let class = resolver.class_configuration(&unit, config);
            let descriptor = unit.descriptor();

            let methods = descriptor
                .methods
                .iter()
                .filter_map(|method| {
                    let rules = rules_for_method(&class.active_rules, descriptor, method);
                    if rules.is_empty() {
                        return None;
                    }
                    let rule_names = rules.iter().map(|r| r.name.clone()).collect();
                    let mut plan = MethodPlan {
                        signature: method.signature(),
                        rules: rule_names,
                        entry: Vec::new(),
                        exit: Vec::new(),
                        starts_span: false,
                        ends_span: false,
                        metrics: Vec::new(),
                        error: None,
                    };
                    match build_method_configuration(descriptor, method, &rules) {
                        Ok(built) => {
                            plan.entry = built.entry_keys().into_iter().map(str::to_string).collect();
                            plan.exit = built.exit_keys().into_iter().map(str::to_string).collect();
                            plan.starts_span = built.tracing.start_span;
                            plan.ends_span = built.tracing.end_span;
                            plan.metrics = built.metrics.iter().map(|m| m.metric.clone()).collect();
                        }
                        Err(err) => plan.error = Some(err.to_string()),
                    }
                    Some(plan)
                })
                .collect();

            UnitPlan {
                unit: unit.name().to_string(),
                ignored,
                rules: class.rule_names().map(str::to_string).collect(),
                sensors: class.active_sensors.iter().cloned().collect(),
                methods,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{ArgumentSource, DataProviderCall, RuleDefinition};
    use crate::scope::{Matcher, MethodPredicate, NameMatcher, ScopeDefinition};
    use crate::types::MethodDescriptor;

    fn config() -> InstrumentationConfiguration {
        let scope = Arc::new(ScopeDefinition::new(
            "handlers",
            Matcher::Any,
            Matcher::Is(MethodPredicate::Name(NameMatcher::starts_with("handle"))),
        ));
        let timing = RuleDefinition::new("timing")
            .with_scope(scope.clone())
            .with_entry("start", DataProviderCall::new("timestamp"))
            .with_exit("end", DataProviderCall::new("timestamp"))
            .with_exit(
                "elapsed",
                DataProviderCall::new("elapsed_millis")
                    .with_arg("start", ArgumentSource::Data("start".into()))
                    .with_arg("end", ArgumentSource::Data("end".into())),
            );
        let clash = RuleDefinition::new("clash")
            .with_scope(Arc::new(ScopeDefinition::new(
                "errors",
                Matcher::Any,
                Matcher::Is(MethodPredicate::Name(NameMatcher::equals("handleError"))),
            )))
            .with_entry("start", DataProviderCall::new("identity"));
        InstrumentationConfiguration {
            ignored_packages: vec!["java.".into()],
            ..Default::default()
        }
        .with_rules([Arc::new(timing), Arc::new(clash)])
    }

    #[test]
    fn test_plan_orders_and_reports_conflicts() {
        let descriptor = TypeDescriptor::new("com.acme.Api")
            .with_method(MethodDescriptor::new("handle"))
            .with_method(MethodDescriptor::new("handleError"))
            .with_method(MethodDescriptor::new("close"));

        let plans = plan_units(&config(), vec![descriptor]);
        assert_eq!(plans.len(), 1);
        let plan = &plans[0];
        assert!(!plan.ignored);
        assert_eq!(plan.rules, vec!["clash", "timing"]);
        assert_eq!(plan.methods.len(), 2);

        let handle = &plan.methods[0];
        assert_eq!(handle.signature, "handle()");
        assert_eq!(handle.entry, vec!["start"]);
        assert_eq!(handle.exit, vec!["end", "elapsed"]);
        assert!(handle.error.is_none());

        let error = &plan.methods[1];
        assert!(error.error.as_deref().unwrap_or_default().contains("start"));
        assert!(error.entry.is_empty());
    }

    #[test]
    fn test_ignored_units_have_no_methods() {
        let descriptor = TypeDescriptor::new("java.util.List").with_method(MethodDescriptor::new("handle"));
        let plans = plan_units(&config(), vec![descriptor]);
        assert!(plans[0].ignored);
        assert!(plans[0].methods.is_empty());
    }
}
