// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Dependency-ordered composition of a method's hook configuration.
//!
//! The rules applying to a method each contribute data provider calls keyed
//! by output name. Entry and exit calls live in separate key spaces. Within a
//! key space, calls for the same key must agree, and the calls are ordered so
//! that every call runs after the calls whose outputs it reads.
//!
//! ```text
//!   rules ──collect──▶ key → call ──graph──▶ Kahn's sort ──▶ ordered calls
//!            │ unequal calls                    │ no ready node
//!            ▼                                  ▼
//!       Conflict error                     Cycle error
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::trace;

use crate::error::HookBuildError;
use crate::rules::{DataProviderCall, MetricRecording, RuleDefinition};
use crate::types::{MethodDescriptor, TypeDescriptor};

use super::configuration::{BoundCall, MethodHookConfiguration, TracingSettings};

/// Build the hook configuration of one method from the rules applying to it.
///
/// Fails without producing any partial result when two rules bind unequal
/// calls to the same key, when span settings or metric recordings of two
/// rules disagree, or when the calls of either key space depend on each
/// other cyclically.
pub fn build_method_configuration(
    descriptor: &TypeDescriptor,
    method: &MethodDescriptor,
    rules: &[Arc<RuleDefinition>],
) -> Result<MethodHookConfiguration, HookBuildError> {
    let entry_calls = collect_calls(rules, |rule| &rule.entry)?;
    let exit_calls = collect_calls(rules, |rule| &rule.exit)?;

    let entry = order_calls(entry_calls)?;
    let exit = order_calls(exit_calls)?;
    let tracing = merge_tracing(rules)?;
    let metrics = merge_metrics(rules)?;

    trace!(
        unit = %descriptor.name,
        method = %method.signature(),
        entry = entry.len(),
        exit = exit.len(),
        "Built method hook configuration"
    );

    Ok(MethodHookConfiguration {
        entry,
        exit,
        tracing,
        metrics,
    })
}

/// Union the metric recordings of all rules, one recording per metric name.
fn merge_metrics(rules: &[Arc<RuleDefinition>]) -> Result<Vec<MetricRecording>, HookBuildError> {
    let mut merged: BTreeMap<&str, (&MetricRecording, &str)> = BTreeMap::new();

    for rule in rules {
        for recording in &rule.metrics {
            match merged.get(recording.metric.as_str()) {
                Some((existing, owner)) if *existing != recording => {
                    return Err(HookBuildError::MetricConflict {
                        metric: recording.metric.clone(),
                        first_rule: owner.to_string(),
                        second_rule: rule.name.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    merged.insert(recording.metric.as_str(), (recording, rule.name.as_str()));
                }
            }
        }
    }

    Ok(merged.into_values().map(|(recording, _)| recording.clone()).collect())
}

/// Gather the calls of one key space, rejecting divergent bindings.
fn collect_calls<'r, F>(
    rules: &'r [Arc<RuleDefinition>],
    select: F,
) -> Result<BTreeMap<String, DataProviderCall>, HookBuildError>
where
    F: Fn(&'r RuleDefinition) -> &'r BTreeMap<String, DataProviderCall>,
{
    let mut bound: BTreeMap<&'r str, (&'r DataProviderCall, &'r str)> = BTreeMap::new();

    for rule in rules {
        for (key, call) in select(rule.as_ref()) {
            match bound.get(key.as_str()) {
                Some((existing, owner)) if *existing != call => {
                    return Err(HookBuildError::conflict(key.clone(), *owner, rule.name.clone()));
                }
                Some(_) => {}
                None => {
                    bound.insert(key.as_str(), (call, rule.name.as_str()));
                }
            }
        }
    }

    Ok(bound
        .into_iter()
        .map(|(key, (call, _))| (key.to_string(), call.clone()))
        .collect())
}

fn order_calls(mut calls: BTreeMap<String, DataProviderCall>) -> Result<Vec<BoundCall>, HookBuildError> {
    let order = topological_order(&calls)?;
    Ok(order
        .into_iter()
        .filter_map(|key| calls.remove(&key).map(|call| BoundCall { key, call }))
        .collect())
}

/// Order keys so that every call comes after the calls it reads from.
///
/// Reads of keys outside `calls` are not edges. Among independent keys the
/// lexicographically smallest is emitted first, which makes the order stable
/// for equal inputs.
pub fn topological_order(calls: &BTreeMap<String, DataProviderCall>) -> Result<Vec<String>, HookBuildError> {
    let mut in_degree: HashMap<&str, usize> = calls.keys().map(|k| (k.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for (key, call) in calls {
        let deps: BTreeSet<&str> = call
            .dependencies()
            .filter(|dep| calls.contains_key(*dep))
            .collect();
        for dep in deps {
            if let Some(degree) = in_degree.get_mut(key.as_str()) {
                *degree += 1;
            }
            dependents.entry(dep).or_default().push(key.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(key, _)| *key)
        .collect();
    let mut order = Vec::with_capacity(calls.len());

    while let Some(key) = ready.pop_first() {
        order.push(key.to_string());
        for dependent in dependents.get(key).map(Vec::as_slice).unwrap_or_default() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if order.len() < calls.len() {
        let mut keys: Vec<String> = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(key, _)| key.to_string())
            .collect();
        keys.sort();
        return Err(HookBuildError::Cycle { keys });
    }

    Ok(order)
}

/// Merge the tracing contributions of all rules, in rule name order.
fn merge_tracing(rules: &[Arc<RuleDefinition>]) -> Result<TracingSettings, HookBuildError> {
    let mut merged = TracingSettings::default();
    let mut name_owner: Option<&str> = None;
    let mut kind_owner: Option<&str> = None;
    let mut attribute_owner: BTreeMap<&str, &str> = BTreeMap::new();

    for rule in rules {
        let Some(tracing) = &rule.tracing else {
            continue;
        };

        if tracing.start_span {
            match kind_owner {
                Some(owner) if merged.kind != tracing.kind => {
                    return Err(HookBuildError::AttributeConflict {
                        attribute: "<span kind>".to_string(),
                        first_rule: owner.to_string(),
                        second_rule: rule.name.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    merged.kind = tracing.kind;
                    kind_owner = Some(rule.name.as_str());
                }
            }
        }
        merged.start_span |= tracing.start_span;
        merged.end_span |= tracing.end_span;

        if let Some(name_key) = &tracing.name_key {
            match merged.name_key.as_ref() {
                Some(existing) if existing != name_key => {
                    return Err(HookBuildError::AttributeConflict {
                        attribute: "<span name>".to_string(),
                        first_rule: name_owner.unwrap_or_default().to_string(),
                        second_rule: rule.name.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    merged.name_key = Some(name_key.clone());
                    name_owner = Some(rule.name.as_str());
                }
            }
        }

        for (attribute, key) in &tracing.attributes {
            match merged.attributes.get(attribute) {
                Some(existing) if existing != key => {
                    return Err(HookBuildError::AttributeConflict {
                        attribute: attribute.clone(),
                        first_rule: attribute_owner
                            .get(attribute.as_str())
                            .copied()
                            .unwrap_or_default()
                            .to_string(),
                        second_rule: rule.name.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    merged.attributes.insert(attribute.clone(), key.clone());
                    attribute_owner.insert(attribute.as_str(), rule.name.as_str());
                }
            }
        }
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{ArgumentSource, RuleTracing, SpanKind};

    fn call(provider: &str, reads: &[&str]) -> DataProviderCall {
        reads.iter().enumerate().fold(DataProviderCall::new(provider), |c, (i, key)| {
            c.with_arg(format!("in{i}"), ArgumentSource::Data(key.to_string()))
        })
    }

    fn graph(edges: &[(&str, &[&str])]) -> BTreeMap<String, DataProviderCall> {
        edges
            .iter()
            .map(|(key, reads)| (key.to_string(), call("p", reads)))
            .collect()
    }

    fn build(rules: &[Arc<RuleDefinition>]) -> Result<MethodHookConfiguration, HookBuildError> {
        build_method_configuration(&TypeDescriptor::new("A"), &MethodDescriptor::new("m"), rules)
    }

    fn assert_valid_order(calls: &BTreeMap<String, DataProviderCall>, order: &[String]) {
        let mut sorted = order.to_vec();
        sorted.sort();
        let keys: Vec<String> = calls.keys().cloned().collect();
        assert_eq!(sorted, keys, "order must be a permutation of the keys");

        let position: HashMap<&str, usize> = order.iter().enumerate().map(|(i, k)| (k.as_str(), i)).collect();
        for (key, call) in calls {
            for dep in call.dependencies().filter(|d| calls.contains_key(*d)) {
                assert!(position[dep] < position[key.as_str()], "{dep} must precede {key}");
            }
        }
    }

    #[test]
    fn test_order_respects_dependencies() {
        let calls = graph(&[
            ("duration", &["start", "end"]),
            ("end", &[]),
            ("start", &[]),
            ("status", &["response"]),
            ("response", &[]),
            ("label", &["status", "duration"]),
        ]);
        let order = topological_order(&calls).unwrap();
        assert_valid_order(&calls, &order);
    }

    #[test]
    fn test_order_for_many_acyclic_graphs() {
        // Layered graphs: node i may read any node j < i.
        for n in 1..8usize {
            for mask in [0u64, 0b1, 0b1010_1010, 0xFFFF_FFFF, 0x1234_5678] {
                let mut calls = BTreeMap::new();
                let mut bit = 0;
                for i in 0..n {
                    let reads: Vec<String> = (0..i)
                        .filter(|_| {
                            bit += 1;
                            mask & (1 << (bit % 64)) != 0
                        })
                        .map(|j| format!("k{}", n - j))
                        .collect();
                    let reads: Vec<&str> = reads.iter().map(String::as_str).collect();
                    calls.insert(format!("k{}", n - i), call("p", &reads));
                }
                let order = topological_order(&calls).unwrap();
                assert_valid_order(&calls, &order);
            }
        }
    }

    #[test]
    fn test_independent_keys_are_lexicographic() {
        let calls = graph(&[("c", &[]), ("a", &[]), ("b", &[])]);
        assert_eq!(topological_order(&calls).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_reads_outside_key_space_are_ignored() {
        let calls = graph(&[("exit_value", &["entry_only"])]);
        assert_eq!(topological_order(&calls).unwrap(), vec!["exit_value"]);
    }

    #[test]
    fn test_direct_cycle() {
        let calls = graph(&[("a", &["b"]), ("b", &["a"])]);
        let err = topological_order(&calls).unwrap_err();
        assert_eq!(err, HookBuildError::Cycle { keys: vec!["a".into(), "b".into()] });
    }

    #[test]
    fn test_indirect_cycle() {
        let calls = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"]), ("free", &[])]);
        let err = topological_order(&calls).unwrap_err();
        assert!(err.is_cycle());
        if let HookBuildError::Cycle { keys } = err {
            assert!(!keys.contains(&"free".to_string()));
        }
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let calls = graph(&[("a", &["a"])]);
        assert!(topological_order(&calls).unwrap_err().is_cycle());
    }

    #[test]
    fn test_cycle_produces_no_configuration() {
        let rule = Arc::new(
            RuleDefinition::new("r")
                .with_entry("a", call("p", &["b"]))
                .with_entry("b", call("p", &["a"]))
                .with_exit("ok", call("p", &[])),
        );
        assert!(build(&[rule]).unwrap_err().is_cycle());
    }

    #[test]
    fn test_equal_calls_are_merged() {
        let shared = DataProviderCall::new("timestamp");
        let r1 = Arc::new(RuleDefinition::new("r1").with_entry("start", shared.clone()));
        let r2 = Arc::new(RuleDefinition::new("r2").with_entry("start", shared.clone()));

        let config = build(&[r1, r2]).unwrap();
        assert_eq!(config.entry, vec![BoundCall::new("start", shared)]);
    }

    #[test]
    fn test_unequal_calls_conflict() {
        let r1 = Arc::new(RuleDefinition::new("r1").with_entry("start", DataProviderCall::new("timestamp")));
        let r2 = Arc::new(RuleDefinition::new("r2").with_entry("start", DataProviderCall::new("clock")));

        let err = build(&[r1, r2]).unwrap_err();
        assert_eq!(err, HookBuildError::conflict("start", "r1", "r2"));
    }

    #[test]
    fn test_entry_and_exit_key_spaces_are_independent() {
        let r1 = Arc::new(RuleDefinition::new("r1").with_entry("value", DataProviderCall::new("a")));
        let r2 = Arc::new(RuleDefinition::new("r2").with_exit("value", DataProviderCall::new("b")));

        let config = build(&[r1, r2]).unwrap();
        assert_eq!(config.entry_keys(), vec!["value"]);
        assert_eq!(config.exit_keys(), vec!["value"]);
    }

    #[test]
    fn test_tracing_merge() {
        let r1 = Arc::new(RuleDefinition::new("r1").with_tracing(RuleTracing {
            start_span: true,
            attributes: [("http.method".to_string(), "method".to_string())].into(),
            ..Default::default()
        }));
        let r2 = Arc::new(RuleDefinition::new("r2").with_tracing(RuleTracing {
            end_span: true,
            attributes: [("http.status".to_string(), "status".to_string())].into(),
            ..Default::default()
        }));

        let config = build(&[r1, r2]).unwrap();
        assert!(config.tracing.start_span);
        assert!(config.tracing.end_span);
        assert_eq!(config.tracing.attributes.len(), 2);
    }

    #[test]
    fn test_tracing_attribute_conflict() {
        let tracing = |key: &str| RuleTracing {
            attributes: [("db.statement".to_string(), key.to_string())].into(),
            ..Default::default()
        };
        let r1 = Arc::new(RuleDefinition::new("r1").with_tracing(tracing("sql")));
        let r2 = Arc::new(RuleDefinition::new("r2").with_tracing(tracing("query")));

        let err = build(&[r1, r2]).unwrap_err();
        assert!(matches!(err, HookBuildError::AttributeConflict { ref first_rule, .. } if first_rule == "r1"));
    }

    #[test]
    fn test_metrics_deduplicated() {
        let metric = MetricRecording::new("method_duration", "duration");
        let r1 = Arc::new(RuleDefinition::new("r1").with_metric(metric.clone()));
        let r2 = Arc::new(RuleDefinition::new("r2").with_metric(metric.clone()));

        let config = build(&[r1, r2]).unwrap();
        assert_eq!(config.metrics, vec![metric]);
    }

    #[test]
    fn test_metric_recorded_from_divergent_values_conflicts() {
        let r1 = Arc::new(RuleDefinition::new("r1").with_metric(MetricRecording::new("latency", "duration")));
        let r2 = Arc::new(RuleDefinition::new("r2").with_metric(MetricRecording::new("latency", "elapsed")));

        let err = build(&[r1, r2]).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(
            err,
            HookBuildError::MetricConflict {
                metric: "latency".to_string(),
                first_rule: "r1".to_string(),
                second_rule: "r2".to_string(),
            }
        );
    }

    #[test]
    fn test_distinct_metrics_are_unioned_by_name() {
        let r1 = Arc::new(RuleDefinition::new("r1").with_metric(MetricRecording::new("latency", "duration")));
        let r2 = Arc::new(RuleDefinition::new("r2").with_metric(MetricRecording::new("calls", "one")));

        let config = build(&[r1, r2]).unwrap();
        let names: Vec<&str> = config.metrics.iter().map(|m| m.metric.as_str()).collect();
        assert_eq!(names, vec!["calls", "latency"]);
    }

    #[test]
    fn test_span_kind_conflict() {
        let tracing = |kind: SpanKind| RuleTracing {
            start_span: true,
            kind,
            ..Default::default()
        };
        let r1 = Arc::new(RuleDefinition::new("r1").with_tracing(tracing(SpanKind::Server)));
        let r2 = Arc::new(RuleDefinition::new("r2").with_tracing(tracing(SpanKind::Client)));
        let r3 = Arc::new(RuleDefinition::new("r3").with_tracing(tracing(SpanKind::Server)));

        let err = build(&[r1.clone(), r2]).unwrap_err();
        assert!(matches!(err, HookBuildError::AttributeConflict { ref attribute, .. } if attribute == "<span kind>"));

        let config = build(&[r1, r3]).unwrap();
        assert_eq!(config.tracing.kind, SpanKind::Server);
    }

    #[test]
    fn test_build_is_deterministic() {
        let rule = Arc::new(
            RuleDefinition::new("r")
                .with_entry("z", call("p", &[]))
                .with_entry("y", call("p", &["z"]))
                .with_entry("a", call("p", &[])),
        );
        let first = build(&[rule.clone()]).unwrap();
        let second = build(&[rule]).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.entry_keys(), vec!["a", "z", "y"]);
    }
}
