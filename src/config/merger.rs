// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Settings merging and resolution.
//!
//! Layers are merged with later layers winning, then resolved into an
//! [`InstrumentationConfiguration`]: defaults applied, matchers compiled,
//! scopes and includes linked, limits validated.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::ConfigError;
use crate::rules::{
    DiscoverySettings, InstrumentationConfiguration, MetricRecording, RuleDefinition, RuleTracing,
    SchedulerSettings,
};
use crate::scope::{Matcher, MethodPredicate, NameMatcher, ScopeDefinition, TypePredicate};
use crate::types::MethodKind;

use super::types::{
    DiscoveryConfig, MethodMatcherConfig, NamePattern, RuleSettings, SchedulerConfig, ScopeSettings,
    Settings, TypeMatcherConfig,
};

/// Merge settings layers with precedence.
///
/// Later layers win: options are replaced when set, scopes and rules are
/// replaced by name, ignored packages accumulate.
pub fn merge_settings<I>(layers: I) -> Settings
where
    I: IntoIterator<Item = Settings>,
{
    let mut result = Settings::default();
    for layer in layers {
        apply_layer(&mut result, layer);
    }
    result
}

fn apply_layer(result: &mut Settings, layer: Settings) {
    if layer.enabled.is_some() {
        result.enabled = layer.enabled;
    }

    if let Some(packages) = layer.ignored_packages {
        let merged = result.ignored_packages.get_or_insert_with(Vec::new);
        for package in packages {
            if !merged.contains(&package) {
                merged.push(package);
            }
        }
    }

    if layer.exclude_lambdas.is_some() {
        result.exclude_lambdas = layer.exclude_lambdas;
    }

    result.scopes.extend(layer.scopes);
    result.rules.extend(layer.rules);

    if let Some(scheduler) = layer.scheduler {
        let merged = result.scheduler.get_or_insert_with(SchedulerConfig::default);
        merged.check_limit = scheduler.check_limit.or(merged.check_limit);
        merged.retransform_limit = scheduler.retransform_limit.or(merged.retransform_limit);
        merged.batch_delay_ms = scheduler.batch_delay_ms.or(merged.batch_delay_ms);
        merged.removal_retry_delay_ms = scheduler.removal_retry_delay_ms.or(merged.removal_retry_delay_ms);
    }

    if let Some(discovery) = layer.discovery {
        let merged = result.discovery.get_or_insert_with(DiscoveryConfig::default);
        merged.poll_delay_ms = discovery.poll_delay_ms.or(merged.poll_delay_ms);
        merged.inactivity_threshold_ms = discovery.inactivity_threshold_ms.or(merged.inactivity_threshold_ms);
        merged.max_inactive_trials = discovery.max_inactive_trials.or(merged.max_inactive_trials);
    }
}

/// Resolve settings into a configuration with the given generation.
///
/// Fails on invalid patterns, unknown scope or include references, include
/// cycles and zero batch limits.
pub fn resolve_settings(settings: &Settings, generation: u64) -> Result<InstrumentationConfiguration, ConfigError> {
    let scopes = settings
        .scopes
        .iter()
        .map(|(name, scope)| resolve_scope(name, scope).map(|s| (name.clone(), Arc::new(s))))
        .collect::<Result<HashMap<_, _>, _>>()?;

    let mut resolver = RuleLinker {
        settings: &settings.rules,
        scopes: &scopes,
        resolved: HashMap::new(),
        stack: Vec::new(),
    };
    let mut rules = Vec::new();
    for (name, rule) in &settings.rules {
        let definition = resolver.resolve(name)?;
        if rule.is_enabled() {
            rules.push(definition);
        }
    }

    let config = InstrumentationConfiguration {
        generation,
        enabled: settings.enabled.unwrap_or(true),
        rules: Vec::new(),
        ignored_packages: settings.ignored_packages.clone().unwrap_or_default(),
        exclude_lambdas: settings.exclude_lambdas.unwrap_or(true),
        scheduler: resolve_scheduler(settings.scheduler.as_ref())?,
        discovery: resolve_discovery(settings.discovery.as_ref()),
    }
    .with_rules(rules);

    debug!(
        generation,
        scopes = scopes.len(),
        rules = config.rules.len(),
        "Resolved instrumentation settings"
    );
    Ok(config)
}

// ============================================================================
// Scopes
// ============================================================================

fn name_matcher(pattern: &NamePattern) -> Result<NameMatcher, ConfigError> {
    match pattern {
        NamePattern::Exact(name) => Ok(NameMatcher::equals(name.as_str())),
        NamePattern::Detailed(detail) => NameMatcher::new(detail.mode, detail.pattern.as_str(), detail.ignore_case),
    }
}

fn all_of<P>(mut predicates: Vec<Matcher<P>>) -> Matcher<P> {
    match predicates.len() {
        0 => Matcher::Any,
        1 => predicates.remove(0),
        _ => Matcher::All(predicates),
    }
}

fn type_matcher(config: &TypeMatcherConfig) -> Result<Matcher<TypePredicate>, ConfigError> {
    let mut predicates = Vec::new();
    if let Some(name) = &config.name {
        predicates.push(Matcher::Is(TypePredicate::Name(name_matcher(name)?)));
    }
    if let Some(superclass) = &config.superclass {
        predicates.push(Matcher::Is(TypePredicate::SuperClass(name_matcher(superclass)?)));
    }
    if let Some(interface) = &config.interface {
        predicates.push(Matcher::Is(TypePredicate::Interface(name_matcher(interface)?)));
    }
    if let Some(annotation) = &config.annotation {
        predicates.push(Matcher::Is(TypePredicate::Annotation(name_matcher(annotation)?)));
    }
    if let Some(flag) = config.is_interface {
        predicates.push(Matcher::Is(TypePredicate::IsInterface(flag)));
    }
    Ok(all_of(predicates))
}

fn method_matcher(config: &MethodMatcherConfig) -> Result<Matcher<MethodPredicate>, ConfigError> {
    let mut predicates = Vec::new();
    if let Some(name) = &config.name {
        predicates.push(Matcher::Is(MethodPredicate::Name(name_matcher(name)?)));
    }
    if let Some(visibility) = &config.visibility {
        predicates.push(Matcher::Is(MethodPredicate::Visibility(visibility.clone())));
    }
    if let Some(arguments) = &config.arguments {
        predicates.push(Matcher::Is(MethodPredicate::Arguments(arguments.clone())));
    }
    if let Some(count) = config.argument_count {
        predicates.push(Matcher::Is(MethodPredicate::ArgumentCount(count)));
    }
    if let Some(return_type) = &config.return_type {
        predicates.push(Matcher::Is(MethodPredicate::ReturnType(name_matcher(return_type)?)));
    }
    if let Some(annotation) = &config.annotation {
        predicates.push(Matcher::Is(MethodPredicate::Annotation(name_matcher(annotation)?)));
    }
    if let Some(flag) = config.is_static {
        predicates.push(Matcher::Is(MethodPredicate::IsStatic(flag)));
    }
    if let Some(flag) = config.is_abstract {
        predicates.push(Matcher::Is(MethodPredicate::IsAbstract(flag)));
    }
    if let Some(flag) = config.is_synchronized {
        predicates.push(Matcher::Is(MethodPredicate::IsSynchronized(flag)));
    }
    if let Some(flag) = config.is_constructor {
        let kind = Matcher::Is(MethodPredicate::Kind(MethodKind::Constructor));
        predicates.push(if flag { kind } else { kind.not() });
    }
    if config.is_type_initializer == Some(true) {
        predicates.push(Matcher::Is(MethodPredicate::Kind(MethodKind::TypeInitializer)));
    }
    if let Some(supertype) = &config.inherited_from {
        predicates.push(Matcher::Is(MethodPredicate::InheritedFrom(name_matcher(supertype)?)));
    }
    Ok(all_of(predicates))
}

fn resolve_scope(name: &str, scope: &ScopeSettings) -> Result<ScopeDefinition, ConfigError> {
    let types = type_matcher(&scope.type_matcher)?;
    let methods = match scope.methods.len() {
        0 => Matcher::Any,
        1 => method_matcher(&scope.methods[0])?,
        _ => Matcher::AnyOf(
            scope
                .methods
                .iter()
                .map(method_matcher)
                .collect::<Result<Vec<_>, _>>()?,
        ),
    };
    Ok(ScopeDefinition::new(name, types, methods))
}

// ============================================================================
// Rules
// ============================================================================

/// Depth-first rule linker; each rule is built once and shared by includers.
struct RuleLinker<'a> {
    settings: &'a BTreeMap<String, RuleSettings>,
    scopes: &'a HashMap<String, Arc<ScopeDefinition>>,
    resolved: HashMap<String, Arc<RuleDefinition>>,
    stack: Vec<String>,
}

impl RuleLinker<'_> {
    fn resolve(&mut self, name: &str) -> Result<Arc<RuleDefinition>, ConfigError> {
        if let Some(rule) = self.resolved.get(name) {
            return Ok(rule.clone());
        }
        if let Some(start) = self.stack.iter().position(|n| n == name) {
            let mut rules = self.stack[start..].to_vec();
            rules.push(name.to_string());
            return Err(ConfigError::IncludeCycle { rules });
        }

        let settings = self.settings;
        let Some(raw) = settings.get(name) else {
            return Err(ConfigError::invalid("rules", format!("unknown rule '{}'", name)));
        };

        self.stack.push(name.to_string());
        let mut rule = RuleDefinition::new(name);
        for include in &raw.include {
            if !settings.contains_key(include) {
                return Err(ConfigError::UnknownInclude {
                    rule: name.to_string(),
                    include: include.clone(),
                });
            }
            rule = rule.with_include(self.resolve(include)?);
        }
        self.stack.pop();

        for scope in &raw.scopes {
            let Some(definition) = self.scopes.get(scope) else {
                return Err(ConfigError::UnknownScope {
                    rule: name.to_string(),
                    scope: scope.clone(),
                });
            };
            rule = rule.with_scope(definition.clone());
        }
        for (key, call) in &raw.entry {
            rule = rule.with_entry(key.as_str(), call.clone());
        }
        for (key, call) in &raw.exit {
            rule = rule.with_exit(key.as_str(), call.clone());
        }
        if let Some(tracing) = &raw.tracing {
            rule = rule.with_tracing(RuleTracing {
                start_span: tracing.start_span,
                end_span: tracing.end_span,
                name_key: tracing.name.clone(),
                kind: tracing.kind,
                attributes: tracing.attributes.clone(),
            });
        }
        for metric in &raw.metrics {
            let mut recording = MetricRecording::new(metric.metric.as_str(), metric.value.as_str());
            recording.tags = metric.tags.clone();
            rule = rule.with_metric(recording);
        }

        let rule = Arc::new(rule);
        self.resolved.insert(name.to_string(), rule.clone());
        Ok(rule)
    }
}

// ============================================================================
// Limits
// ============================================================================

fn resolve_scheduler(config: Option<&SchedulerConfig>) -> Result<SchedulerSettings, ConfigError> {
    let mut settings = SchedulerSettings::default();
    let Some(config) = config else {
        return Ok(settings);
    };

    if let Some(limit) = config.check_limit {
        if limit == 0 {
            return Err(ConfigError::invalid("scheduler.checkLimit", "must be greater than 0"));
        }
        settings.check_limit = limit;
    }
    if let Some(limit) = config.retransform_limit {
        if limit == 0 {
            return Err(ConfigError::invalid("scheduler.retransformLimit", "must be greater than 0"));
        }
        settings.retransform_limit = limit;
    }
    if let Some(ms) = config.batch_delay_ms {
        settings.batch_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = config.removal_retry_delay_ms {
        settings.removal_retry_delay = Duration::from_millis(ms);
    }
    Ok(settings)
}

fn resolve_discovery(config: Option<&DiscoveryConfig>) -> DiscoverySettings {
    let mut settings = DiscoverySettings::default();
    if let Some(config) = config {
        if let Some(ms) = config.poll_delay_ms {
            settings.poll_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = config.inactivity_threshold_ms {
            settings.inactivity_threshold = Duration::from_millis(ms);
        }
        if let Some(trials) = config.max_inactive_trials {
            settings.max_inactive_trials = trials;
        }
    }
    settings
}
