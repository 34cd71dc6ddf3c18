// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Hook composition, execution and the hook registry.
//!
//! - [`builder`]: rules of one method → dependency-ordered configuration
//! - [`factory`]: configuration → executable [`Hook`]
//! - [`registry`]: published unit → method → hook mapping

pub mod action;
pub mod builder;
mod configuration;
pub mod factory;
mod hook;
pub mod registry;

pub use action::{
    DataProvider, DataValues, ExecutionContext, HookAction, HookServices, Invocation,
    LoggingTraceSink, MetricSink, NoopMetricSink, NoopTraceSink, ProviderArguments,
    ProviderCatalog, SpanId, TraceSink,
};
pub use builder::{build_method_configuration, topological_order};
pub use configuration::{BoundCall, MethodHookConfiguration, TracingSettings};
pub use factory::HookFactory;
pub use hook::{BoundAction, Hook, HookFrame};
pub use registry::{
    HookLookup, HookRegistry, HookSnapshot, HookUpdate, UnitHooks, UnitUpdateReport, UpdateReport,
};
