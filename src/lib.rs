// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! hookline - rule-driven method hooks with live re-instrumentation.
//!
//! The instrumentation core of a monitoring agent. Rules select methods by
//! scope; the rules matching one method are composed into a single
//! dependency-ordered hook; hooks are published through a lock-free
//! registry; and loaded units are rewritten in bounded batches whenever
//! their desired instrumentation drifts from what was last applied.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`types`] - Units, unit ids and type/method descriptors
//! - [`error`] - Error types and result aliases
//! - [`scope`] - Type and method matchers
//! - [`rules`] - Rule definitions, configuration and rule resolution
//! - [`hooks`] - Hook building, actions and the hook registry
//! - [`lifecycle`] - Unit discovery with inactivity decay
//! - [`retransform`] - Pending set, applied state and the batch scheduler
//! - [`runtime`] - Host runtime and weaving interfaces
//! - [`config`] - Settings loading, merging and live publication
//! - [`agent`] - Facade wiring all of the above
//! - [`plan`] - Offline hook planning
//! - [`telemetry`] - Tracing setup and agent metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hookline::agent::{AgentOptions, InstrumentationAgent};
//! use hookline::config::{load_settings, ConfigSource};
//!
//! let settings = load_settings(".".as_ref())?;
//! let source = Arc::new(ConfigSource::from_settings(&settings)?);
//! let agent = InstrumentationAgent::new(AgentOptions::new(runtime, retransformer), source);
//! agent.start()?;
//!
//! // At an instrumented call site:
//! let hook = agent.hooks().lookup(unit_id, "handle(Request)");
//! let frame = hook.on_enter(&invocation);
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod hooks;
pub mod lifecycle;
pub mod plan;
pub mod retransform;
pub mod rules;
pub mod runtime;
pub mod scope;
pub mod telemetry;
pub mod types;

// Re-export commonly used types at crate root
pub use agent::{AgentOptions, AgentStatus, InstrumentationAgent};
pub use config::{ConfigSource, Settings};
pub use error::{
    ActionError, AgentError, ConfigError, HookBuildError, RegistryError, Result, RetransformError,
};
pub use hooks::{Hook, HookLookup, HookRegistry, HookServices, Invocation};
pub use rules::{InstrumentationConfiguration, RuleDefinition};
pub use runtime::{HostRuntime, Retransformer, WeavePlan, Weaver};
pub use types::{MethodDescriptor, TypeDescriptor, Unit, UnitId};

/// hookline version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_exports() {
        let config = InstrumentationConfiguration::default();
        assert!(config.enabled);
        assert!(Hook::noop().is_noop());
    }
}
