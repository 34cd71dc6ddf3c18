// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for hookline.
//!
//! This module provides strongly-typed errors for the different subsystems,
//! using `thiserror` for ergonomic error definitions and `anyhow` for error
//! propagation at the binary edge.

use thiserror::Error;

/// Errors raised while composing the hook of a single method.
///
/// These are method-scoped: the caller logs them and leaves that method
/// unhooked. They never abort the update of any other method or unit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HookBuildError {
    #[error("Conflicting data provider calls for key '{key}' from rules '{first_rule}' and '{second_rule}'")]
    Conflict {
        key: String,
        first_rule: String,
        second_rule: String,
    },

    #[error("Cyclic data dependencies between keys: {}", keys.join(", "))]
    Cycle { keys: Vec<String> },

    #[error("Conflicting span attribute '{attribute}' from rules '{first_rule}' and '{second_rule}'")]
    AttributeConflict {
        attribute: String,
        first_rule: String,
        second_rule: String,
    },

    #[error("Conflicting recordings of metric '{metric}' from rules '{first_rule}' and '{second_rule}'")]
    MetricConflict {
        metric: String,
        first_rule: String,
        second_rule: String,
    },

    #[error("Unknown data provider '{provider}' bound to key '{key}'")]
    UnknownProvider { key: String, provider: String },
}

impl HookBuildError {
    /// Create a conflict error for a key.
    pub fn conflict(key: impl Into<String>, first: impl Into<String>, second: impl Into<String>) -> Self {
        Self::Conflict {
            key: key.into(),
            first_rule: first.into(),
            second_rule: second.into(),
        }
    }

    /// Check if this error came from the dependency graph.
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::Cycle { .. })
    }

    /// Check if this error came from two rules disagreeing.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::AttributeConflict { .. } | Self::MetricConflict { .. }
        )
    }
}

/// Errors from the hook registry write side.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Another hook update is already in progress")]
    UpdateInProgress,
}

/// Errors reported by the host runtime when rewriting loaded code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetransformError {
    #[error("Unit is not modifiable: {0}")]
    NotModifiable(String),

    #[error("Unit was unloaded: {0}")]
    Unloaded(String),

    #[error("Rewrite rejected: {0}")]
    Rejected(String),
}

/// Failure of a bound action on the instrumented hot path.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    #[error("Missing argument: {0}")]
    MissingArgument(String),

    #[error("Invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("Action failed: {0}")]
    Failed(String),

    #[error("Action panicked: {0}")]
    Panicked(String),
}

impl ActionError {
    /// Create a generic failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors that can occur during configuration loading and resolution.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Rule '{rule}' references unknown scope '{scope}'")]
    UnknownScope { rule: String, scope: String },

    #[error("Rule '{rule}' includes unknown rule '{include}'")]
    UnknownInclude { rule: String, include: String },

    #[error("Rule includes form a cycle: {}", rules.join(" -> "))]
    IncludeCycle { rules: Vec<String> },

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl ConfigError {
    /// Create an invalid-value error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Errors surfaced by the agent facade.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Agent is already running")]
    AlreadyStarted,

    #[error("Agent is shutting down")]
    ShuttingDown,

    #[error("No async runtime available: {0}")]
    NoRuntime(String),
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;
