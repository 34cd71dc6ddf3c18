// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for hookline.
//!
//! Handles loading, merging, resolution and live publication of settings:
//! - Workspace config: hookline.json, hookline.yaml, or .hookline/config.json
//! - Local config: hookline.local.json (per-host overrides)
//!
//! Settings are merged with precedence (local > workspace > defaults), then
//! resolved into an [`InstrumentationConfiguration`](crate::rules::InstrumentationConfiguration).

mod loader;
mod merger;
mod source;
mod types;

pub use loader::{
    load_local_settings, load_settings_file, load_workspace_settings, save_settings_file,
    CONFIG_FILES, LOCAL_CONFIG_FILE,
};
pub use merger::{merge_settings, resolve_settings};
pub use source::ConfigSource;
pub use types::{
    DiscoveryConfig, MethodMatcherConfig, MetricConfig, NamePattern, NamePatternConfig,
    RuleSettings, SchedulerConfig, ScopeSettings, Settings, TracingConfig, TypeMatcherConfig,
};

use crate::error::ConfigError;
use std::path::Path;

/// Load and merge all settings files for a workspace.
///
/// Returns default settings when no file exists.
pub fn load_settings(workspace_root: &Path) -> Result<Settings, ConfigError> {
    let workspace = load_workspace_settings(workspace_root)?;
    let local = load_local_settings(workspace_root)?;
    Ok(merge_settings(workspace.into_iter().chain(local)))
}
