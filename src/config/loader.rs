// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading settings from JSON and YAML files in a workspace.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ConfigError;

use super::types::Settings;

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &["hookline.json", "hookline.yaml", ".hookline/config.json"];

/// Local config file name (for per-host overrides).
pub const LOCAL_CONFIG_FILE: &str = "hookline.local.json";

/// Load workspace settings from the workspace root.
///
/// Searches for config files in the following order:
/// 1. hookline.json
/// 2. hookline.yaml
/// 3. .hookline/config.json
pub fn load_workspace_settings(workspace_root: &Path) -> Result<Option<Settings>, ConfigError> {
    for filename in CONFIG_FILES {
        let path = workspace_root.join(filename);
        if path.exists() {
            return load_settings_file(&path).map(Some);
        }
    }
    Ok(None)
}

/// Load local overrides from hookline.local.json.
pub fn load_local_settings(workspace_root: &Path) -> Result<Option<Settings>, ConfigError> {
    let path = workspace_root.join(LOCAL_CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }
    load_settings_file(&path).map(Some)
}

/// Load a settings file (JSON or YAML).
pub fn load_settings_file(path: &Path) -> Result<Settings, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    debug!(path = %path.display(), "Loading settings file");

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    }
}

/// Save settings to a file, as YAML or JSON by extension.
pub fn save_settings_file(path: &Path, settings: &Settings) -> Result<PathBuf, ConfigError> {
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let content = if is_yaml {
        serde_yaml::to_string(settings)?
    } else {
        serde_json::to_string_pretty(settings)?
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_files_order() {
        assert_eq!(CONFIG_FILES.len(), 3);
        assert_eq!(CONFIG_FILES[0], "hookline.json");
    }

    #[test]
    fn test_load_workspace_settings_not_found() {
        let temp = TempDir::new().unwrap();
        let result = load_workspace_settings(temp.path());
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn test_load_workspace_settings_json() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("hookline.json"),
            r#"{"ignoredPackages": ["java."], "excludeLambdas": false}"#,
        )
        .unwrap();

        let settings = load_workspace_settings(temp.path()).unwrap().unwrap();
        assert_eq!(settings.ignored_packages, Some(vec!["java.".to_string()]));
        assert_eq!(settings.exclude_lambdas, Some(false));
    }

    #[test]
    fn test_load_workspace_settings_yaml() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("hookline.yaml"), "enabled: false\n").unwrap();

        let settings = load_workspace_settings(temp.path()).unwrap().unwrap();
        assert_eq!(settings.enabled, Some(false));
    }

    #[test]
    fn test_json_wins_over_yaml() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("hookline.json"), r#"{"enabled": true}"#).unwrap();
        std::fs::write(temp.path().join("hookline.yaml"), "enabled: false\n").unwrap();

        let settings = load_workspace_settings(temp.path()).unwrap().unwrap();
        assert_eq!(settings.enabled, Some(true));
    }

    #[test]
    fn test_invalid_json_is_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hookline.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = load_settings_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::JsonError(_)));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let err = load_settings_file(&temp.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let settings = Settings {
            ignored_packages: Some(vec!["sun.".to_string()]),
            ..Default::default()
        };

        let path = save_settings_file(&temp.path().join(".hookline/config.json"), &settings).unwrap();
        assert!(path.exists());
        assert_eq!(load_workspace_settings(temp.path()).unwrap(), Some(settings.clone()));

        let yaml = save_settings_file(&temp.path().join("other.yaml"), &settings).unwrap();
        assert_eq!(load_settings_file(&yaml).unwrap(), settings);
    }
}
