//! Settings loading: compiled defaults ← settings file ← env overrides.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::{Result, SettingsError};
use crate::types::DelverSettings;

/// Default settings file location: `~/.delver/settings.json`.
#[must_use]
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".delver").join("settings.json")
}

/// Deep-merge `overlay` onto `base`. Objects merge recursively; any other
/// overlay value replaces the base value.
#[must_use]
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                let _ = base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

fn apply_env_overrides(settings: &mut DelverSettings) {
    if let Ok(value) = std::env::var("DELVER_MAX_ITERATIONS")
        && let Ok(parsed) = value.parse()
    {
        settings.orchestrator.max_iterations = parsed;
    }
    if let Ok(value) = std::env::var("DELVER_IMPORT_POLICY") {
        settings.sandbox.import_policy = value;
    }
    if let Ok(value) = std::env::var("DELVER_SHELL_POLICY_MODE") {
        settings.shell.policy_mode = value;
    }
    if let Ok(value) = std::env::var("DELVER_WORKSPACE_ROOT") {
        settings.shell.workspace_root = value;
    }
    if let Ok(value) = std::env::var("DELVER_ARTIFACTS_ROOT") {
        settings.subagent.artifacts_root = value;
    }
}

/// Load settings from the default path with env overrides.
pub fn load_settings() -> Result<DelverSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path: defaults, deep-merged file values
/// (if the file exists), then env overrides.
pub fn load_settings_from_path(path: &Path) -> Result<DelverSettings> {
    let defaults = serde_json::to_value(DelverSettings::default())?;
    let merged = if path.exists() {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| SettingsError::Io { path: path.to_path_buf(), source })?;
        let file_value: Value = serde_json::from_str(&raw)?;
        deep_merge(defaults, file_value)
    } else {
        defaults
    };
    let mut settings: DelverSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}
