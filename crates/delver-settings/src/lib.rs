//! # delver-settings
//!
//! Layered configuration for the Delver agent.
//!
//! Settings come from three layers (in priority order):
//! 1. **Compiled defaults** — [`DelverSettings::default()`]
//! 2. **User file** — `~/.delver/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `DELVER_*` overrides (highest priority)
//!
//! The global singleton is reloadable: callers that change the file on
//! disk call [`reload_settings_from_path`] to swap the cached value so
//! subsequent [`get_settings`] calls return fresh data.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::path::Path;
use std::sync::{Arc, RwLock};

/// Global settings singleton.
///
/// `RwLock<Option<Arc<DelverSettings>>>` instead of `OnceLock` so the
/// cached value can be swapped on reload. Reads are cheap (shared lock +
/// `Arc::clone`); writes only happen on reload.
static SETTINGS: RwLock<Option<Arc<DelverSettings>>> = RwLock::new(None);

/// Get the global settings instance.
///
/// On first call, loads from `~/.delver/settings.json` with env overrides;
/// on load failure, falls back to compiled defaults. Returns an `Arc` so
/// callers hold a consistent snapshot even if another thread reloads.
pub fn get_settings() -> Arc<DelverSettings> {
    {
        let guard = SETTINGS.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(ref settings) = *guard {
            return Arc::clone(settings);
        }
    }

    let mut guard = SETTINGS.write().unwrap_or_else(std::sync::PoisonError::into_inner);
    // Double-check after acquiring the write lock
    if let Some(ref settings) = *guard {
        return Arc::clone(settings);
    }

    let settings = Arc::new(match load_settings() {
        Ok(loaded) => loaded,
        Err(error) => {
            tracing::warn!(error = %error, "failed to load settings, using defaults");
            DelverSettings::default()
        }
    });
    *guard = Some(Arc::clone(&settings));
    settings
}

/// Initialize the global settings with a specific value.
///
/// Replaces any previously cached settings. Useful for tests and startup
/// paths where the configuration is already known.
pub fn init_settings(settings: DelverSettings) {
    let mut guard = SETTINGS.write().unwrap_or_else(std::sync::PoisonError::into_inner);
    *guard = Some(Arc::new(settings));
}

/// Reload settings from a specific file path and swap the global cache.
pub fn reload_settings_from_path(path: &Path) {
    let new = Arc::new(match load_settings_from_path(path) {
        Ok(loaded) => loaded,
        Err(error) => {
            tracing::warn!(error = %error, ?path, "failed to reload settings, falling back to defaults");
            DelverSettings::default()
        }
    });
    let mut guard = SETTINGS.write().unwrap_or_else(std::sync::PoisonError::into_inner);
    *guard = Some(new);
    tracing::info!(?path, "settings reloaded from disk");
}

/// Reset the global settings cache (test-only).
#[cfg(test)]
pub(crate) fn reset_settings() {
    let mut guard = SETTINGS.write().unwrap_or_else(std::sync::PoisonError::into_inner);
    *guard = None;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests that mutate the global SETTINGS static must hold this lock
    /// to avoid racing with each other (tests run in parallel threads).
    static SETTINGS_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn init_settings_sets_custom_value() {
        let _lock = SETTINGS_MUTEX.lock().unwrap();
        reset_settings();
        let mut custom = DelverSettings::default();
        custom.orchestrator.max_iterations = 99;
        init_settings(custom);
        assert_eq!(get_settings().orchestrator.max_iterations, 99);
        reset_settings();
    }

    #[test]
    fn reload_settings_from_path_updates_cached_value() {
        let _lock = SETTINGS_MUTEX.lock().unwrap();
        reset_settings();
        init_settings(DelverSettings::default());
        assert_eq!(get_settings().subagent.max_batch_workers, 4);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"subagent": {"maxBatchWorkers": 9}}"#).unwrap();

        reload_settings_from_path(&path);
        assert_eq!(get_settings().subagent.max_batch_workers, 9);
        // Deep merge preserves untouched defaults
        assert_eq!(get_settings().subagent.max_iterations, 6);
        reset_settings();
    }

    #[test]
    fn snapshot_isolation_across_reload() {
        let _lock = SETTINGS_MUTEX.lock().unwrap();
        reset_settings();
        init_settings(DelverSettings::default());

        let snapshot = get_settings();
        assert_eq!(snapshot.orchestrator.max_iterations, 12);

        let mut new = DelverSettings::default();
        new.orchestrator.max_iterations = 5;
        init_settings(new);

        // Old Arc still sees the old value; fresh gets see the new one
        assert_eq!(snapshot.orchestrator.max_iterations, 12);
        assert_eq!(get_settings().orchestrator.max_iterations, 5);
        reset_settings();
    }
}
