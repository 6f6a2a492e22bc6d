//! Settings errors.

use std::path::PathBuf;

/// Result alias for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Errors from loading or parsing settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Filesystem failure reading the settings file.
    #[error("failed to read settings file {path}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file or merged value failed to parse.
    #[error("failed to parse settings")]
    Parse(#[from] serde_json::Error),
}
