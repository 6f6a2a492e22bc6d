//! Tool error taxonomy.
//!
//! Every failure that crosses a tool boundary — registry dispatch, sandbox
//! execution, shell command, sub-agent delegation — is classified under one
//! of these codes. The wire strings are stable: the model sees them inside
//! tool-result messages and is expected to self-diagnose without server
//! logs, so messages carry the attempted item and the allowed set where
//! relevant.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable failure classification for tool-level errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolErrorCode {
    /// Caller-supplied payload failed validation.
    ValidationError,
    /// A required credential or flag is missing.
    NotConfigured,
    /// A downstream call failed.
    UpstreamError,
    /// A bounded operation ran past its deadline.
    Timeout,
    /// The tool exists but is disabled in the current scope.
    ToolNotEnabled,
    /// No such tool in the active registry.
    UnsupportedTool,
    /// Sandboxed code raised a runtime error.
    SandboxRuntimeError,
    /// A shell command failed to launch or crashed the executor.
    ShellRuntimeError,
    /// A disallowed import or command was refused.
    PolicyViolation,
    /// The per-execution nested tool-call ceiling was crossed.
    NestedCallLimitExceeded,
}

impl ToolErrorCode {
    /// Whether errors under this code are worth retrying by default.
    #[must_use]
    pub fn default_retryable(self) -> bool {
        matches!(self, Self::UpstreamError | Self::Timeout)
    }

    /// The wire string for this code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::NotConfigured => "NOT_CONFIGURED",
            Self::UpstreamError => "UPSTREAM_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::ToolNotEnabled => "TOOL_NOT_ENABLED",
            Self::UnsupportedTool => "UNSUPPORTED_TOOL",
            Self::SandboxRuntimeError => "SANDBOX_RUNTIME_ERROR",
            Self::ShellRuntimeError => "SHELL_RUNTIME_ERROR",
            Self::PolicyViolation => "POLICY_VIOLATION",
            Self::NestedCallLimitExceeded => "NESTED_CALL_LIMIT_EXCEEDED",
        }
    }
}

/// A structured tool-level error, serialized as
/// `{code, message, retryable, details}` inside the result envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{}: {message}", code.as_str())]
pub struct ToolError {
    /// Failure classification.
    pub code: ToolErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Whether a retry with the same input could succeed.
    pub retryable: bool,
    /// Structured context (attempted command/import, allowed sets, …).
    #[serde(default)]
    pub details: Value,
}

impl ToolError {
    /// New error with the code's default retryability and empty details.
    #[must_use]
    pub fn new(code: ToolErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.default_retryable(),
            details: Value::Object(serde_json::Map::new()),
        }
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Shorthand for a validation failure.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ToolErrorCode::ValidationError, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn code_wire_strings() {
        assert_eq!(
            serde_json::to_value(ToolErrorCode::ValidationError).unwrap(),
            json!("VALIDATION_ERROR")
        );
        assert_eq!(
            serde_json::to_value(ToolErrorCode::NestedCallLimitExceeded).unwrap(),
            json!("NESTED_CALL_LIMIT_EXCEEDED")
        );
        assert_eq!(ToolErrorCode::PolicyViolation.as_str(), "POLICY_VIOLATION");
    }

    #[test]
    fn only_upstream_and_timeout_are_retryable() {
        assert!(ToolErrorCode::UpstreamError.default_retryable());
        assert!(ToolErrorCode::Timeout.default_retryable());
        assert!(!ToolErrorCode::ValidationError.default_retryable());
        assert!(!ToolErrorCode::PolicyViolation.default_retryable());
        assert!(!ToolErrorCode::NestedCallLimitExceeded.default_retryable());
    }

    #[test]
    fn error_serializes_with_all_fields() {
        let err = ToolError::new(ToolErrorCode::UnsupportedTool, "no such tool 'frob'")
            .with_details(json!({"tool_name": "frob"}));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["code"], "UNSUPPORTED_TOOL");
        assert_eq!(value["message"], "no such tool 'frob'");
        assert_eq!(value["retryable"], false);
        assert_eq!(value["details"]["tool_name"], "frob");
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = ToolError::validation("missing 'query'");
        assert_eq!(err.to_string(), "VALIDATION_ERROR: missing 'query'");
    }
}
