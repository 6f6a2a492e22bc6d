//! The tool-result envelope.
//!
//! Every invocation in the system — registry tool, sandbox exec, shell
//! command, sub-agent delegation — is normalized into one shape before it
//! is persisted or shown to the model. Tool failures are *returned* inside
//! this envelope, never raised; callers only see a Rust `Err` for
//! programmer-level misuse.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ToolError;

/// Envelope status discriminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// The tool ran and produced output.
    Success,
    /// The tool failed; `error` carries the classification.
    Error,
}

/// Normalized result of one tool invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Success or error.
    pub status: ToolStatus,
    /// Tool output on success (`null` on error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Structured error on failure (`null` on success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

impl ToolOutcome {
    /// Successful outcome wrapping the tool's output.
    #[must_use]
    pub fn success(output: Value) -> Self {
        Self {
            status: ToolStatus::Success,
            output: Some(output),
            error: None,
        }
    }

    /// Failed outcome wrapping a classified error.
    #[must_use]
    pub fn failure(error: ToolError) -> Self {
        Self {
            status: ToolStatus::Error,
            output: None,
            error: Some(error),
        }
    }

    /// Whether this outcome is an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }

    /// Short one-line summary for progress events and logs.
    #[must_use]
    pub fn summary(&self) -> String {
        match (&self.error, &self.output) {
            (Some(err), _) => err.to_string(),
            (None, Some(Value::Object(map))) => map
                .get("summary")
                .and_then(Value::as_str)
                .unwrap_or("ok")
                .to_string(),
            _ => "ok".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ToolErrorCode;
    use serde_json::json;

    #[test]
    fn success_envelope_shape() {
        let outcome = ToolOutcome::success(json!({"summary": "found 3 records", "ids": ["a"]}));
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["output"]["ids"][0], "a");
        assert!(value.get("error").is_none());
        assert!(!outcome.is_error());
    }

    #[test]
    fn failure_envelope_shape() {
        let outcome = ToolOutcome::failure(ToolError::new(
            ToolErrorCode::Timeout,
            "deadline exceeded after 30s",
        ));
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"]["code"], "TIMEOUT");
        assert_eq!(value["error"]["retryable"], true);
        assert!(value.get("output").is_none());
        assert!(outcome.is_error());
    }

    #[test]
    fn summary_prefers_output_summary_field() {
        let outcome = ToolOutcome::success(json!({"summary": "found 3 records"}));
        assert_eq!(outcome.summary(), "found 3 records");
        let bare = ToolOutcome::success(json!({"rows": []}));
        assert_eq!(bare.summary(), "ok");
    }

    #[test]
    fn summary_formats_error() {
        let outcome = ToolOutcome::failure(ToolError::validation("bad payload"));
        assert_eq!(outcome.summary(), "VALIDATION_ERROR: bad payload");
    }

    #[test]
    fn round_trips_through_json() {
        let outcome = ToolOutcome::failure(
            ToolError::new(ToolErrorCode::PolicyViolation, "blocked").with_details(json!({
                "command": "rm -rf /",
            })),
        );
        let value = serde_json::to_value(&outcome).unwrap();
        let back: ToolOutcome = serde_json::from_value(value).unwrap();
        assert_eq!(outcome, back);
    }
}
