//! The model-provider seam.
//!
//! The orchestrator talks to a provider through one blocking call:
//! [`Provider::stream_turn`] drives a per-token callback while the
//! response streams and returns the provider's final structured result.
//! Blocking by design: the stream bridge runs it on the blocking pool and
//! forwards tokens to the scheduler side.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use delver_history::Role;

/// One tool call in a provider response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRequest {
    /// Call id, unique within one response.
    pub id: String,
    /// Requested tool name.
    pub name: String,
    /// Argument payload as the provider produced it.
    pub arguments: Value,
    /// Provider side-channel fields carried through verbatim.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub provider_fields: Value,
}

/// One provider-facing message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Authoring role.
    pub role: Role,
    /// Message text (may be empty for pure tool-call messages).
    pub content: String,
    /// Tool calls carried by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Call id a tool-result message answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// A user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// A plain assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// An assistant message carrying tool calls.
    #[must_use]
    pub fn assistant_calls(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// A tool-result message answering `call_id`.
    #[must_use]
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// One request to the provider.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRequest {
    /// System prompt, when the caller has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Conversation so far, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Tool schema objects the model may call.
    pub tools: Vec<Value>,
}

/// One streamed increment.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamToken {
    /// Reasoning content.
    Thinking(String),
    /// Visible text.
    Text(String),
}

/// The provider's final structured result for one request.
///
/// Final values win over accumulated tokens when the two disagree.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamOutcome {
    /// Complete reasoning text.
    pub thinking: String,
    /// Complete visible text.
    pub text: String,
    /// Requested tool calls, in request order.
    pub tool_calls: Vec<ToolCallRequest>,
    /// Opaque provider bookkeeping (stop reason, usage, …).
    pub provider_state: Value,
}

/// Why a provider request failed.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ProviderError {
    /// The stream broke or the provider rejected the request.
    #[error("provider stream failed: {0}")]
    Stream(String),
}

/// A streaming model provider.
pub trait Provider: Send + Sync {
    /// Run one request to completion, invoking `on_token` for each
    /// streamed increment in emission order.
    fn stream_turn(
        &self,
        request: &ProviderRequest,
        on_token: &mut dyn FnMut(StreamToken),
    ) -> Result<StreamOutcome, ProviderError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_message_omits_empty_tool_fields() {
        let value = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"], "hi");
        assert!(value.get("toolCalls").is_none());
        assert!(value.get("toolCallId").is_none());
    }

    #[test]
    fn tool_message_carries_the_call_id() {
        let msg = ChatMessage::tool("call_1", "{\"status\":\"success\"}");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn assistant_calls_serialize_with_arguments() {
        let msg = ChatMessage::assistant_calls(
            "",
            vec![ToolCallRequest {
                id: "call_1".into(),
                name: "search".into(),
                arguments: json!({"query": "x"}),
                provider_fields: Value::Null,
            }],
        );
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["toolCalls"][0]["name"], "search");
        assert_eq!(value["toolCalls"][0]["arguments"]["query"], "x");
        assert!(value["toolCalls"][0].get("providerFields").is_none());
    }

    #[test]
    fn stream_outcome_defaults_are_empty() {
        let outcome = StreamOutcome::default();
        assert!(outcome.text.is_empty());
        assert!(outcome.tool_calls.is_empty());
        assert_eq!(outcome.provider_state, Value::Null);
    }
}
