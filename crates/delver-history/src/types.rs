//! History data model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who authored an event or message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// End user.
    User,
    /// The model.
    Assistant,
    /// System-authored content (prompts, synthesized notices).
    System,
    /// Tool results fed back to the model.
    Tool,
}

/// What kind of fact an event records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Visible text.
    Text,
    /// Reasoning content.
    Thinking,
    /// A requested tool call.
    ToolCall,
    /// The result of a tool call.
    ToolResult,
    /// Control/bookkeeping block (diagnostics, markers).
    Control,
}

/// One immutable, ordered fact in a conversation's history.
///
/// `position` is strictly increasing per conversation and assigned exactly
/// once at append. Events are never mutated after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
    /// Unique event id (UUID v7).
    pub id: String,
    /// Conversation this event belongs to.
    pub conversation_id: String,
    /// Monotonic position within the conversation.
    pub position: u64,
    /// Authoring role.
    pub role: Role,
    /// Event kind discriminator.
    pub kind: EventKind,
    /// Kind-specific content (opaque JSON).
    pub content: Value,
    /// Owning message, when the event belongs to a rendered message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Whether the event is shown to the model on replay.
    pub visible: bool,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
}

/// A tool call requested by the model.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Call id, unique within one message.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Validated input payload.
    pub input: Value,
    /// Provider side-channel fields carried through verbatim.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub provider_fields: Value,
}

/// One block of rendered message content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Visible text.
    Text {
        /// The text.
        text: String,
    },
    /// Reasoning content with an optional derived title.
    Thinking {
        /// Full reasoning text.
        thinking: String,
        /// Short title derived from the first non-empty line.
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    /// A tool-use block.
    ToolUse {
        /// The requested call.
        call: ToolCall,
    },
}

/// One rendered assistant/user turn.
///
/// Mutated in place as a streaming message accumulates tokens and tool
/// calls; aggregates one or more canonical events via `message_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message id (UUID v7).
    pub id: String,
    /// Conversation this message belongs to.
    pub conversation_id: String,
    /// Run that produced the message.
    pub run_id: String,
    /// Provider request index within the run (1-based).
    pub request_index: u32,
    /// Authoring role.
    pub role: Role,
    /// Model id, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Accumulated content blocks.
    pub content: Vec<ContentBlock>,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
}

impl Message {
    /// Concatenated visible text across all text blocks.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// All tool calls carried by this message.
    #[must_use]
    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { call } => Some(call),
                _ => None,
            })
            .collect()
    }
}
