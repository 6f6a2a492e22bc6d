//! Typed progress events streamed while a turn runs.
//!
//! A turn emits an ordered, append-only sequence: `turn_start`, then
//! start/token/end triads for thinking and text segments, start/result
//! pairs for tool calls, and finally `turn_complete`. Events within one
//! turn are never reordered. Segment numbers come from one monotonically
//! increasing per-turn counter shared across thinking, text, and tool
//! segments, so downstream consumers can replay emission order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Common fields for all progress events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseEvent {
    /// Conversation this event belongs to.
    pub conversation_id: String,
    /// Run (one user turn) this event belongs to.
    pub run_id: String,
    /// ISO 8601 timestamp.
    pub timestamp: String,
}

impl BaseEvent {
    /// Create a base event with the current UTC timestamp.
    #[must_use]
    pub fn now(conversation_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            run_id: run_id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Terminal state of a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// The model produced a final answer.
    Ok,
    /// The iteration ceiling was hit with tools still pending; the final
    /// message is synthesized. A reported condition, not a fault.
    IterationLimit,
}

// ─────────────────────────────────────────────────────────────────────────────
// delver_events! macro — generates ProgressEvent, base(), event_type()
// ─────────────────────────────────────────────────────────────────────────────

/// Declarative macro that generates [`ProgressEvent`], its `base()` and
/// `event_type()` accessors, and a compile-time `VARIANT_COUNT`.
///
/// Adding a new variant requires ONE edit (inside this invocation).
/// The compiler enforces exhaustive matching everywhere else.
macro_rules! delver_events {
    ($(
        $(#[doc = $doc:literal])*
        $variant:ident {
            $(
                $(#[$fmeta:meta])*
                $field:ident : $ty:ty
            ),*
            $(,)?
        } => $rename:literal
    ),* $(,)?) => {
        /// A typed progress event with conversation/run context.
        ///
        /// Clients rely on exact type strings and field names.
        #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "type")]
        #[allow(missing_docs)]
        pub enum ProgressEvent {
            $(
                $(#[doc = $doc])*
                #[serde(rename = $rename)]
                $variant {
                    #[serde(flatten)]
                    base: BaseEvent,
                    $(
                        $(#[$fmeta])*
                        $field: $ty,
                    )*
                },
            )*
        }

        impl ProgressEvent {
            /// Get the base event fields.
            #[must_use]
            pub fn base(&self) -> &BaseEvent {
                match self {
                    $(Self::$variant { base, .. } => base,)*
                }
            }

            /// Get the event type string (for type discrimination).
            #[must_use]
            pub fn event_type(&self) -> &str {
                match self {
                    $(Self::$variant { .. } => $rename,)*
                }
            }
        }

        /// Number of `ProgressEvent` variants (compile-time constant for tests).
        #[cfg(test)]
        pub(crate) const VARIANT_COUNT: usize = [$($rename),*].len();
    };
}

delver_events! {
    // -- Turn lifecycle --

    /// Turn started processing a user message.
    TurnStart {
        #[serde(rename = "requestIndex")]
        request_index: u32,
        #[serde(rename = "userMsgIndex")]
        user_msg_index: u32,
    } => "turn_start",

    /// Turn reached a terminal state.
    TurnComplete {
        status: TurnStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        metadata: Value,
    } => "turn_complete",

    // -- Thinking segments --

    /// A reasoning segment opened.
    ThinkingSegmentStart {
        segment: u32,
    } => "thinking_segment_start",

    /// Incremental reasoning content.
    ThinkingToken {
        segment: u32,
        token: String,
    } => "thinking_token",

    /// A reasoning segment closed; `title` is derived from its first
    /// non-empty line.
    ThinkingSegmentEnd {
        segment: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    } => "thinking_segment_end",

    // -- Text segments --

    /// A visible-text segment opened.
    TextSegmentStart {
        segment: u32,
    } => "text_segment_start",

    /// Incremental visible text.
    TextToken {
        segment: u32,
        token: String,
    } => "text_token",

    /// A visible-text segment closed.
    TextSegmentEnd {
        segment: u32,
    } => "text_segment_end",

    // -- Tool execution --

    /// Tool execution started (top-level or nested).
    ToolStart {
        segment: u32,
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(rename = "argsPreview")]
        args_preview: String,
    } => "tool_start",

    /// Tool execution finished.
    ToolResult {
        segment: u32,
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        status: String,
        #[serde(rename = "durationMs")]
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    } => "tool_result",
}

impl ProgressEvent {
    /// Get the conversation id.
    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.base().conversation_id
    }

    /// Get the run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.base().run_id
    }

    /// Segment number, for every variant that carries one.
    #[must_use]
    pub fn segment(&self) -> Option<u32> {
        match self {
            Self::ThinkingSegmentStart { segment, .. }
            | Self::ThinkingToken { segment, .. }
            | Self::ThinkingSegmentEnd { segment, .. }
            | Self::TextSegmentStart { segment, .. }
            | Self::TextToken { segment, .. }
            | Self::TextSegmentEnd { segment, .. }
            | Self::ToolStart { segment, .. }
            | Self::ToolResult { segment, .. } => Some(*segment),
            Self::TurnStart { .. } | Self::TurnComplete { .. } => None,
        }
    }
}

/// Derive a short segment title from reasoning text: its first non-empty
/// line, whitespace-collapsed and clamped.
#[must_use]
pub fn derive_segment_title(text: &str, max_chars: usize) -> Option<String> {
    let line = text.lines().map(str::trim).find(|line| !line.is_empty())?;
    let compact = line.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut title: String = compact.chars().take(max_chars).collect();
    if compact.chars().count() > max_chars {
        title.push('…');
    }
    Some(title)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> BaseEvent {
        BaseEvent {
            conversation_id: "conv-1".into(),
            run_id: "run-1".into(),
            timestamp: "2025-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn turn_start_serde() {
        let e = ProgressEvent::TurnStart {
            base: base(),
            request_index: 1,
            user_msg_index: 2,
        };
        assert_eq!(e.event_type(), "turn_start");
        let value = serde_json::to_value(&e).unwrap();
        assert_eq!(value["type"], "turn_start");
        assert_eq!(value["conversationId"], "conv-1");
        assert_eq!(value["runId"], "run-1");
        assert_eq!(value["requestIndex"], 1);
        assert_eq!(value["userMsgIndex"], 2);
    }

    #[test]
    fn thinking_token_wire_format() {
        let e = ProgressEvent::ThinkingToken {
            base: base(),
            segment: 1,
            token: "hmm".into(),
        };
        insta::assert_snapshot!(
            serde_json::to_string(&e).unwrap(),
            @r#"{"type":"thinking_token","conversationId":"conv-1","runId":"run-1","timestamp":"2025-01-01T00:00:00Z","segment":1,"token":"hmm"}"#
        );
    }

    #[test]
    fn thinking_segment_end_omits_missing_title() {
        let e = ProgressEvent::ThinkingSegmentEnd {
            base: base(),
            segment: 1,
            title: None,
        };
        let value = serde_json::to_value(&e).unwrap();
        assert!(value.get("title").is_none());
    }

    #[test]
    fn tool_result_serde() {
        let e = ProgressEvent::ToolResult {
            base: base(),
            segment: 4,
            call_id: "call_1".into(),
            tool_name: "search".into(),
            status: "success".into(),
            duration_ms: 120,
            summary: Some("found 3 records".into()),
        };
        let value = serde_json::to_value(&e).unwrap();
        assert_eq!(value["type"], "tool_result");
        assert_eq!(value["callId"], "call_1");
        assert_eq!(value["durationMs"], 120);
        assert_eq!(value["summary"], "found 3 records");
    }

    #[test]
    fn turn_complete_iteration_limit() {
        let e = ProgressEvent::TurnComplete {
            base: base(),
            status: TurnStatus::IterationLimit,
            message: Some("stopped".into()),
            metadata: json!({"iterationLimitExhausted": true}),
        };
        let value = serde_json::to_value(&e).unwrap();
        assert_eq!(value["status"], "iteration_limit");
        assert_eq!(value["metadata"]["iterationLimitExhausted"], true);
    }

    #[test]
    fn all_variants_have_distinct_types() {
        let events = vec![
            ProgressEvent::TurnStart {
                base: base(),
                request_index: 1,
                user_msg_index: 1,
            },
            ProgressEvent::TurnComplete {
                base: base(),
                status: TurnStatus::Ok,
                message: None,
                metadata: json!({}),
            },
            ProgressEvent::ThinkingSegmentStart {
                base: base(),
                segment: 1,
            },
            ProgressEvent::ThinkingToken {
                base: base(),
                segment: 1,
                token: "t".into(),
            },
            ProgressEvent::ThinkingSegmentEnd {
                base: base(),
                segment: 1,
                title: None,
            },
            ProgressEvent::TextSegmentStart {
                base: base(),
                segment: 2,
            },
            ProgressEvent::TextToken {
                base: base(),
                segment: 2,
                token: "t".into(),
            },
            ProgressEvent::TextSegmentEnd {
                base: base(),
                segment: 2,
            },
            ProgressEvent::ToolStart {
                base: base(),
                segment: 3,
                call_id: "c".into(),
                tool_name: "n".into(),
                args_preview: "{}".into(),
            },
            ProgressEvent::ToolResult {
                base: base(),
                segment: 3,
                call_id: "c".into(),
                tool_name: "n".into(),
                status: "success".into(),
                duration_ms: 0,
                summary: None,
            },
        ];
        assert_eq!(events.len(), VARIANT_COUNT);

        let mut types: Vec<&str> = events.iter().map(ProgressEvent::event_type).collect();
        types.sort_unstable();
        types.dedup();
        assert_eq!(types.len(), VARIANT_COUNT);
    }

    #[test]
    fn segment_accessor_covers_segmented_variants() {
        let e = ProgressEvent::TextToken {
            base: base(),
            segment: 9,
            token: "t".into(),
        };
        assert_eq!(e.segment(), Some(9));
        let e = ProgressEvent::TurnStart {
            base: base(),
            request_index: 1,
            user_msg_index: 1,
        };
        assert_eq!(e.segment(), None);
    }

    #[test]
    fn derive_title_takes_first_nonempty_line() {
        let text = "\n\n  Evaluating search strategy   for trials\nmore detail";
        assert_eq!(
            derive_segment_title(text, 60).as_deref(),
            Some("Evaluating search strategy for trials")
        );
    }

    #[test]
    fn derive_title_clamps_long_lines() {
        let text = "abcdefghij";
        assert_eq!(derive_segment_title(text, 5).as_deref(), Some("abcde…"));
    }

    #[test]
    fn derive_title_none_for_blank_text() {
        assert_eq!(derive_segment_title("  \n\t\n", 60), None);
    }

    #[test]
    fn roundtrip_deserialization() {
        let e = ProgressEvent::ToolStart {
            base: base(),
            segment: 3,
            call_id: "call_9".into(),
            tool_name: "run_code".into(),
            args_preview: "{\"source\": …}".into(),
        };
        let value = serde_json::to_value(&e).unwrap();
        let back: ProgressEvent = serde_json::from_value(value).unwrap();
        assert_eq!(e, back);
    }
}
