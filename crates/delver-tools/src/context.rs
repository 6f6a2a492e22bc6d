//! Dispatch context carried on every tool invocation.

use serde::{Deserialize, Serialize};

/// Lineage for one tool invocation: which conversation, run, request, and
/// call produced it. Nested calls made from sandboxed code reuse the
/// parent's conversation/run and carry a derived call id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolContext {
    /// Owning conversation.
    pub conversation_id: String,
    /// Owning run (one user turn).
    pub run_id: String,
    /// Provider request index within the run (1-based).
    pub request_index: u32,
    /// Index of the user message that started the run (1-based).
    pub user_msg_index: u32,
    /// The call id this invocation executes under.
    pub call_id: String,
}

impl ToolContext {
    /// Context for a nested call derived from this one.
    #[must_use]
    pub fn nested(&self, call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_keeps_lineage_and_swaps_call_id() {
        let ctx = ToolContext {
            conversation_id: "c1".into(),
            run_id: "r1".into(),
            request_index: 2,
            user_msg_index: 1,
            call_id: "exec_1".into(),
        };
        let nested = ctx.nested("exec_1:nested:0001");
        assert_eq!(nested.conversation_id, "c1");
        assert_eq!(nested.request_index, 2);
        assert_eq!(nested.call_id, "exec_1:nested:0001");
    }
}
