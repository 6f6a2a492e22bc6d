//! Per-exec observability hooks.
//!
//! Installed fresh at the start of every exec (the previous exec's hooks
//! never survive) so nested tool calls surface on the same progress stream
//! as top-level calls.

use std::sync::Arc;

use delver_core::ToolOutcome;

/// Callback fired when a nested tool call starts.
pub type NestedStartFn = dyn Fn(&str, &str, &serde_json::Value) + Send + Sync;

/// Callback fired when a nested tool call completes, with its duration in
/// milliseconds.
pub type NestedResultFn = dyn Fn(&str, &str, &ToolOutcome, u64) + Send + Sync;

/// Hook bundle for one exec.
#[derive(Clone, Default)]
pub struct ExecHooks {
    /// Fired with `(call_id, tool_name, payload)` before dispatch.
    pub on_nested_start: Option<Arc<NestedStartFn>>,
    /// Fired with `(call_id, tool_name, outcome, duration_ms)` after.
    pub on_nested_result: Option<Arc<NestedResultFn>>,
}

impl ExecHooks {
    /// Hooks that observe nothing.
    #[must_use]
    pub fn noop() -> Self {
        Self::default()
    }

    pub(crate) fn fire_start(&self, call_id: &str, tool_name: &str, payload: &serde_json::Value) {
        if let Some(hook) = &self.on_nested_start {
            hook(call_id, tool_name, payload);
        }
    }

    pub(crate) fn fire_result(
        &self,
        call_id: &str,
        tool_name: &str,
        outcome: &ToolOutcome,
        duration_ms: u64,
    ) {
        if let Some(hook) = &self.on_nested_result {
            hook(call_id, tool_name, outcome, duration_ms);
        }
    }
}
