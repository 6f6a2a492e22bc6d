//! # delver-core
//!
//! Foundation types for the Delver agent's execution core:
//!
//! - **Ids** — prefixed UUID-v7 identifiers for runs, tool calls, and
//!   sandbox executions.
//! - **Errors** — the tool error taxonomy with stable wire codes.
//! - **Outcome** — the `{status, output, error}` envelope every tool
//!   invocation is normalized into.
//! - **Events** — typed progress events streamed while a turn runs.
//! - **Truncation** — byte-bounded output clamping with flags.
//! - **Logging** — tracing subscriber bootstrap.
//!
//! Leaf crate: depends on nothing else in the workspace.

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod outcome;
pub mod truncation;

pub use errors::{ToolError, ToolErrorCode};
pub use events::{derive_segment_title, BaseEvent, ProgressEvent, TurnStatus};
pub use ids::{new_call_id, new_execution_id, new_run_id, nested_call_id};
pub use outcome::{ToolOutcome, ToolStatus};
pub use truncation::{preview, truncate_bytes};
