//! # delver-runtime
//!
//! The execution core's top layer:
//!
//! - **Provider** — the blocking model-provider seam.
//! - **Bridge** — the worker-thread to scheduler streaming bridge.
//! - **Emitter** — broadcast fan-out for progress events.
//! - **Orchestrator** — drives one user turn through model/tool
//!   round-trips with shared per-turn segment numbering.
//! - **Subagent** — isolated delegated tasks with bounded-parallel
//!   batches and durable transcripts.

#![deny(unsafe_code)]

pub mod bridge;
pub mod emitter;
pub mod orchestrator;
pub mod provider;
pub mod subagent;

pub use bridge::BridgeItem;
pub use emitter::EventEmitter;
pub use orchestrator::{
    OrchestratorError, TurnOrchestrator, TurnReport, iteration_limit_message, messages_from_events,
};
pub use provider::{
    ChatMessage, Provider, ProviderError, ProviderRequest, StreamOutcome, StreamToken,
    ToolCallRequest,
};
pub use subagent::{
    BatchEntry, BatchRequest, MAX_BATCH_WORKERS, SubagentQuery, SubagentReport, SubagentRunner,
};
