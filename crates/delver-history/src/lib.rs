//! # delver-history
//!
//! Canonical conversation history for the Delver agent.
//!
//! The sole source of truth for "what the model has seen" is an ordered
//! sequence of immutable [`CanonicalEvent`]s per conversation. Messages
//! are the mutable rendering layer on top: a streaming assistant message
//! accumulates content blocks in place while its events are appended
//! around it.
//!
//! The store here is in-memory; durable persistence lives behind the same
//! API surface in a separate service.

#![deny(unsafe_code)]

pub mod store;
pub mod types;

pub use store::HistoryStore;
pub use types::{CanonicalEvent, ContentBlock, EventKind, Message, Role, ToolCall};
