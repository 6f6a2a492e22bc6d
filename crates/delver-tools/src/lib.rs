//! # delver-tools
//!
//! The tool layer of the Delver agent:
//!
//! - **Registry** — catalog of callable tools with declared input shapes;
//!   dispatch normalizes every result into the shared envelope.
//! - **Schema** — fluent JSON-schema builder for tool definitions.
//! - **Coercion** — schema-driven normalization of loosely-typed payloads
//!   coming from sandboxed code.
//! - **Shell** — the structurally separate guarded command executor.

#![deny(unsafe_code)]

pub mod coerce;
pub mod context;
pub mod registry;
pub mod schema;
pub mod shell;

pub use coerce::{coerce_positional, merge_kwargs, normalize_aliases, normalize_payload};
pub use context::ToolContext;
pub use registry::{RegistryError, Tool, ToolOrigin, ToolRegistry, ToolSpec};
pub use schema::SchemaBuilder;
pub use shell::{ShellExecutor, ShellPolicy, ShellPolicyMode, ShellResult};
