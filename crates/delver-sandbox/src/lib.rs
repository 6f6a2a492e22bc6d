//! # delver-sandbox
//!
//! The sandboxed execution runtime:
//!
//! - **Sessions** — one persistent namespace per conversation, with TTL
//!   and capacity eviction.
//! - **Language** — a small imperative script subset (lexer, parser,
//!   tree-walking interpreter) with no host-language evaluation.
//! - **Policy** — the import allowlist/denylist.
//! - **Bindings** — tool wrappers with argument coercion, the shared
//!   nested-call counter, and the bounded parallel-map pool.
//! - **Runtime** — orchestrates one exec: capture, ceilings, env
//!   snapshots, and normalization into the tool-result envelope.

#![deny(unsafe_code)]

pub mod ast;
pub mod bindings;
pub mod hooks;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod policy;
pub mod runtime;
pub mod session;
pub mod value;

pub use bindings::{NestedCallRecord, ToolBindings};
pub use hooks::ExecHooks;
pub use interp::{HostEnv, Scope};
pub use policy::{ImportPolicy, ImportPolicyMode};
pub use runtime::{EnvItem, EnvSnapshot, ExecOutcome, ExecRequest, SandboxConfig, SandboxRuntime};
pub use session::{ExecSession, SessionStore};
pub use value::{ScriptError, Value};
