//! The sandbox runtime.
//!
//! `execute` runs one script against its conversation's persistent
//! namespace on the blocking pool, then normalizes what happened into an
//! [`ExecOutcome`]: captured stdout, nested tool-call records, stream
//! truncation flags, an environment-snapshot delta, and a single error
//! string when the script failed. Ceilings are cooperative — the run
//! completes, then the wall clock is checked post hoc.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::json;
use tokio::runtime::Handle;

use delver_core::{ToolError, ToolErrorCode, ToolOutcome, preview, truncate_bytes};
use delver_settings::SandboxSettings;
use delver_tools::{ToolContext, ToolRegistry};

use crate::bindings::{NestedCallRecord, ToolBindings};
use crate::hooks::ExecHooks;
use crate::interp::{self, Scope};
use crate::lexer::{self, Token};
use crate::parser;
use crate::policy::ImportPolicy;
use crate::session::SessionStore;

/// Resolved sandbox limits.
#[derive(Clone, Debug)]
pub struct SandboxConfig {
    /// Byte ceiling per captured stream.
    pub max_output_bytes: usize,
    /// Wall-clock ceiling per exec, seconds.
    pub max_wall_time_secs: u64,
    /// Nested tool-call ceiling per exec.
    pub max_tool_calls_per_exec: u32,
    /// Default worker count for `parallel_map`.
    pub parallel_map_max_workers: usize,
    /// Maximum variables reported per env snapshot.
    pub env_max_items: usize,
    /// Preview length per reported variable.
    pub env_preview_chars: usize,
    /// Variable-name substrings whose previews are redacted.
    pub redact_markers: Vec<String>,
}

impl SandboxConfig {
    /// Config from the sandbox settings block.
    #[must_use]
    pub fn from_settings(settings: &SandboxSettings) -> Self {
        Self {
            max_output_bytes: settings.max_stdout_bytes,
            max_wall_time_secs: settings.max_wall_time_secs,
            max_tool_calls_per_exec: settings.max_tool_calls_per_exec,
            parallel_map_max_workers: settings.parallel_map_max_workers,
            env_max_items: settings.env_snapshot.max_items,
            env_preview_chars: settings.env_snapshot.max_preview_chars,
            redact_markers: settings.env_snapshot.redact_keys.clone(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::from_settings(&SandboxSettings::default())
    }
}

/// One execution request.
#[derive(Clone, Debug)]
pub struct ExecRequest {
    /// Owning conversation (selects the session).
    pub conversation_id: String,
    /// Owning run.
    pub run_id: String,
    /// Provider request index within the run.
    pub request_index: u32,
    /// Index of the user message that started the run.
    pub user_msg_index: u32,
    /// Execution id; nested call ids derive from it.
    pub execution_id: String,
    /// Script source.
    pub source: String,
}

/// One reported namespace variable.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvItem {
    /// Variable name.
    pub name: String,
    /// Value type name.
    pub type_name: String,
    /// Clamped (possibly redacted) value preview.
    pub preview: String,
}

/// Namespace snapshot with the delta against the pre-exec state.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvSnapshot {
    /// Variables live after the exec.
    pub variable_count: usize,
    /// Names bound by this exec.
    pub added: Vec<String>,
    /// Names whose values changed.
    pub updated: Vec<String>,
    /// Names unbound by this exec.
    pub removed: Vec<String>,
    /// Post-exec variables, name-sorted and bounded.
    pub variables: Vec<EnvItem>,
}

/// Everything one exec produced.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecOutcome {
    /// Execution id.
    pub execution_id: String,
    /// Captured visible output, truncated past the byte ceiling.
    pub stdout: String,
    /// Error text (mirrors `error`), truncated past the byte ceiling.
    pub stderr: String,
    /// Nested tool calls attempted, in dispatch order.
    pub nested_tool_calls: Vec<NestedCallRecord>,
    /// Whether either stream was truncated.
    pub truncated: bool,
    /// Whether any `print` ran.
    pub had_visible_output: bool,
    /// Guidance when the exec succeeded but printed nothing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    /// Script failure, formatted `Kind: message`, with any wall-clock
    /// violation merged in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Namespace state and delta.
    pub env_snapshot: EnvSnapshot,
    /// Exec wall time, milliseconds.
    pub duration_ms: u64,
}

impl ExecOutcome {
    /// Whether the exec failed.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Normalize into the shared tool-result envelope.
    #[must_use]
    pub fn to_tool_outcome(&self) -> ToolOutcome {
        match &self.error {
            Some(error) => {
                let code = if error.starts_with("TimeoutError") {
                    ToolErrorCode::Timeout
                } else {
                    ToolErrorCode::SandboxRuntimeError
                };
                ToolOutcome::failure(ToolError::new(code, error.clone()).with_details(json!({
                    "executionId": self.execution_id,
                    "stdout": self.stdout,
                    "nestedToolCalls": self.nested_tool_calls.len(),
                })))
            }
            None => {
                let summary = match &self.notice {
                    Some(notice) => notice.clone(),
                    None => format!(
                        "executed with {} nested tool call(s); {} bytes of output",
                        self.nested_tool_calls.len(),
                        self.stdout.len()
                    ),
                };
                ToolOutcome::success(json!({
                    "summary": summary,
                    "executionId": self.execution_id,
                    "stdout": self.stdout,
                    "truncated": self.truncated,
                    "hadVisibleOutput": self.had_visible_output,
                    "notice": self.notice,
                    "nestedToolCalls": self.nested_tool_calls,
                    "env": self.env_snapshot,
                }))
            }
        }
    }
}

/// Sandboxed execution runtime for one registry/session-store pairing.
pub struct SandboxRuntime {
    registry: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
    policy: ImportPolicy,
    config: SandboxConfig,
}

struct RawExec {
    stdout: String,
    print_calls: u32,
    records: Vec<NestedCallRecord>,
    error: Option<String>,
    env_snapshot: EnvSnapshot,
    elapsed: Duration,
    source_has_print: bool,
}

impl SandboxRuntime {
    /// Runtime over a registry and session store.
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        sessions: Arc<SessionStore>,
        policy: ImportPolicy,
        config: SandboxConfig,
    ) -> Self {
        Self {
            registry,
            sessions,
            policy,
            config,
        }
    }

    /// The backing session store (seeding, eviction, teardown).
    #[must_use]
    pub fn session_store(&self) -> Arc<SessionStore> {
        Arc::clone(&self.sessions)
    }

    /// Run one script to completion.
    ///
    /// Never returns `Err`: every failure mode lands in the outcome's
    /// error field.
    pub async fn execute(&self, req: ExecRequest, hooks: ExecHooks) -> ExecOutcome {
        let handle = Handle::current();
        let session = self.sessions.session(&req.conversation_id);
        let registry = Arc::clone(&self.registry);
        let policy = self.policy.clone();
        let config = self.config.clone();
        let request = req.clone();

        let worker = tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            let mut namespace = session.namespace.lock();
            let before = fingerprint(&namespace);

            let ctx = ToolContext {
                conversation_id: request.conversation_id.clone(),
                run_id: request.run_id.clone(),
                request_index: request.request_index,
                user_msg_index: request.user_msg_index,
                call_id: request.execution_id.clone(),
            };
            let mut bindings = ToolBindings::new(
                registry,
                handle,
                ctx,
                policy,
                config.max_tool_calls_per_exec,
                config.parallel_map_max_workers,
                hooks,
            );

            let source_has_print = source_mentions_print(&request.source);
            let error = match lexer::tokenize(&request.source).and_then(parser::parse) {
                Err(parse_error) => Some(parse_error.to_string()),
                Ok(stmts) => interp::run(&stmts, &mut namespace, &mut bindings)
                    .err()
                    .map(|e| e.to_string()),
            };

            let env_snapshot = snapshot(&namespace, &before, &config);
            drop(namespace);

            RawExec {
                stdout: bindings.stdout,
                print_calls: bindings.print_calls,
                records: bindings.records,
                error,
                env_snapshot,
                elapsed: started.elapsed(),
                source_has_print,
            }
        });

        let raw = match worker.await {
            Ok(raw) => raw,
            Err(join_error) => {
                tracing::error!(error = %join_error, "sandbox execution worker failed");
                RawExec {
                    stdout: String::new(),
                    print_calls: 0,
                    records: Vec::new(),
                    error: Some("SandboxRuntimeError: execution worker panicked".to_string()),
                    env_snapshot: EnvSnapshot::default(),
                    elapsed: Duration::ZERO,
                    source_has_print: false,
                }
            }
        };

        let (stdout, stdout_cut) = truncate_bytes(&raw.stdout, self.config.max_output_bytes);
        let mut error = raw.error;
        if raw.elapsed.as_secs() >= self.config.max_wall_time_secs {
            let violation = format!(
                "TimeoutError: wall-clock ceiling exceeded ({}s limit)",
                self.config.max_wall_time_secs
            );
            error = Some(match error {
                Some(existing) => format!("{existing}; {violation}"),
                None => violation,
            });
        }
        let (stderr, stderr_cut) =
            truncate_bytes(error.as_deref().unwrap_or(""), self.config.max_output_bytes);

        let had_visible_output = raw.print_calls > 0;
        let notice = if error.is_none() && !had_visible_output {
            Some(if raw.source_has_print {
                "execution completed with no visible output; the code contains print(...) but it never ran".to_string()
            } else {
                "execution completed with no visible output; use print(...) to expose results"
                    .to_string()
            })
        } else {
            None
        };

        let status = if error.is_some() { "error" } else { "success" };
        counter!("delver_sandbox_execs_total", "status" => status).increment(1);
        histogram!("delver_sandbox_exec_duration_seconds").record(raw.elapsed.as_secs_f64());
        if let Some(message) = &error {
            tracing::warn!(
                execution_id = %req.execution_id,
                conversation_id = %req.conversation_id,
                error = %message,
                "sandbox execution failed"
            );
        } else {
            tracing::debug!(
                execution_id = %req.execution_id,
                conversation_id = %req.conversation_id,
                nested_calls = raw.records.len(),
                duration_ms = raw.elapsed.as_millis() as u64,
                "sandbox execution completed"
            );
        }

        ExecOutcome {
            execution_id: req.execution_id,
            stdout,
            stderr,
            nested_tool_calls: raw.records,
            truncated: stdout_cut || stderr_cut,
            had_visible_output,
            notice,
            error,
            env_snapshot: raw.env_snapshot,
            duration_ms: raw.elapsed.as_millis() as u64,
        }
    }
}

/// Lexical check: does the source mention `print` at all? Distinguishes
/// "print never ran" from "no print written".
fn source_mentions_print(source: &str) -> bool {
    match lexer::tokenize(source) {
        Ok(tokens) => tokens
            .iter()
            .any(|t| matches!(t, Token::Ident(name) if name == "print")),
        Err(_) => source.contains("print"),
    }
}

fn fingerprint(namespace: &Scope) -> HashMap<String, String> {
    namespace
        .iter()
        .map(|(name, value)| (name.clone(), value.repr()))
        .collect()
}

fn snapshot(
    namespace: &Scope,
    before: &HashMap<String, String>,
    config: &SandboxConfig,
) -> EnvSnapshot {
    let mut added = Vec::new();
    let mut updated = Vec::new();
    for (name, value) in namespace {
        match before.get(name) {
            None => added.push(name.clone()),
            Some(previous) if *previous != value.repr() => updated.push(name.clone()),
            Some(_) => {}
        }
    }
    let mut removed: Vec<String> = before
        .keys()
        .filter(|name| !namespace.contains_key(*name))
        .cloned()
        .collect();
    added.sort_unstable();
    updated.sort_unstable();
    removed.sort_unstable();

    let mut names: Vec<&String> = namespace.keys().collect();
    names.sort_unstable();
    let variables = names
        .into_iter()
        .take(config.env_max_items)
        .map(|name| {
            let value = &namespace[name];
            let lowered = name.to_lowercase();
            let redacted = config
                .redact_markers
                .iter()
                .any(|marker| lowered.contains(marker.as_str()));
            EnvItem {
                name: name.clone(),
                type_name: value.type_name().to_string(),
                preview: if redacted {
                    "[redacted]".to_string()
                } else {
                    preview(&value.repr(), config.env_preview_chars)
                },
            }
        })
        .collect();

    EnvSnapshot {
        variable_count: namespace.len(),
        added,
        updated,
        removed,
        variables,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
