//! The sub-agent runner.
//!
//! A sub-agent is an isolated nested agent: its own provider loop, its
//! own private sandbox runtime and session store (never shared with the
//! parent or with sibling tasks), and exactly two synthetic tools —
//! `run_code` and `run_shell` — each independently toggleable. Batches
//! run under a bounded worker pool with results positionally aligned to
//! the input list; one task's failure or panic lands in that slot only.
//!
//! Every query writes a structured transcript durably (atomic temp-file
//! plus rename) regardless of outcome; a write failure only nulls the
//! reported path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use delver_core::{ToolError, ToolErrorCode, ToolOutcome, new_call_id, new_execution_id, new_run_id};
use delver_sandbox::{ExecHooks, ExecRequest, ImportPolicy, SandboxConfig, SandboxRuntime, SessionStore};
use delver_settings::{SandboxSettings, SubagentSettings};
use delver_tools::{SchemaBuilder, ShellExecutor, ToolRegistry};

use crate::provider::{
    ChatMessage, Provider, ProviderError, ProviderRequest, StreamOutcome, ToolCallRequest,
};

/// Hard cap on batch workers, whatever the caller asks for.
pub const MAX_BATCH_WORKERS: usize = 64;

/// One delegated task.
#[derive(Clone, Debug)]
pub struct SubagentQuery {
    /// Conversation the delegation belongs to.
    pub conversation_id: String,
    /// The task description given to the sub-agent.
    pub task: String,
    /// Optional system instruction.
    pub instruction: Option<String>,
    /// Registry subset the sub-agent's sandboxed code may call.
    pub allowed_tools: Vec<String>,
    /// Variables seeded into the private namespace.
    pub env: Map<String, Value>,
    /// Whether the `run_code` synthetic tool is available.
    pub enable_run_code: bool,
    /// Whether the `run_shell` synthetic tool is available.
    pub enable_run_shell: bool,
    /// Iteration-ceiling override.
    pub max_iterations: Option<u32>,
}

impl SubagentQuery {
    /// Query with both synthetic tools enabled and no overrides.
    #[must_use]
    pub fn new(conversation_id: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            task: task.into(),
            instruction: None,
            allowed_tools: Vec::new(),
            env: Map::new(),
            enable_run_code: true,
            enable_run_shell: true,
            max_iterations: None,
        }
    }
}

/// Outcome of one delegated task.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentReport {
    /// Whether the task ran to a terminal state without a setup or
    /// provider failure.
    pub ok: bool,
    /// The task as given.
    pub task: String,
    /// Final text (synthesized on iteration-ceiling exit).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Failure description when not ok.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Durable transcript location; `None` when the write failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<String>,
    /// Synthetic tool calls executed.
    pub tool_calls: u32,
    /// Provider round-trips used.
    pub iterations: u32,
}

/// One entry in a batch, with per-entry overrides.
#[derive(Clone, Debug, Default)]
pub struct BatchEntry {
    /// The task description.
    pub task: String,
    /// Entry env, merged over the shared env (entry wins).
    pub env: Map<String, Value>,
    /// Registry-subset override.
    pub allowed_tools: Option<Vec<String>>,
    /// Instruction override.
    pub instruction: Option<String>,
    /// `run_code` toggle override.
    pub enable_run_code: Option<bool>,
    /// `run_shell` toggle override.
    pub enable_run_shell: Option<bool>,
    /// Iteration-ceiling override.
    pub max_iterations: Option<u32>,
}

impl BatchEntry {
    /// Entry with defaults and the given task.
    #[must_use]
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Self::default()
        }
    }
}

/// A batch of delegated tasks sharing defaults.
#[derive(Clone, Debug, Default)]
pub struct BatchRequest {
    /// Conversation the batch belongs to.
    pub conversation_id: String,
    /// Tasks, in result order.
    pub entries: Vec<BatchEntry>,
    /// Env seeded into every entry (entries override per key).
    pub shared_env: Map<String, Value>,
    /// Default registry subset.
    pub allowed_tools: Vec<String>,
    /// Default instruction.
    pub instruction: Option<String>,
    /// Worker-pool size override.
    pub max_workers: Option<usize>,
}

/// Runs delegated tasks against isolated sandbox runtimes.
#[derive(Clone)]
pub struct SubagentRunner {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    shell: Arc<ShellExecutor>,
    settings: SubagentSettings,
    sandbox: SandboxSettings,
}

impl SubagentRunner {
    /// Runner over a provider, the full tool registry, and a shell
    /// executor. Each query scopes the registry down itself.
    #[must_use]
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        shell: Arc<ShellExecutor>,
        settings: SubagentSettings,
        sandbox: SandboxSettings,
    ) -> Self {
        Self {
            provider,
            registry,
            shell,
            settings,
            sandbox,
        }
    }

    /// Run one delegated task to completion.
    ///
    /// Never returns `Err`: validation and provider failures land in the
    /// report with `ok: false`. The transcript is written regardless.
    pub async fn run_query(&self, query: SubagentQuery) -> SubagentReport {
        let run_id = new_run_id();
        let query_id = Uuid::now_v7().simple().to_string()[..12].to_string();
        let started = Instant::now();
        let mut steps: Vec<Value> = Vec::new();
        let mut tool_calls = 0u32;
        let mut iterations = 0u32;

        let outcome = self
            .drive_query(&query, &run_id, &mut steps, &mut tool_calls, &mut iterations)
            .await;
        let (ok, text, error) = match outcome {
            Ok(text) => (true, text, None),
            Err(error) => (false, None, Some(error)),
        };

        let transcript = json!({
            "task": query.task,
            "conversationId": query.conversation_id,
            "runId": run_id,
            "queryId": query_id,
            "ok": ok,
            "text": text,
            "error": error,
            "iterations": iterations,
            "toolCalls": tool_calls,
            "durationMs": started.elapsed().as_millis() as u64,
            "steps": steps,
        });
        let transcript_path = self
            .write_transcript(&query.conversation_id, &run_id, &query_id, &transcript)
            .await;

        counter!(
            "delver_subagent_queries_total",
            "status" => if ok { "ok" } else { "error" }
        )
        .increment(1);
        tracing::info!(
            conversation_id = %query.conversation_id,
            run_id,
            ok,
            iterations,
            tool_calls,
            "sub-agent query finished"
        );
        SubagentReport {
            ok,
            task: query.task,
            text,
            error,
            transcript_path,
            tool_calls,
            iterations,
        }
    }

    /// Run a batch of delegated tasks under a bounded worker pool.
    ///
    /// Results are written at pre-assigned indices, so output stays
    /// positionally aligned to input regardless of completion order. One
    /// task's failure or panic becomes that slot's failure only; only
    /// batch-setup errors fail the call itself.
    pub async fn run_batch(
        &self,
        request: BatchRequest,
    ) -> Result<Vec<SubagentReport>, ToolError> {
        if request.entries.is_empty() {
            return Err(ToolError::validation("batch requires at least one task"));
        }
        let workers = request
            .max_workers
            .unwrap_or(self.settings.max_batch_workers)
            .clamp(1, MAX_BATCH_WORKERS);
        let semaphore = Arc::new(Semaphore::new(workers));
        tracing::debug!(tasks = request.entries.len(), workers, "batch started");

        let mut set: JoinSet<(usize, SubagentReport)> = JoinSet::new();
        let mut index_by_task: HashMap<tokio::task::Id, usize> = HashMap::new();
        for (index, entry) in request.entries.iter().cloned().enumerate() {
            let runner = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let mut env = request.shared_env.clone();
            for (key, value) in entry.env {
                let _ = env.insert(key, value);
            }
            let query = SubagentQuery {
                conversation_id: request.conversation_id.clone(),
                task: entry.task,
                instruction: entry.instruction.or_else(|| request.instruction.clone()),
                allowed_tools: entry
                    .allowed_tools
                    .unwrap_or_else(|| request.allowed_tools.clone()),
                env,
                enable_run_code: entry.enable_run_code.unwrap_or(true),
                enable_run_shell: entry.enable_run_shell.unwrap_or(true),
                max_iterations: entry.max_iterations,
            };
            let handle = set.spawn(async move {
                // The semaphore is never closed; an Err would just run unthrottled.
                let _permit = semaphore.acquire_owned().await.ok();
                (index, runner.run_query(query).await)
            });
            let _ = index_by_task.insert(handle.id(), index);
        }

        let mut slots: Vec<Option<SubagentReport>> = vec![None; request.entries.len()];
        while let Some(joined) = set.join_next_with_id().await {
            match joined {
                Ok((_, (index, report))) => slots[index] = Some(report),
                Err(join_error) => {
                    let index = index_by_task.get(&join_error.id()).copied();
                    tracing::error!(?index, %join_error, "batch task panicked");
                    if let Some(index) = index {
                        slots[index] = Some(failed_report(
                            request.entries[index].task.clone(),
                            format!("task panicked: {join_error}"),
                        ));
                    }
                }
            }
        }

        Ok(slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    failed_report(
                        request.entries[index].task.clone(),
                        "task produced no result".to_string(),
                    )
                })
            })
            .collect())
    }

    /// The provider/tool loop for one query. Setup and provider failures
    /// come back as `Err(description)`; a ceiling exit synthesizes the
    /// final text.
    async fn drive_query(
        &self,
        query: &SubagentQuery,
        run_id: &str,
        steps: &mut Vec<Value>,
        tool_calls: &mut u32,
        iterations: &mut u32,
    ) -> Result<Option<String>, String> {
        if query.task.trim().is_empty() {
            return Err("task must not be empty".into());
        }
        if !query.enable_run_code && !query.enable_run_shell {
            return Err("at least one of run_code and run_shell must be enabled".into());
        }
        let scoped = Arc::new(
            self.registry
                .subset(&query.allowed_tools)
                .map_err(|error| error.to_string())?,
        );

        // A fresh store per query: the namespace is never shared with the
        // parent conversation or with sibling tasks.
        let sessions = Arc::new(SessionStore::new(
            4,
            Duration::from_secs(self.sandbox.session_ttl_secs),
        ));
        let runtime = SandboxRuntime::new(
            scoped,
            Arc::clone(&sessions),
            ImportPolicy::from_settings(&self.sandbox),
            SandboxConfig::from_settings(&self.sandbox),
        );
        let seeded = sessions.seed_variables(&query.conversation_id, query.env.clone());
        steps.push(json!({"seededEnv": seeded}));

        let tools = synthetic_schemas(query);
        let ceiling = query
            .max_iterations
            .unwrap_or(self.settings.max_iterations)
            .max(1);
        let mut messages = vec![ChatMessage::user(&query.task)];
        let mut final_text: Option<String> = None;
        let mut completed = false;

        for iteration in 1..=ceiling {
            *iterations = iteration;
            let request = ProviderRequest {
                system_prompt: query.instruction.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
            };
            let outcome = call_provider(Arc::clone(&self.provider), request)
                .await
                .map_err(|error| error.to_string())?;
            steps.push(json!({
                "iteration": iteration,
                "thinking": outcome.thinking,
                "text": outcome.text,
                "toolCalls": outcome.tool_calls,
            }));

            if outcome.tool_calls.is_empty() {
                if !outcome.text.is_empty() {
                    final_text = Some(outcome.text);
                }
                completed = true;
                break;
            }

            messages.push(ChatMessage::assistant_calls(
                outcome.text.clone(),
                outcome.tool_calls.clone(),
            ));
            for call in &outcome.tool_calls {
                *tool_calls += 1;
                let call_id = if call.id.is_empty() {
                    new_call_id()
                } else {
                    call.id.clone()
                };
                let envelope = self
                    .dispatch_synthetic(query, &runtime, iteration, run_id, call)
                    .await;
                steps.push(json!({
                    "iteration": iteration,
                    "callId": call_id,
                    "toolName": call.name,
                    "result": envelope,
                }));
                messages.push(ChatMessage::tool(
                    call_id,
                    serde_json::to_string(&envelope).unwrap_or_default(),
                ));
            }
        }

        if !completed {
            final_text = Some(format!(
                "Sub-agent stopped after reaching iteration limit ({ceiling}) without a \
                 final text response."
            ));
        }
        Ok(final_text)
    }

    /// Execute one synthetic tool call into the shared envelope. Disabled
    /// tools and unknown names fail in the envelope, never the query.
    async fn dispatch_synthetic(
        &self,
        query: &SubagentQuery,
        runtime: &SandboxRuntime,
        iteration: u32,
        run_id: &str,
        call: &ToolCallRequest,
    ) -> ToolOutcome {
        match call.name.as_str() {
            "run_code" => {
                if !query.enable_run_code {
                    return disabled_tool("run_code");
                }
                let Some(source) = call.arguments.get("source").and_then(Value::as_str) else {
                    return ToolOutcome::failure(ToolError::validation(
                        "run_code requires a string 'source'",
                    ));
                };
                let request = ExecRequest {
                    conversation_id: query.conversation_id.clone(),
                    run_id: run_id.to_string(),
                    request_index: iteration,
                    user_msg_index: 1,
                    execution_id: new_execution_id(),
                    source: source.to_string(),
                };
                runtime
                    .execute(request, ExecHooks::noop())
                    .await
                    .to_tool_outcome()
            }
            "run_shell" => {
                if !query.enable_run_shell {
                    return disabled_tool("run_shell");
                }
                let Some(command) = call.arguments.get("command").and_then(Value::as_str) else {
                    return ToolOutcome::failure(ToolError::validation(
                        "run_shell requires a string 'command'",
                    ));
                };
                let timeout = call
                    .arguments
                    .get("timeout_secs")
                    .and_then(Value::as_u64)
                    .map(Duration::from_secs);
                let cwd = call.arguments.get("cwd").and_then(Value::as_str);
                match self.shell.run(command, timeout, cwd).await {
                    Ok(result) => ToolOutcome::success(json!({
                        "summary": format!("exit {}", result.exit_code),
                        "exitCode": result.exit_code,
                        "stdout": result.stdout,
                        "stderr": result.stderr,
                        "truncated": result.truncated,
                    })),
                    Err(error) => ToolOutcome::failure(error),
                }
            }
            other => ToolOutcome::failure(ToolError::new(
                ToolErrorCode::UnsupportedTool,
                format!("sub-agents can only call run_code and run_shell, not '{other}'"),
            )),
        }
    }

    /// Atomic transcript write: temp file in the final directory, then
    /// rename. Failures only null the reported path.
    async fn write_transcript(
        &self,
        conversation_id: &str,
        run_id: &str,
        query_id: &str,
        transcript: &Value,
    ) -> Option<String> {
        let day = chrono::Utc::now().format("%Y%m%d").to_string();
        let dir = PathBuf::from(&self.settings.artifacts_root)
            .join("subagent_traces")
            .join(day)
            .join(format!("conv-{conversation_id}"))
            .join(format!("run-{run_id}"))
            .join(format!("query-{query_id}"));
        let path = dir.join("transcript.json");
        let tmp = dir.join("transcript.json.tmp");

        let result = async {
            tokio::fs::create_dir_all(&dir).await?;
            let body =
                serde_json::to_vec_pretty(transcript).map_err(std::io::Error::other)?;
            tokio::fs::write(&tmp, body).await?;
            tokio::fs::rename(&tmp, &path).await?;
            Ok::<_, std::io::Error>(())
        }
        .await;
        match result {
            Ok(()) => Some(path.to_string_lossy().into_owned()),
            Err(error) => {
                tracing::warn!(%error, path = %path.display(), "transcript write failed");
                None
            }
        }
    }
}

/// Schema objects for the enabled synthetic tools.
fn synthetic_schemas(query: &SubagentQuery) -> Vec<Value> {
    let mut tools = Vec::new();
    if query.enable_run_code {
        tools.push(json!({
            "name": "run_code",
            "description": "Run sandboxed code against this task's private namespace",
            "input_schema": SchemaBuilder::object()
                .required_string("source", "Script source to execute")
                .build(),
        }));
    }
    if query.enable_run_shell {
        tools.push(json!({
            "name": "run_shell",
            "description": "Run one guarded shell command",
            "input_schema": SchemaBuilder::object()
                .required_string("command", "Command line to run")
                .integer("timeout_secs", "Per-command timeout override, seconds")
                .string("cwd", "Working directory under the workspace root")
                .build(),
        }));
    }
    tools
}

fn disabled_tool(name: &str) -> ToolOutcome {
    ToolOutcome::failure(ToolError::new(
        ToolErrorCode::ToolNotEnabled,
        format!("tool '{name}' is not enabled for this sub-agent"),
    ))
}

fn failed_report(task: String, error: String) -> SubagentReport {
    SubagentReport {
        ok: false,
        task,
        text: None,
        error: Some(error),
        transcript_path: None,
        tool_calls: 0,
        iterations: 0,
    }
}

/// Run one non-streaming provider request on the blocking pool.
async fn call_provider(
    provider: Arc<dyn Provider>,
    request: ProviderRequest,
) -> Result<StreamOutcome, ProviderError> {
    tokio::task::spawn_blocking(move || provider.stream_turn(&request, &mut |_token| {}))
        .await
        .map_err(|error| ProviderError::Stream(format!("provider worker panicked: {error}")))?
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
