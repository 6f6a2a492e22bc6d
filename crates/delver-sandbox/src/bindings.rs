//! Tool bindings: the bridge between sandboxed code and the registry.
//!
//! Every tool call made from a script passes through one dispatch path:
//! increment the shared nested-call counter, derive the nested call id,
//! coerce arguments against the tool's declared schema, fire the per-exec
//! hooks, and execute on the async registry via `Handle::block_on`. The
//! script always receives the full result envelope as a map value — a
//! failing tool call is data the code can inspect, not an abort.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::runtime::Handle;

use delver_core::{ToolError, ToolErrorCode, ToolOutcome, ToolStatus, nested_call_id};
use delver_tools::{ToolContext, ToolRegistry, normalize_payload};

use crate::hooks::ExecHooks;
use crate::interp::HostEnv;
use crate::policy::ImportPolicy;
use crate::value::{ScriptError, Value};

/// Hard cap on the in-sandbox parallel worker pool.
const MAX_PARALLEL_WORKERS: usize = 64;

/// One nested tool call, as reported in the exec outcome.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedCallRecord {
    /// Derived call id (`{execution_id}:nested:{NNNN}`).
    pub call_id: String,
    /// Tool dispatched.
    pub tool_name: String,
    /// Envelope status.
    pub status: ToolStatus,
    /// Wall time of the call, milliseconds.
    pub duration_ms: u64,
    /// One-line result summary.
    pub summary: String,
}

/// The dispatch core, shareable across parallel-map worker threads.
struct SharedDispatch {
    registry: Arc<ToolRegistry>,
    handle: Handle,
    base_ctx: ToolContext,
    ceiling: u32,
    counter: Arc<AtomicU32>,
    hooks: ExecHooks,
}

impl SharedDispatch {
    fn dispatch(
        &self,
        name: &str,
        positional: Option<JsonValue>,
        kwargs: serde_json::Map<String, JsonValue>,
    ) -> (NestedCallRecord, Value) {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let call_id = nested_call_id(&self.base_ctx.call_id, n);
        let started = Instant::now();

        let prepared = if n > self.ceiling {
            Err(ToolError::new(
                ToolErrorCode::NestedCallLimitExceeded,
                format!(
                    "nested tool-call ceiling ({}) exceeded at call {n}",
                    self.ceiling
                ),
            ))
        } else {
            self.registry
                .spec(name)
                .ok_or_else(|| {
                    ToolError::new(
                        ToolErrorCode::UnsupportedTool,
                        format!("no tool named '{name}' in the active registry"),
                    )
                })
                .and_then(|spec| {
                    normalize_payload(&spec.input_schema, positional.clone(), kwargs.clone())
                })
        };

        let preview = match &prepared {
            Ok(payload) => JsonValue::Object(payload.clone()),
            Err(_) => serde_json::json!({"positional": positional, "kwargs": kwargs}),
        };
        self.hooks.fire_start(&call_id, name, &preview);

        let outcome = match prepared {
            Err(error) => ToolOutcome::failure(error),
            Ok(payload) => {
                let ctx = self.base_ctx.nested(call_id.clone());
                match self
                    .handle
                    .block_on(self.registry.execute(name, JsonValue::Object(payload), &ctx))
                {
                    Ok(outcome) => outcome,
                    Err(error) => ToolOutcome::failure(ToolError::new(
                        ToolErrorCode::UnsupportedTool,
                        error.to_string(),
                    )),
                }
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        self.hooks.fire_result(&call_id, name, &outcome, duration_ms);

        let record = NestedCallRecord {
            call_id,
            tool_name: name.to_string(),
            status: outcome.status,
            duration_ms,
            summary: outcome.summary(),
        };
        let value = Value::from_json(serde_json::to_value(&outcome).unwrap_or(JsonValue::Null));
        (record, value)
    }
}

/// The [`HostEnv`] implementation wired to the real registry.
///
/// Owns the exec's stdout buffer and nested-call records; the runtime
/// dismantles it after the script finishes.
pub struct ToolBindings {
    dispatch: SharedDispatch,
    policy: ImportPolicy,
    default_parallel_workers: usize,
    /// Captured visible output.
    pub stdout: String,
    /// Number of `print` calls that actually ran.
    pub print_calls: u32,
    /// Every nested tool call attempted, in dispatch order.
    pub records: Vec<NestedCallRecord>,
}

impl ToolBindings {
    /// Bindings for one exec. `ctx.call_id` is the owning execution id.
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        handle: Handle,
        ctx: ToolContext,
        policy: ImportPolicy,
        ceiling: u32,
        default_parallel_workers: usize,
        hooks: ExecHooks,
    ) -> Self {
        Self {
            dispatch: SharedDispatch {
                registry,
                handle,
                base_ctx: ctx,
                ceiling,
                counter: Arc::new(AtomicU32::new(0)),
                hooks,
            },
            policy,
            default_parallel_workers: default_parallel_workers.max(1),
            stdout: String::new(),
            print_calls: 0,
            records: Vec::new(),
        }
    }

    /// Counter value after the exec: nested calls attempted.
    #[must_use]
    pub fn calls_attempted(&self) -> u32 {
        self.dispatch.counter.load(Ordering::SeqCst)
    }
}

impl HostEnv for ToolBindings {
    fn print_line(&mut self, text: &str) {
        self.stdout.push_str(text);
        self.stdout.push('\n');
        self.print_calls += 1;
    }

    fn is_tool(&self, name: &str) -> bool {
        self.dispatch.registry.spec(name).is_some()
    }

    fn call_tool(
        &mut self,
        name: &str,
        positional: Option<JsonValue>,
        kwargs: serde_json::Map<String, JsonValue>,
    ) -> Result<Value, ScriptError> {
        let (record, value) = self.dispatch.dispatch(name, positional, kwargs);
        self.records.push(record);
        Ok(value)
    }

    fn parallel_map(
        &mut self,
        tool_name: &str,
        payloads: Vec<JsonValue>,
        max_workers: Option<usize>,
    ) -> Result<Value, ScriptError> {
        let total = payloads.len();
        if total == 0 {
            return Ok(Value::List(Vec::new()));
        }
        let workers = max_workers
            .unwrap_or(self.default_parallel_workers)
            .clamp(1, MAX_PARALLEL_WORKERS)
            .min(total);

        // Pre-assigned slots keep results positionally aligned with the
        // payload list no matter which worker finishes first.
        let slots: Vec<Mutex<Option<(NestedCallRecord, Value)>>> =
            (0..total).map(|_| Mutex::new(None)).collect();
        let next = AtomicUsize::new(0);
        let dispatch = &self.dispatch;

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let _ = scope.spawn(|| {
                    loop {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        if index >= total {
                            break;
                        }
                        let result = dispatch.dispatch(
                            tool_name,
                            Some(payloads[index].clone()),
                            serde_json::Map::new(),
                        );
                        *slots[index].lock() = Some(result);
                    }
                });
            }
        });

        let mut values = Vec::with_capacity(total);
        for slot in slots {
            match slot.into_inner() {
                Some((record, value)) => {
                    self.records.push(record);
                    values.push(value);
                }
                // A panicked worker leaves its slot empty; keep alignment.
                None => values.push(Value::Null),
            }
        }
        Ok(Value::List(values))
    }

    fn import_module(&mut self, module: &str) -> Result<Value, ScriptError> {
        if let Err(refusal) = self.policy.check(module) {
            return Err(ScriptError::import_error(refusal.to_string()));
        }
        match module.split('.').next().unwrap_or(module) {
            "math" => Ok(Value::Module("math")),
            "json" => Ok(Value::Module("json")),
            _ => Err(ScriptError::import_error(format!(
                "module '{module}' is permitted but not provided by this runtime"
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use delver_tools::{SchemaBuilder, Tool};
    use parking_lot::Mutex as PlMutex;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the query back"
        }
        fn input_schema(&self) -> JsonValue {
            SchemaBuilder::object()
                .required_string("query", "Text to echo")
                .integer("limit", "Unused")
                .build()
        }
        async fn run(
            &self,
            payload: serde_json::Map<String, JsonValue>,
            _ctx: &ToolContext,
        ) -> Result<JsonValue, ToolError> {
            Ok(json!({"echo": payload["query"]}))
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        Arc::new(ToolRegistry::new(vec![Arc::new(Echo)]))
    }

    fn ctx() -> ToolContext {
        ToolContext {
            conversation_id: "c1".into(),
            run_id: "r1".into(),
            request_index: 1,
            user_msg_index: 1,
            call_id: "exec_test".into(),
        }
    }

    fn bindings(ceiling: u32, hooks: ExecHooks) -> ToolBindings {
        ToolBindings::new(
            registry(),
            Handle::current(),
            ctx(),
            ImportPolicy::default(),
            ceiling,
            4,
            hooks,
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn successful_call_returns_the_envelope() {
        let result = tokio::task::spawn_blocking(|| {
            let mut b = bindings(200, ExecHooks::noop());
            b.call_tool("echo", Some(json!("hi")), serde_json::Map::new())
        })
        .await
        .unwrap()
        .unwrap();
        let Value::Map(envelope) = result else {
            panic!("expected envelope map");
        };
        assert_eq!(envelope["status"], Value::Str("success".into()));
        let Value::Map(output) = &envelope["output"] else {
            panic!("expected output map");
        };
        assert_eq!(output["echo"], Value::Str("hi".into()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ceiling_fails_the_crossing_call_only() {
        let (records, third) = tokio::task::spawn_blocking(|| {
            let mut b = bindings(2, ExecHooks::noop());
            let _ = b.call_tool("echo", Some(json!("one")), serde_json::Map::new());
            let _ = b.call_tool("echo", Some(json!("two")), serde_json::Map::new());
            let third = b
                .call_tool("echo", Some(json!("three")), serde_json::Map::new())
                .unwrap();
            (b.records, third)
        })
        .await
        .unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].status, ToolStatus::Success);
        assert_eq!(records[1].status, ToolStatus::Success);
        assert_eq!(records[2].status, ToolStatus::Error);
        assert!(records[2].summary.contains("NESTED_CALL_LIMIT_EXCEEDED"));
        assert!(records[2].summary.contains("at call 3"));

        let Value::Map(envelope) = third else {
            panic!("expected envelope map");
        };
        assert_eq!(envelope["status"], Value::Str("error".into()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn nested_call_ids_are_sequential_and_derived() {
        let records = tokio::task::spawn_blocking(|| {
            let mut b = bindings(200, ExecHooks::noop());
            let _ = b.call_tool("echo", Some(json!("a")), serde_json::Map::new());
            let _ = b.call_tool("echo", Some(json!("b")), serde_json::Map::new());
            b.records
        })
        .await
        .unwrap();
        assert_eq!(records[0].call_id, "exec_test:nested:0001");
        assert_eq!(records[1].call_id, "exec_test:nested:0002");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn coercion_failure_returns_an_error_envelope() {
        let result = tokio::task::spawn_blocking(|| {
            let mut b = bindings(200, ExecHooks::noop());
            // A bare number cannot be coerced onto the schema.
            b.call_tool("echo", Some(json!(42)), serde_json::Map::new())
        })
        .await
        .unwrap()
        .unwrap();
        let Value::Map(envelope) = result else {
            panic!("expected envelope map");
        };
        assert_eq!(envelope["status"], Value::Str("error".into()));
        let Value::Map(error) = &envelope["error"] else {
            panic!("expected error map");
        };
        assert_eq!(error["code"], Value::Str("VALIDATION_ERROR".into()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn hooks_fire_for_start_and_result() {
        let starts: Arc<PlMutex<Vec<String>>> = Arc::new(PlMutex::new(Vec::new()));
        let results: Arc<PlMutex<Vec<(String, bool)>>> = Arc::new(PlMutex::new(Vec::new()));
        let hooks = {
            let starts = Arc::clone(&starts);
            let results = Arc::clone(&results);
            ExecHooks {
                on_nested_start: Some(Arc::new(move |call_id, _tool, _payload| {
                    starts.lock().push(call_id.to_string());
                })),
                on_nested_result: Some(Arc::new(move |call_id, _tool, outcome, _ms| {
                    results.lock().push((call_id.to_string(), outcome.is_error()));
                })),
            }
        };
        let _ = tokio::task::spawn_blocking(move || {
            let mut b = bindings(200, hooks);
            b.call_tool("echo", Some(json!("x")), serde_json::Map::new())
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(starts.lock().as_slice(), ["exec_test:nested:0001"]);
        assert_eq!(
            results.lock().as_slice(),
            [("exec_test:nested:0001".to_string(), false)]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn parallel_map_results_align_with_payload_order() {
        let (values, records_len) = tokio::task::spawn_blocking(|| {
            let mut b = bindings(200, ExecHooks::noop());
            let payloads = vec![json!("alpha"), json!("beta"), json!("gamma"), json!("delta")];
            let result = b.parallel_map("echo", payloads, Some(3)).unwrap();
            (result, b.records.len())
        })
        .await
        .unwrap();

        let Value::List(items) = values else {
            panic!("expected list");
        };
        assert_eq!(items.len(), 4);
        for (item, expected) in items.iter().zip(["alpha", "beta", "gamma", "delta"]) {
            let Value::Map(envelope) = item else {
                panic!("expected envelope map");
            };
            let Value::Map(output) = &envelope["output"] else {
                panic!("expected output map");
            };
            assert_eq!(output["echo"], Value::Str(expected.into()));
        }
        assert_eq!(records_len, 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn parallel_map_shares_the_nested_counter() {
        let records = tokio::task::spawn_blocking(|| {
            let mut b = bindings(3, ExecHooks::noop());
            let _ = b.call_tool("echo", Some(json!("first")), serde_json::Map::new());
            let _ = b
                .parallel_map("echo", vec![json!("a"), json!("b"), json!("c")], Some(2))
                .unwrap();
            b.records
        })
        .await
        .unwrap();

        assert_eq!(records.len(), 4);
        let failures = records
            .iter()
            .filter(|r| r.status == ToolStatus::Error)
            .count();
        // Ceiling 3 with 4 attempts: exactly one crosses it.
        assert_eq!(failures, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn import_routes_through_the_policy() {
        let (native, refused) = tokio::task::spawn_blocking(|| {
            let mut b = ToolBindings::new(
                registry(),
                Handle::current(),
                ctx(),
                ImportPolicy::new(crate::policy::ImportPolicyMode::Minimal),
                200,
                4,
                ExecHooks::noop(),
            );
            (b.import_module("math"), b.import_module("subprocess"))
        })
        .await
        .unwrap();

        assert_eq!(native.unwrap(), Value::Module("math"));
        let err = refused.unwrap_err();
        assert_eq!(err.kind, "ImportError");
        assert!(err.message.contains("POLICY_VIOLATION"));
        assert!(err.message.contains("'subprocess'"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_tool_is_an_unsupported_tool_envelope() {
        let result = tokio::task::spawn_blocking(|| {
            let mut b = bindings(200, ExecHooks::noop());
            b.call_tool("ghost", None, serde_json::Map::new())
        })
        .await
        .unwrap()
        .unwrap();
        let Value::Map(envelope) = result else {
            panic!("expected envelope map");
        };
        let Value::Map(error) = &envelope["error"] else {
            panic!("expected error map");
        };
        assert_eq!(error["code"], Value::Str("UNSUPPORTED_TOOL".into()));
    }
}
