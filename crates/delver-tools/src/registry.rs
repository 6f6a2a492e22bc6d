//! The tool registry and dispatch pipeline.
//!
//! Dispatch never raises for an ordinary tool failure — a failing tool
//! produces a [`ToolOutcome`] with `status: error` that flows back into
//! model-visible history like any other result. A Rust `Err` escapes only
//! for programmer-level misuse (dispatching a tool that is not in the
//! registry).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use delver_core::{ToolError, ToolOutcome};

use crate::context::ToolContext;

/// Where a tool definition came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOrigin {
    /// Compiled into the agent.
    #[default]
    Builtin,
    /// Synthesized by the runtime (sandbox exec, shell, delegation).
    Synthetic,
    /// Registered by an external catalog.
    External,
}

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &str;

    /// Model-facing description.
    fn description(&self) -> &str;

    /// Declared input shape (JSON schema object).
    fn input_schema(&self) -> Value;

    /// Tool origin.
    fn origin(&self) -> ToolOrigin {
        ToolOrigin::Builtin
    }

    /// Run the tool against a validated payload.
    ///
    /// `Err` here means the tool failed; the registry converts it into an
    /// error envelope, it never propagates.
    async fn run(
        &self,
        payload: serde_json::Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError>;
}

/// Introspection snapshot of one registered tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    /// Tool name.
    pub name: String,
    /// Model-facing description.
    pub description: String,
    /// Declared input shape.
    pub input_schema: Value,
    /// Tool origin.
    pub origin: ToolOrigin,
}

/// Programmer-level registry misuse.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Dispatch to a name not present in the registry.
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    /// A scoping request named tools that do not exist.
    #[error("unknown allowed_tools entries: {0:?}")]
    UnknownEntries(Vec<String>),
}

/// Catalog of callable tools.
///
/// Cheap to clone; tool handlers are shared `Arc`s and expected to be
/// stateless, so the registry is safely reentrant from parallel callers.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    by_name: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

impl ToolRegistry {
    /// Build a registry from tool handlers. Later duplicates replace
    /// earlier ones; blank names are dropped.
    #[must_use]
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        let mut registry = Self::default();
        for tool in tools {
            let name = tool.name().trim().to_string();
            if name.is_empty() {
                continue;
            }
            if registry.by_name.insert(name.clone(), tool).is_none() {
                registry.order.push(name);
            }
        }
        registry
    }

    /// Registered tool names, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Introspection spec for one tool.
    #[must_use]
    pub fn spec(&self, name: &str) -> Option<ToolSpec> {
        self.by_name.get(name).map(|tool| ToolSpec {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            input_schema: tool.input_schema(),
            origin: tool.origin(),
        })
    }

    /// Specs for every registered tool, in registration order.
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.order.iter().filter_map(|name| self.spec(name)).collect()
    }

    /// Provider-facing schema objects.
    #[must_use]
    pub fn schemas(&self) -> Vec<Value> {
        self.specs()
            .into_iter()
            .map(|spec| {
                serde_json::json!({
                    "name": spec.name,
                    "description": spec.description,
                    "input_schema": spec.input_schema,
                })
            })
            .collect()
    }

    /// Scope the registry down to `names`, preserving order and dropping
    /// duplicates/blanks. Entries that do not exist are rejected.
    pub fn subset(&self, names: &[String]) -> Result<Self, RegistryError> {
        let mut selected: Vec<Arc<dyn Tool>> = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        let mut missing: Vec<String> = Vec::new();
        for raw in names {
            let name = raw.trim();
            if name.is_empty() || seen.iter().any(|s| s == name) {
                continue;
            }
            match self.by_name.get(name) {
                Some(tool) => {
                    seen.push(name.to_string());
                    selected.push(Arc::clone(tool));
                }
                None => missing.push(name.to_string()),
            }
        }
        if !missing.is_empty() {
            missing.sort_unstable();
            return Err(RegistryError::UnknownEntries(missing));
        }
        Ok(Self::new(selected))
    }

    /// Execute one tool call, normalizing the result into the envelope.
    ///
    /// Payloads must be JSON objects; anything else is a validation error
    /// in the envelope. Missing required fields (per the declared schema)
    /// are also validation errors, so handlers can assume them present.
    pub async fn execute(
        &self,
        name: &str,
        payload: Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutcome, RegistryError> {
        let Some(tool) = self.by_name.get(name) else {
            return Err(RegistryError::UnknownTool(name.to_string()));
        };

        let started = Instant::now();
        let outcome = match validate_payload(&tool.input_schema(), payload) {
            Ok(map) => match tool.run(map, ctx).await {
                Ok(output) => ToolOutcome::success(output),
                Err(error) => ToolOutcome::failure(error),
            },
            Err(error) => ToolOutcome::failure(error),
        };

        let elapsed = started.elapsed();
        counter!("delver_tool_executions_total", "tool" => name.to_string()).increment(1);
        histogram!("delver_tool_duration_seconds", "tool" => name.to_string())
            .record(elapsed.as_secs_f64());
        if outcome.is_error() {
            counter!("delver_tool_errors_total", "tool" => name.to_string()).increment(1);
            tracing::warn!(
                tool = name,
                call_id = %ctx.call_id,
                duration_ms = elapsed.as_millis() as u64,
                summary = %outcome.summary(),
                "tool execution failed"
            );
        } else {
            tracing::debug!(
                tool = name,
                call_id = %ctx.call_id,
                duration_ms = elapsed.as_millis() as u64,
                "tool execution completed"
            );
        }
        Ok(outcome)
    }
}

/// Check a payload is an object and carries every schema-required field.
fn validate_payload(
    schema: &Value,
    payload: Value,
) -> Result<serde_json::Map<String, Value>, ToolError> {
    let Value::Object(map) = payload else {
        return Err(ToolError::validation(format!(
            "payload must be a JSON object, got {}",
            type_name(&payload)
        )));
    };
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        let missing: Vec<&str> = required
            .iter()
            .filter_map(Value::as_str)
            .filter(|field| !map.contains_key(*field))
            .collect();
        if !missing.is_empty() {
            return Err(ToolError::validation(format!(
                "missing required fields: {missing:?}"
            ))
            .with_details(serde_json::json!({"missing": missing})));
        }
    }
    Ok(map)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaBuilder;
    use assert_matches::assert_matches;
    use delver_core::ToolErrorCode;
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
        fn input_schema(&self) -> Value {
            SchemaBuilder::object()
                .required_string("query", "Text to echo")
                .integer("limit", "Unused")
                .build()
        }
        async fn run(
            &self,
            payload: serde_json::Map<String, Value>,
            _ctx: &ToolContext,
        ) -> Result<Value, ToolError> {
            Ok(json!({"summary": "echoed", "echo": payload["query"]}))
        }
    }

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn input_schema(&self) -> Value {
            SchemaBuilder::object().build()
        }
        async fn run(
            &self,
            _payload: serde_json::Map<String, Value>,
            _ctx: &ToolContext,
        ) -> Result<Value, ToolError> {
            Err(ToolError::new(ToolErrorCode::UpstreamError, "backend unavailable"))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            conversation_id: "c1".into(),
            run_id: "r1".into(),
            request_index: 1,
            user_msg_index: 1,
            call_id: "call_1".into(),
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new(vec![Arc::new(Echo), Arc::new(Failing)])
    }

    #[tokio::test]
    async fn executes_registered_tool() {
        let outcome = registry()
            .execute("echo", json!({"query": "hi"}), &ctx())
            .await
            .unwrap();
        assert!(!outcome.is_error());
        assert_eq!(outcome.output.unwrap()["echo"], "hi");
    }

    #[tokio::test]
    async fn unknown_tool_is_a_registry_error() {
        let err = registry().execute("nope", json!({}), &ctx()).await.unwrap_err();
        assert_matches!(err, RegistryError::UnknownTool(name) if name == "nope");
    }

    #[tokio::test]
    async fn tool_failure_is_returned_not_raised() {
        let outcome = registry().execute("failing", json!({}), &ctx()).await.unwrap();
        assert!(outcome.is_error());
        let error = outcome.error.unwrap();
        assert_eq!(error.code, ToolErrorCode::UpstreamError);
        assert!(error.retryable);
    }

    #[tokio::test]
    async fn non_object_payload_fails_validation() {
        let outcome = registry()
            .execute("echo", json!("just a string"), &ctx())
            .await
            .unwrap();
        let error = outcome.error.unwrap();
        assert_eq!(error.code, ToolErrorCode::ValidationError);
        assert!(error.message.contains("string"));
    }

    #[tokio::test]
    async fn missing_required_field_fails_validation() {
        let outcome = registry()
            .execute("echo", json!({"limit": 5}), &ctx())
            .await
            .unwrap();
        let error = outcome.error.unwrap();
        assert_eq!(error.code, ToolErrorCode::ValidationError);
        assert_eq!(error.details["missing"][0], "query");
    }

    #[test]
    fn subset_preserves_order_and_rejects_unknown() {
        let reg = registry();
        let scoped = reg.subset(&["failing".into(), "echo".into()]).unwrap();
        assert_eq!(scoped.names(), vec!["failing", "echo"]);

        let err = reg
            .subset(&["echo".into(), "ghost".into(), "phantom".into()])
            .unwrap_err();
        assert_matches!(
            err,
            RegistryError::UnknownEntries(names) if names == vec!["ghost".to_string(), "phantom".to_string()]
        );
    }

    #[test]
    fn subset_drops_blanks_and_duplicates() {
        let reg = registry();
        let scoped = reg
            .subset(&["echo".into(), " ".into(), "echo".into()])
            .unwrap();
        assert_eq!(scoped.names(), vec!["echo"]);
    }

    #[test]
    fn schemas_expose_name_description_and_shape() {
        let schemas = registry().schemas();
        assert_eq!(schemas.len(), 2);
        assert_eq!(schemas[0]["name"], "echo");
        assert_eq!(schemas[0]["input_schema"]["type"], "object");
    }

    #[test]
    fn blank_tool_names_are_dropped_at_registration() {
        struct Blank;
        #[async_trait]
        impl Tool for Blank {
            fn name(&self) -> &str {
                "  "
            }
            fn description(&self) -> &str {
                ""
            }
            fn input_schema(&self) -> Value {
                json!({})
            }
            async fn run(
                &self,
                _payload: serde_json::Map<String, Value>,
                _ctx: &ToolContext,
            ) -> Result<Value, ToolError> {
                Ok(json!({}))
            }
        }
        let reg = ToolRegistry::new(vec![Arc::new(Blank), Arc::new(Echo)]);
        assert_eq!(reg.names(), vec!["echo"]);
    }
}
