//! Schema-driven payload coercion.
//!
//! Sandboxed code calls tool wrappers loosely: a bare string where the
//! schema wants `{"query": ...}`, a list of ids, a dict plus keyword
//! overrides. Coercion is explicit and driven by the tool's declared
//! schema — it returns a typed payload or a descriptive validation error,
//! never guesses via reflection.

use serde_json::{Map, Value};

use delver_core::ToolError;

/// Declared fields a bare positional string may bind to, in priority order.
const QUERY_LIKE_FIELDS: &[&str] = &["query", "term", "command", "expression"];

/// Aliases normalized into canonical field names.
const ID_LIST_ALIASES: &[&str] = &["pmids", "nct_ids"];

fn schema_properties(schema: &Value) -> Option<&Map<String, Value>> {
    schema.get("properties").and_then(Value::as_object)
}

fn schema_required(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Coerce one positional argument into a payload object per the schema.
///
/// Rules: a dict passes through; a list maps to a declared `ids` field; a
/// string maps to the first declared query-like field, else the sole
/// required field, else the sole declared property; anything else is
/// rejected with an error naming the tool's declared fields.
pub fn coerce_positional(schema: &Value, arg: Value) -> Result<Map<String, Value>, ToolError> {
    let properties = schema_properties(schema);
    let declared: Vec<&str> = properties
        .map(|props| props.keys().map(String::as_str).collect())
        .unwrap_or_default();

    match arg {
        Value::Object(map) => Ok(map),
        Value::Array(items) => {
            if declared.contains(&"ids") {
                let mut map = Map::new();
                let _ = map.insert("ids".into(), Value::Array(items));
                Ok(map)
            } else {
                Err(ToolError::validation(
                    "a positional list requires the tool to declare an 'ids' field",
                )
                .with_details(serde_json::json!({"declared_fields": declared})))
            }
        }
        Value::String(text) => {
            let target = QUERY_LIKE_FIELDS
                .iter()
                .copied()
                .find(|field| declared.contains(field))
                .or_else(|| {
                    let required = schema_required(schema);
                    (required.len() == 1).then(|| required[0])
                })
                .or_else(|| (declared.len() == 1).then(|| declared[0]));
            match target {
                Some(field) => {
                    let mut map = Map::new();
                    let _ = map.insert(field.to_string(), Value::String(text));
                    Ok(map)
                }
                None => Err(ToolError::validation(
                    "cannot map a positional string onto this tool's schema",
                )
                .with_details(serde_json::json!({"declared_fields": declared}))),
            }
        }
        other => Err(ToolError::validation(format!(
            "unsupported positional argument of type {}",
            json_type(&other)
        ))
        .with_details(serde_json::json!({"declared_fields": declared}))),
    }
}

/// Normalize known aliases in place: `max_results` → `limit` (when `limit`
/// is declared and unset) and identifier-list aliases → `ids`.
pub fn normalize_aliases(map: &mut Map<String, Value>, schema: &Value) {
    let declared: Vec<String> = schema_properties(schema)
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default();

    if declared.iter().any(|d| d == "limit")
        && !map.contains_key("limit")
        && let Some(value) = map.remove("max_results")
    {
        let _ = map.insert("limit".into(), value);
    }
    if declared.iter().any(|d| d == "ids") && !map.contains_key("ids") {
        for alias in ID_LIST_ALIASES {
            if let Some(value) = map.remove(*alias) {
                let _ = map.insert("ids".into(), value);
                break;
            }
        }
    }
}

/// Merge keyword arguments over a base payload; kwargs win on conflicts.
pub fn merge_kwargs(base: &mut Map<String, Value>, kwargs: Map<String, Value>) {
    for (key, value) in kwargs {
        let _ = base.insert(key, value);
    }
}

/// Full wrapper-call pipeline: coerce the optional positional argument,
/// merge keyword arguments (kwargs winning), then normalize aliases.
pub fn normalize_payload(
    schema: &Value,
    positional: Option<Value>,
    kwargs: Map<String, Value>,
) -> Result<Map<String, Value>, ToolError> {
    let mut payload = match positional {
        Some(arg) => coerce_positional(schema, arg)?,
        None => Map::new(),
    };
    merge_kwargs(&mut payload, kwargs);
    normalize_aliases(&mut payload, schema);
    Ok(payload)
}

fn json_type(value: &Value) -> &'static str {
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
    use serde_json::json;

    fn search_schema() -> Value {
        SchemaBuilder::object()
            .required_string("query", "Search query")
            .integer("limit", "Max results")
            .string_array("ids", "Record ids")
            .build()
    }

    #[test]
    fn dict_passes_through() {
        let map = coerce_positional(&search_schema(), json!({"query": "x", "limit": 3})).unwrap();
        assert_eq!(map["query"], "x");
        assert_eq!(map["limit"], 3);
    }

    #[test]
    fn list_maps_to_ids() {
        let map = coerce_positional(&search_schema(), json!(["a", "b"])).unwrap();
        assert_eq!(map["ids"], json!(["a", "b"]));
    }

    #[test]
    fn list_without_ids_field_is_rejected() {
        let schema = SchemaBuilder::object().required_string("query", "q").build();
        let err = coerce_positional(&schema, json!([1])).unwrap_err();
        assert!(err.message.contains("'ids'"));
    }

    #[test]
    fn string_maps_to_query_like_field() {
        let map = coerce_positional(&search_schema(), json!("anticoagulants")).unwrap();
        assert_eq!(map["query"], "anticoagulants");
    }

    #[test]
    fn string_falls_back_to_sole_required_field() {
        let schema = SchemaBuilder::object()
            .required_string("pattern", "Regex")
            .integer("limit", "Max")
            .build();
        let map = coerce_positional(&schema, json!("foo.*bar")).unwrap();
        assert_eq!(map["pattern"], "foo.*bar");
    }

    #[test]
    fn string_falls_back_to_sole_declared_field() {
        let schema = SchemaBuilder::object().string("text", "Free text").build();
        let map = coerce_positional(&schema, json!("hello")).unwrap();
        assert_eq!(map["text"], "hello");
    }

    #[test]
    fn ambiguous_string_is_rejected_with_declared_fields() {
        let schema = SchemaBuilder::object()
            .string("alpha", "A")
            .string("beta", "B")
            .build();
        let err = coerce_positional(&schema, json!("x")).unwrap_err();
        assert_eq!(err.details["declared_fields"], json!(["alpha", "beta"]));
    }

    #[test]
    fn number_positional_is_rejected() {
        let err = coerce_positional(&search_schema(), json!(42)).unwrap_err();
        assert!(err.message.contains("number"));
    }

    #[test]
    fn max_results_alias_normalizes_to_limit() {
        let mut map = json!({"query": "x", "max_results": 10})
            .as_object()
            .unwrap()
            .clone();
        normalize_aliases(&mut map, &search_schema());
        assert_eq!(map["limit"], 10);
        assert!(!map.contains_key("max_results"));
    }

    #[test]
    fn explicit_limit_beats_alias() {
        let mut map = json!({"limit": 5, "max_results": 10})
            .as_object()
            .unwrap()
            .clone();
        normalize_aliases(&mut map, &search_schema());
        assert_eq!(map["limit"], 5);
        assert!(!map.contains_key("max_results"));
    }

    #[test]
    fn id_list_aliases_normalize_to_ids() {
        let mut map = json!({"pmids": ["1", "2"]}).as_object().unwrap().clone();
        normalize_aliases(&mut map, &search_schema());
        assert_eq!(map["ids"], json!(["1", "2"]));

        let mut map = json!({"nct_ids": ["NCT1"]}).as_object().unwrap().clone();
        normalize_aliases(&mut map, &search_schema());
        assert_eq!(map["ids"], json!(["NCT1"]));
    }

    #[test]
    fn kwargs_win_on_conflict() {
        let mut base = json!({"query": "old", "limit": 1}).as_object().unwrap().clone();
        let kwargs = json!({"query": "new"}).as_object().unwrap().clone();
        merge_kwargs(&mut base, kwargs);
        assert_eq!(base["query"], "new");
        assert_eq!(base["limit"], 1);
    }

    #[test]
    fn full_pipeline_dict_plus_kwargs() {
        let payload = normalize_payload(
            &search_schema(),
            Some(json!({"query": "a", "max_results": 7})),
            json!({"query": "b"}).as_object().unwrap().clone(),
        )
        .unwrap();
        assert_eq!(payload["query"], "b");
        assert_eq!(payload["limit"], 7);
    }

    #[test]
    fn full_pipeline_kwargs_only() {
        let payload = normalize_payload(
            &search_schema(),
            None,
            json!({"query": "q"}).as_object().unwrap().clone(),
        )
        .unwrap();
        assert_eq!(payload["query"], "q");
    }
}
