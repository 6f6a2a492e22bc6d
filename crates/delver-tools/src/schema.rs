//! Builder for tool JSON Schema definitions.
//!
//! Replaces the repetitive `Map::new()` + `insert()` boilerplate in every
//! tool's schema with a concise builder API.

use serde_json::{Value, json};

/// Fluent builder for JSON-schema `object` definitions.
///
/// ```ignore
/// SchemaBuilder::object()
///     .required_string("query", "Search query")
///     .integer("limit", "Maximum results")
///     .build()
/// ```
pub struct SchemaBuilder {
    properties: serde_json::Map<String, Value>,
    required: Vec<String>,
}

impl SchemaBuilder {
    /// Start an object schema.
    #[must_use]
    pub fn object() -> Self {
        Self {
            properties: serde_json::Map::new(),
            required: Vec::new(),
        }
    }

    /// Add an optional property with a raw schema.
    #[must_use]
    pub fn property(mut self, name: &str, schema: Value) -> Self {
        let _ = self.properties.insert(name.into(), schema);
        self
    }

    /// Add a required property with a raw schema.
    #[must_use]
    pub fn required_property(mut self, name: &str, schema: Value) -> Self {
        let _ = self.properties.insert(name.into(), schema);
        self.required.push(name.into());
        self
    }

    /// Add an optional string property.
    #[must_use]
    pub fn string(self, name: &str, description: &str) -> Self {
        self.property(name, json!({"type": "string", "description": description}))
    }

    /// Add a required string property.
    #[must_use]
    pub fn required_string(self, name: &str, description: &str) -> Self {
        self.required_property(name, json!({"type": "string", "description": description}))
    }

    /// Add an optional integer property.
    #[must_use]
    pub fn integer(self, name: &str, description: &str) -> Self {
        self.property(name, json!({"type": "integer", "description": description}))
    }

    /// Add an optional boolean property.
    #[must_use]
    pub fn boolean(self, name: &str, description: &str) -> Self {
        self.property(name, json!({"type": "boolean", "description": description}))
    }

    /// Add an optional array-of-strings property.
    #[must_use]
    pub fn string_array(self, name: &str, description: &str) -> Self {
        self.property(
            name,
            json!({"type": "array", "items": {"type": "string"}, "description": description}),
        )
    }

    /// Build the final schema object.
    #[must_use]
    pub fn build(self) -> Value {
        let mut schema = serde_json::Map::new();
        let _ = schema.insert("type".into(), json!("object"));
        let _ = schema.insert("properties".into(), Value::Object(self.properties));
        if !self.required.is_empty() {
            let _ = schema.insert("required".into(), json!(self.required));
        }
        Value::Object(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_schema() {
        let schema = SchemaBuilder::object().build();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"].as_object().unwrap().is_empty());
        assert!(schema.get("required").is_none());
    }

    #[test]
    fn required_property_in_both_properties_and_required() {
        let schema = SchemaBuilder::object()
            .required_string("query", "Search query")
            .build();
        assert_eq!(schema["properties"]["query"]["type"], "string");
        assert_eq!(schema["required"], json!(["query"]));
    }

    #[test]
    fn optional_property_not_in_required() {
        let schema = SchemaBuilder::object().integer("limit", "Max results").build();
        assert_eq!(schema["properties"]["limit"]["type"], "integer");
        assert!(schema.get("required").is_none());
    }

    #[test]
    fn mixed_properties_correct_separation() {
        let schema = SchemaBuilder::object()
            .required_string("command", "Shell command")
            .integer("timeout_secs", "Timeout")
            .string("cwd", "Working directory")
            .build();
        assert_eq!(schema["properties"].as_object().unwrap().len(), 3);
        assert_eq!(schema["required"], json!(["command"]));
    }

    #[test]
    fn string_array_shape() {
        let schema = SchemaBuilder::object().string_array("ids", "Record ids").build();
        assert_eq!(schema["properties"]["ids"]["type"], "array");
        assert_eq!(schema["properties"]["ids"]["items"]["type"], "string");
    }
}
