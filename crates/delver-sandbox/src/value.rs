//! Script values and runtime errors.
//!
//! The interpreter's value universe is deliberately small: JSON-shaped data
//! plus a module handle for `import`. Conversion to and from
//! `serde_json::Value` sits at the tool boundary — everything a wrapper
//! sends or receives crosses it.

use std::collections::BTreeMap;

use serde_json::Number;

/// A value held in a session namespace or produced by an expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// The `null` literal.
    Null,
    /// `true` / `false`.
    Bool(bool),
    /// 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Ordered list.
    List(Vec<Value>),
    /// String-keyed map.
    Map(BTreeMap<String, Value>),
    /// An imported native module (`math`, `json`).
    Module(&'static str),
}

impl Value {
    /// Type name as reported by the `type()` builtin and error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Module(_) => "module",
        }
    }

    /// Truthiness: empty containers, zero, empty strings and `null` are
    /// false.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Map(entries) => !entries.is_empty(),
            Self::Module(_) => true,
        }
    }

    /// Display form: strings render raw (what `print` and `str()` show).
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            other => other.repr(),
        }
    }

    /// Quoted form: strings render with quotes (used inside containers).
    #[must_use]
    pub fn repr(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Int(n) => n.to_string(),
            Self::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{f:.1}")
                } else {
                    f.to_string()
                }
            }
            Self::Str(s) => format!("{s:?}"),
            Self::List(items) => {
                let inner: Vec<String> = items.iter().map(Value::repr).collect();
                format!("[{}]", inner.join(", "))
            }
            Self::Map(entries) => {
                let inner: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{k:?}: {}", v.repr()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            Self::Module(name) => format!("<module {name}>"),
        }
    }

    /// Convert a JSON value into a script value.
    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert a script value into JSON for the tool boundary.
    ///
    /// Module handles and non-finite floats have no JSON form.
    pub fn to_json(&self) -> Result<serde_json::Value, ScriptError> {
        match self {
            Self::Null => Ok(serde_json::Value::Null),
            Self::Bool(b) => Ok(serde_json::Value::Bool(*b)),
            Self::Int(n) => Ok(serde_json::Value::Number((*n).into())),
            Self::Float(f) => Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| {
                    ScriptError::type_error("cannot serialize a non-finite float")
                }),
            Self::Str(s) => Ok(serde_json::Value::String(s.clone())),
            Self::List(items) => Ok(serde_json::Value::Array(
                items.iter().map(Value::to_json).collect::<Result<_, _>>()?,
            )),
            Self::Map(entries) => {
                let mut map = serde_json::Map::new();
                for (k, v) in entries {
                    let _ = map.insert(k.clone(), v.to_json()?);
                }
                Ok(serde_json::Value::Object(map))
            }
            Self::Module(name) => Err(ScriptError::type_error(format!(
                "module '{name}' cannot cross the tool boundary"
            ))),
        }
    }
}

/// A script-level runtime failure, formatted `Kind: message`.
///
/// These are caught and reported in the exec outcome's error field; they
/// never propagate as panics.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ScriptError {
    /// Error kind (`NameError`, `TypeError`, `ValueError`, `ImportError`,
    /// `SyntaxError`, `ToolError`).
    pub kind: &'static str,
    /// Human-readable description.
    pub message: String,
}

impl ScriptError {
    /// New error with an explicit kind.
    #[must_use]
    pub fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// An undefined name.
    #[must_use]
    pub fn name_error(name: &str) -> Self {
        Self::new("NameError", format!("name '{name}' is not defined"))
    }

    /// A type mismatch.
    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    /// A domain error (bad index, missing key, division by zero).
    #[must_use]
    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new("ValueError", message)
    }

    /// A refused or unavailable import.
    #[must_use]
    pub fn import_error(message: impl Into<String>) -> Self {
        Self::new("ImportError", message)
    }

    /// Malformed source.
    #[must_use]
    pub fn syntax_error(message: impl Into<String>) -> Self {
        Self::new("SyntaxError", message)
    }
}
