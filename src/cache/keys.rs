//! Cache key definitions.
//!
//! A `CacheKey` identifies one logical request: the operation name plus a
//! digest of its canonicalized variables. Two requests share a key iff their
//! operation names match and their variables are equal as JSON values,
//! regardless of object member order.

use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::error::CacheError;

/// Separator between the operation name and the variables digest.
const KEY_SEPARATOR: char = ':';

/// Canonical identifier for a cached request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Operation name the key was generated from.
    ///
    /// Keys built from arbitrary strings without a separator are treated as
    /// their own operation.
    pub fn operation(&self) -> &str {
        self.0
            .split_once(KEY_SEPARATOR)
            .map_or(self.0.as_str(), |(operation, _)| operation)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Generate the canonical key for an operation and its variables.
///
/// `None`, `Some(Value::Null)` and an empty object all produce the same key.
pub fn generate_key(operation: &str, variables: Option<&Value>) -> Result<CacheKey, CacheError> {
    validate_operation(operation)?;

    let canonical = match variables {
        None | Some(Value::Null) => String::from("{}"),
        Some(object @ Value::Object(_)) => canonical_json(object),
        Some(other) => {
            return Err(CacheError::invalid_key(format!(
                "variables for `{operation}` must be a JSON object, got {}",
                json_kind(other)
            )));
        }
    };

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hex::encode(hasher.finalize());

    Ok(CacheKey(format!("{operation}{KEY_SEPARATOR}{digest}")))
}

fn validate_operation(operation: &str) -> Result<(), CacheError> {
    if operation.is_empty() {
        return Err(CacheError::invalid_key("operation name must not be empty"));
    }
    if operation
        .chars()
        .any(|c| c == KEY_SEPARATOR || c.is_whitespace())
    {
        return Err(CacheError::invalid_key(format!(
            "operation name `{operation}` must not contain `{KEY_SEPARATOR}` or whitespace"
        )));
    }
    Ok(())
}

/// Serialize a JSON value with object members sorted by name at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut members: Vec<(&String, &Value)> = map.iter().collect();
            members.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (index, (name, member)) in members.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(name.clone()).to_string());
                out.push(':');
                write_canonical(member, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
