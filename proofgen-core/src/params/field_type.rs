//! Structural types for resolvable parameters.
//!
//! A [`FieldType`] is checked before any declared validation rule runs, so
//! predicates can assume the value already has the right JSON shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Expected JSON shape of a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldType {
    /// String value
    String,
    /// Integer value (signed or unsigned)
    Integer,
    /// Any number
    Float,
    /// Boolean value
    Boolean,
    /// List of items of a specific type
    List(Box<FieldType>),
    /// Nested object, resolved by its own schema
    Object,
}

impl FieldType {
    /// Create a list type.
    pub fn list(inner: FieldType) -> Self {
        Self::List(Box::new(inner))
    }

    /// Human-readable type name (e.g., "string", "list[string]").
    pub fn to_hint(&self) -> String {
        match self {
            Self::String => "string".to_string(),
            Self::Integer => "integer".to_string(),
            Self::Float => "number".to_string(),
            Self::Boolean => "boolean".to_string(),
            Self::List(inner) => format!("list[{}]", inner.to_hint()),
            Self::Object => "object".to_string(),
        }
    }

    /// Check if this type is compatible with a JSON value.
    pub fn is_compatible(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::String, Value::String(_)) => true,
            (Self::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (Self::Float, Value::Number(_)) => true,
            (Self::Boolean, Value::Bool(_)) => true,
            (Self::List(inner), Value::Array(items)) => {
                items.iter().all(|item| inner.is_compatible(item))
            }
            (Self::Object, Value::Object(_)) => true,
            _ => false,
        }
    }

    /// Invalid-cause text for a value of the wrong shape, or `None` if the
    /// value matches.
    pub fn mismatch_cause(&self, value: &Value) -> Option<String> {
        if self.is_compatible(value) {
            return None;
        }
        Some(format!(
            "should be of type {}, but got {} (value: {})",
            self.to_hint(),
            value_type_name(value),
            truncate_preview(&value.to_string(), 100)
        ))
    }
}

/// Get a human-readable type name for a JSON value.
pub fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn truncate_preview(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integer_accepts_negative_values() {
        assert!(FieldType::Integer.is_compatible(&json!(-1)));
        assert!(FieldType::Integer.is_compatible(&json!(42)));
        assert!(!FieldType::Integer.is_compatible(&json!(1.5)));
        assert!(!FieldType::Integer.is_compatible(&json!("1")));
    }

    #[test]
    fn test_list_checks_every_item() {
        let tactics = FieldType::list(FieldType::String);
        assert!(tactics.is_compatible(&json!(["auto.", "intros."])));
        assert!(!tactics.is_compatible(&json!(["auto.", 3])));
        assert_eq!(tactics.to_hint(), "list[string]");
    }

    #[test]
    fn test_mismatch_cause() {
        assert!(FieldType::Boolean.mismatch_cause(&json!(true)).is_none());

        let cause = FieldType::Float.mismatch_cause(&json!("hot")).unwrap();
        assert!(cause.contains("should be of type number"));
        assert!(cause.contains("but got string"));
    }

    #[test]
    fn test_truncate_preview() {
        let long = "x".repeat(150);
        let cause = FieldType::Integer.mismatch_cause(&json!(long)).unwrap();
        assert!(cause.ends_with("...)"));
    }
}
