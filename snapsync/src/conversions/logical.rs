use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::bail;
use crate::error::{ErrorKind, SyncError};

/// Length of document identifiers issued by the source.
const IDENTIFIER_LEN: usize = 16;

/// Closed set of types a snapshot value can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    String,
    Number,
    Boolean,
    Null,
    Identifier,
    Array,
    Object,
}

impl LogicalType {
    pub const ALL: [LogicalType; 7] = [
        LogicalType::String,
        LogicalType::Number,
        LogicalType::Boolean,
        LogicalType::Null,
        LogicalType::Identifier,
        LogicalType::Array,
        LogicalType::Object,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalType::String => "string",
            LogicalType::Number => "number",
            LogicalType::Boolean => "boolean",
            LogicalType::Null => "null",
            LogicalType::Identifier => "id",
            LogicalType::Array => "array",
            LogicalType::Object => "object",
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogicalType {
    type Err = SyncError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let logical_type = match tag {
            "string" => LogicalType::String,
            "number" => LogicalType::Number,
            "boolean" => LogicalType::Boolean,
            "null" => LogicalType::Null,
            "id" | "identifier" => LogicalType::Identifier,
            "array" => LogicalType::Array,
            "object" => LogicalType::Object,
            other => bail!(
                ErrorKind::UnsupportedType,
                "Unsupported logical type",
                other
            ),
        };

        Ok(logical_type)
    }
}

/// Infers the logical type of a snapshot value.
///
/// Strings of exactly 16 ASCII alphanumeric characters are reported as
/// [`LogicalType::Identifier`]. This is a best-effort guess: ordinary text of that shape is
/// classified the same way.
pub fn infer_type(value: &Value) -> LogicalType {
    match value {
        Value::Null => LogicalType::Null,
        Value::Bool(_) => LogicalType::Boolean,
        Value::Number(_) => LogicalType::Number,
        Value::String(s) if looks_like_identifier(s) => LogicalType::Identifier,
        Value::String(_) => LogicalType::String,
        Value::Array(_) => LogicalType::Array,
        Value::Object(_) => LogicalType::Object,
    }
}

fn looks_like_identifier(s: &str) -> bool {
    s.len() == IDENTIFIER_LEN && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn infers_scalar_types() {
        assert_eq!(infer_type(&Value::Null), LogicalType::Null);
        assert_eq!(infer_type(&json!(true)), LogicalType::Boolean);
        assert_eq!(infer_type(&json!(42)), LogicalType::Number);
        assert_eq!(infer_type(&json!(3.14)), LogicalType::Number);
        assert_eq!(infer_type(&json!("hello")), LogicalType::String);
    }

    #[test]
    fn infers_containers() {
        assert_eq!(infer_type(&json!([1, 2, 3])), LogicalType::Array);
        assert_eq!(infer_type(&json!({"key": "value"})), LogicalType::Object);
    }

    #[test]
    fn sixteen_alphanumerics_are_identifiers() {
        assert_eq!(infer_type(&json!("abc123def4567890")), LogicalType::Identifier);
        assert_eq!(infer_type(&json!("abc123def456789")), LogicalType::String);
        assert_eq!(infer_type(&json!("abc123def456789-")), LogicalType::String);
        assert_eq!(infer_type(&json!("àbc123def4567890")), LogicalType::String);
    }

    #[test]
    fn parses_tags() {
        for logical_type in LogicalType::ALL {
            assert_eq!(
                logical_type.as_str().parse::<LogicalType>().unwrap(),
                logical_type
            );
        }
        assert_eq!(
            "identifier".parse::<LogicalType>().unwrap(),
            LogicalType::Identifier
        );
    }

    #[test]
    fn unknown_tag_is_unsupported() {
        let err = "datetime".parse::<LogicalType>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedType);
        assert_eq!(err.detail(), Some("datetime"));
    }
}
