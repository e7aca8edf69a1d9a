use serde_json::Value;

use crate::bail;
use crate::conversions::LogicalType;
use crate::error::{ErrorKind, SyncResult};

/// A destination-safe value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    F64(f64),
    String(String),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Renders the cell for a text column, `None` for null.
    ///
    /// Numbers use the shortest representation that parses back to the same value.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Bool(value) => Some(value.to_string()),
            Cell::F64(value) => Some(value.to_string()),
            Cell::String(value) => Some(value.clone()),
        }
    }
}

/// Converts `value` into a [`Cell`] according to `logical_type`.
///
/// Null values convert to [`Cell::Null`] for every type. Arrays and objects become their
/// canonical JSON text.
pub fn convert_value(value: &Value, logical_type: LogicalType) -> SyncResult<Cell> {
    if value.is_null() {
        return Ok(Cell::Null);
    }

    let cell = match logical_type {
        LogicalType::String | LogicalType::Identifier => match value {
            Value::String(s) => Cell::String(s.clone()),
            other => Cell::String(other.to_string()),
        },
        LogicalType::Number => Cell::F64(to_f64(value)?),
        LogicalType::Boolean => Cell::Bool(to_bool(value)?),
        LogicalType::Array | LogicalType::Object => Cell::String(serde_json::to_string(value)?),
        LogicalType::Null => Cell::Null,
    };

    Ok(cell)
}

/// Converts `value` using a textual type tag such as `"number"` or `"id"`.
pub fn convert_value_tagged(value: &Value, tag: &str) -> SyncResult<Cell> {
    convert_value(value, tag.parse()?)
}

fn to_f64(value: &Value) -> SyncResult<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match number {
        Some(number) => Ok(number),
        None => bail!(
            ErrorKind::ConversionError,
            "Value is not a number",
            value
        ),
    }
}

fn to_bool(value: &Value) -> SyncResult<bool> {
    let flag = match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    };

    match flag {
        Some(flag) => Ok(flag),
        None => bail!(
            ErrorKind::ConversionError,
            "Value is not a boolean",
            value
        ),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::conversions::infer_type;

    #[test]
    fn converts_scalars() {
        assert_eq!(
            convert_value(&json!("hello"), LogicalType::String).unwrap(),
            Cell::String("hello".to_owned())
        );
        assert_eq!(
            convert_value(&json!(42), LogicalType::Number).unwrap(),
            Cell::F64(42.0)
        );
        assert_eq!(
            convert_value(&json!(false), LogicalType::Boolean).unwrap(),
            Cell::Bool(false)
        );
        assert_eq!(
            convert_value(&json!("abc123def456"), LogicalType::Identifier).unwrap(),
            Cell::String("abc123def456".to_owned())
        );
    }

    #[test]
    fn null_converts_to_null_for_every_type() {
        for logical_type in LogicalType::ALL {
            assert_eq!(
                convert_value(&Value::Null, logical_type).unwrap(),
                Cell::Null
            );
        }
    }

    #[test]
    fn containers_round_trip_through_json_text() {
        let values = [
            json!([1, "two", null, {"three": 3}]),
            json!({"tags": ["a", "b"], "nested": {"ok": true}}),
            json!([]),
        ];

        for value in values {
            let Cell::String(text) = convert_value(&value, infer_type(&value)).unwrap() else {
                panic!("container did not convert to text");
            };
            assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), value);
        }
    }

    #[test]
    fn numeric_strings_convert_to_numbers() {
        assert_eq!(
            convert_value(&json!(" 2.5 "), LogicalType::Number).unwrap(),
            Cell::F64(2.5)
        );
        let err = convert_value(&json!("two"), LogicalType::Number).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);
    }

    #[test]
    fn inferred_conversion_never_fails() {
        let values = [
            Value::Null,
            json!(true),
            json!(-7),
            json!(1.5e300),
            json!("x"),
            json!("k57f2v9d8n3h1q0w"),
            json!([1]),
            json!({"a": null}),
        ];

        for value in values {
            assert!(convert_value(&value, infer_type(&value)).is_ok());
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = convert_value_tagged(&json!(1), "decimal").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedType);
        assert_eq!(
            convert_value_tagged(&json!(1), "number").unwrap(),
            Cell::F64(1.0)
        );
    }

    #[test]
    fn text_rendering() {
        assert_eq!(Cell::F64(42.0).to_text().as_deref(), Some("42"));
        assert_eq!(Cell::F64(0.1).to_text().as_deref(), Some("0.1"));
        assert_eq!(Cell::Bool(true).to_text().as_deref(), Some("true"));
        assert_eq!(Cell::Null.to_text(), None);
    }
}
