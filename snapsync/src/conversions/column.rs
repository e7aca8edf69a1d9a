use serde_json::{Map, Value};

use crate::conversions::{LogicalType, infer_type};
use crate::error::SyncResult;

/// Destination column type derived from a [`LogicalType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Unbounded text.
    LargeText,
    /// Double precision floating point.
    Float,
    /// Boolean flag.
    Flag,
    /// Text bounded to the given number of characters.
    BoundedText(u16),
    /// Column whose values are always null; stored as text.
    NullableAny,
}

impl ColumnType {
    /// Postgres type name used in DDL.
    pub fn sql_type(&self) -> String {
        match self {
            ColumnType::LargeText | ColumnType::NullableAny => "text".to_owned(),
            ColumnType::Float => "double precision".to_owned(),
            ColumnType::Flag => "boolean".to_owned(),
            ColumnType::BoundedText(len) => format!("varchar({len})"),
        }
    }
}

/// Length reserved for identifier columns.
const IDENTIFIER_COLUMN_LEN: u16 = 50;

pub fn map_logical_to_destination_type(logical_type: LogicalType) -> ColumnType {
    match logical_type {
        LogicalType::String | LogicalType::Array | LogicalType::Object => ColumnType::LargeText,
        LogicalType::Number => ColumnType::Float,
        LogicalType::Boolean => ColumnType::Flag,
        LogicalType::Identifier => ColumnType::BoundedText(IDENTIFIER_COLUMN_LEN),
        LogicalType::Null => ColumnType::NullableAny,
    }
}

/// Maps a textual type tag, failing with `UnsupportedType` for unknown tags.
pub fn map_tag_to_destination_type(tag: &str) -> SyncResult<ColumnType> {
    Ok(map_logical_to_destination_type(tag.parse()?))
}

/// A column inferred from a sample record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferredColumn {
    pub name: String,
    pub logical_type: LogicalType,
    pub column_type: ColumnType,
}

/// Infers one column per key of `sample`, keeping key order.
pub fn infer_columns(sample: &Map<String, Value>) -> Vec<InferredColumn> {
    sample
        .iter()
        .map(|(name, value)| {
            let logical_type = infer_type(value);
            InferredColumn {
                name: name.clone(),
                logical_type,
                column_type: map_logical_to_destination_type(logical_type),
            }
        })
        .collect()
}
