//! Type inference and value conversion for schema-less snapshot records.
//!
//! Snapshot values arrive as [`serde_json::Value`]. Each value gets a [`LogicalType`] from
//! [`infer_type`], is turned into a destination [`Cell`] by [`convert_value`], and every logical
//! type maps to a fixed destination [`ColumnType`].

mod cell;
mod column;
mod logical;

pub use cell::*;
pub use column::*;
pub use logical::*;
