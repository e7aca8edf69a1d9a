//! Point-in-time snapshots of the document source.
//!
//! A [`SnapshotSource`] writes an export archive to a temporary location, the archive is
//! unpacked into ordered [`TableRecordSet`]s and the temporary storage is removed before
//! [`SnapshotExtractor::fetch`] returns.

mod archive;
mod cli;
mod extractor;
mod source;

pub use archive::*;
pub use cli::*;
pub use extractor::*;
pub use source::*;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::SyncError;

/// One document of a table, keys in source order.
pub type Record = Map<String, Value>;

/// Records of one table, in archive order.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRecordSet {
    pub name: String,
    pub records: Vec<Record>,
}

impl TableRecordSet {
    pub fn new(name: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            name: name.into(),
            records,
        }
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A table whose archive entry could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedTable {
    pub name: String,
    pub error: SyncError,
}

/// A table entry of a snapshot, kept at its archive position whether it decoded or not.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotTable {
    Decoded(TableRecordSet),
    Malformed(MalformedTable),
}

impl SnapshotTable {
    pub fn name(&self) -> &str {
        match self {
            SnapshotTable::Decoded(table) => &table.name,
            SnapshotTable::Malformed(table) => &table.name,
        }
    }

    pub fn as_decoded(&self) -> Option<&TableRecordSet> {
        match self {
            SnapshotTable::Decoded(table) => Some(table),
            SnapshotTable::Malformed(_) => None,
        }
    }

    pub fn as_malformed(&self) -> Option<&MalformedTable> {
        match self {
            SnapshotTable::Decoded(_) => None,
            SnapshotTable::Malformed(table) => Some(table),
        }
    }
}

/// Metadata reported by the source about an export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotInfo {
    /// Snapshot time in nanoseconds since the Unix epoch.
    pub timestamp_ns: Option<u64>,
    pub dashboard_url: Option<String>,
}

impl SnapshotInfo {
    pub fn taken_at(&self) -> Option<DateTime<Utc>> {
        let timestamp_ns = i64::try_from(self.timestamp_ns?).ok()?;
        Some(DateTime::from_timestamp_nanos(timestamp_ns))
    }
}

/// A fully unpacked snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub info: SnapshotInfo,
    /// Table entries in archive order.
    pub tables: Vec<SnapshotTable>,
}

impl Snapshot {
    pub fn table(&self, name: &str) -> Option<&TableRecordSet> {
        self.decoded().find(|table| table.name == name)
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(SnapshotTable::name).collect()
    }

    pub fn decoded(&self) -> impl Iterator<Item = &TableRecordSet> {
        self.tables.iter().filter_map(SnapshotTable::as_decoded)
    }

    pub fn malformed(&self) -> impl Iterator<Item = &MalformedTable> {
        self.tables.iter().filter_map(SnapshotTable::as_malformed)
    }
}

/// Tables selected from a snapshot for loading.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackupData {
    pub info: SnapshotInfo,
    /// Selected entries in load order.
    pub tables: Vec<SnapshotTable>,
    /// Requested tables that the snapshot does not contain.
    pub missing_tables: Vec<String>,
}

impl BackupData {
    /// Keeps the tables named in `filter`, in filter order, and records the names the snapshot
    /// lacks. Without a filter every table is kept in archive order.
    pub fn select(snapshot: Snapshot, filter: Option<&[String]>) -> Self {
        let Snapshot { info, mut tables } = snapshot;

        let Some(filter) = filter else {
            return Self {
                info,
                tables,
                missing_tables: Vec::new(),
            };
        };

        let mut selected = BackupData {
            info,
            ..Default::default()
        };

        for name in filter {
            let already_selected = selected.tables.iter().any(|t| t.name() == name)
                || selected.missing_tables.contains(name);
            if already_selected {
                continue;
            }

            match tables.iter().position(|t| t.name() == name) {
                Some(position) => selected.tables.push(tables.swap_remove(position)),
                None => selected.missing_tables.push(name.clone()),
            }
        }

        selected
    }

    pub fn decoded(&self) -> impl Iterator<Item = &TableRecordSet> {
        self.tables.iter().filter_map(SnapshotTable::as_decoded)
    }

    pub fn malformed(&self) -> impl Iterator<Item = &MalformedTable> {
        self.tables.iter().filter_map(SnapshotTable::as_malformed)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;
    use crate::sync_error;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            info: SnapshotInfo::default(),
            tables: vec![
                SnapshotTable::Decoded(TableRecordSet::new(
                    "users",
                    vec![record(json!({"_id": "u1"}))],
                )),
                SnapshotTable::Malformed(MalformedTable {
                    name: "events".to_owned(),
                    error: sync_error!(ErrorKind::FormatError, "Invalid snapshot line"),
                }),
                SnapshotTable::Decoded(TableRecordSet::new(
                    "orders",
                    vec![record(json!({"_id": "o1"}))],
                )),
                SnapshotTable::Decoded(TableRecordSet::empty("audit")),
            ],
        }
    }

    #[test]
    fn no_filter_keeps_everything() {
        let data = BackupData::select(snapshot(), None);
        let names: Vec<_> = data.tables.iter().map(SnapshotTable::name).collect();
        assert_eq!(names, ["users", "events", "orders", "audit"]);
        assert_eq!(data.malformed().count(), 1);
        assert!(data.missing_tables.is_empty());
    }

    #[test]
    fn filter_selects_in_filter_order_and_reports_missing() {
        let filter = vec![
            "orders".to_owned(),
            "ghost".to_owned(),
            "users".to_owned(),
            "audit".to_owned(),
            "orders".to_owned(),
        ];
        let data = BackupData::select(snapshot(), Some(&filter));

        let names: Vec<_> = data.decoded().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["orders", "users", "audit"]);
        assert!(data.tables[2].as_decoded().unwrap().is_empty());
        assert_eq!(data.missing_tables, ["ghost"]);
        assert_eq!(data.malformed().count(), 0);
    }

    #[test]
    fn filter_keeps_requested_malformed_tables() {
        let filter = vec!["events".to_owned()];
        let data = BackupData::select(snapshot(), Some(&filter));
        assert_eq!(data.decoded().count(), 0);
        assert_eq!(data.malformed().next().unwrap().name, "events");
    }

    #[test]
    fn snapshot_time_from_nanoseconds() {
        let info = SnapshotInfo {
            timestamp_ns: Some(1_700_000_000_000_000_000),
            dashboard_url: None,
        };
        assert_eq!(
            info.taken_at().unwrap().to_rfc3339(),
            "2023-11-14T22:13:20+00:00"
        );
    }
}
