use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::error::{ErrorKind, SyncResult};
use crate::snapshot::{MalformedTable, Record, SnapshotTable, TableRecordSet};
use crate::sync_error;

/// File holding the documents of a table inside the archive.
pub const DOCUMENTS_FILE_NAME: &str = "documents.jsonl";

/// Top-level entries with this prefix hold source system tables.
const SYSTEM_TABLE_PREFIX: char = '_';

/// Reads every `<table>/documents.jsonl` entry of the archive at `path`, in archive order.
///
/// System tables and unrelated entries are skipped. A table with an undecodable line is
/// returned as [`SnapshotTable::Malformed`] and does not stop the other tables. This is
/// blocking and should run on a blocking thread.
pub fn read_archive(path: &Path) -> SyncResult<Vec<SnapshotTable>> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;
    let mut tables: Vec<SnapshotTable> = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }

        let entry_name = entry.name().to_owned();
        let Some(table_name) = table_name_of(&entry_name) else {
            debug!(entry = %entry_name, "skipping archive entry");
            continue;
        };

        if table_name.starts_with(SYSTEM_TABLE_PREFIX) {
            debug!(table = table_name, "skipping system table");
            continue;
        }

        if tables.iter().any(|t| t.name() == table_name) {
            warn!(table = table_name, "duplicate table entry in archive, keeping the first");
            continue;
        }

        let mut raw = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry.read_to_end(&mut raw)?;

        match parse_documents(table_name, &raw) {
            Ok(records) => {
                debug!(table = table_name, rows = records.len(), "decoded table");
                tables.push(SnapshotTable::Decoded(TableRecordSet::new(
                    table_name, records,
                )));
            }
            Err(error) => {
                warn!(table = table_name, %error, "table entry is malformed");
                tables.push(SnapshotTable::Malformed(MalformedTable {
                    name: table_name.to_owned(),
                    error,
                }));
            }
        }
    }

    Ok(tables)
}

/// Returns the table of a `<table>/documents.jsonl` entry name.
fn table_name_of(entry_name: &str) -> Option<&str> {
    let (table_name, file_name) = entry_name.split_once('/')?;
    (!table_name.is_empty() && file_name == DOCUMENTS_FILE_NAME).then_some(table_name)
}

/// Decodes one JSON object per non-empty line.
pub fn parse_documents(table_name: &str, raw: &[u8]) -> SyncResult<Vec<Record>> {
    let text = std::str::from_utf8(raw).map_err(|err| {
        sync_error!(
            ErrorKind::FormatError,
            "Snapshot entry is not valid UTF-8",
            format!("table `{table_name}`: {err}")
        )
    })?;

    let mut records = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let line_number = index + 1;
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(record)) => records.push(record),
            Ok(other) => {
                return Err(sync_error!(
                    ErrorKind::FormatError,
                    "Snapshot line is not a document",
                    format!(
                        "table `{table_name}` line {line_number}: expected an object, found {}",
                        json_kind(&other)
                    )
                ));
            }
            Err(err) => {
                return Err(sync_error!(
                    ErrorKind::FormatError,
                    "Invalid snapshot line",
                    format!("table `{table_name}` line {line_number}: {err}")
                ));
            }
        }
    }

    Ok(records)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::archive::ArchiveBuilder;

    #[test]
    fn entry_names() {
        assert_eq!(table_name_of("users/documents.jsonl"), Some("users"));
        assert_eq!(table_name_of("users/generated_schema.jsonl"), None);
        assert_eq!(table_name_of("users/nested/documents.jsonl"), None);
        assert_eq!(table_name_of("/documents.jsonl"), None);
        assert_eq!(table_name_of("README.md"), None);
    }

    #[test]
    fn reads_tables_in_archive_order_and_skips_system_tables() {
        let archive = ArchiveBuilder::new()
            .table("users", &[r#"{"_id":"u1","name":"Ann"}"#, "", r#"{"_id":"u2"}"#])
            .table("_tables", &[r#"{"name":"users"}"#])
            .table("orders", &[r#"{"_id":"o1","total":9.5}"#])
            .table("empty", &[])
            .file("users/generated_schema.jsonl", "{}")
            .write();

        let tables = read_archive(archive.path()).unwrap();

        let names: Vec<_> = tables.iter().map(SnapshotTable::name).collect();
        assert_eq!(names, ["users", "orders", "empty"]);
        assert_eq!(tables[0].as_decoded().unwrap().len(), 2);
        assert!(tables[2].as_decoded().unwrap().is_empty());
        assert!(tables.iter().all(|t| t.as_malformed().is_none()));
    }

    #[test]
    fn malformed_table_is_reported_with_line_context() {
        let archive = ArchiveBuilder::new()
            .table("customers", &[r#"{"_id":"c1"}"#])
            .table("users", &[r#"{"_id":"u1"}"#, r#"{"_id": "#])
            .table("orders", &[r#"{"_id":"o1"}"#])
            .write();

        let tables = read_archive(archive.path()).unwrap();

        let names: Vec<_> = tables.iter().map(SnapshotTable::name).collect();
        assert_eq!(names, ["customers", "users", "orders"]);
        assert!(tables[0].as_decoded().is_some());
        assert!(tables[2].as_decoded().is_some());

        let malformed = tables[1].as_malformed().unwrap();
        assert_eq!(malformed.name, "users");
        assert_eq!(malformed.error.kind(), ErrorKind::FormatError);
        assert!(malformed.error.detail().unwrap().contains("line 2"));
    }

    #[test]
    fn non_object_lines_are_format_errors() {
        let err = parse_documents("users", b"[1,2]\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FormatError);
        assert!(err.detail().unwrap().contains("an array"));
    }

    #[test]
    fn not_a_zip_file_is_a_format_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"definitely not a zip").unwrap();

        let err = read_archive(file.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FormatError);
    }
}
