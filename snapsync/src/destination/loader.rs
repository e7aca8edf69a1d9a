use serde_json::Value;
use snapsync_config::shared::PipelineConfig;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::bail;
use crate::conversions::{Cell, convert_value, infer_columns, infer_type};
use crate::destination::{Destination, MINIMAL_COLUMNS};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::snapshot::TableRecordSet;

/// Step of a table load. A failure records the step it happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStep {
    Extract,
    Probe,
    Create,
    Truncate,
    Convert,
    BulkInsert,
}

impl fmt::Display for LoadStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            LoadStep::Extract => "extract",
            LoadStep::Probe => "probe",
            LoadStep::Create => "create",
            LoadStep::Truncate => "truncate",
            LoadStep::Convert => "convert",
            LoadStep::BulkInsert => "bulk insert",
        };
        f.write_str(step)
    }
}

/// Terminal state of a table load.
#[derive(Debug, Clone, PartialEq)]
pub enum TableOutcome {
    Success {
        rows_imported: u64,
    },
    Failure {
        step: LoadStep,
        kind: ErrorKind,
        message: String,
    },
}

/// Result of loading one table, produced whether or not the load succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportResult {
    /// Table name in the snapshot.
    pub table_name: String,
    /// Table name in the destination after renames.
    pub destination_table: String,
    pub duration: Duration,
    pub outcome: TableOutcome,
}

impl ImportResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TableOutcome::Success { .. })
    }

    pub fn rows_imported(&self) -> u64 {
        match self.outcome {
            TableOutcome::Success { rows_imported } => rows_imported,
            TableOutcome::Failure { .. } => 0,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            TableOutcome::Success { .. } => None,
            TableOutcome::Failure { message, .. } => Some(message),
        }
    }

    /// Result for a table that could not be read from the snapshot.
    pub fn failed_extraction(table_name: &str, destination_table: &str, err: &SyncError) -> Self {
        Self {
            table_name: table_name.to_owned(),
            destination_table: destination_table.to_owned(),
            duration: Duration::ZERO,
            outcome: TableOutcome::Failure {
                step: LoadStep::Extract,
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }
}

/// Loader behavior.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Create absent tables that hold rows. Absent empty tables always get the minimal columns.
    pub auto_create_tables: bool,
    pub batch_size: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            auto_create_tables: true,
            batch_size: 1000,
        }
    }
}

impl From<&PipelineConfig> for LoadOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            auto_create_tables: config.load.auto_create_tables,
            batch_size: config.batch.max_size,
        }
    }
}

/// Replaces the content of destination tables with snapshot record sets.
///
/// Each table goes through probe, then create or truncate, then bulk insert. The column set
/// comes from the first record: keys missing from later records are stored as null and keys
/// absent from the first record are dropped with a warning.
#[derive(Debug, Clone)]
pub struct RelationalLoader<D> {
    destination: D,
    options: LoadOptions,
}

/// Schema drift observed while converting a table.
#[derive(Debug, Default)]
struct DriftStats {
    records_with_missing_keys: usize,
    records_with_extra_keys: usize,
    dropped_keys: HashSet<String>,
}

impl<D> RelationalLoader<D>
where
    D: Destination,
{
    pub fn new(destination: D, options: LoadOptions) -> Self {
        Self {
            destination,
            options,
        }
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    /// Loads `table` into `destination_table`, renaming columns through `column_mapping`.
    pub async fn import_table(
        &self,
        table: &TableRecordSet,
        destination_table: &str,
        column_mapping: &HashMap<String, String>,
    ) -> ImportResult {
        let started = Instant::now();

        let outcome = match self.load(table, destination_table, column_mapping).await {
            Ok(rows_imported) => {
                info!(
                    table = table.name,
                    destination_table,
                    rows = rows_imported,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "table imported"
                );
                TableOutcome::Success { rows_imported }
            }
            Err((step, err)) => {
                error!(
                    table = table.name,
                    destination_table,
                    %step,
                    error = %err,
                    "table import failed"
                );
                TableOutcome::Failure {
                    step,
                    kind: err.kind(),
                    message: err.to_string(),
                }
            }
        };

        ImportResult {
            table_name: table.name.clone(),
            destination_table: destination_table.to_owned(),
            duration: started.elapsed(),
            outcome,
        }
    }

    async fn load(
        &self,
        table: &TableRecordSet,
        destination_table: &str,
        column_mapping: &HashMap<String, String>,
    ) -> Result<u64, (LoadStep, SyncError)> {
        let source_columns: Vec<String> = match table.records.first() {
            Some(first) if !first.is_empty() => first.keys().cloned().collect(),
            _ => MINIMAL_COLUMNS.iter().map(|c| (*c).to_owned()).collect(),
        };
        let columns =
            rename_columns(&source_columns, column_mapping).map_err(|e| (LoadStep::Probe, e))?;

        let exists = self
            .destination
            .table_exists(destination_table)
            .await
            .map_err(|e| (LoadStep::Probe, e))?;

        if exists {
            self.destination
                .truncate_table(destination_table)
                .await
                .map_err(|e| (LoadStep::Truncate, e))?;
        } else {
            if !self.options.auto_create_tables && !table.is_empty() {
                return Err((
                    LoadStep::Probe,
                    SyncError::from((
                        ErrorKind::TableMissing,
                        "Destination table does not exist and auto-create is disabled",
                        destination_table.to_owned(),
                    )),
                ));
            }

            if let Some(first) = table.records.first() {
                for column in infer_columns(first) {
                    debug!(
                        table = table.name,
                        column = column.name,
                        logical_type = %column.logical_type,
                        "inferred column type"
                    );
                }
            }

            self.destination
                .create_table(destination_table, &columns)
                .await
                .map_err(|e| (LoadStep::Create, e))?;
        }

        if table.is_empty() {
            return Ok(0);
        }

        let rows = convert_rows(table, &source_columns).map_err(|e| (LoadStep::Convert, e))?;

        self.destination
            .insert_rows(destination_table, &columns, rows, self.options.batch_size)
            .await
            .map_err(|e| (LoadStep::BulkInsert, e))
    }
}

/// Applies `column_mapping`, rejecting renames that collide with another column.
fn rename_columns(
    source_columns: &[String],
    column_mapping: &HashMap<String, String>,
) -> SyncResult<Vec<String>> {
    let mut seen = HashSet::with_capacity(source_columns.len());
    let mut columns = Vec::with_capacity(source_columns.len());

    for column in source_columns {
        let renamed = column_mapping.get(column).unwrap_or(column).clone();
        if !seen.insert(renamed.clone()) {
            bail!(
                ErrorKind::ConfigError,
                "Column mapping produces a duplicate column",
                renamed
            );
        }
        columns.push(renamed);
    }

    Ok(columns)
}

/// Converts every record into a row ordered like `columns`.
fn convert_rows(table: &TableRecordSet, columns: &[String]) -> SyncResult<Vec<Vec<Cell>>> {
    let mut drift = DriftStats::default();
    let mut rows = Vec::with_capacity(table.records.len());

    for record in &table.records {
        let mut row = Vec::with_capacity(columns.len());
        let mut missing = false;
        for column in columns {
            let value = match record.get(column) {
                Some(value) => value,
                None => {
                    missing = true;
                    &Value::Null
                }
            };
            row.push(convert_value(value, infer_type(value))?);
        }

        let mut found_extra = false;
        for key in record.keys().filter(|key| !columns.contains(key)) {
            drift.dropped_keys.insert(key.clone());
            found_extra = true;
        }
        if found_extra {
            drift.records_with_extra_keys += 1;
        }
        if missing {
            drift.records_with_missing_keys += 1;
        }

        rows.push(row);
    }

    if drift.records_with_missing_keys > 0 || drift.records_with_extra_keys > 0 {
        let mut dropped_keys: Vec<_> = drift.dropped_keys.into_iter().collect();
        dropped_keys.sort();
        warn!(
            table = table.name,
            records_with_missing_keys = drift.records_with_missing_keys,
            records_with_extra_keys = drift.records_with_extra_keys,
            dropped_keys = ?dropped_keys,
            "schema drift: missing keys stored as null, extra keys dropped"
        );
    }

    Ok(rows)
}
