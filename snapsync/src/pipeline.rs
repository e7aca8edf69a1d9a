use chrono::{DateTime, Utc};
use serde::Serialize;
use snapsync_config::SerializableSecretString;
use snapsync_config::shared::PipelineConfig;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::destination::{Destination, ImportResult, LoadOptions, RelationalLoader};
use crate::error::{ErrorKind, SyncError};
use crate::snapshot::{
    SnapshotExtractor, SnapshotInfo, SnapshotSource, SnapshotTable, TableRecordSet,
};

/// Returns a fresh random run id.
pub fn generate_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A request to replace the destination content with a fresh snapshot.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub run_id: String,
    pub credential: SerializableSecretString,
    /// Tables to sync, in order. `None` syncs every table of the snapshot.
    pub tables: Option<Vec<String>>,
    /// Source table name to destination table name.
    pub table_mapping: HashMap<String, String>,
    /// Source column name to destination column name, applied to every table.
    pub column_mapping: HashMap<String, String>,
}

impl SyncRequest {
    pub fn new(run_id: impl Into<String>, credential: SerializableSecretString) -> Self {
        Self {
            run_id: run_id.into(),
            credential,
            tables: None,
            table_mapping: HashMap::new(),
            column_mapping: HashMap::new(),
        }
    }

    pub fn destination_table<'a>(&'a self, table_name: &'a str) -> &'a str {
        self.table_mapping
            .get(table_name)
            .map(String::as_str)
            .unwrap_or(table_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Failed,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Success => f.write_str("success"),
            SyncStatus::Failed => f.write_str("failed"),
        }
    }
}

/// Outcome of a sync run, always produced even when the run could not start loading.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSummary {
    pub run_id: String,
    pub status: SyncStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration: Duration,
    pub snapshot: Option<SnapshotInfo>,
    /// Per-table results, in load order.
    pub results: Vec<ImportResult>,
    /// Requested tables absent from the snapshot.
    pub missing_tables: Vec<String>,
    /// Kind of the failure that aborted the run before any table was loaded.
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
}

impl SyncSummary {
    /// Summary of a run that failed before any table was attempted.
    pub fn aborted(
        run_id: impl Into<String>,
        started_at: DateTime<Utc>,
        duration: Duration,
        err: &SyncError,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            status: SyncStatus::Failed,
            started_at,
            completed_at: Utc::now(),
            duration,
            snapshot: None,
            results: Vec::new(),
            missing_tables: Vec::new(),
            error_kind: Some(err.kind()),
            error_message: Some(err.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SyncStatus::Success
    }

    pub fn tables_processed(&self) -> usize {
        self.results.len()
    }

    pub fn tables_succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn tables_failed(&self) -> usize {
        self.tables_processed() - self.tables_succeeded()
    }

    pub fn rows_imported(&self) -> u64 {
        self.results.iter().map(ImportResult::rows_imported).sum()
    }

    /// Failed tables with their error messages.
    pub fn failed_tables(&self) -> Vec<(&str, &str)> {
        self.results
            .iter()
            .filter_map(|r| Some((r.table_name.as_str(), r.error_message()?)))
            .collect()
    }

    pub fn result(&self, table_name: &str) -> Option<&ImportResult> {
        self.results.iter().find(|r| r.table_name == table_name)
    }
}

/// Extract, convert and load orchestration of one sync run.
#[derive(Debug, Clone)]
pub struct SyncPipeline<S, D> {
    extractor: SnapshotExtractor<S>,
    loader: RelationalLoader<D>,
    create_missing_tables: bool,
}

impl<S, D> SyncPipeline<S, D>
where
    S: SnapshotSource + Sync,
    D: Destination + Sync,
{
    pub fn new(
        extractor: SnapshotExtractor<S>,
        loader: RelationalLoader<D>,
        create_missing_tables: bool,
    ) -> Self {
        Self {
            extractor,
            loader,
            create_missing_tables,
        }
    }

    pub fn from_config(source: S, destination: D, config: &PipelineConfig) -> Self {
        Self::new(
            SnapshotExtractor::from_config(source, config),
            RelationalLoader::new(destination, LoadOptions::from(config)),
            config.load.create_missing_tables,
        )
    }

    pub fn destination(&self) -> &D {
        self.loader.destination()
    }

    /// Runs the whole sync and summarizes it.
    ///
    /// An extraction failure aborts the run before any table is touched. Table failures are
    /// recorded in the summary and do not stop the remaining tables.
    pub async fn run(&self, request: &SyncRequest) -> SyncSummary {
        let started = Instant::now();
        let started_at = Utc::now();
        info!(run_id = request.run_id, tables = ?request.tables, "sync run started");

        let data = match self
            .extractor
            .get_backup_data(&request.credential, request.tables.as_deref())
            .await
        {
            Ok(data) => data,
            Err(err) => {
                error!(run_id = request.run_id, error = %err, "snapshot extraction failed");
                return SyncSummary::aborted(
                    request.run_id.clone(),
                    started_at,
                    started.elapsed(),
                    &err,
                );
            }
        };

        info!(
            run_id = request.run_id,
            snapshot_time = ?data.info.taken_at(),
            dashboard_url = data.info.dashboard_url.as_deref(),
            "snapshot ready"
        );

        let mut results = Vec::with_capacity(data.tables.len() + data.missing_tables.len());

        for table in &data.tables {
            let destination_table = request.destination_table(table.name());
            let result = match table {
                SnapshotTable::Decoded(table) => {
                    self.loader
                        .import_table(table, destination_table, &request.column_mapping)
                        .await
                }
                SnapshotTable::Malformed(malformed) => ImportResult::failed_extraction(
                    &malformed.name,
                    destination_table,
                    &malformed.error,
                ),
            };
            results.push(result);
        }

        if self.create_missing_tables {
            for name in &data.missing_tables {
                let empty = TableRecordSet::empty(name.as_str());
                let destination_table = request.destination_table(name);
                let result = self
                    .loader
                    .import_table(&empty, destination_table, &request.column_mapping)
                    .await;
                results.push(result);
            }
        }

        let mut summary = SyncSummary {
            run_id: request.run_id.clone(),
            status: SyncStatus::Success,
            started_at,
            completed_at: Utc::now(),
            duration: started.elapsed(),
            snapshot: Some(data.info),
            results,
            missing_tables: data.missing_tables,
            error_kind: None,
            error_message: None,
        };

        let failed_tables = summary.failed_tables();
        if !failed_tables.is_empty() {
            let message = format!(
                "{} of {} tables failed: {}",
                failed_tables.len(),
                summary.tables_processed(),
                failed_tables
                    .iter()
                    .map(|(table, message)| format!("{table} ({message})"))
                    .collect::<Vec<_>>()
                    .join("; ")
            );
            summary.status = SyncStatus::Failed;
            summary.error_message = Some(message);
        }

        if summary.is_success() {
            info!(
                run_id = summary.run_id,
                tables = summary.tables_processed(),
                rows = summary.rows_imported(),
                duration_ms = summary.duration.as_millis() as u64,
                "sync run completed"
            );
        } else {
            warn!(
                run_id = summary.run_id,
                tables = summary.tables_processed(),
                failed_tables = summary.tables_failed(),
                rows = summary.rows_imported(),
                error = summary.error_message.as_deref(),
                "sync run completed with failures"
            );
        }

        summary
    }
}
