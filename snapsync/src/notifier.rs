use serde::Serialize;
use std::future::Future;
use tracing::info;

use crate::pipeline::{SyncStatus, SyncSummary};

/// Payload delivered to the triggering system once a run ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionReport {
    pub run_id: String,
    pub status: SyncStatus,
    /// RFC 3339 completion time.
    pub completed_at: String,
    pub duration_seconds: f64,
    pub tables_processed: usize,
    pub rows_imported: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&SyncSummary> for CompletionReport {
    fn from(summary: &SyncSummary) -> Self {
        Self {
            run_id: summary.run_id.clone(),
            status: summary.status,
            completed_at: summary.completed_at.to_rfc3339(),
            duration_seconds: summary.duration.as_secs_f64(),
            tables_processed: summary.tables_processed(),
            rows_imported: summary.rows_imported(),
            error_message: summary.error_message.clone(),
        }
    }
}

/// Receives the summary of every finished run.
///
/// Delivery is best effort: implementations log their own failures and never fail the run.
pub trait CompletionNotifier {
    fn notify(&self, summary: &SyncSummary) -> impl Future<Output = ()> + Send;
}

/// Notifier that only logs the completion report.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl CompletionNotifier for LogNotifier {
    async fn notify(&self, summary: &SyncSummary) {
        let report = CompletionReport::from(summary);
        info!(
            run_id = report.run_id,
            status = %report.status,
            duration_seconds = report.duration_seconds,
            tables_processed = report.tables_processed,
            rows_imported = report.rows_imported,
            error_message = report.error_message.as_deref(),
            "sync run finished"
        );
    }
}
