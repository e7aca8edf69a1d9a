use snapsync_config::SerializableSecretString;
use snapsync_config::shared::PipelineConfig;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::retry::RetryPolicy;
use crate::snapshot::{BackupData, Snapshot, SnapshotSource, read_archive};
use crate::sync_error;

/// Name of the archive written inside the temporary directory.
const ARCHIVE_FILE_NAME: &str = "snapshot.zip";

/// Default hard limit for an export, retries included.
pub const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(300);

/// Fetches snapshots from a [`SnapshotSource`] and unpacks them.
#[derive(Debug, Clone)]
pub struct SnapshotExtractor<S> {
    source: S,
    retry: RetryPolicy,
    timeout: Duration,
}

impl<S> SnapshotExtractor<S>
where
    S: SnapshotSource + Sync,
{
    pub fn new(source: S, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            source,
            retry,
            timeout,
        }
    }

    pub fn from_config(source: S, config: &PipelineConfig) -> Self {
        Self::new(
            source,
            RetryPolicy::from_config(&config.retry),
            Duration::from_secs(config.snapshot.timeout_secs),
        )
    }

    /// Exports and unpacks a snapshot.
    ///
    /// Transient export failures are retried with backoff. The whole retried export runs under
    /// the hard timeout; reaching it fails with `TimeoutError` without a further attempt. The
    /// temporary archive is removed before returning, whatever the outcome.
    pub async fn fetch(&self, credential: &SerializableSecretString) -> SyncResult<Snapshot> {
        if credential.is_blank() {
            bail!(
                ErrorKind::AuthenticationError,
                "Snapshot source credential is empty"
            );
        }

        let temp_dir = tempfile::Builder::new().prefix("snapsync-").tempdir()?;
        let archive_path = temp_dir.path().join(ARCHIVE_FILE_NAME);

        let source = &self.source;
        let target = archive_path.as_path();
        let export = self.retry.run_if(
            || {
                remove_partial_archive(target);
                source.export(credential, target)
            },
            |err| err.kind().is_retryable(),
        );

        let info = match tokio::time::timeout(self.timeout, export).await {
            Ok(result) => result?,
            Err(_) => bail!(
                ErrorKind::TimeoutError,
                "Snapshot export timed out",
                format!("no snapshot after {}s", self.timeout.as_secs())
            ),
        };

        let reader_path = archive_path.clone();
        let tables = tokio::task::spawn_blocking(move || read_archive(&reader_path))
            .await
            .map_err(|err| {
                sync_error!(ErrorKind::InvalidState, "Snapshot archive reader failed", err)
            })??;

        // Dropping would ignore removal errors.
        if let Err(err) = temp_dir.close() {
            warn!(error = %err, "failed to remove temporary snapshot directory");
        }

        let snapshot = Snapshot { info, tables };

        info!(
            tables = snapshot.tables.len(),
            malformed_tables = snapshot.malformed().count(),
            rows = snapshot.decoded().map(|t| t.len()).sum::<usize>(),
            snapshot_time = ?snapshot.info.taken_at(),
            "snapshot extracted"
        );

        Ok(snapshot)
    }

    /// Fetches a snapshot and keeps the tables named in `table_filter`.
    ///
    /// Requested tables absent from the snapshot are reported in
    /// [`BackupData::missing_tables`] and logged; they do not fail the fetch.
    pub async fn get_backup_data(
        &self,
        credential: &SerializableSecretString,
        table_filter: Option<&[String]>,
    ) -> SyncResult<BackupData> {
        let snapshot = self.fetch(credential).await?;
        let data = BackupData::select(snapshot, table_filter);

        if !data.missing_tables.is_empty() {
            warn!(
                missing_tables = ?data.missing_tables,
                "requested tables are not present in the snapshot"
            );
        }

        Ok(data)
    }
}

/// Removes what a failed attempt may have left at `path`.
fn remove_partial_archive(path: &Path) {
    if let Err(err) = std::fs::remove_file(path)
        && err.kind() != std::io::ErrorKind::NotFound
    {
        debug!(path = %path.display(), error = %err, "failed to remove partial snapshot archive");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::logs::CapturedLogs;

    #[test]
    fn absent_partial_archive_is_not_reported() {
        let (logs, _guard) = CapturedLogs::install();
        let dir = tempfile::tempdir().unwrap();

        remove_partial_archive(&dir.path().join(ARCHIVE_FILE_NAME));

        assert!(!logs.contents().contains("partial snapshot archive"));
    }

    #[test]
    fn failed_partial_archive_removal_is_logged() {
        let (logs, _guard) = CapturedLogs::install();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join(ARCHIVE_FILE_NAME);
        std::fs::create_dir(&target).unwrap();

        remove_partial_archive(&target);

        let lines = logs.lines_with_level("DEBUG");
        assert!(
            lines
                .iter()
                .any(|line| line.contains("failed to remove partial snapshot archive"))
        );
    }
}
