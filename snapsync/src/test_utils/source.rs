use snapsync_config::SerializableSecretString;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{SyncError, SyncResult};
use crate::snapshot::{SnapshotInfo, SnapshotSource};
use crate::test_utils::archive::ArchiveBuilder;

#[derive(Debug)]
struct Inner {
    archive: Vec<u8>,
    info: SnapshotInfo,
    failures: Mutex<VecDeque<SyncError>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    last_target: Mutex<Option<PathBuf>>,
}

/// Snapshot source serving a prepared archive, optionally failing the first calls.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    inner: Arc<Inner>,
}

impl ScriptedSource {
    pub fn new(archive: &ArchiveBuilder) -> Self {
        Self::build(archive, SnapshotInfo::default(), Vec::new(), None)
    }

    pub fn with_info(archive: &ArchiveBuilder, info: SnapshotInfo) -> Self {
        Self::build(archive, info, Vec::new(), None)
    }

    /// Fails the first calls with `failures`, in order, before serving the archive.
    pub fn failing_first(archive: &ArchiveBuilder, failures: Vec<SyncError>) -> Self {
        Self::build(archive, SnapshotInfo::default(), failures, None)
    }

    /// Waits `delay` on every call before answering.
    pub fn slow(archive: &ArchiveBuilder, delay: Duration) -> Self {
        Self::build(archive, SnapshotInfo::default(), Vec::new(), Some(delay))
    }

    fn build(
        archive: &ArchiveBuilder,
        info: SnapshotInfo,
        failures: Vec<SyncError>,
        delay: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                archive: archive.to_bytes(),
                info,
                failures: Mutex::new(failures.into()),
                delay,
                calls: AtomicUsize::new(0),
                last_target: Mutex::new(None),
            }),
        }
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Path the last export was asked to write to.
    pub fn last_target(&self) -> Option<PathBuf> {
        self.inner.last_target.lock().unwrap().clone()
    }
}

impl SnapshotSource for ScriptedSource {
    async fn export(
        &self,
        _credential: &SerializableSecretString,
        target: &Path,
    ) -> SyncResult<SnapshotInfo> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        *self.inner.last_target.lock().unwrap() = Some(target.to_path_buf());

        if let Some(delay) = self.inner.delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.inner.failures.lock().unwrap().pop_front();
        if let Some(err) = failure {
            return Err(err);
        }

        tokio::fs::write(target, &self.inner.archive).await?;

        Ok(self.inner.info.clone())
    }
}
