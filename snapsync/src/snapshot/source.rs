use snapsync_config::SerializableSecretString;
use std::future::Future;
use std::path::Path;

use crate::error::SyncResult;
use crate::snapshot::SnapshotInfo;

/// Something able to export a snapshot archive of the document source.
///
/// Implementations write the archive to `target` and classify failures as
/// `AuthenticationError`, `NetworkError`, `TimeoutError` or `SourceIoError`.
pub trait SnapshotSource {
    fn export(
        &self,
        credential: &SerializableSecretString,
        target: &Path,
    ) -> impl Future<Output = SyncResult<SnapshotInfo>> + Send;
}
