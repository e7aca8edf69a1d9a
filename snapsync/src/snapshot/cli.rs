use regex::Regex;
use secrecy::ExposeSecret;
use snapsync_config::SerializableSecretString;
use snapsync_config::shared::SnapshotSourceConfig;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::process::Command;
use tracing::{debug, info};

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::snapshot::{SnapshotInfo, SnapshotSource};

/// Longest slice of command output copied into error details.
const MAX_OUTPUT_DETAIL_LEN: usize = 512;

/// Output fragments that mean the source rejected the credential.
const AUTH_FAILURE_MARKERS: &[&str] = &[
    "unauthorized",
    "unauthenticated",
    "invalid deploy key",
    "invalid credential",
    "authentication failed",
    "forbidden",
    "401",
    "403",
];

static TIMESTAMP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"timestamp\s+(\d+)").expect("valid timestamp regex"));

static DASHBOARD_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://dashboard\.convex\.dev/\S+").expect("valid dashboard url regex")
});

/// Exports snapshots by running the source's command line tool.
#[derive(Debug, Clone)]
pub struct CliSnapshotSource {
    config: SnapshotSourceConfig,
}

impl CliSnapshotSource {
    pub fn new(config: SnapshotSourceConfig) -> Self {
        Self { config }
    }
}

impl SnapshotSource for CliSnapshotSource {
    async fn export(
        &self,
        credential: &SerializableSecretString,
        target: &Path,
    ) -> SyncResult<SnapshotInfo> {
        debug!(command = %self.config.command, target = %target.display(), "running snapshot export");

        let output = Command::new(&self.config.command)
            .args(&self.config.args)
            .arg(target)
            .env(&self.config.credential_env, credential.expose_secret())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => bail!(
                ErrorKind::ConfigError,
                "Snapshot export command not found",
                format!("{}: {err}", self.config.command)
            ),
            Err(err) => bail!(
                ErrorKind::SourceIoError,
                "Snapshot export command could not be started",
                err
            ),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let detail = truncate_detail(if stderr.trim().is_empty() {
                &*stdout
            } else {
                &*stderr
            });

            if is_auth_failure(&stdout, &stderr) {
                bail!(
                    ErrorKind::AuthenticationError,
                    "Snapshot source rejected the credential",
                    detail
                );
            }

            bail!(
                ErrorKind::NetworkError,
                "Snapshot export failed",
                format!("{}: {detail}", output.status)
            );
        }

        if !tokio::fs::try_exists(target).await.unwrap_or(false) {
            bail!(
                ErrorKind::NetworkError,
                "Snapshot export produced no archive",
                target.display()
            );
        }

        let info = parse_export_output(&format!("{stdout}\n{stderr}"));
        info!(
            timestamp_ns = info.timestamp_ns,
            dashboard_url = info.dashboard_url.as_deref(),
            "snapshot export finished"
        );

        Ok(info)
    }
}

/// Extracts the snapshot timestamp and dashboard link from export tool output.
pub fn parse_export_output(output: &str) -> SnapshotInfo {
    let timestamp_ns = TIMESTAMP_RE
        .captures(output)
        .and_then(|captures| captures.get(1))
        .and_then(|m| m.as_str().parse().ok());

    let dashboard_url = DASHBOARD_URL_RE
        .find(output)
        .map(|m| m.as_str().to_owned());

    SnapshotInfo {
        timestamp_ns,
        dashboard_url,
    }
}

fn is_auth_failure(stdout: &str, stderr: &str) -> bool {
    let stdout = stdout.to_lowercase();
    let stderr = stderr.to_lowercase();

    AUTH_FAILURE_MARKERS
        .iter()
        .any(|marker| stderr.contains(marker) || stdout.contains(marker))
}

fn truncate_detail(output: &str) -> String {
    let output = output.trim();
    match output.char_indices().nth(MAX_OUTPUT_DETAIL_LEN) {
        Some((end, _)) => format!("{}...", &output[..end]),
        None => output.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_timestamp_and_dashboard_url() {
        let output = "Created snapshot export at timestamp 1700000000123456789\n\
                      Export is available at https://dashboard.convex.dev/d/happy-otter-123/settings/snapshot-export\n";
        let info = parse_export_output(output);

        assert_eq!(info.timestamp_ns, Some(1_700_000_000_123_456_789));
        assert_eq!(
            info.dashboard_url.as_deref(),
            Some("https://dashboard.convex.dev/d/happy-otter-123/settings/snapshot-export")
        );
    }

    #[test]
    fn missing_metadata_is_none() {
        assert_eq!(parse_export_output("done"), SnapshotInfo::default());
    }

    #[test]
    fn detects_rejected_credentials() {
        assert!(is_auth_failure("", "Error: 401 Unauthorized: InvalidDeployKey"));
        assert!(!is_auth_failure("", "error sending request: connection reset"));
    }

    #[test]
    fn long_output_is_truncated() {
        let detail = truncate_detail(&"x".repeat(2_000));
        assert_eq!(detail.len(), MAX_OUTPUT_DETAIL_LEN + 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_is_a_network_error() {
        let source = CliSnapshotSource::new(SnapshotSourceConfig {
            command: "sh".to_owned(),
            args: vec!["-c".to_owned(), "echo 'connection reset' >&2; exit 3".to_owned()],
            credential_env: "SNAPSYNC_TEST_KEY".to_owned(),
            timeout_secs: 5,
        });
        let dir = tempfile::tempdir().unwrap();

        let err = source
            .export(&"key".into(), &dir.path().join("snapshot.zip"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NetworkError);
        assert!(err.detail().unwrap().contains("connection reset"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn credential_is_passed_through_the_environment() {
        let source = CliSnapshotSource::new(SnapshotSourceConfig {
            command: "sh".to_owned(),
            args: vec![
                "-c".to_owned(),
                r#"[ "$SNAPSYNC_TEST_KEY" = "prod:abc" ] && echo "timestamp 42" && touch "$0""#
                    .to_owned(),
            ],
            credential_env: "SNAPSYNC_TEST_KEY".to_owned(),
            timeout_secs: 5,
        });
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("snapshot.zip");

        let info = source.export(&"prod:abc".into(), &target).await.unwrap();

        assert_eq!(info.timestamp_ns, Some(42));
        assert!(target.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_program_is_a_config_error() {
        let source = CliSnapshotSource::new(SnapshotSourceConfig {
            command: "snapsync-definitely-missing-binary".to_owned(),
            ..Default::default()
        });
        let dir = tempfile::tempdir().unwrap();

        let err = source
            .export(&"key".into(), &dir.path().join("snapshot.zip"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
