use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// How snapshots are exported from the document source.
///
/// The export is an external command; the output archive path is appended as the last
/// argument and the source credential is passed through `credential_env`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct SnapshotSourceConfig {
    /// Program to run.
    pub command: String,
    /// Arguments placed before the output path.
    pub args: Vec<String>,
    /// Environment variable that receives the source credential.
    pub credential_env: String,
    /// Hard limit for the whole export, retries included.
    pub timeout_secs: u64,
}

impl SnapshotSourceConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.command.trim().is_empty() {
            return Err(ValidationError::EmptyExportCommand);
        }

        Ok(())
    }
}

impl Default for SnapshotSourceConfig {
    fn default() -> Self {
        Self {
            command: "npx".to_owned(),
            args: vec![
                "convex".to_owned(),
                "export".to_owned(),
                "--path".to_owned(),
            ],
            credential_env: "CONVEX_DEPLOY_KEY".to_owned(),
            timeout_secs: 300,
        }
    }
}
