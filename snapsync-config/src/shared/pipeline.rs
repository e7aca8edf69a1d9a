use serde::{Deserialize, Serialize};

use crate::shared::{BatchConfig, RetryConfig, SnapshotSourceConfig, ValidationError};

/// Settings for one snapshot-to-destination run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct PipelineConfig {
    pub snapshot: SnapshotSourceConfig,
    pub retry: RetryConfig,
    pub batch: BatchConfig,
    pub load: LoadConfig,
}

/// How tables are materialized in the destination.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct LoadConfig {
    /// Create destination tables that do not exist yet.
    pub auto_create_tables: bool,
    /// Load tables that were requested but are absent from the snapshot as empty tables.
    pub create_missing_tables: bool,
    /// Upper bound for a whole run, extraction and loading included.
    pub run_timeout_secs: u64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            auto_create_tables: true,
            create_missing_tables: true,
            run_timeout_secs: 600,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.snapshot.validate()?;
        self.retry.validate()?;
        self.batch.validate()?;

        Ok(())
    }
}
