use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Batching applied to bulk inserts.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct BatchConfig {
    /// Maximum number of rows sent to the destination in one write.
    pub max_size: usize,
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_size == 0 {
            return Err(ValidationError::BatchSizeZero);
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_size: 1000 }
    }
}
