use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Per-caller admission control on the trigger endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct RateLimitConfig {
    /// Sustained refill rate.
    pub requests_per_minute: u32,
    /// Bucket capacity.
    pub burst_size: u32,
    /// How long an abusive caller stays blocked.
    pub block_duration_secs: u64,
    /// Period of the idle bucket sweep.
    pub cleanup_interval_secs: u64,
    /// Buckets untouched for longer than this are reclaimed.
    pub idle_timeout_secs: u64,
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.requests_per_minute == 0 {
            return Err(ValidationError::RequestsPerMinuteZero);
        }

        if self.burst_size == 0 {
            return Err(ValidationError::BurstSizeZero);
        }

        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst_size: 10,
            block_duration_secs: 300,
            cleanup_interval_secs: 300,
            idle_timeout_secs: 3600,
        }
    }
}
