use thiserror::Error;

/// Errors found while validating loaded configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,

    #[error("`retry.max_attempts` cannot be zero")]
    RetryAttemptsZero,

    #[error("`retry.backoff_factor` must be a finite number >= 1.0")]
    InvalidBackoffFactor,

    #[error("`batch.max_size` cannot be zero")]
    BatchSizeZero,

    #[error("`rate_limit.requests_per_minute` cannot be zero")]
    RequestsPerMinuteZero,

    #[error("`rate_limit.burst_size` cannot be zero")]
    BurstSizeZero,

    #[error("`snapshot.command` cannot be empty")]
    EmptyExportCommand,

    #[error("`destination.schema` cannot be empty")]
    EmptyDestinationSchema,

    #[error("At least one api key must be configured")]
    NoApiKeys,
}
