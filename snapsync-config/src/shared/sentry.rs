use serde::{Deserialize, Serialize};

/// Sentry error reporting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentryConfig {
    pub dsn: String,
}
