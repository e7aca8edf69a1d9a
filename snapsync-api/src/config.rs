use snapsync_config::Config;
use snapsync_config::shared::{
    DestinationConfig, PipelineConfig, RateLimitConfig, SentryConfig, ValidationError,
};
use serde::Deserialize;
use std::fmt;

/// Complete configuration of the sync API service.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server settings.
    pub application: ApplicationSettings,
    /// Database the snapshots are loaded into.
    pub destination: DestinationConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Bearer tokens accepted on the `v1` routes.
    pub api_keys: Vec<String>,
    /// Base url of the triggering system, receiving `/api/sync-callback` notifications.
    #[serde(default)]
    pub callback_url: Option<String>,
    pub sentry: Option<SentryConfig>,
}

impl Config for ServerConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["api_keys"];
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.destination.validate()?;
        self.pipeline.validate()?;
        self.rate_limit.validate()?;

        if self.api_keys.iter().all(|key| key.trim().is_empty()) {
            return Err(ValidationError::NoApiKeys);
        }

        Ok(())
    }
}

/// HTTP server configuration settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    /// Host address the API listens on.
    pub host: String,
    /// Port number the API listens on.
    pub port: u16,
}

impl fmt::Display for ApplicationSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "    host: {}", self.host)?;
        writeln!(f, "    port: {}", self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api_keys: &[&str]) -> ServerConfig {
        let raw = serde_json::json!({
            "application": {"host": "127.0.0.1", "port": 8000},
            "destination": {
                "connection": {
                    "host": "localhost",
                    "port": 5432,
                    "name": "warehouse",
                    "username": "postgres",
                    "password": "postgres",
                    "tls": {"enabled": false}
                }
            },
            "api_keys": api_keys,
            "sentry": null
        });

        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn defaults_are_applied() {
        let config = config(&["key"]);

        assert_eq!(config.destination.schema, "public");
        assert_eq!(config.rate_limit.requests_per_minute, 60);
        assert_eq!(config.pipeline.load.run_timeout_secs, 600);
        assert!(config.callback_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn blank_api_keys_are_rejected() {
        assert_eq!(config(&[]).validate(), Err(ValidationError::NoApiKeys));
        assert_eq!(config(&[" "]).validate(), Err(ValidationError::NoApiKeys));
    }
}
