#![allow(dead_code)]

use reqwest::{IntoUrl, RequestBuilder};
use snapsync::concurrency::rate_limit::RateLimiter;
use snapsync::concurrency::single_flight::SingleFlightGuard;
use snapsync::destination::memory::MemoryDestination;
use snapsync::error::SyncResult;
use snapsync::pipeline::{SyncPipeline, SyncSummary};
use snapsync::service::{DEFAULT_RUN_TIMEOUT, PipelineFactory, SyncService};
use snapsync::test_utils::archive::ArchiveBuilder;
use snapsync::test_utils::notifier::ChannelNotifier;
use snapsync::test_utils::source::ScriptedSource;
use snapsync_api::config::{ApplicationSettings, ServerConfig};
use snapsync_api::routes::sync::TriggerSyncRequest;
use snapsync_api::startup::run;
use snapsync_config::shared::{
    DestinationConfig, PgConnectionConfig, PipelineConfig, RateLimitConfig, TlsConfig,
};
use std::collections::HashMap;
use std::io;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

pub const API_KEY: &str = "test-api-key";

pub struct TestFactory {
    source: ScriptedSource,
    destination: MemoryDestination,
}

impl PipelineFactory for TestFactory {
    type Source = ScriptedSource;
    type Destination = MemoryDestination;

    async fn create(
        &self,
        _resource_key: &str,
    ) -> SyncResult<SyncPipeline<ScriptedSource, MemoryDestination>> {
        Ok(SyncPipeline::from_config(
            self.source.clone(),
            self.destination.clone(),
            &PipelineConfig::default(),
        ))
    }
}

pub struct TestApp {
    pub address: String,
    pub api_client: reqwest::Client,
    pub destination: MemoryDestination,
    pub completions: UnboundedReceiver<SyncSummary>,
    server_handle: tokio::task::JoinHandle<io::Result<()>>,
}

impl TestApp {
    fn post_authenticated<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.api_client.post(url).bearer_auth(API_KEY)
    }

    pub async fn trigger_sync(
        &self,
        resource_key: &str,
        request: &TriggerSyncRequest,
    ) -> reqwest::Response {
        self.post_authenticated(format!("{}/v1/sync/{resource_key}", &self.address))
            .json(request)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn trigger_sync_from(
        &self,
        caller: &str,
        resource_key: &str,
        request: &TriggerSyncRequest,
    ) -> reqwest::Response {
        self.post_authenticated(format!("{}/v1/sync/{resource_key}", &self.address))
            .header("x-forwarded-for", caller)
            .json(request)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn read_rate_limit_stats(&self) -> reqwest::Response {
        self.api_client
            .get(format!("{}/v1/rate-limit-stats", &self.address))
            .bearer_auth(API_KEY)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    /// Waits for the next finished run.
    pub async fn next_completion(&mut self) -> SyncSummary {
        tokio::time::timeout(Duration::from_secs(30), self.completions.recv())
            .await
            .expect("no run finished in time")
            .expect("notifier dropped")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

pub fn sync_request(credential: &str) -> TriggerSyncRequest {
    TriggerSyncRequest {
        run_id: None,
        credential: credential.into(),
        tables: None,
        table_mapping: HashMap::new(),
        column_mapping: HashMap::new(),
    }
}

pub fn users_archive() -> ArchiveBuilder {
    ArchiveBuilder::new().table(
        "users",
        &[r#"{"_id":"u1","name":"Ann"}"#, r#"{"_id":"u2","name":"Bo"}"#],
    )
}

fn server_config(rate_limit: RateLimitConfig) -> ServerConfig {
    ServerConfig {
        application: ApplicationSettings {
            host: "127.0.0.1".to_owned(),
            port: 0,
        },
        destination: DestinationConfig {
            connection: PgConnectionConfig {
                host: "localhost".to_owned(),
                port: 5432,
                name: "warehouse".to_owned(),
                username: "postgres".to_owned(),
                password: None,
                tls: TlsConfig::default(),
            },
            schema: "public".to_owned(),
        },
        pipeline: PipelineConfig::default(),
        rate_limit,
        api_keys: vec![API_KEY.to_owned()],
        callback_url: None,
        sentry: None,
    }
}

pub async fn spawn_test_app() -> TestApp {
    spawn_test_app_with(ScriptedSource::new(&users_archive()), RateLimitConfig::default()).await
}

pub async fn spawn_test_app_with(source: ScriptedSource, rate_limit: RateLimitConfig) -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{port}");

    let destination = MemoryDestination::new();
    let (notifier, completions) = ChannelNotifier::new();
    let service = SyncService::new(
        TestFactory {
            source,
            destination: destination.clone(),
        },
        notifier,
        Arc::new(RateLimiter::new(&rate_limit)),
        Arc::new(SingleFlightGuard::new()),
        DEFAULT_RUN_TIMEOUT,
    );

    let server = run(server_config(rate_limit), listener, Arc::new(service))
        .await
        .expect("failed to build server");
    let server_handle = tokio::spawn(server);

    TestApp {
        address,
        api_client: reqwest::Client::new(),
        destination,
        completions,
        server_handle,
    }
}
