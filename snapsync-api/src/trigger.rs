use snapsync::concurrency::rate_limit::RateLimiterStats;
use snapsync::destination::postgres::PostgresDestination;
use snapsync::error::SyncResult;
use snapsync::notifier::CompletionNotifier;
use snapsync::pipeline::{SyncPipeline, SyncRequest};
use snapsync::service::{PipelineFactory, SyncService, TriggerOutcome};
use snapsync::snapshot::CliSnapshotSource;
use snapsync_config::shared::{DestinationConfig, PipelineConfig};
use tracing::info;

/// Entry point of the sync routes, independent of the pipeline and notifier types.
pub trait SyncTrigger: Send + Sync {
    fn trigger(&self, identity: &str, resource_key: &str, request: SyncRequest) -> TriggerOutcome;

    fn rate_limit_stats(&self) -> RateLimiterStats;
}

impl<F, N> SyncTrigger for SyncService<F, N>
where
    F: PipelineFactory + Send + Sync + 'static,
    N: CompletionNotifier + Send + Sync + 'static,
{
    fn trigger(&self, identity: &str, resource_key: &str, request: SyncRequest) -> TriggerOutcome {
        SyncService::trigger(self, identity, resource_key, request)
    }

    fn rate_limit_stats(&self) -> RateLimiterStats {
        self.limiter().stats()
    }
}

/// Builds pipelines exporting with the CLI source into the configured Postgres database.
#[derive(Debug, Clone)]
pub struct PostgresPipelineFactory {
    pipeline: PipelineConfig,
    destination: DestinationConfig,
}

impl PostgresPipelineFactory {
    pub fn new(pipeline: PipelineConfig, destination: DestinationConfig) -> Self {
        Self {
            pipeline,
            destination,
        }
    }
}

impl PipelineFactory for PostgresPipelineFactory {
    type Source = CliSnapshotSource;
    type Destination = PostgresDestination;

    async fn create(
        &self,
        resource_key: &str,
    ) -> SyncResult<SyncPipeline<CliSnapshotSource, PostgresDestination>> {
        let destination = PostgresDestination::connect(&self.destination).await?;
        info!(
            resource_key,
            schema = self.destination.schema,
            "connected to destination database"
        );

        Ok(SyncPipeline::from_config(
            CliSnapshotSource::new(self.pipeline.snapshot.clone()),
            destination,
            &self.pipeline,
        ))
    }
}
