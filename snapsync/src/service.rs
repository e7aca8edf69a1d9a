use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};

use crate::concurrency::rate_limit::{RateLimitDecision, RateLimiter};
use crate::concurrency::single_flight::{FlightPermit, SingleFlightGuard};
use crate::destination::Destination;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::notifier::CompletionNotifier;
use crate::pipeline::{SyncPipeline, SyncRequest, SyncSummary};
use crate::snapshot::SnapshotSource;
use crate::sync_error;

/// Default end-to-end limit of a sync run.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(600);

/// Builds the pipeline serving a resource key.
pub trait PipelineFactory {
    type Source: SnapshotSource + Send + Sync + 'static;
    type Destination: Destination + Send + Sync + 'static;

    fn create(
        &self,
        resource_key: &str,
    ) -> impl Future<Output = SyncResult<SyncPipeline<Self::Source, Self::Destination>>> + Send;
}

/// Answer to a trigger request.
#[derive(Debug)]
pub enum TriggerOutcome {
    /// The run was started in the background.
    Accepted {
        run_id: String,
        rate_limit: RateLimitDecision,
        handle: JoinHandle<SyncSummary>,
    },
    /// A run for the same key is in progress.
    Conflict {
        existing_run_id: String,
        rate_limit: RateLimitDecision,
    },
    RateLimited {
        rate_limit: RateLimitDecision,
    },
    /// The request carries no usable source credential.
    Unauthorized {
        rate_limit: RateLimitDecision,
    },
}

impl TriggerOutcome {
    pub fn rate_limit(&self) -> &RateLimitDecision {
        match self {
            TriggerOutcome::Accepted { rate_limit, .. }
            | TriggerOutcome::Conflict { rate_limit, .. }
            | TriggerOutcome::RateLimited { rate_limit }
            | TriggerOutcome::Unauthorized { rate_limit } => rate_limit,
        }
    }
}

/// Owns the admission state shared by every trigger and starts sync runs.
///
/// A trigger is first checked against the caller's rate limit, then against the runs in
/// progress for its resource key. Accepted runs execute on their own task under the run
/// timeout, report to the notifier and release the key when they end, whatever the outcome.
#[derive(Debug)]
pub struct SyncService<F, N> {
    factory: Arc<F>,
    notifier: Arc<N>,
    limiter: Arc<RateLimiter>,
    guard: Arc<SingleFlightGuard>,
    run_timeout: Duration,
}

impl<F, N> Clone for SyncService<F, N> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            notifier: self.notifier.clone(),
            limiter: self.limiter.clone(),
            guard: self.guard.clone(),
            run_timeout: self.run_timeout,
        }
    }
}

impl<F, N> SyncService<F, N>
where
    F: PipelineFactory + Send + Sync + 'static,
    N: CompletionNotifier + Send + Sync + 'static,
{
    pub fn new(
        factory: F,
        notifier: N,
        limiter: Arc<RateLimiter>,
        guard: Arc<SingleFlightGuard>,
        run_timeout: Duration,
    ) -> Self {
        Self {
            factory: Arc::new(factory),
            notifier: Arc::new(notifier),
            limiter,
            guard,
            run_timeout,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn guard(&self) -> &Arc<SingleFlightGuard> {
        &self.guard
    }

    /// Admits and starts a sync of `resource_key` on behalf of `identity`.
    ///
    /// Must be called within a tokio runtime.
    pub fn trigger(&self, identity: &str, resource_key: &str, request: SyncRequest) -> TriggerOutcome {
        let rate_limit = self.limiter.is_allowed(identity);
        if !rate_limit.allowed {
            warn!(
                identity,
                resource_key,
                blocked = rate_limit.blocked,
                retry_after_secs = rate_limit.retry_after_secs,
                "sync trigger rate limited"
            );
            return TriggerOutcome::RateLimited { rate_limit };
        }

        if request.credential.is_blank() {
            warn!(identity, resource_key, "sync trigger without credential");
            return TriggerOutcome::Unauthorized { rate_limit };
        }

        let permit = match self.guard.try_acquire_permit(resource_key, &request.run_id) {
            Ok(permit) => permit,
            Err(err) => {
                info!(
                    resource_key,
                    run_id = request.run_id,
                    existing_run_id = err.holder,
                    "sync already running"
                );
                return TriggerOutcome::Conflict {
                    existing_run_id: err.holder,
                    rate_limit,
                };
            }
        };

        let run_id = request.run_id.clone();
        let handle = self.spawn_run(permit, request);
        info!(resource_key, run_id, "sync run accepted");

        TriggerOutcome::Accepted {
            run_id,
            rate_limit,
            handle,
        }
    }

    fn spawn_run(&self, permit: FlightPermit, request: SyncRequest) -> JoinHandle<SyncSummary> {
        let factory = self.factory.clone();
        let notifier = self.notifier.clone();
        let run_timeout = self.run_timeout;
        let span = info_span!("sync_run", run_id = %request.run_id, resource_key = %permit.key());

        let run = async move {
            let started = Instant::now();
            let started_at = Utc::now();

            let execution = async {
                let pipeline = factory.create(permit.key()).await?;
                Ok::<_, SyncError>(pipeline.run(&request).await)
            };

            let summary = match tokio::time::timeout(run_timeout, execution).await {
                Ok(Ok(summary)) => summary,
                Ok(Err(err)) => {
                    error!(error = %err, "failed to set up sync pipeline");
                    SyncSummary::aborted(request.run_id.clone(), started_at, started.elapsed(), &err)
                }
                Err(_) => {
                    let err = sync_error!(
                        ErrorKind::TimeoutError,
                        "Sync run timed out",
                        format!("run exceeded {}s", run_timeout.as_secs())
                    );
                    error!(error = %err, "sync run abandoned");
                    SyncSummary::aborted(request.run_id.clone(), started_at, started.elapsed(), &err)
                }
            };

            notifier.notify(&summary).await;

            // The key stays taken until the caller was told about the outcome.
            drop(permit);

            summary
        };

        tokio::spawn(run.instrument(span))
    }
}

#[cfg(test)]
mod tests {
    use snapsync_config::shared::{PipelineConfig, RateLimitConfig};

    use super::*;
    use crate::destination::memory::MemoryDestination;
    use crate::test_utils::archive::ArchiveBuilder;
    use crate::test_utils::notifier::ChannelNotifier;
    use crate::test_utils::source::ScriptedSource;

    struct TestFactory {
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

    fn service(
        source: ScriptedSource,
        burst_size: u32,
    ) -> (
        SyncService<TestFactory, ChannelNotifier>,
        MemoryDestination,
        tokio::sync::mpsc::UnboundedReceiver<SyncSummary>,
    ) {
        let destination = MemoryDestination::new();
        let (notifier, rx) = ChannelNotifier::new();
        let limiter = RateLimiter::new(&RateLimitConfig {
            burst_size,
            ..Default::default()
        });
        let service = SyncService::new(
            TestFactory {
                source,
                destination: destination.clone(),
            },
            notifier,
            Arc::new(limiter),
            Arc::new(SingleFlightGuard::new()),
            DEFAULT_RUN_TIMEOUT,
        );

        (service, destination, rx)
    }

    fn users_archive() -> ArchiveBuilder {
        ArchiveBuilder::new().table("users", &[r#"{"_id":"u1","name":"Ann"}"#])
    }

    fn request(run_id: &str) -> SyncRequest {
        SyncRequest::new(run_id, "prod:key".into())
    }

    #[tokio::test]
    async fn accepted_run_loads_notifies_and_releases_key() {
        let (service, destination, mut rx) = service(ScriptedSource::new(&users_archive()), 10);

        let outcome = service.trigger("10.0.0.1", "acme", request("run-1"));
        let TriggerOutcome::Accepted { run_id, handle, .. } = outcome else {
            panic!("expected the run to be accepted");
        };
        assert_eq!(run_id, "run-1");

        let summary = handle.await.unwrap();
        assert!(summary.is_success());
        assert_eq!(summary.rows_imported(), 1);

        let notified = rx.recv().await.unwrap();
        assert_eq!(notified.run_id, "run-1");
        assert!(!service.guard().is_running("acme"));
        assert_eq!(destination.table("users").await.unwrap().rows.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_trigger_for_running_key_conflicts() {
        let source = ScriptedSource::slow(&users_archive(), Duration::from_secs(5));
        let (service, _destination, _rx) = service(source, 10);

        let TriggerOutcome::Accepted { handle, .. } =
            service.trigger("10.0.0.1", "acme", request("run-1"))
        else {
            panic!("expected the first run to be accepted");
        };

        match service.trigger("10.0.0.2", "acme", request("run-2")) {
            TriggerOutcome::Conflict {
                existing_run_id, ..
            } => assert_eq!(existing_run_id, "run-1"),
            other => panic!("expected a conflict, got {other:?}"),
        }

        assert!(matches!(
            service.trigger("10.0.0.2", "globex", request("run-3")),
            TriggerOutcome::Accepted { .. }
        ));

        handle.await.unwrap();
        assert!(matches!(
            service.trigger("10.0.0.1", "acme", request("run-4")),
            TriggerOutcome::Accepted { .. }
        ));
    }

    #[tokio::test]
    async fn blank_credential_is_unauthorized() {
        let (service, _destination, _rx) = service(ScriptedSource::new(&users_archive()), 10);

        let outcome = service.trigger("10.0.0.1", "acme", SyncRequest::new("run-1", " ".into()));

        assert!(matches!(outcome, TriggerOutcome::Unauthorized { .. }));
        assert!(!service.guard().is_running("acme"));
    }

    #[tokio::test]
    async fn trigger_beyond_burst_is_rate_limited() {
        let (service, _destination, _rx) = service(ScriptedSource::new(&users_archive()), 1);

        let first = service.trigger("10.0.0.1", "acme", request("run-1"));
        assert!(matches!(first, TriggerOutcome::Accepted { .. }));

        let second = service.trigger("10.0.0.1", "globex", request("run-2"));
        let TriggerOutcome::RateLimited { rate_limit } = second else {
            panic!("expected the trigger to be rate limited");
        };
        assert_eq!(rate_limit.retry_after_secs, Some(1));
        assert!(!service.guard().is_running("globex"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_exceeding_timeout_is_reported_failed() {
        let source = ScriptedSource::slow(&users_archive(), Duration::from_secs(700));
        let destination = MemoryDestination::new();
        let (notifier, mut rx) = ChannelNotifier::new();
        let mut config = PipelineConfig::default();
        config.snapshot.timeout_secs = 3600;

        struct SlowFactory {
            source: ScriptedSource,
            destination: MemoryDestination,
            config: PipelineConfig,
        }

        impl PipelineFactory for SlowFactory {
            type Source = ScriptedSource;
            type Destination = MemoryDestination;

            async fn create(
                &self,
                _resource_key: &str,
            ) -> SyncResult<SyncPipeline<ScriptedSource, MemoryDestination>> {
                Ok(SyncPipeline::from_config(
                    self.source.clone(),
                    self.destination.clone(),
                    &self.config,
                ))
            }
        }

        let service = SyncService::new(
            SlowFactory {
                source,
                destination,
                config,
            },
            notifier,
            Arc::new(RateLimiter::new(&RateLimitConfig::default())),
            Arc::new(SingleFlightGuard::new()),
            DEFAULT_RUN_TIMEOUT,
        );

        let TriggerOutcome::Accepted { handle, .. } =
            service.trigger("10.0.0.1", "acme", request("run-1"))
        else {
            panic!("expected the run to be accepted");
        };

        let summary = handle.await.unwrap();
        assert!(!summary.is_success());
        assert_eq!(summary.error_kind, Some(ErrorKind::TimeoutError));
        assert_eq!(rx.recv().await.unwrap().run_id, "run-1");
        assert!(!service.guard().is_running("acme"));
    }
}
