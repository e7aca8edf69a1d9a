//! Per-caller admission control with token buckets and temporary blocking.
//!
//! Every caller identity owns a bucket holding up to `burst_size` tokens, refilled at
//! `requests_per_minute / 60` tokens per second. A request consumes one token. Callers that
//! keep sending more than twice the per-minute rate while being denied are blocked for a fixed
//! period. Idle buckets and expired blocks are reclaimed by [`RateLimiter::cleanup`].

use serde::Serialize;
use snapsync_config::shared::RateLimitConfig;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::concurrency::shutdown::{ShutdownRx, wait_for_shutdown};

/// Window used to count recent requests for abuse detection.
const ABUSE_WINDOW: Duration = Duration::from_secs(60);

/// Minimum number of request timestamps kept per caller.
const MIN_HISTORY_CAPACITY: usize = 100;

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Bucket capacity.
    pub limit: u32,
    /// Whole tokens left after this request.
    pub remaining: u32,
    /// Seconds until the bucket is full again.
    pub reset_after_secs: u64,
    /// Seconds the caller should wait before retrying, set on denial.
    pub retry_after_secs: Option<u64>,
    /// Whether the caller is hard-blocked.
    pub blocked: bool,
}

/// Limiter counters exposed for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimiterStats {
    pub active_identities: usize,
    pub blocked_identities: usize,
    pub total_recent_requests: usize,
    pub requests_per_minute: u32,
    pub burst_size: u32,
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
    history: VecDeque<Instant>,
}

impl TokenBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            last_seen: now,
            history: VecDeque::new(),
        }
    }

    fn refill(&mut self, now: Instant, tokens_per_sec: f64, capacity: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * tokens_per_sec).min(capacity);
        self.last_refill = now;
    }

    fn record_admitted(&mut self, now: Instant, capacity: usize) {
        self.history.push_back(now);
        while self.history.len() > capacity {
            self.history.pop_front();
        }
    }

    fn recent_requests(&self, now: Instant) -> usize {
        self.history
            .iter()
            .rev()
            .take_while(|at| now.saturating_duration_since(**at) <= ABUSE_WINDOW)
            .count()
    }
}

#[derive(Debug)]
struct BlockEntry {
    unblock_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    buckets: HashMap<String, TokenBucket>,
    blocks: HashMap<String, BlockEntry>,
}

/// Token-bucket rate limiter keyed by caller identity.
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_minute: u32,
    burst_size: u32,
    block_duration: Duration,
    cleanup_interval: Duration,
    idle_timeout: Duration,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            requests_per_minute: config.requests_per_minute.max(1),
            burst_size: config.burst_size.max(1),
            block_duration: Duration::from_secs(config.block_duration_secs),
            cleanup_interval: Duration::from_secs(config.cleanup_interval_secs.max(1)),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tokens_per_sec(&self) -> f64 {
        f64::from(self.requests_per_minute) / 60.0
    }

    fn history_capacity(&self) -> usize {
        MIN_HISTORY_CAPACITY.max(2 * self.requests_per_minute as usize + 1)
    }

    /// Seconds until one token is available at the per-minute refill rate.
    fn token_interval_secs(&self) -> u64 {
        60u64.div_ceil(u64::from(self.requests_per_minute))
    }

    /// Decides whether `identity` may make a request now, consuming a token if so.
    pub fn is_allowed(&self, identity: &str) -> RateLimitDecision {
        let now = Instant::now();
        let capacity = f64::from(self.burst_size);
        let mut state = self.lock();
        let State { buckets, blocks } = &mut *state;

        if let Some(block) = blocks.get(identity) {
            if now < block.unblock_at {
                let retry_after = ceil_secs(block.unblock_at - now);
                return self.blocked_decision(retry_after);
            }
            blocks.remove(identity);
            info!(identity, "rate limit block expired");
        }

        let bucket = buckets
            .entry(identity.to_owned())
            .or_insert_with(|| TokenBucket::full(capacity, now));
        bucket.refill(now, self.tokens_per_sec(), capacity);
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            bucket.record_admitted(now, self.history_capacity());
            return RateLimitDecision {
                allowed: true,
                limit: self.burst_size,
                remaining: bucket.tokens.floor() as u32,
                reset_after_secs: self.reset_after_secs(bucket.tokens),
                retry_after_secs: None,
                blocked: false,
            };
        }

        let recent_requests = bucket.recent_requests(now);
        if recent_requests > 2 * self.requests_per_minute as usize {
            blocks.insert(
                identity.to_owned(),
                BlockEntry {
                    unblock_at: now + self.block_duration,
                },
            );
            warn!(
                identity,
                recent_requests,
                block_secs = self.block_duration.as_secs(),
                "caller blocked for excessive request rate"
            );
            return self.blocked_decision(self.block_duration.as_secs());
        }

        debug!(identity, "request rate limited");
        RateLimitDecision {
            allowed: false,
            limit: self.burst_size,
            remaining: 0,
            reset_after_secs: self.reset_after_secs(bucket.tokens),
            retry_after_secs: Some(self.token_interval_secs()),
            blocked: false,
        }
    }

    fn blocked_decision(&self, retry_after_secs: u64) -> RateLimitDecision {
        RateLimitDecision {
            allowed: false,
            limit: self.burst_size,
            remaining: 0,
            reset_after_secs: retry_after_secs,
            retry_after_secs: Some(retry_after_secs),
            blocked: true,
        }
    }

    fn reset_after_secs(&self, tokens: f64) -> u64 {
        let missing = (f64::from(self.burst_size) - tokens).max(0.0);
        (missing / self.tokens_per_sec()).ceil() as u64
    }

    /// Drops buckets idle for longer than the idle timeout and expired blocks.
    ///
    /// Returns the number of buckets and blocks removed.
    pub fn cleanup(&self) -> (usize, usize) {
        let now = Instant::now();
        let mut state = self.lock();

        let buckets_before = state.buckets.len();
        state
            .buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_seen) <= self.idle_timeout);

        let blocks_before = state.blocks.len();
        state.blocks.retain(|_, block| now < block.unblock_at);

        let removed = (
            buckets_before - state.buckets.len(),
            blocks_before - state.blocks.len(),
        );
        if removed != (0, 0) {
            debug!(
                removed_buckets = removed.0,
                removed_blocks = removed.1,
                "rate limiter cleanup"
            );
        }

        removed
    }

    pub fn stats(&self) -> RateLimiterStats {
        let now = Instant::now();
        let state = self.lock();

        RateLimiterStats {
            active_identities: state.buckets.len(),
            blocked_identities: state
                .blocks
                .values()
                .filter(|block| now < block.unblock_at)
                .count(),
            total_recent_requests: state
                .buckets
                .values()
                .map(|bucket| bucket.recent_requests(now))
                .sum(),
            requests_per_minute: self.requests_per_minute,
            burst_size: self.burst_size,
        }
    }

    /// Runs [`RateLimiter::cleanup`] periodically until `shutdown` fires.
    pub fn spawn_cleanup(self: Arc<Self>, mut shutdown: ShutdownRx) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.cleanup_interval);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.cleanup();
                    }
                    _ = wait_for_shutdown(&mut shutdown) => {
                        info!("rate limiter cleanup stopped");
                        break;
                    }
                }
            }
        })
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;

    fn limiter(requests_per_minute: u32, burst_size: u32) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            requests_per_minute,
            burst_size,
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_allowed_then_denied() {
        let limiter = limiter(60, 10);

        for expected_remaining in (0..10).rev() {
            let decision = limiter.is_allowed("10.0.0.1");
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let decision = limiter.is_allowed("10.0.0.1");
        assert!(!decision.allowed);
        assert!(!decision.blocked);
        assert_eq!(decision.retry_after_secs, Some(1));
        assert_eq!(decision.limit, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_refill_over_time() {
        let limiter = limiter(30, 2);
        assert!(limiter.is_allowed("a").allowed);
        assert!(limiter.is_allowed("a").allowed);

        let denied = limiter.is_allowed("a");
        assert_eq!(denied.retry_after_secs, Some(2));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(limiter.is_allowed("a").allowed);
        assert!(!limiter.is_allowed("a").allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn identities_have_separate_buckets() {
        let limiter = limiter(60, 1);
        assert!(limiter.is_allowed("a").allowed);
        assert!(!limiter.is_allowed("a").allowed);
        assert!(limiter.is_allowed("b").allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn abusive_caller_is_blocked() {
        let limiter = limiter(1, 5);

        for _ in 0..5 {
            assert!(limiter.is_allowed("a").allowed);
        }

        let blocked = limiter.is_allowed("a");
        assert!(blocked.blocked);
        assert_eq!(blocked.retry_after_secs, Some(300));

        tokio::time::advance(Duration::from_secs(100)).await;
        let still_blocked = limiter.is_allowed("a");
        assert!(still_blocked.blocked);
        assert_eq!(still_blocked.retry_after_secs, Some(200));
        assert_eq!(limiter.stats().blocked_identities, 1);

        tokio::time::advance(Duration::from_secs(201)).await;
        assert!(limiter.is_allowed("a").allowed);
        assert_eq!(limiter.stats().blocked_identities, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn denied_requests_do_not_count_towards_blocking() {
        let limiter = limiter(1, 1);

        assert!(limiter.is_allowed("a").allowed);
        for _ in 0..10 {
            let denied = limiter.is_allowed("a");
            assert!(!denied.allowed);
            assert!(!denied.blocked);
            assert_eq!(denied.retry_after_secs, Some(60));
        }

        assert_eq!(limiter.stats().blocked_identities, 0);
        assert_eq!(limiter.stats().total_recent_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_reclaims_idle_buckets_and_expired_blocks() {
        let limiter = limiter(1, 5);
        for _ in 0..6 {
            limiter.is_allowed("abuser");
        }
        limiter.is_allowed("idle");
        assert_eq!(limiter.stats().active_identities, 2);
        assert_eq!(limiter.stats().blocked_identities, 1);

        tokio::time::advance(Duration::from_secs(1800)).await;
        limiter.is_allowed("fresh");
        tokio::time::advance(Duration::from_secs(1801)).await;

        assert_eq!(limiter.cleanup(), (2, 1));
        let stats = limiter.stats();
        assert_eq!(stats.active_identities, 1);
        assert_eq!(stats.blocked_identities, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_count_recent_requests() {
        let limiter = limiter(60, 10);
        limiter.is_allowed("a");
        limiter.is_allowed("a");
        limiter.is_allowed("b");

        let stats = limiter.stats();
        assert_eq!(stats.active_identities, 2);
        assert_eq!(stats.total_recent_requests, 3);
        assert_eq!(stats.requests_per_minute, 60);
        assert_eq!(stats.burst_size, 10);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.stats().total_recent_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_task_runs_until_shutdown() {
        let limiter = Arc::new(limiter(60, 10));
        limiter.is_allowed("a");

        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let handle = limiter.clone().spawn_cleanup(shutdown_rx);

        tokio::time::sleep(Duration::from_secs(3601 + 300)).await;
        assert_eq!(limiter.stats().active_identities, 0);

        assert!(shutdown_tx.shutdown());
        handle.await.unwrap();
    }
}
