//! Per-client token-bucket rate limiting.
//!
//! Each client (authenticated user id, else client IP) gets its own bucket.
//! Buckets carry a last-seen stamp; a background reaper evicts buckets idle
//! past the configured expiration. Tokens consumed by a cancelled request are
//! not returned.

use crate::config::RateLimitConfig;
use dashmap::DashMap;
use governor::{clock::DefaultClock, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info};

type DirectRateLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

struct Bucket {
    limiter: DirectRateLimiter,
    /// Seconds since the limiter's start instant.
    last_seen: AtomicU64,
}

/// Keyed token-bucket limiter with idle eviction.
pub struct ClientRateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, Arc<Bucket>>,
    started_at: Instant,
    stop_tx: watch::Sender<bool>,
    reaper: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ClientRateLimiter {
    pub fn new(config: RateLimitConfig) -> Arc<Self> {
        let (stop_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            buckets: DashMap::new(),
            started_at: Instant::now(),
            stop_tx,
            reaper: std::sync::Mutex::new(None),
        })
    }

    fn now_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    fn quota(&self) -> Quota {
        let limit = NonZeroU32::new(self.config.limit_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(self.config.burst).unwrap_or(NonZeroU32::MIN);
        Quota::per_second(limit).allow_burst(burst)
    }

    /// Take one token from the client's bucket. On rejection, returns the
    /// seconds until the bucket can serve the request.
    pub fn check(&self, client_key: &str) -> Result<(), u64> {
        if !self.config.enabled {
            return Ok(());
        }

        // The double-check is inside DashMap's entry API: concurrent callers
        // for a new key allocate at most one bucket.
        let bucket = self
            .buckets
            .entry(client_key.to_string())
            .or_insert_with(|| {
                Arc::new(Bucket {
                    limiter: RateLimiter::direct(self.quota()),
                    last_seen: AtomicU64::new(0),
                })
            })
            .clone();
        bucket.last_seen.store(self.now_secs(), Ordering::Relaxed);

        match bucket.limiter.check() {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let retry_after = not_until
                    .wait_time_from(governor::clock::Clock::now(&DefaultClock::default()))
                    .as_secs()
                    .max(1);
                Err(retry_after)
            }
        }
    }

    /// Evict buckets idle past the expiration. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = self.now_secs();
        let ttl = self.config.expiration.as_secs();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_sub(bucket.last_seen.load(Ordering::Relaxed)) < ttl);
        let dropped = before - self.buckets.len();
        if dropped > 0 {
            debug!(dropped, "rate limiter reaper evicted idle buckets");
        }
        dropped
    }

    /// Number of live buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Start the background reaper. Idempotent.
    pub fn start_reaper(self: Arc<Self>) {
        let mut guard = self.reaper.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            return;
        }

        let limiter = Arc::clone(&self);
        let mut stop_rx = self.stop_tx.subscribe();
        let interval = self.config.reap_interval;
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        limiter.sweep();
                    }
                    _ = stop_rx.changed() => {
                        info!("rate limiter reaper stopping");
                        break;
                    }
                }
            }
        }));
    }

    /// Stop the reaper and wait for it to exit.
    pub async fn shutdown(&self) {
        let _ = self.stop_tx.send(true);
        let handle = {
            let mut guard = self.reaper.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
