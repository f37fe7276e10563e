//! Per-endpoint rate limiting using the token bucket algorithm
//!
//! Each SMTP endpoint owns one limiter, shared by every job routed
//! through that endpoint regardless of which batch the job runs in.
//! Tokens accumulate at the configured sustained rate up to the burst
//! capacity, so steady-state throughput tracks the configured rate while
//! short bursts are absorbed, which matches sending providers' own burst
//! tolerance.
//!
//! ```text
//! Rate limit: 10 msg/sec, burst: 20
//! - Bucket starts with 20 tokens
//! - Tokens refill at 10/sec
//! - Can send 20 messages immediately (burst)
//! - Then limited to 10/sec sustained rate
//! ```

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use herald_common::{Endpoint, RateLimitParams};
use parking_lot::Mutex;

/// Sleep between acquisition attempts while waiting for a token
const RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// Floor for the refill rate, avoiding a bucket that never refills
const MIN_RATE: f64 = 0.1;

/// Token bucket state, mutated only under the owning limiter's mutex
#[derive(Debug)]
struct TokenBucket {
    /// Current number of tokens; fractional between acquisitions
    tokens: f64,
    /// Maximum tokens (burst capacity)
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    /// Last time tokens were added
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate: f64, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            tokens: capacity,
            capacity,
            refill_rate: rate.max(MIN_RATE),
            last_refill: Instant::now(),
        }
    }

    /// Refill tokens based on elapsed time, capped at capacity
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Try to consume one token
    fn try_consume(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Snapshot of a limiter's state, for diagnostics
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterStats {
    /// Currently available tokens
    pub available_tokens: f64,
    /// Maximum capacity (burst size)
    pub capacity: f64,
    /// Refill rate (tokens per second)
    pub refill_rate: f64,
}

/// Token bucket limiter for one endpoint
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    /// Create a limiter with the given sustained rate and burst capacity
    ///
    /// Rate and burst are clamped to minimum positive values so a zeroed
    /// configuration can never livelock an acquisition.
    #[must_use]
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(rate, burst)),
        }
    }

    /// Create a limiter from endpoint rate-limit parameters
    #[must_use]
    pub fn from_params(params: &RateLimitParams) -> Self {
        Self::new(params.tokens_per_second(), params.burst_capacity())
    }

    /// Consume one token if available, without waiting
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        self.bucket.lock().try_consume()
    }

    /// Acquire permission to send, waiting up to `timeout`
    ///
    /// Returns `false` when the timeout elapses without a token becoming
    /// available. Only the calling send task blocks; the control path
    /// never waits here.
    pub async fn acquire(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_acquire() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    /// Current bucket state
    #[must_use]
    pub fn stats(&self) -> RateLimiterStats {
        let mut bucket = self.bucket.lock();
        bucket.refill();
        RateLimiterStats {
            available_tokens: bucket.tokens,
            capacity: bucket.capacity,
            refill_rate: bucket.refill_rate,
        }
    }
}

/// Shared pool of limiters, keyed by SMTP endpoint nickname
///
/// Built once per campaign from the selected endpoint list and shared
/// read/write by every batch worker. The map itself is lock-free; each
/// entry serializes through its own limiter mutex, so unrelated endpoints
/// never contend.
#[derive(Debug, Default)]
pub struct RateLimiterPool {
    limiters: DashMap<String, Arc<RateLimiter>>,
}

impl RateLimiterPool {
    /// Create an empty pool
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pool with one limiter per SMTP endpoint
    #[must_use]
    pub fn from_endpoints(endpoints: &[Endpoint]) -> Self {
        let pool = Self::new();
        for endpoint in endpoints {
            if let Endpoint::Smtp(server) = endpoint {
                pool.register(&server.nickname, &server.rate);
            }
        }
        pool
    }

    /// Register (or replace) the limiter for a nickname
    pub fn register(&self, nickname: &str, params: &RateLimitParams) {
        self.limiters
            .insert(nickname.to_string(), Arc::new(RateLimiter::from_params(params)));
    }

    /// Look up the limiter for a nickname
    #[must_use]
    pub fn get(&self, nickname: &str) -> Option<Arc<RateLimiter>> {
        self.limiters.get(nickname).map(|entry| Arc::clone(&entry))
    }

    /// Number of registered limiters
    #[must_use]
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    /// Whether the pool has no limiters
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}
