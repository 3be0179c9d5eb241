//! Token Bucket Rate Limiter
//!
//! Gates outbound LLM calls so aggregate token consumption stays under a
//! per-minute budget. Refill is lazy: tokens accrue continuously at
//! `capacity / 60` per second and are credited on each consume attempt.
//!
//! One bucket is shared by every session of the process, so all reads and
//! writes go through a single mutex. Waiting for refill never holds it.

use crate::error::{ChatError, Result};
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Snapshot of a bucket's internal state
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterState {
    /// Max tokens per minute
    pub capacity: u32,
    /// Current token count, always within `0..=capacity`
    pub tokens: f64,
    /// Last time accrued tokens were credited
    pub last_refill: Instant,
}

impl RateLimiterState {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            let accrued = elapsed * self.refill_rate();
            self.tokens = (self.tokens + accrued).min(self.capacity as f64);
            self.last_refill = now;
        }
    }

    /// Tokens per second
    fn refill_rate(&self) -> f64 {
        self.capacity as f64 / 60.0
    }
}

pub struct TokenBucket {
    state: Mutex<RateLimiterState>,
}

impl TokenBucket {
    /// Create a full bucket holding `tokens_per_minute` tokens.
    pub fn new(tokens_per_minute: u32) -> Self {
        let capacity = tokens_per_minute.max(1);
        Self {
            state: Mutex::new(RateLimiterState {
                capacity,
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.lock().capacity
    }

    pub fn snapshot(&self) -> RateLimiterState {
        *self.lock()
    }

    /// Try to take `n` tokens now.
    pub fn consume(&self, n: u32) -> bool {
        self.consume_at(n, Instant::now())
    }

    /// Try to take `n` tokens as of `now`. On failure only the refill is kept.
    pub fn consume_at(&self, n: u32, now: Instant) -> bool {
        let mut state = self.lock();
        state.refill(now);
        let needed = n as f64;
        if state.tokens >= needed {
            state.tokens -= needed;
            true
        } else {
            false
        }
    }

    /// Minimal wait until the bucket holds `n` tokens.
    pub fn wait_time(&self, n: u32) -> Duration {
        self.wait_time_at(n, Instant::now())
    }

    pub fn wait_time_at(&self, n: u32, now: Instant) -> Duration {
        let state = self.lock();
        let missing = n as f64 - state.tokens;
        if missing <= 0.0 {
            return Duration::ZERO;
        }
        let per_token = 60.0 / state.capacity as f64;
        let since_refill = now.saturating_duration_since(state.last_refill).as_secs_f64();
        Duration::from_secs_f64((missing * per_token - since_refill).max(0.0))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RateLimiterState> {
        // State is plain data, a panic mid-update cannot leave it torn
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run `call` once `tokens` have been taken from `bucket`, sleeping for
/// refill as often as needed. Any request within capacity eventually runs.
pub async fn throttled<F, Fut, T>(bucket: &TokenBucket, tokens: u32, call: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let capacity = bucket.capacity();
    if tokens > capacity {
        return Err(ChatError::TokenBudgetExceeded {
            requested: tokens,
            capacity,
        });
    }

    while !bucket.consume(tokens) {
        // Floor at 1ms so float rounding cannot spin without time advancing
        let wait = bucket.wait_time(tokens).max(Duration::from_millis(1));
        info!(
            "⏳ Waiting {:.2}s for {} tokens to respect the per-minute budget",
            wait.as_secs_f64(),
            tokens
        );
        tokio::time::sleep(wait).await;
    }
    debug!("Consumed {} tokens", tokens);

    call().await
}
