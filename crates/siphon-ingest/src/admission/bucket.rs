//! Token bucket for smoothing short-term burst behavior.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// A token bucket with time-proportional refill.
///
/// Invariant: `0 <= tokens <= capacity` at all times. Tokens only
/// increase via refill and only decrease via a successful take.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate_per_sec: f64,
    tokens: f64,
    last_refill_at: DateTime<Utc>,
}

impl TokenBucket {
    /// Creates a full bucket.
    #[must_use]
    pub fn new(capacity: f64, refill_rate_per_sec: f64, now: DateTime<Utc>) -> Self {
        Self {
            capacity,
            refill_rate_per_sec,
            tokens: capacity,
            last_refill_at: now,
        }
    }

    /// Refills tokens proportionally to elapsed time, clamped to capacity.
    ///
    /// A clock that moves backwards contributes zero elapsed time.
    pub fn refill(&mut self, now: DateTime<Utc>) {
        let elapsed_ms = (now - self.last_refill_at).num_milliseconds().max(0);
        #[allow(clippy::cast_precision_loss)]
        let elapsed_secs = elapsed_ms as f64 / 1_000.0;
        self.tokens = (self.tokens + elapsed_secs * self.refill_rate_per_sec).min(self.capacity);
        self.last_refill_at = now;
    }

    /// Takes `cost` tokens if available.
    ///
    /// Returns `Ok(())` on success, or `Err(wait)` with the duration until
    /// enough tokens will have accrued. Call [`TokenBucket::refill`] first.
    pub fn try_take(&mut self, cost: f64) -> Result<(), Duration> {
        if self.tokens >= cost {
            self.tokens -= cost;
            return Ok(());
        }
        let deficit = cost - self.tokens;
        let wait_secs = deficit / self.refill_rate_per_sec;
        Err(Duration::from_secs_f64(wait_secs))
    }

    /// Current token count.
    #[must_use]
    pub const fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Bucket capacity.
    #[must_use]
    pub const fn capacity(&self) -> f64 {
        self.capacity
    }
}
