//! Exponential backoff as explicit, inspectable state.
//!
//! Backoff is modeled as data (`next_retry_at`) rather than control flow
//! so the same logic is testable synchronously without wall-clock waits.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

/// Per-key backoff state after observed remote-side failures.
///
/// Created on the first throttled/transient response, cleared on the next
/// success. Distinct from local admission denial, which never touches this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffState {
    /// Failures observed without an intervening success.
    pub consecutive_failures: u32,
    /// Do not retry the key before this time.
    pub next_retry_at: DateTime<Utc>,
}

/// Policy computing backoff delays from a failure count.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
    jitter_fraction: f64,
}

impl BackoffPolicy {
    /// Creates a policy with the given base, cap, and jitter fraction.
    #[must_use]
    pub const fn new(base_delay: Duration, max_delay: Duration, jitter_fraction: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_fraction,
        }
    }

    /// The un-jittered delay for a given failure count:
    /// `min(max_delay, base_delay * 2^failures)`.
    ///
    /// Monotone non-decreasing in `failures`.
    #[must_use]
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let factor = 2_u64.saturating_pow(consecutive_failures.min(32));
        let raw = self
            .base_delay
            .saturating_mul(u32::try_from(factor).unwrap_or(u32::MAX));
        raw.min(self.max_delay)
    }

    /// Applies a sampled jitter fraction in `[-jitter, +jitter]` to a delay,
    /// floored at zero.
    ///
    /// The fraction is passed in rather than sampled here so callers can
    /// fix it in tests.
    #[must_use]
    pub fn delay_with_jitter(&self, consecutive_failures: u32, fraction: f64) -> Duration {
        let base = self.delay_for(consecutive_failures);
        let scaled = base.as_secs_f64() * (1.0 + fraction.clamp(-1.0, 1.0));
        Duration::from_secs_f64(scaled.max(0.0))
    }

    /// Samples a jitter fraction uniformly from `[-jitter_fraction, +jitter_fraction]`.
    #[must_use]
    pub fn sample_jitter(&self) -> f64 {
        if self.jitter_fraction <= 0.0 {
            return 0.0;
        }
        rand::thread_rng().gen_range(-self.jitter_fraction..=self.jitter_fraction)
    }

    /// Advances backoff state after a throttled/transient failure at `now`.
    ///
    /// Jitter desynchronizes retry storms across many concurrently
    /// throttled keys.
    #[must_use]
    pub fn advance(&self, previous: Option<&BackoffState>, now: DateTime<Utc>) -> BackoffState {
        let failures = previous.map_or(1, |s| s.consecutive_failures.saturating_add(1));
        let delay = self.delay_with_jitter(failures, self.sample_jitter());
        let chrono_delay =
            chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(0));
        BackoffState {
            consecutive_failures: failures,
            next_retry_at: now + chrono_delay,
        }
    }
}
