//! Admission control for calls against the metered remote API.
//!
//! This module provides:
//!
//! - [`AdmissionControl`]: Trait gating every remote call
//! - [`AdmissionResult`]: Granted, denied-for-today, or denied-must-wait
//! - [`AdmissionConfig`]: Per-key bucket, quota, and backoff settings
//!
//! ## Design Principles
//!
//! - **Two independent gates**: A token bucket smooths bursts over seconds
//!   while a fixed daily counter enforces the hard per-day ceiling; both
//!   must pass
//! - **Fairness**: All state is partitioned per key, so one property's
//!   exhaustion can never starve another's admission
//! - **Advisory, never blocking**: `acquire` returns immediately; on
//!   `DeniedMustWait` the caller suspends for the returned duration and
//!   retries, which keeps the controller usable from any concurrency model

pub mod backoff;
pub mod bucket;
pub mod daily;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use siphon_core::PropertyKey;

use crate::error::Result;

/// Configuration for one key's admission state.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionConfig {
    /// Maximum burst tokens in the bucket.
    pub bucket_capacity: f64,
    /// Token refill rate in tokens per second.
    pub refill_rate_per_sec: f64,
    /// Maximum calls per UTC day.
    pub daily_limit: u32,
    /// Base delay for exponential backoff after remote failures.
    pub base_delay: Duration,
    /// Cap on the computed backoff delay.
    pub max_delay: Duration,
    /// Uniform jitter fraction applied to backoff delays (e.g. 0.2 = ±20%).
    pub jitter_fraction: f64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            bucket_capacity: 10.0,
            refill_rate_per_sec: 0.5,
            daily_limit: 2_000,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            jitter_fraction: 0.2,
        }
    }
}

impl AdmissionConfig {
    /// Creates a config with the given bucket shape and daily limit,
    /// keeping default backoff settings.
    #[must_use]
    pub fn new(bucket_capacity: f64, refill_rate_per_sec: f64, daily_limit: u32) -> Self {
        Self {
            bucket_capacity,
            refill_rate_per_sec,
            daily_limit,
            ..Self::default()
        }
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionResult {
    /// The call may proceed now; tokens and daily quota were consumed.
    Granted,
    /// The key's daily quota is exhausted.
    ///
    /// The caller should stop entirely for this key today, not retry-wait.
    DeniedQuotaExhausted,
    /// Not enough tokens yet; retry after the given wait.
    DeniedMustWait(Duration),
}

impl AdmissionResult {
    /// Returns true if the call was admitted.
    #[must_use]
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Outcome of a remote call, reported back after completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The call succeeded; backoff state for the key is cleared.
    Success,
    /// The remote side throttled the call (HTTP 429 or quota response).
    Throttled,
    /// A transient remote failure (HTTP 5xx, connection reset).
    TransientError,
    /// A non-retryable failure (auth, not-found). Does not adjust backoff.
    PermanentError,
}

/// Gate for calls against a metered remote resource.
///
/// `acquire` is the only admission entry point; all rate-limiting logic
/// is encapsulated so callers need not understand buckets or windows.
/// `report_outcome` feeds remote-side results back so the controller can
/// maintain per-key backoff state.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` to support concurrent access from
/// multiple property workers. State is partitioned per key, so no caller
/// observes another key's contention.
#[async_trait]
pub trait AdmissionControl: Send + Sync {
    /// Checks whether `cost` calls for `key` may proceed at `now`.
    ///
    /// Keys are created lazily on first use with the controller's default
    /// config. Admission consumes tokens and daily quota only on
    /// [`AdmissionResult::Granted`]; denials consume nothing.
    async fn acquire(
        &self,
        key: &PropertyKey,
        cost: u32,
        now: DateTime<Utc>,
    ) -> Result<AdmissionResult>;

    /// Reports the outcome of a previously admitted call.
    ///
    /// `Success` clears the key's backoff state; `Throttled` and
    /// `TransientError` grow it exponentially with jitter; `PermanentError`
    /// leaves it untouched.
    async fn report_outcome(
        &self,
        key: &PropertyKey,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Returns the time before which the key should not be retried, if
    /// the key is currently backing off.
    async fn retry_at(&self, key: &PropertyKey) -> Result<Option<DateTime<Utc>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let config = AdmissionConfig::default();
        assert!(config.bucket_capacity > 0.0);
        assert!(config.refill_rate_per_sec > 0.0);
        assert!(config.daily_limit > 0);
        assert!(config.base_delay < config.max_delay);
    }

    #[test]
    fn admission_result_is_granted() {
        assert!(AdmissionResult::Granted.is_granted());
        assert!(!AdmissionResult::DeniedQuotaExhausted.is_granted());
        assert!(!AdmissionResult::DeniedMustWait(Duration::from_secs(1)).is_granted());
    }
}
