//! In-memory admission controller.
//!
//! This module provides [`InMemoryAdmissionController`], the single-process
//! implementation of the [`AdmissionControl`] trait. Per-key state lives in
//! a `RwLock<HashMap>`; keys are created lazily on first use and live for
//! the process lifetime.
//!
//! ## Limitations
//!
//! - **Single-process only**: State is not shared across process boundaries.
//!   Externalize the key state behind the same trait for multi-process use.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use siphon_core::PropertyKey;

use super::backoff::{BackoffPolicy, BackoffState};
use super::bucket::TokenBucket;
use super::daily::DailyQuota;
use super::{AdmissionConfig, AdmissionControl, AdmissionResult, Outcome};
use crate::error::{Error, Result};

/// Rate-governing state for a single key.
#[derive(Debug)]
struct KeyState {
    bucket: TokenBucket,
    daily: DailyQuota,
    backoff: Option<BackoffState>,
    policy: BackoffPolicy,
}

impl KeyState {
    fn new(config: &AdmissionConfig, now: DateTime<Utc>) -> Self {
        Self {
            bucket: TokenBucket::new(config.bucket_capacity, config.refill_rate_per_sec, now),
            daily: DailyQuota::new(config.daily_limit, now),
            backoff: None,
            policy: BackoffPolicy::new(
                config.base_delay,
                config.max_delay,
                config.jitter_fraction,
            ),
        }
    }
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("admission controller lock poisoned")
}

/// In-memory admission controller.
///
/// Thread-safe via a single `RwLock` around the key map; the lock is held
/// only for the duration of one key's counter updates, never across waits.
///
/// ## Example
///
/// ```rust
/// use siphon_ingest::admission::memory::InMemoryAdmissionController;
/// use siphon_ingest::admission::AdmissionConfig;
///
/// let controller = InMemoryAdmissionController::with_default_config(
///     AdmissionConfig::new(5.0, 1.0, 200),
/// );
/// ```
#[derive(Debug)]
pub struct InMemoryAdmissionController {
    keys: RwLock<HashMap<PropertyKey, KeyState>>,
    default_config: AdmissionConfig,
    overrides: RwLock<HashMap<PropertyKey, AdmissionConfig>>,
}

impl Default for InMemoryAdmissionController {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAdmissionController {
    /// Creates a controller with [`AdmissionConfig::default`] for every key.
    #[must_use]
    pub fn new() -> Self {
        Self::with_default_config(AdmissionConfig::default())
    }

    /// Creates a controller with the given default config for new keys.
    #[must_use]
    pub fn with_default_config(default_config: AdmissionConfig) -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            default_config,
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// Sets a per-key config override, applied when the key's state is
    /// first created. Has no effect on a key that is already live.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn set_config(&self, key: PropertyKey, config: AdmissionConfig) -> Result<()> {
        let mut overrides = self.overrides.write().map_err(poison_err)?;
        overrides.insert(key, config);
        drop(overrides);
        Ok(())
    }

    /// The number of keys with live state.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn key_count(&self) -> Result<usize> {
        let keys = self.keys.read().map_err(poison_err)?;
        Ok(keys.len())
    }

    fn config_for(&self, key: &PropertyKey) -> Result<AdmissionConfig> {
        let overrides = self.overrides.read().map_err(poison_err)?;
        Ok(overrides
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone()))
    }
}

#[async_trait]
impl AdmissionControl for InMemoryAdmissionController {
    async fn acquire(
        &self,
        key: &PropertyKey,
        cost: u32,
        now: DateTime<Utc>,
    ) -> Result<AdmissionResult> {
        let config = self.config_for(key)?;
        let mut keys = self.keys.write().map_err(poison_err)?;
        let state = keys
            .entry(key.clone())
            .or_insert_with(|| KeyState::new(&config, now));

        // Hard daily ceiling first: exhaustion means stop for today,
        // so the bucket must not be drained for a call that cannot run.
        if state.daily.would_exceed(cost, now) {
            drop(keys);
            return Ok(AdmissionResult::DeniedQuotaExhausted);
        }

        state.bucket.refill(now);
        match state.bucket.try_take(f64::from(cost)) {
            Ok(()) => {
                // Daily quota is billed only on grant; a must-wait denial
                // costs nothing.
                state.daily.consume(cost);
                drop(keys);
                Ok(AdmissionResult::Granted)
            }
            Err(wait) => {
                drop(keys);
                Ok(AdmissionResult::DeniedMustWait(wait))
            }
        }
    }

    async fn report_outcome(
        &self,
        key: &PropertyKey,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut keys = self.keys.write().map_err(poison_err)?;
        let Some(state) = keys.get_mut(key) else {
            // Outcome for a key that never acquired: nothing to track.
            drop(keys);
            return Ok(());
        };

        match outcome {
            Outcome::Success => state.backoff = None,
            Outcome::Throttled | Outcome::TransientError => {
                state.backoff = Some(state.policy.advance(state.backoff.as_ref(), now));
            }
            Outcome::PermanentError => {}
        }
        drop(keys);
        Ok(())
    }

    async fn retry_at(&self, key: &PropertyKey) -> Result<Option<DateTime<Utc>>> {
        let keys = self.keys.read().map_err(poison_err)?;
        let retry_at = keys
            .get(key)
            .and_then(|s| s.backoff.as_ref())
            .map(|b| b.next_retry_at);
        drop(keys);
        Ok(retry_at)
    }
}
