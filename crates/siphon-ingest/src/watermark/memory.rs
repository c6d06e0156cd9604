//! In-memory watermark store for testing.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use siphon_core::{PropertyKey, SourceType};

use super::{CasResult, RunStatus, Watermark, WatermarkStore};
use crate::error::{Error, Result};

/// Default age after which a `Running` record is considered a crashed run.
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(3_600);

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("watermark store lock poisoned")
}

/// In-memory watermark store.
///
/// Provides row-level semantics per `(property, source)` key behind a
/// single `RwLock`. Suitable for tests and single-process runs; the
/// file-backed store in [`crate::watermark::fs`] adds durability.
#[derive(Debug)]
pub struct InMemoryWatermarkStore {
    rows: RwLock<HashMap<(PropertyKey, SourceType), Watermark>>,
    lease_timeout: Duration,
}

impl Default for InMemoryWatermarkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWatermarkStore {
    /// Creates an empty store with [`DEFAULT_LEASE_TIMEOUT`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_lease_timeout(DEFAULT_LEASE_TIMEOUT)
    }

    /// Creates an empty store with the given running-lease timeout.
    #[must_use]
    pub fn with_lease_timeout(lease_timeout: Duration) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            lease_timeout,
        }
    }

    /// Number of stored watermarks.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        let rows = self.rows.read().map_err(poison_err)?;
        Ok(rows.len())
    }

    /// Returns true if no watermarks are stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Applies monotonic-advance semantics: the incoming date only wins if it
/// does not regress the stored one.
fn merged_last_date(stored: Option<NaiveDate>, incoming: Option<NaiveDate>) -> Option<NaiveDate> {
    match (stored, incoming) {
        (Some(old), Some(new)) => Some(old.max(new)),
        (Some(old), None) => Some(old),
        (None, new) => new,
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarkStore {
    async fn get(&self, property: &PropertyKey, source: SourceType) -> Result<Option<Watermark>> {
        let rows = self.rows.read().map_err(poison_err)?;
        let found = rows.get(&(property.clone(), source)).cloned();
        drop(rows);
        Ok(found)
    }

    async fn upsert(&self, mut watermark: Watermark) -> Result<()> {
        let mut rows = self.rows.write().map_err(poison_err)?;
        let key = (watermark.property.clone(), watermark.source);
        if let Some(stored) = rows.get(&key) {
            watermark.last_date = merged_last_date(stored.last_date, watermark.last_date);
        }
        rows.insert(key, watermark);
        drop(rows);
        Ok(())
    }

    async fn mark_running(
        &self,
        property: &PropertyKey,
        source: SourceType,
        now: DateTime<Utc>,
    ) -> Result<CasResult> {
        let mut rows = self.rows.write().map_err(poison_err)?;
        let key = (property.clone(), source);

        if let Some(stored) = rows.get(&key) {
            if stored.lease_expires_at.is_some_and(|expires| now < expires) {
                let since = stored.last_run_at.unwrap_or(stored.updated_at);
                drop(rows);
                return Ok(CasResult::AlreadyRunning { since });
            }
            // Expired lease: the previous run crashed; take over.
        }

        let lease = chrono::Duration::from_std(self.lease_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(3_600));
        let entry = rows
            .entry(key)
            .or_insert_with(|| Watermark::pending(property.clone(), source, now));
        entry.last_run_status = RunStatus::Running;
        entry.last_run_at = Some(now);
        entry.lease_expires_at = Some(now + lease);
        entry.updated_at = now;
        drop(rows);
        Ok(CasResult::Acquired)
    }

    async fn release_lease(
        &self,
        property: &PropertyKey,
        source: SourceType,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut rows = self.rows.write().map_err(poison_err)?;
        if let Some(entry) = rows.get_mut(&(property.clone(), source)) {
            entry.lease_expires_at = None;
            entry.updated_at = now;
        }
        drop(rows);
        Ok(())
    }

    async fn mark_result(
        &self,
        property: &PropertyKey,
        source: SourceType,
        status: RunStatus,
        last_date: Option<NaiveDate>,
        failure_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut rows = self.rows.write().map_err(poison_err)?;
        let key = (property.clone(), source);
        let entry = rows
            .entry(key)
            .or_insert_with(|| Watermark::pending(property.clone(), source, now));

        entry.last_date = merged_last_date(entry.last_date, last_date);
        entry.last_run_status = status;
        entry.failure_reason = failure_reason;
        if status != RunStatus::Running {
            entry.lease_expires_at = None;
        }
        entry.updated_at = now;
        drop(rows);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Watermark>> {
        let rows = self.rows.read().map_err(poison_err)?;
        let mut all: Vec<Watermark> = rows.values().cloned().collect();
        drop(rows);
        all.sort_by(|a, b| {
            a.property
                .cmp(&b.property)
                .then_with(|| a.source.cmp(&b.source))
        });
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn property() -> PropertyKey {
        PropertyKey::new_unchecked("https://example.com/")
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_714_560_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn get_absent_returns_none() -> Result<()> {
        let store = InMemoryWatermarkStore::new();
        assert!(store
            .get(&property(), SourceType::SearchPerformance)
            .await?
            .is_none());
        Ok(())
    }

    #[tokio::test]
    async fn upsert_rejects_last_date_regression() -> Result<()> {
        let store = InMemoryWatermarkStore::new();
        let mut wm = Watermark::pending(property(), SourceType::SearchPerformance, at(0));
        wm.last_date = Some(date(10));
        store.upsert(wm.clone()).await?;

        wm.last_date = Some(date(5));
        store.upsert(wm).await?;

        let stored = store
            .get(&property(), SourceType::SearchPerformance)
            .await?
            .unwrap();
        assert_eq!(stored.last_date, Some(date(10)));
        Ok(())
    }

    #[tokio::test]
    async fn mark_running_takes_and_defends_the_lease() -> Result<()> {
        let store = InMemoryWatermarkStore::new();
        assert!(store
            .mark_running(&property(), SourceType::SearchPerformance, at(0))
            .await?
            .is_acquired());

        // Fresh lease: a second run is refused.
        match store
            .mark_running(&property(), SourceType::SearchPerformance, at(60))
            .await?
        {
            CasResult::AlreadyRunning { since } => assert_eq!(since, at(0)),
            CasResult::Acquired => panic!("lease should be held"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn stale_running_lease_is_taken_over() -> Result<()> {
        let store = InMemoryWatermarkStore::with_lease_timeout(Duration::from_secs(10));
        store
            .mark_running(&property(), SourceType::SearchPerformance, at(0))
            .await?;

        // Past the lease timeout, the record is a crashed run.
        assert!(store
            .mark_running(&property(), SourceType::SearchPerformance, at(11))
            .await?
            .is_acquired());
        Ok(())
    }

    #[tokio::test]
    async fn deliberate_stop_releases_the_lease_for_resume() -> Result<()> {
        let store = InMemoryWatermarkStore::new();
        store
            .mark_running(&property(), SourceType::SearchPerformance, at(0))
            .await?;

        // Mid-run advancement keeps the lease.
        store
            .mark_result(
                &property(),
                SourceType::SearchPerformance,
                RunStatus::Running,
                Some(date(3)),
                None,
                at(5),
            )
            .await?;
        assert!(!store
            .mark_running(&property(), SourceType::SearchPerformance, at(10))
            .await?
            .is_acquired());

        // A deliberate stop hands the lease back while staying running,
        // so the next invocation resumes well within the lease timeout.
        store
            .release_lease(&property(), SourceType::SearchPerformance, at(15))
            .await?;
        let stored = store
            .get(&property(), SourceType::SearchPerformance)
            .await?
            .unwrap();
        assert_eq!(stored.last_run_status, RunStatus::Running);
        assert!(stored.lease_expires_at.is_none());
        assert!(store
            .mark_running(&property(), SourceType::SearchPerformance, at(20))
            .await?
            .is_acquired());
        Ok(())
    }

    #[tokio::test]
    async fn terminal_result_releases_the_lease() -> Result<()> {
        let store = InMemoryWatermarkStore::new();
        store
            .mark_running(&property(), SourceType::SearchPerformance, at(0))
            .await?;
        store
            .mark_result(
                &property(),
                SourceType::SearchPerformance,
                RunStatus::Success,
                Some(date(10)),
                None,
                at(5),
            )
            .await?;

        assert!(store
            .mark_running(&property(), SourceType::SearchPerformance, at(10))
            .await?
            .is_acquired());
        Ok(())
    }

    #[tokio::test]
    async fn mark_result_keeps_monotonic_date() -> Result<()> {
        let store = InMemoryWatermarkStore::new();
        store
            .mark_result(
                &property(),
                SourceType::SearchPerformance,
                RunStatus::Success,
                Some(date(10)),
                None,
                at(0),
            )
            .await?;
        store
            .mark_result(
                &property(),
                SourceType::SearchPerformance,
                RunStatus::Failed,
                Some(date(3)),
                Some("quota_exhausted".into()),
                at(60),
            )
            .await?;

        let stored = store
            .get(&property(), SourceType::SearchPerformance)
            .await?
            .unwrap();
        assert_eq!(stored.last_date, Some(date(10)));
        assert_eq!(stored.last_run_status, RunStatus::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some("quota_exhausted"));
        Ok(())
    }

    #[tokio::test]
    async fn list_orders_by_property_then_source() -> Result<()> {
        let store = InMemoryWatermarkStore::new();
        let b = PropertyKey::new_unchecked("https://b.example/");
        let a = PropertyKey::new_unchecked("https://a.example/");
        store
            .mark_running(&b, SourceType::SearchPerformance, at(0))
            .await?;
        store.mark_running(&a, SourceType::Sitemaps, at(0)).await?;
        store
            .mark_running(&a, SourceType::SearchPerformance, at(0))
            .await?;

        let all = store.list().await?;
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].property, a);
        assert_eq!(all[0].source, SourceType::SearchPerformance);
        assert_eq!(all[2].property, b);
        Ok(())
    }
}
