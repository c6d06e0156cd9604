//! JSON-file-backed watermark store.
//!
//! Persists the full watermark set as a JSON array, rewritten atomically
//! (write-to-temp then rename) on every mutation. Watermark sets are
//! small — one record per property/source pair — so whole-file rewrites
//! are cheap and keep recovery trivial: the file is always a complete,
//! valid snapshot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use siphon_core::{PropertyKey, SourceType};

use super::memory::DEFAULT_LEASE_TIMEOUT;
use super::{CasResult, RunStatus, Watermark, WatermarkStore};
use crate::error::{Error, Result};

type RowMap = HashMap<(PropertyKey, SourceType), Watermark>;

/// Watermark store persisted to a single JSON file.
#[derive(Debug)]
pub struct JsonFileWatermarkStore {
    path: PathBuf,
    rows: Mutex<RowMap>,
    lease_timeout: Duration,
}

impl JsonFileWatermarkStore {
    /// Opens (or creates) a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns a storage error if an existing file cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let rows = if path.exists() {
            let bytes = std::fs::read(&path)
                .map_err(|e| Error::storage_with_source("failed to read watermark file", e))?;
            let all: Vec<Watermark> = serde_json::from_slice(&bytes)
                .map_err(|e| Error::storage_with_source("failed to parse watermark file", e))?;
            all.into_iter()
                .map(|wm| ((wm.property.clone(), wm.source), wm))
                .collect()
        } else {
            RowMap::new()
        };
        Ok(Self {
            path,
            rows: Mutex::new(rows),
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
        })
    }

    /// Overrides the running-lease timeout.
    #[must_use]
    pub const fn with_lease_timeout(mut self, lease_timeout: Duration) -> Self {
        self.lease_timeout = lease_timeout;
        self
    }

    fn persist(&self, rows: &RowMap) -> Result<()> {
        let mut all: Vec<&Watermark> = rows.values().collect();
        all.sort_by(|a, b| {
            a.property
                .cmp(&b.property)
                .then_with(|| a.source.cmp(&b.source))
        });
        let json = serde_json::to_vec_pretty(&all)
            .map_err(|e| Error::storage_with_source("failed to encode watermarks", e))?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| Error::storage_with_source("failed to write watermark file", e))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| Error::storage_with_source("failed to replace watermark file", e))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, RowMap>> {
        self.rows
            .lock()
            .map_err(|_| Error::storage("watermark store lock poisoned"))
    }
}

fn merged_last_date(stored: Option<NaiveDate>, incoming: Option<NaiveDate>) -> Option<NaiveDate> {
    match (stored, incoming) {
        (Some(old), Some(new)) => Some(old.max(new)),
        (Some(old), None) => Some(old),
        (None, new) => new,
    }
}

#[async_trait]
impl WatermarkStore for JsonFileWatermarkStore {
    async fn get(&self, property: &PropertyKey, source: SourceType) -> Result<Option<Watermark>> {
        let rows = self.lock()?;
        Ok(rows.get(&(property.clone(), source)).cloned())
    }

    async fn upsert(&self, mut watermark: Watermark) -> Result<()> {
        let mut rows = self.lock()?;
        let key = (watermark.property.clone(), watermark.source);
        if let Some(stored) = rows.get(&key) {
            watermark.last_date = merged_last_date(stored.last_date, watermark.last_date);
        }
        rows.insert(key, watermark);
        self.persist(&rows)
    }

    async fn mark_running(
        &self,
        property: &PropertyKey,
        source: SourceType,
        now: DateTime<Utc>,
    ) -> Result<CasResult> {
        let mut rows = self.lock()?;
        let key = (property.clone(), source);

        if let Some(stored) = rows.get(&key) {
            if stored.lease_expires_at.is_some_and(|expires| now < expires) {
                let since = stored.last_run_at.unwrap_or(stored.updated_at);
                return Ok(CasResult::AlreadyRunning { since });
            }
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
        self.persist(&rows)?;
        Ok(CasResult::Acquired)
    }

    async fn release_lease(
        &self,
        property: &PropertyKey,
        source: SourceType,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut rows = self.lock()?;
        if let Some(entry) = rows.get_mut(&(property.clone(), source)) {
            entry.lease_expires_at = None;
            entry.updated_at = now;
            self.persist(&rows)?;
        }
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
        let mut rows = self.lock()?;
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
        self.persist(&rows)
    }

    async fn list(&self) -> Result<Vec<Watermark>> {
        let rows = self.lock()?;
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
