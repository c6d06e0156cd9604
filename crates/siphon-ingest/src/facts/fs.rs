//! JSONL-file-backed fact store.
//!
//! Facts are kept in memory keyed by natural key and snapshotted to a
//! newline-delimited JSON file after each upsert batch. One line per row
//! keeps the format greppable and diff-friendly for operators.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{FactKey, FactRow, FactStore};
use crate::error::{Error, Result};

/// Fact store persisted to a JSONL file.
#[derive(Debug)]
pub struct JsonlFactStore {
    path: PathBuf,
    rows: Mutex<HashMap<FactKey, FactRow>>,
}

impl JsonlFactStore {
    /// Opens (or creates) a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns a storage error if an existing file cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut rows = HashMap::new();
        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| Error::storage_with_source("failed to read fact file", e))?;
            for (index, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let row: FactRow = serde_json::from_str(line).map_err(|e| {
                    Error::storage(format!("bad fact row at line {}: {e}", index + 1))
                })?;
                rows.insert(row.key.clone(), row);
            }
        }
        Ok(Self {
            path,
            rows: Mutex::new(rows),
        })
    }

    fn persist(&self, rows: &HashMap<FactKey, FactRow>) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        let mut file = std::fs::File::create(&tmp)
            .map_err(|e| Error::storage_with_source("failed to create fact file", e))?;
        for row in rows.values() {
            let line = serde_json::to_string(row)
                .map_err(|e| Error::storage_with_source("failed to encode fact row", e))?;
            writeln!(file, "{line}")
                .map_err(|e| Error::storage_with_source("failed to write fact row", e))?;
        }
        file.sync_all()
            .map_err(|e| Error::storage_with_source("failed to sync fact file", e))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| Error::storage_with_source("failed to replace fact file", e))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<FactKey, FactRow>>> {
        self.rows
            .lock()
            .map_err(|_| Error::storage("fact store lock poisoned"))
    }
}

#[async_trait]
impl FactStore for JsonlFactStore {
    async fn upsert_batch(&self, incoming: Vec<FactRow>) -> Result<u64> {
        let mut rows = self.lock()?;
        let written = incoming.len() as u64;
        for row in incoming {
            rows.insert(row.key.clone(), row);
        }
        self.persist(&rows)?;
        Ok(written)
    }

    async fn get(&self, key: &FactKey) -> Result<Option<FactRow>> {
        let rows = self.lock()?;
        Ok(rows.get(key).cloned())
    }

    async fn count(&self) -> Result<u64> {
        let rows = self.lock()?;
        Ok(rows.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::Measures;
    use chrono::NaiveDate;
    use siphon_core::{PropertyKey, SourceType};

    fn row(day: u32, clicks: u64) -> FactRow {
        FactRow {
            key: FactKey::new(
                NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
                PropertyKey::new_unchecked("https://example.com/"),
                vec![("query".into(), "rust".into())],
            ),
            source: SourceType::SearchPerformance,
            measures: Measures {
                clicks,
                impressions: clicks * 10,
                ctr: 0.1,
                position: 2.0,
            },
        }
    }

    #[tokio::test]
    async fn survives_reopen_with_latest_values() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.jsonl");

        {
            let store = JsonlFactStore::open(&path)?;
            store.upsert_batch(vec![row(1, 5), row(2, 7)]).await?;
            store.upsert_batch(vec![row(1, 11)]).await?;
        }

        let store = JsonlFactStore::open(&path)?;
        assert_eq!(store.count().await?, 2);
        assert_eq!(store.get(&row(1, 0).key).await?.unwrap().measures.clicks, 11);
        Ok(())
    }
}
