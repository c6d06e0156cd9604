//! In-memory fact store for testing.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{FactKey, FactRow, FactStore};
use crate::error::{Error, Result};

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("fact store lock poisoned")
}

/// In-memory fact store keyed by [`FactKey`].
#[derive(Debug, Default)]
pub struct InMemoryFactStore {
    rows: RwLock<HashMap<FactKey, FactRow>>,
}

impl InMemoryFactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FactStore for InMemoryFactStore {
    async fn upsert_batch(&self, incoming: Vec<FactRow>) -> Result<u64> {
        let mut rows = self.rows.write().map_err(poison_err)?;
        let written = incoming.len() as u64;
        for row in incoming {
            rows.insert(row.key.clone(), row);
        }
        drop(rows);
        Ok(written)
    }

    async fn get(&self, key: &FactKey) -> Result<Option<FactRow>> {
        let rows = self.rows.read().map_err(poison_err)?;
        let found = rows.get(key).cloned();
        drop(rows);
        Ok(found)
    }

    async fn count(&self) -> Result<u64> {
        let rows = self.rows.read().map_err(poison_err)?;
        let count = rows.len() as u64;
        drop(rows);
        Ok(count)
    }
}
