//! Ingested observations and their idempotent persistence.
//!
//! This module provides:
//!
//! - [`FactRow`]: One ingested observation with its natural key
//! - [`FactStore`]: Trait exposing the upsert primitive
//!
//! ## Design Principles
//!
//! - **Upsert, never delete**: Corrections from the remote side happen via
//!   overwrite of the natural key; the orchestrator never issues deletes
//! - **Canonical keys**: Dimensions are sorted, so the same observation
//!   always maps to the same key regardless of how the source ordered them

pub mod fs;
pub mod memory;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use siphon_core::{PropertyKey, SourceType};

use crate::error::Result;

/// Natural key uniquely identifying one fact row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactKey {
    /// The day the observation covers.
    pub date: NaiveDate,
    /// The property the observation belongs to.
    pub property: PropertyKey,
    /// Source-specific dimensions (e.g. query, page, device), sorted by name.
    pub dimensions: Vec<(String, String)>,
}

impl FactKey {
    /// Creates a key, sorting dimensions into canonical order.
    #[must_use]
    pub fn new(
        date: NaiveDate,
        property: PropertyKey,
        mut dimensions: Vec<(String, String)>,
    ) -> Self {
        dimensions.sort();
        Self {
            date,
            property,
            dimensions,
        }
    }
}

impl fmt::Display for FactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.date, self.property)?;
        for (name, value) in &self.dimensions {
            write!(f, "/{name}={value}")?;
        }
        Ok(())
    }
}

/// Measure columns for one observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Measures {
    /// Click count.
    pub clicks: u64,
    /// Impression count.
    pub impressions: u64,
    /// Click-through rate.
    pub ctr: f64,
    /// Average result position.
    pub position: f64,
}

/// One ingested observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactRow {
    /// Natural key; upserts overwrite on collision.
    pub key: FactKey,
    /// Which source produced the row.
    pub source: SourceType,
    /// Measure columns; always the latest values for the key.
    pub measures: Measures,
}

/// Persistence for fact rows.
///
/// The upsert primitive is the basis of the pipeline's idempotency: the
/// orchestrator may safely re-fetch any date range (crash recovery,
/// reconciliation) because re-persisting a key overwrites instead of
/// duplicating.
#[async_trait]
pub trait FactStore: Send + Sync {
    /// Upserts a batch of rows, returning how many were written.
    ///
    /// Existing keys have their measures overwritten with the incoming
    /// values; new keys are inserted.
    async fn upsert_batch(&self, rows: Vec<FactRow>) -> Result<u64>;

    /// Returns the row for a key, if present.
    async fn get(&self, key: &FactKey) -> Result<Option<FactRow>>;

    /// Total number of stored rows.
    async fn count(&self) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn property() -> PropertyKey {
        PropertyKey::new_unchecked("https://example.com/")
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[test]
    fn dimensions_are_canonically_sorted() {
        let a = FactKey::new(
            date(),
            property(),
            vec![
                ("query".into(), "rust".into()),
                ("device".into(), "mobile".into()),
            ],
        );
        let b = FactKey::new(
            date(),
            property(),
            vec![
                ("device".into(), "mobile".into()),
                ("query".into(), "rust".into()),
            ],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn key_display_is_stable() {
        let key = FactKey::new(
            date(),
            property(),
            vec![("device".into(), "mobile".into())],
        );
        assert_eq!(
            key.to_string(),
            "2024-05-01/https://example.com//device=mobile"
        );
    }
}
