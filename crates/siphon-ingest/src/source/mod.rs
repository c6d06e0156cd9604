//! The metered remote metrics API, seen from its interface boundary.
//!
//! This module provides:
//!
//! - [`MetricsSource`]: Trait for fetching one page of one day's metrics
//! - [`SourceError`]: The failure taxonomy the orchestrator distinguishes
//! - [`classify_status`]: HTTP status to failure-class mapping
//!
//! The concrete API shape and its authentication live behind the trait;
//! the pipeline only depends on pagination and the failure taxonomy.

pub mod replay;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use siphon_core::{PropertyKey, SourceType};

use crate::admission::Outcome;
use crate::facts::FactRow;

/// A request for one page of one day's metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    /// The property to fetch for.
    pub property: PropertyKey,
    /// Which metrics to fetch.
    pub source: SourceType,
    /// The day to fetch.
    pub date: NaiveDate,
    /// Continuation token from the previous page, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
}

impl FetchRequest {
    /// Creates a first-page request.
    #[must_use]
    pub const fn new(property: PropertyKey, source: SourceType, date: NaiveDate) -> Self {
        Self {
            property,
            source,
            date,
            page_token: None,
        }
    }

    /// Returns the request for the next page.
    #[must_use]
    pub fn next_page(mut self, token: String) -> Self {
        self.page_token = Some(token);
        self
    }
}

/// One page of fetched rows.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPage {
    /// The rows on this page, already shaped as fact rows.
    pub rows: Vec<FactRow>,
    /// Continuation token; `None` on the last page.
    pub next_page: Option<String>,
}

/// Failure classes for remote calls.
///
/// The orchestrator retries `Throttled` and `Transient` with backoff up
/// to a bound; `Permanent` aborts the property's run immediately.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The remote side throttled the call (HTTP 429 or quota response).
    #[error("remote throttled the call")]
    Throttled,
    /// A transient remote failure worth retrying (HTTP 5xx, reset).
    #[error("transient remote error: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
    },
    /// A non-retryable failure (HTTP 401/403/404).
    #[error("permanent remote error: {message}")]
    Permanent {
        /// Description of the failure.
        message: String,
    },
}

impl SourceError {
    /// The admission outcome to report for this failure.
    #[must_use]
    pub const fn outcome(&self) -> Outcome {
        match self {
            Self::Throttled => Outcome::Throttled,
            Self::Transient { .. } => Outcome::TransientError,
            Self::Permanent { .. } => Outcome::PermanentError,
        }
    }

    /// Returns true if the call may be retried with backoff.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled | Self::Transient { .. })
    }
}

/// Maps an HTTP status code to the failure taxonomy.
///
/// Returns `None` for success statuses.
#[must_use]
pub fn classify_status(status: u16) -> Option<SourceError> {
    match status {
        200..=299 => None,
        429 => Some(SourceError::Throttled),
        401 | 403 | 404 => Some(SourceError::Permanent {
            message: format!("http status {status}"),
        }),
        500..=599 => Some(SourceError::Transient {
            message: format!("http status {status}"),
        }),
        other => Some(SourceError::Transient {
            message: format!("unexpected http status {other}"),
        }),
    }
}

/// A source of time-series metrics for properties.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Fetches one page of metrics.
    ///
    /// One call costs one unit of admission; the orchestrator acquires
    /// before every call, including continuation pages.
    async fn fetch(&self, request: &FetchRequest) -> std::result::Result<FetchPage, SourceError>;
}
