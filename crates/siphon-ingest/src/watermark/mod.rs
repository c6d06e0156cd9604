//! Durable sync progress per property/source pair.
//!
//! This module provides:
//!
//! - [`Watermark`]: The durable marker of ingestion progress
//! - [`WatermarkStore`]: Trait for watermark persistence
//! - [`CasResult`]: Outcome of the check-and-set running lease
//!
//! ## Design Principles
//!
//! - **Monotonic advance**: `last_date` never moves backward; the store
//!   rejects a regressing upsert rather than trusting every caller
//! - **Advance after persistence**: The orchestrator only moves `last_date`
//!   once the day's rows are durably upserted, so a crash before the
//!   advance simply re-fetches that day (upserts make that harmless)
//! - **Per-key lease**: `mark_running` is a check-and-set, so a scheduled
//!   run and a reconcile run can never race on one property's watermark

pub mod fs;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use siphon_core::{PropertyKey, SourceType};

use crate::error::Result;

/// Status of the most recent run touching a watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created but never driven.
    Pending,
    /// A run is (or was, if it crashed) in progress.
    Running,
    /// The last run completed.
    Success,
    /// The last run failed; see the failure reason.
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Durable record of ingestion progress for one `(property, source)` pair.
///
/// Created on the first ingestion attempt; mutated only by the
/// orchestrator; never deleted in normal operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Watermark {
    /// The property this watermark tracks.
    pub property: PropertyKey,
    /// The source type this watermark tracks.
    pub source: SourceType,
    /// Most recent date for which ingestion is known-complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_date: Option<NaiveDate>,
    /// Status of the most recent run.
    pub last_run_status: RunStatus,
    /// Failure reason, when `last_run_status` is `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// When the most recent run started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    /// When the held running lease expires; `None` when no run holds
    /// the pair. A `Running` status without a lease is a deliberately
    /// paused run awaiting resumption, not a live one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// When this record was last written.
    pub updated_at: DateTime<Utc>,
}

impl Watermark {
    /// Creates a fresh pending watermark for a pair that has never synced.
    #[must_use]
    pub fn pending(property: PropertyKey, source: SourceType, now: DateTime<Utc>) -> Self {
        Self {
            property,
            source,
            last_date: None,
            last_run_status: RunStatus::Pending,
            failure_reason: None,
            last_run_at: None,
            lease_expires_at: None,
            updated_at: now,
        }
    }
}

/// Result of the `mark_running` check-and-set lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasResult {
    /// The lease was taken; this run may proceed.
    Acquired,
    /// Another run holds a fresh lease on this pair.
    AlreadyRunning {
        /// When the holding run started.
        since: DateTime<Utc>,
    },
}

impl CasResult {
    /// Returns true if the lease was acquired.
    #[must_use]
    pub const fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired)
    }
}

/// Persistence for watermarks.
///
/// All operations must be safe under concurrent invocation from multiple
/// property workers; workers touch disjoint keys, so row-level atomicity
/// per key is sufficient.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Gets the watermark for a pair, or `None` if it has never synced.
    async fn get(&self, property: &PropertyKey, source: SourceType) -> Result<Option<Watermark>>;

    /// Atomically creates or updates a watermark.
    ///
    /// An upsert that would move `last_date` backward is ignored (the
    /// stored record wins); everything else is overwritten.
    async fn upsert(&self, watermark: Watermark) -> Result<()>;

    /// Marks the pair as running before any remote calls are made.
    ///
    /// This is the durability point for crash-resume and the per-pair
    /// mutual-exclusion lease: while an unexpired lease exists, another
    /// run gets [`CasResult::AlreadyRunning`]. An expired lease is
    /// treated as a crashed run and taken over.
    async fn mark_running(
        &self,
        property: &PropertyKey,
        source: SourceType,
        now: DateTime<Utc>,
    ) -> Result<CasResult>;

    /// Releases the running lease without recording a terminal result.
    ///
    /// Used by a deliberate mid-range stop (the run deadline): the status
    /// stays `Running` so planning resumes from the committed date, while
    /// the pair becomes immediately acquirable by the next invocation. A
    /// no-op for pairs that hold no lease.
    async fn release_lease(
        &self,
        property: &PropertyKey,
        source: SourceType,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Records the terminal result of a run for the pair.
    ///
    /// `last_date` of `None` leaves the stored date untouched. A
    /// `Success` or `Failed` status also releases the running lease; a
    /// `Running` status keeps it, so per-day advancement mid-run does
    /// not open the pair to a concurrent invocation.
    async fn mark_result(
        &self,
        property: &PropertyKey,
        source: SourceType,
        status: RunStatus,
        last_date: Option<NaiveDate>,
        failure_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Lists all watermarks, ordered by `(property, source)`.
    async fn list(&self) -> Result<Vec<Watermark>>;
}
