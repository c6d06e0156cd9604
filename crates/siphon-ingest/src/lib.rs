//! # siphon-ingest
//!
//! Quota-governed ingestion engine for the Siphon pipeline.
//!
//! This crate implements the ingestion domain, providing:
//!
//! - **Admission Control**: Per-property token buckets and daily quotas
//! - **Watermarks**: Durable, monotonic sync progress per property/source
//! - **Idempotent Persistence**: Natural-key upserts into the fact store
//! - **Orchestration**: Bounded-parallel per-property sync with fault isolation
//!
//! ## Core Concepts
//!
//! - **Property**: One independently quota-scoped unit of work (e.g. a site)
//! - **Watermark**: The durable marker of ingestion progress for one
//!   property/source pair; only ever advances, and only after the
//!   corresponding rows are durably persisted
//! - **Admission**: Every remote call is gated by [`admission::AdmissionControl`];
//!   the controller never blocks, it tells the caller how long to wait
//!
//! ## Guarantees
//!
//! - **Resumable**: A crash mid-run resumes from `last_date + 1` on the next run
//! - **Idempotent**: Re-fetching an already-ingested day overwrites, never duplicates
//! - **Isolated**: One property's quota exhaustion or failure never halts the run
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use siphon_core::{PropertyKey, SourceType};
//! use siphon_ingest::admission::memory::InMemoryAdmissionController;
//! use siphon_ingest::error::Result;
//! use siphon_ingest::facts::memory::InMemoryFactStore;
//! use siphon_ingest::orchestrator::{Orchestrator, PropertyConfig, RunOptions};
//! use siphon_ingest::source::replay::ReplaySource;
//! use siphon_ingest::watermark::memory::InMemoryWatermarkStore;
//!
//! # async fn demo() -> Result<()> {
//! let orchestrator = Orchestrator::builder()
//!     .admission(Arc::new(InMemoryAdmissionController::new()))
//!     .watermarks(Arc::new(InMemoryWatermarkStore::new()))
//!     .facts(Arc::new(InMemoryFactStore::new()))
//!     .source(Arc::new(ReplaySource::new("./export")))
//!     .build()?;
//!
//! let options = RunOptions::scheduled(vec![PropertyConfig::new(
//!     PropertyKey::new("https://example.com/")?,
//!     vec![SourceType::SearchPerformance],
//! )]);
//!
//! let summary = orchestrator.run(options).await?;
//! println!("{} rows ingested", summary.rows_upserted);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod admission;
pub mod error;
pub mod facts;
pub mod metrics;
pub mod orchestrator;
pub mod source;
pub mod watermark;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::admission::{AdmissionConfig, AdmissionControl, AdmissionResult, Outcome};
    pub use crate::error::{Error, Result};
    pub use crate::facts::{FactKey, FactRow, FactStore, Measures};
    pub use crate::metrics::IngestMetrics;
    pub use crate::orchestrator::{
        Orchestrator, OrchestratorConfig, PropertyConfig, RunMode, RunOptions, RunSummary,
    };
    pub use crate::source::{FetchPage, FetchRequest, MetricsSource, SourceError};
    pub use crate::watermark::{CasResult, RunStatus, Watermark, WatermarkStore};
}
