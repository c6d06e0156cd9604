//! The ingestion orchestrator: per-property sync under admission control.
//!
//! This module composes the admission controller, watermark store, fact
//! store, and metrics source into the full pipeline:
//!
//! ```text
//! run() → for each (property, source), bounded by a semaphore:
//!     read watermark → compute plan → mark running (lease)
//!     → loop over days in increasing order:
//!         acquire admission → fetch pages → upsert rows → advance watermark
//!     → mark success/failed
//! → aggregate RunSummary
//! ```
//!
//! ## Design Principles
//!
//! - **Fault isolation**: One unit's failure or quota exhaustion never
//!   halts the run; every unit reports into the summary
//! - **Watermark after persistence**: `last_date` advances only once the
//!   day's rows are durably upserted
//! - **Bounded suspension**: Workers sleep only on admission `must-wait`
//!   and remote backoff, both deterministic durations from controller state
//! - **Day-granular deadline**: When the deadline passes, a worker finishes
//!   its current day's upsert, records status `running`, and stops, so the
//!   next invocation resumes cleanly

pub mod plan;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, info, warn};

use siphon_core::observability::ingest_span;
use siphon_core::{DateRange, PropertyKey, RunId, SourceType};

use crate::admission::{AdmissionControl, AdmissionResult, Outcome};
use crate::error::{Error, Result};
use crate::facts::FactStore;
use crate::metrics::{IngestMetrics, TimingGuard};
use crate::source::{FetchPage, FetchRequest, MetricsSource};
use crate::watermark::{CasResult, RunStatus, WatermarkStore};

pub use plan::{PlanParams, SyncPlan, compute_plan};

/// Tuning knobs for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Days to backfill for a pair that has never synced.
    pub default_backfill_days: u32,
    /// Maximum concurrently syncing units.
    pub max_parallel_properties: usize,
    /// Local admission `must-wait` retries before giving up on a unit.
    pub max_admission_retries: u32,
    /// Remote fetch attempts per page before escalating to failure.
    pub max_fetch_retries: u32,
    /// Window for reconcile runs, in days.
    pub reconcile_window_days: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_backfill_days: 30,
            max_parallel_properties: 4,
            max_admission_retries: 5,
            max_fetch_retries: 3,
            reconcile_window_days: 7,
        }
    }
}

/// What kind of run to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Normal incremental sync from each unit's watermark.
    Scheduled,
    /// Re-sync the last N days regardless of watermarks, to pick up
    /// late-arriving or corrected data. Safe because persistence upserts.
    Reconcile,
}

/// One property and the sources to sync for it.
#[derive(Debug, Clone)]
pub struct PropertyConfig {
    /// The property to sync.
    pub property: PropertyKey,
    /// Source types to sync for this property.
    pub sources: Vec<SourceType>,
}

impl PropertyConfig {
    /// Creates a property config.
    #[must_use]
    pub const fn new(property: PropertyKey, sources: Vec<SourceType>) -> Self {
        Self { property, sources }
    }
}

/// Options for one `run()` invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Properties (and their sources) to sync.
    pub properties: Vec<PropertyConfig>,
    /// Manual backfill override; wins over watermark-derived ranges.
    pub override_range: Option<DateRange>,
    /// Scheduled or reconcile planning.
    pub mode: RunMode,
    /// Compute plans only; perform no writes and no remote calls.
    pub dry_run: bool,
    /// Stop starting new days after this time; see module docs.
    pub deadline: Option<DateTime<Utc>>,
}

impl RunOptions {
    /// Options for a normal scheduled sync.
    #[must_use]
    pub const fn scheduled(properties: Vec<PropertyConfig>) -> Self {
        Self {
            properties,
            override_range: None,
            mode: RunMode::Scheduled,
            dry_run: false,
            deadline: None,
        }
    }

    /// Options for a reconciliation pass.
    #[must_use]
    pub const fn reconcile(properties: Vec<PropertyConfig>) -> Self {
        Self {
            properties,
            override_range: None,
            mode: RunMode::Reconcile,
            dry_run: false,
            deadline: None,
        }
    }

    /// Sets a manual backfill range.
    #[must_use]
    pub const fn with_override_range(mut self, range: DateRange) -> Self {
        self.override_range = Some(range);
        self
    }

    /// Enables dry-run mode.
    #[must_use]
    pub const fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Sets the run deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Reference to one property/source unit in a summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitRef {
    /// The property.
    pub property: PropertyKey,
    /// The source.
    pub source: SourceType,
}

/// A failed unit and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitFailure {
    /// The property.
    pub property: PropertyKey,
    /// The source.
    pub source: SourceType,
    /// Machine-readable failure reason.
    pub reason: String,
}

/// Machine-readable result of one `run()` invocation.
///
/// Partial failure still reports success for the units that succeeded;
/// `quota_exhausted` units will self-heal on the next scheduled run,
/// while `failed` units need investigation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Unique ID of this invocation.
    pub run_id: RunId,
    /// The mode this run used.
    pub mode: RunMode,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Total fact rows upserted across all units, including days a unit
    /// committed before stopping on quota, failure, or the deadline.
    pub rows_upserted: u64,
    /// Units that completed their outstanding range (including units that
    /// were already up to date).
    pub succeeded: Vec<UnitRef>,
    /// Units stopped by their daily quota; retried next scheduled run.
    pub quota_exhausted: Vec<UnitRef>,
    /// Units that failed and need investigation.
    pub failed: Vec<UnitFailure>,
    /// Units skipped because another run holds their lease.
    pub lease_skipped: Vec<UnitRef>,
    /// Units stopped by the run deadline; they resume next invocation.
    pub deadline_stopped: Vec<UnitRef>,
    /// Computed plans (dry-run only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planned: Vec<SyncPlan>,
}

impl RunSummary {
    /// Returns true if no unit failed or was quota-exhausted.
    #[must_use]
    pub fn is_fully_successful(&self) -> bool {
        self.failed.is_empty() && self.quota_exhausted.is_empty()
    }
}

/// Per-unit report used to aggregate the summary.
#[derive(Debug)]
enum UnitReport {
    Succeeded { rows: u64 },
    QuotaExhausted { rows: u64 },
    Failed { reason: String, rows: u64 },
    LeaseHeld,
    DeadlineStopped { rows: u64 },
    Planned { plan: SyncPlan },
}

/// An error that escaped a unit, with the rows committed before it struck.
struct UnitError {
    error: Error,
    rows: u64,
}

impl From<Error> for UnitError {
    fn from(error: Error) -> Self {
        Self { error, rows: 0 }
    }
}

/// Builder for [`Orchestrator`].
#[derive(Default)]
pub struct OrchestratorBuilder {
    admission: Option<Arc<dyn AdmissionControl>>,
    watermarks: Option<Arc<dyn WatermarkStore>>,
    facts: Option<Arc<dyn FactStore>>,
    source: Option<Arc<dyn MetricsSource>>,
    config: Option<OrchestratorConfig>,
}

impl OrchestratorBuilder {
    /// Sets the admission controller.
    #[must_use]
    pub fn admission(mut self, admission: Arc<dyn AdmissionControl>) -> Self {
        self.admission = Some(admission);
        self
    }

    /// Sets the watermark store.
    #[must_use]
    pub fn watermarks(mut self, watermarks: Arc<dyn WatermarkStore>) -> Self {
        self.watermarks = Some(watermarks);
        self
    }

    /// Sets the fact store.
    #[must_use]
    pub fn facts(mut self, facts: Arc<dyn FactStore>) -> Self {
        self.facts = Some(facts);
        self
    }

    /// Sets the metrics source.
    #[must_use]
    pub fn source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets the orchestrator config.
    #[must_use]
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if any collaborator is missing.
    pub fn build(self) -> Result<Orchestrator> {
        let missing = |what: &str| -> Error {
            siphon_core::error::Error::internal(format!("orchestrator builder missing {what}"))
                .into()
        };
        Ok(Orchestrator {
            admission: self.admission.ok_or_else(|| missing("admission controller"))?,
            watermarks: self.watermarks.ok_or_else(|| missing("watermark store"))?,
            facts: self.facts.ok_or_else(|| missing("fact store"))?,
            source: self.source.ok_or_else(|| missing("metrics source"))?,
            config: self.config.unwrap_or_default(),
            metrics: IngestMetrics::new(),
        })
    }
}

/// Drives per-property fetch/transform/persist cycles under admission control.
pub struct Orchestrator {
    admission: Arc<dyn AdmissionControl>,
    watermarks: Arc<dyn WatermarkStore>,
    facts: Arc<dyn FactStore>,
    source: Arc<dyn MetricsSource>,
    config: OrchestratorConfig,
    metrics: IngestMetrics,
}

impl Orchestrator {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Runs the pipeline for every configured property/source unit.
    ///
    /// Units run independently under a `max_parallel_properties` semaphore;
    /// a failure in one unit never terminates the run.
    ///
    /// # Errors
    ///
    /// Only infrastructure-level errors surface here (e.g. a poisoned
    /// store lock before any unit starts). Per-unit failures are reported
    /// in the [`RunSummary`], never as an `Err`.
    pub async fn run(&self, options: RunOptions) -> Result<RunSummary> {
        let run_id = RunId::generate();
        let started_at = Utc::now();
        info!(
            run_id = %run_id,
            mode = ?options.mode,
            dry_run = options.dry_run,
            properties = options.properties.len(),
            "starting ingestion run"
        );

        let units: Vec<(PropertyKey, SourceType)> = options
            .properties
            .iter()
            .flat_map(|p| {
                p.sources
                    .iter()
                    .map(|s| (p.property.clone(), *s))
                    .collect::<Vec<_>>()
            })
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_properties.max(1)));
        let active = Arc::new(AtomicUsize::new(0));
        let options_ref = &options;

        let workers = units.into_iter().map(|(property, source)| {
            let semaphore = Arc::clone(&semaphore);
            let active = Arc::clone(&active);
            async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            property,
                            source,
                            UnitReport::Failed {
                                reason: "worker semaphore closed".into(),
                                rows: 0,
                            },
                        );
                    }
                };
                self.metrics
                    .set_active_workers(active.fetch_add(1, Ordering::SeqCst) + 1);
                let span = ingest_span("sync", property.as_str(), source.as_str());
                let report = self
                    .sync_unit(&property, source, options_ref)
                    .instrument(span)
                    .await;
                self.metrics
                    .set_active_workers(active.fetch_sub(1, Ordering::SeqCst) - 1);
                (property, source, report)
            }
        });

        let reports = futures::future::join_all(workers).await;

        let mut summary = RunSummary {
            run_id,
            mode: options.mode,
            dry_run: options.dry_run,
            started_at,
            finished_at: started_at,
            rows_upserted: 0,
            succeeded: Vec::new(),
            quota_exhausted: Vec::new(),
            failed: Vec::new(),
            lease_skipped: Vec::new(),
            deadline_stopped: Vec::new(),
            planned: Vec::new(),
        };

        for (property, source, report) in reports {
            let unit = UnitRef {
                property: property.clone(),
                source,
            };
            match report {
                UnitReport::Succeeded { rows } => {
                    summary.rows_upserted += rows;
                    summary.succeeded.push(unit);
                }
                UnitReport::QuotaExhausted { rows } => {
                    summary.rows_upserted += rows;
                    summary.quota_exhausted.push(unit);
                }
                UnitReport::Failed { reason, rows } => {
                    summary.rows_upserted += rows;
                    summary.failed.push(UnitFailure {
                        property,
                        source,
                        reason,
                    });
                }
                UnitReport::LeaseHeld => summary.lease_skipped.push(unit),
                UnitReport::DeadlineStopped { rows } => {
                    summary.rows_upserted += rows;
                    summary.deadline_stopped.push(unit);
                }
                UnitReport::Planned { plan } => summary.planned.push(plan),
            }
        }
        summary.finished_at = Utc::now();

        info!(
            run_id = %run_id,
            rows = summary.rows_upserted,
            succeeded = summary.succeeded.len(),
            quota_exhausted = summary.quota_exhausted.len(),
            failed = summary.failed.len(),
            "ingestion run finished"
        );
        Ok(summary)
    }

    /// Syncs one property/source unit, converting infrastructure errors
    /// into a failed report so they never escape the unit boundary.
    async fn sync_unit(
        &self,
        property: &PropertyKey,
        source: SourceType,
        options: &RunOptions,
    ) -> UnitReport {
        let timer = TimingGuard::start(self.metrics.clone());
        let report = match self.sync_unit_inner(property, source, options).await {
            Ok(report) => report,
            Err(UnitError { error, rows }) => {
                warn!(property = %property, source = %source, error = %error, "unit failed");
                let _ = self
                    .watermarks
                    .mark_result(
                        property,
                        source,
                        RunStatus::Failed,
                        None,
                        Some(error.to_string()),
                        Utc::now(),
                    )
                    .await;
                UnitReport::Failed {
                    reason: error.to_string(),
                    rows,
                }
            }
        };

        let outcome = match &report {
            UnitReport::Succeeded { .. } => "success",
            UnitReport::QuotaExhausted { .. } => "quota_exhausted",
            UnitReport::Failed { .. } => "failed",
            UnitReport::LeaseHeld => "lease_held",
            UnitReport::DeadlineStopped { .. } => "deadline",
            UnitReport::Planned { .. } => "planned",
        };
        self.metrics.record_unit_outcome(outcome);
        timer.finish(outcome);
        report
    }

    async fn sync_unit_inner(
        &self,
        property: &PropertyKey,
        source: SourceType,
        options: &RunOptions,
    ) -> std::result::Result<UnitReport, UnitError> {
        let now = Utc::now();
        let today = now.date_naive();

        let watermark = self.watermarks.get(property, source).await?;
        let params = PlanParams {
            default_backfill_days: self.config.default_backfill_days,
            reconcile_window_days: matches!(options.mode, RunMode::Reconcile)
                .then_some(self.config.reconcile_window_days),
            override_range: options.override_range,
        };
        let plan = compute_plan(property.clone(), source, watermark.as_ref(), today, &params);

        if options.dry_run {
            return Ok(UnitReport::Planned { plan });
        }

        let Some(range) = plan.range else {
            // Nothing outstanding: no lease, no admission, no quota spent.
            debug!(property = %property, source = %source, "up to date");
            return Ok(UnitReport::Succeeded { rows: 0 });
        };

        match self.watermarks.mark_running(property, source, now).await? {
            CasResult::Acquired => {}
            CasResult::AlreadyRunning { since } => {
                info!(
                    property = %property,
                    source = %source,
                    since = %since,
                    "lease held by another run, skipping"
                );
                return Ok(UnitReport::LeaseHeld);
            }
        }

        if plan.resume {
            info!(
                property = %property,
                source = %source,
                range = %range,
                "resuming crashed run"
            );
        }

        let mut rows_total: u64 = 0;
        let mut last_completed: Option<NaiveDate> =
            watermark.as_ref().and_then(|wm| wm.last_date);

        let committed = |error: Error, rows: u64| UnitError { error, rows };

        for day in range.days() {
            if options.deadline.is_some_and(|d| Utc::now() >= d) {
                // Status stays running so the next invocation resumes
                // instead of treating committed days as an error state.
                self.watermarks
                    .mark_result(
                        property,
                        source,
                        RunStatus::Running,
                        last_completed,
                        None,
                        Utc::now(),
                    )
                    .await
                    .map_err(|e| committed(e, rows_total))?;
                // The stop is deliberate, not a crash: hand the lease back
                // so the next invocation resumes without waiting it out.
                self.watermarks
                    .release_lease(property, source, Utc::now())
                    .await
                    .map_err(|e| committed(e, rows_total))?;
                return Ok(UnitReport::DeadlineStopped { rows: rows_total });
            }

            match self.sync_day(property, source, day).await {
                Ok(rows) => {
                    rows_total += rows;
                    // Advance only after the day's rows are durably
                    // persisted; keep the lease until the range is done.
                    self.watermarks
                        .mark_result(
                            property,
                            source,
                            RunStatus::Running,
                            Some(day),
                            None,
                            Utc::now(),
                        )
                        .await
                        .map_err(|e| committed(e, rows_total))?;
                    last_completed = Some(day);
                }
                Err(err) => {
                    let (reason, report) = match &err {
                        Error::QuotaExhausted { .. } => (
                            "quota_exhausted".to_string(),
                            UnitReport::QuotaExhausted { rows: rows_total },
                        ),
                        Error::RetriesExhausted { .. }
                        | Error::AdmissionTimeout { .. }
                        | Error::Permanent { .. } => (
                            err.to_string(),
                            UnitReport::Failed {
                                reason: err.to_string(),
                                rows: rows_total,
                            },
                        ),
                        // Storage failures escape the unit and are handled
                        // by the caller's catch-all.
                        _ => return Err(committed(err, rows_total)),
                    };
                    self.watermarks
                        .mark_result(
                            property,
                            source,
                            RunStatus::Failed,
                            last_completed,
                            Some(reason),
                            Utc::now(),
                        )
                        .await
                        .map_err(|e| committed(e, rows_total))?;
                    return Ok(report);
                }
            }
        }

        self.watermarks
            .mark_result(
                property,
                source,
                RunStatus::Success,
                Some(range.end),
                None,
                Utc::now(),
            )
            .await
            .map_err(|e| committed(e, rows_total))?;
        Ok(UnitReport::Succeeded { rows: rows_total })
    }

    /// Fetches and persists one day: all pages, then a single upsert batch.
    async fn sync_day(
        &self,
        property: &PropertyKey,
        source: SourceType,
        day: NaiveDate,
    ) -> Result<u64> {
        let mut rows = Vec::new();
        let mut request = FetchRequest::new(property.clone(), source, day);

        loop {
            let page = self.fetch_page(&request).await?;
            rows.extend(page.rows);
            match page.next_page {
                Some(token) => request = request.next_page(token),
                None => break,
            }
        }

        let written = self.facts.upsert_batch(rows).await?;
        self.metrics.record_rows_upserted(source.as_str(), written);
        debug!(property = %property, source = %source, day = %day, rows = written, "day persisted");
        Ok(written)
    }

    /// Fetches one page: admission gate, then the remote call with
    /// bounded backoff retries.
    async fn fetch_page(&self, request: &FetchRequest) -> Result<FetchPage> {
        let attempts = self.config.max_fetch_retries.max(1);
        for attempt in 1..=attempts {
            self.acquire_admission(&request.property).await?;

            match self.source.fetch(request).await {
                Ok(page) => {
                    self.admission
                        .report_outcome(&request.property, Outcome::Success, Utc::now())
                        .await?;
                    return Ok(page);
                }
                Err(err) => {
                    self.admission
                        .report_outcome(&request.property, err.outcome(), Utc::now())
                        .await?;
                    if !err.is_retryable() {
                        return Err(Error::Permanent {
                            message: err.to_string(),
                        });
                    }
                    self.metrics.record_retry(match err.outcome() {
                        Outcome::Throttled => "throttled",
                        _ => "transient",
                    });
                    if attempt == attempts {
                        break;
                    }
                    // Suspend until the controller's backoff gate opens.
                    if let Some(retry_at) = self.admission.retry_at(&request.property).await? {
                        let wait = (retry_at - Utc::now()).to_std().unwrap_or_default();
                        if !wait.is_zero() {
                            tokio::time::sleep(wait).await;
                        }
                    }
                }
            }
        }
        Err(Error::RetriesExhausted {
            property: request.property.clone(),
            attempts,
        })
    }

    /// Acquires admission for one call, sleeping through bounded
    /// `must-wait` denials.
    async fn acquire_admission(&self, property: &PropertyKey) -> Result<()> {
        for _ in 0..=self.config.max_admission_retries {
            match self.admission.acquire(property, 1, Utc::now()).await? {
                AdmissionResult::Granted => {
                    self.metrics.record_admission("granted");
                    return Ok(());
                }
                AdmissionResult::DeniedQuotaExhausted => {
                    self.metrics.record_admission("quota_exhausted");
                    return Err(Error::QuotaExhausted {
                        property: property.clone(),
                    });
                }
                AdmissionResult::DeniedMustWait(wait) => {
                    self.metrics.record_admission("must_wait");
                    self.metrics.observe_admission_wait(wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
        Err(Error::AdmissionTimeout {
            property: property.clone(),
        })
    }
}
