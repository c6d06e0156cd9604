//! Observability metrics for the ingestion pipeline.
//!
//! Prometheus-compatible metrics via the `metrics` crate facade. Designed
//! to support:
//!
//! - **Alerting**: Quota exhaustion and failure-rate SLOs
//! - **Dashboards**: Per-run ingestion throughput and admission behavior
//! - **Debugging**: Correlating waits and retries with traces
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `siphon_ingest_admissions_total` | Counter | `decision` | Admission decisions |
//! | `siphon_ingest_rows_upserted_total` | Counter | `source` | Fact rows upserted |
//! | `siphon_ingest_units_total` | Counter | `outcome` | Property/source unit outcomes |
//! | `siphon_ingest_retries_total` | Counter | `reason` | Remote-call retries |
//! | `siphon_ingest_unit_duration_seconds` | Histogram | `outcome` | Per-unit sync duration |
//! | `siphon_ingest_admission_wait_seconds` | Histogram | - | Waits imposed by admission |
//! | `siphon_ingest_active_workers` | Gauge | - | Currently running unit workers |
//!
//! ## Integration
//!
//! Metrics are emitted via the `metrics` facade; install any compatible
//! recorder (e.g. a Prometheus exporter) at application startup.

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Admission decisions by decision kind.
    pub const ADMISSIONS_TOTAL: &str = "siphon_ingest_admissions_total";
    /// Counter: Fact rows upserted.
    pub const ROWS_UPSERTED_TOTAL: &str = "siphon_ingest_rows_upserted_total";
    /// Counter: Property/source unit outcomes.
    pub const UNITS_TOTAL: &str = "siphon_ingest_units_total";
    /// Counter: Remote-call retries.
    pub const RETRIES_TOTAL: &str = "siphon_ingest_retries_total";
    /// Histogram: Per-unit sync duration in seconds.
    pub const UNIT_DURATION_SECONDS: &str = "siphon_ingest_unit_duration_seconds";
    /// Histogram: Admission-imposed wait in seconds.
    pub const ADMISSION_WAIT_SECONDS: &str = "siphon_ingest_admission_wait_seconds";
    /// Gauge: Currently running unit workers.
    pub const ACTIVE_WORKERS: &str = "siphon_ingest_active_workers";
}

/// Label keys used across metrics.
pub mod labels {
    /// Admission decision (granted, must_wait, quota_exhausted).
    pub const DECISION: &str = "decision";
    /// Source type label.
    pub const SOURCE: &str = "source";
    /// Unit outcome (success, failed, quota_exhausted, deadline, aborted).
    pub const OUTCOME: &str = "outcome";
    /// Retry reason (throttled, transient).
    pub const REASON: &str = "reason";
}

/// High-level interface for recording ingestion metrics.
///
/// Cheap to clone and share across workers.
#[derive(Debug, Clone, Default)]
pub struct IngestMetrics;

impl IngestMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records an admission decision.
    pub fn record_admission(&self, decision: &str) {
        counter!(
            names::ADMISSIONS_TOTAL,
            labels::DECISION => decision.to_string(),
        )
        .increment(1);
    }

    /// Records upserted rows for a source.
    pub fn record_rows_upserted(&self, source: &str, rows: u64) {
        counter!(
            names::ROWS_UPSERTED_TOTAL,
            labels::SOURCE => source.to_string(),
        )
        .increment(rows);
    }

    /// Records the outcome of one property/source unit.
    pub fn record_unit_outcome(&self, outcome: &str) {
        counter!(
            names::UNITS_TOTAL,
            labels::OUTCOME => outcome.to_string(),
        )
        .increment(1);
    }

    /// Records a remote-call retry.
    pub fn record_retry(&self, reason: &str) {
        counter!(
            names::RETRIES_TOTAL,
            labels::REASON => reason.to_string(),
        )
        .increment(1);
    }

    /// Records one unit's sync duration.
    pub fn observe_unit_duration(&self, outcome: &str, duration: Duration) {
        histogram!(
            names::UNIT_DURATION_SECONDS,
            labels::OUTCOME => outcome.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    /// Records a wait imposed by admission control.
    pub fn observe_admission_wait(&self, wait: Duration) {
        histogram!(names::ADMISSION_WAIT_SECONDS).record(wait.as_secs_f64());
    }

    /// Updates the active worker gauge.
    #[allow(clippy::cast_precision_loss)] // Worker counts are small
    pub fn set_active_workers(&self, count: usize) {
        gauge!(names::ACTIVE_WORKERS).set(count as f64);
    }
}

/// RAII timer for one unit's sync duration.
///
/// Records [`names::UNIT_DURATION_SECONDS`] when dropped. A worker
/// cancelled mid-sync still records, labeled `aborted`.
#[derive(Debug)]
pub struct TimingGuard {
    metrics: IngestMetrics,
    outcome: &'static str,
    start: Instant,
}

impl TimingGuard {
    /// Starts timing.
    #[must_use]
    pub fn start(metrics: IngestMetrics) -> Self {
        Self {
            metrics,
            outcome: "aborted",
            start: Instant::now(),
        }
    }

    /// Sets the outcome label and records the elapsed duration.
    pub fn finish(mut self, outcome: &'static str) {
        self.outcome = outcome;
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        self.metrics
            .observe_unit_duration(self.outcome, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_guard_records_without_recorder() {
        let guard = TimingGuard::start(IngestMetrics::new());
        guard.finish("success");

        // Dropped without finish: records under the aborted label.
        let _guard = TimingGuard::start(IngestMetrics::new());
    }

    #[test]
    fn metrics_calls_do_not_panic_without_recorder() {
        let metrics = IngestMetrics::new();
        metrics.record_admission("granted");
        metrics.record_rows_upserted("search_performance", 10);
        metrics.record_unit_outcome("success");
        metrics.record_retry("throttled");
        metrics.observe_unit_duration("success", Duration::from_millis(5));
        metrics.observe_admission_wait(Duration::from_millis(100));
        metrics.set_active_workers(3);
    }
}
