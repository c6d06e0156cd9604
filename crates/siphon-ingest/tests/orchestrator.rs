//! End-to-end orchestrator scenarios over the in-memory stores.

mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};

use siphon_core::{PropertyKey, SourceType};
use siphon_ingest::admission::memory::InMemoryAdmissionController;
use siphon_ingest::admission::AdmissionConfig;
use siphon_ingest::facts::memory::InMemoryFactStore;
use siphon_ingest::facts::{FactKey, FactStore};
use siphon_ingest::orchestrator::{Orchestrator, OrchestratorConfig, PropertyConfig, RunOptions};
use siphon_ingest::watermark::memory::InMemoryWatermarkStore;
use siphon_ingest::watermark::{RunStatus, WatermarkStore};

use support::{FailMode, ScriptedSource};

const ROWS_PER_DAY: usize = 4;
const BACKFILL_DAYS: u32 = 3;

fn prop(host: &str) -> PropertyKey {
    PropertyKey::new(format!("https://{host}/")).expect("valid property")
}

fn yesterday() -> NaiveDate {
    Utc::now()
        .date_naive()
        .pred_opt()
        .expect("not at date boundary")
}

/// Admission tuned so tests never sleep for human-noticeable durations.
fn fast_admission() -> AdmissionConfig {
    AdmissionConfig {
        bucket_capacity: 1_000.0,
        refill_rate_per_sec: 1_000.0,
        daily_limit: 10_000,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter_fraction: 0.0,
    }
}

struct Harness {
    orchestrator: Orchestrator,
    admission: Arc<InMemoryAdmissionController>,
    watermarks: Arc<InMemoryWatermarkStore>,
    facts: Arc<InMemoryFactStore>,
    source: Arc<ScriptedSource>,
}

fn harness_with_watermarks(watermarks: Arc<InMemoryWatermarkStore>) -> Harness {
    let admission = Arc::new(InMemoryAdmissionController::with_default_config(
        fast_admission(),
    ));
    let facts = Arc::new(InMemoryFactStore::new());
    let source = Arc::new(ScriptedSource::new(ROWS_PER_DAY));
    let orchestrator = Orchestrator::builder()
        .admission(admission.clone())
        .watermarks(watermarks.clone())
        .facts(facts.clone())
        .source(source.clone())
        .config(OrchestratorConfig {
            default_backfill_days: BACKFILL_DAYS,
            max_parallel_properties: 4,
            max_admission_retries: 5,
            max_fetch_retries: 2,
            reconcile_window_days: 2,
        })
        .build()
        .expect("orchestrator builds");
    Harness {
        orchestrator,
        admission,
        watermarks,
        facts,
        source,
    }
}

fn harness() -> Harness {
    harness_with_watermarks(Arc::new(InMemoryWatermarkStore::new()))
}

fn scheduled(properties: &[&PropertyKey]) -> RunOptions {
    RunOptions::scheduled(
        properties
            .iter()
            .map(|p| PropertyConfig::new((*p).clone(), vec![SourceType::SearchPerformance]))
            .collect(),
    )
}

#[tokio::test]
async fn throttled_property_is_isolated_from_the_others() {
    let h = harness();
    let (a, b, c) = (prop("a.example"), prop("b.example"), prop("c.example"));
    h.source.fail_property(b.clone(), FailMode::Throttled);

    let summary = h
        .orchestrator
        .run(scheduled(&[&a, &b, &c]))
        .await
        .expect("run completes");

    assert_eq!(summary.succeeded.len(), 2);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].property, b);
    assert!(summary.failed[0].reason.contains("retries exhausted"));

    // The healthy properties advanced all the way to yesterday.
    for healthy in [&a, &c] {
        let wm = h
            .watermarks
            .get(healthy, SourceType::SearchPerformance)
            .await
            .expect("get watermark")
            .expect("watermark exists");
        assert_eq!(wm.last_run_status, RunStatus::Success);
        assert_eq!(wm.last_date, Some(yesterday()));
    }

    // The throttled property committed nothing but is marked for retry.
    let wm_b = h
        .watermarks
        .get(&b, SourceType::SearchPerformance)
        .await
        .expect("get watermark")
        .expect("watermark exists");
    assert_eq!(wm_b.last_run_status, RunStatus::Failed);
    assert_eq!(wm_b.last_date, None);

    let expected = u64::try_from(2 * BACKFILL_DAYS as usize * ROWS_PER_DAY).unwrap();
    assert_eq!(h.facts.count().await.expect("count"), expected);
    assert_eq!(summary.rows_upserted, expected);
}

#[tokio::test]
async fn crashed_run_resumes_from_the_day_after_the_watermark() {
    let h = harness();
    let a = prop("a.example");
    let committed = yesterday().pred_opt().expect("date arithmetic");

    // A previous run crashed after committing `committed`, leaving the
    // lease stale and the status running.
    let stale = Utc::now() - chrono::Duration::hours(2);
    h.watermarks
        .mark_running(&a, SourceType::SearchPerformance, stale)
        .await
        .expect("mark running");
    h.watermarks
        .mark_result(
            &a,
            SourceType::SearchPerformance,
            RunStatus::Running,
            Some(committed),
            None,
            stale,
        )
        .await
        .expect("mark result");

    let summary = h
        .orchestrator
        .run(scheduled(&[&a]))
        .await
        .expect("run completes");

    assert_eq!(summary.succeeded.len(), 1);
    // Only the single uncommitted day (yesterday) was fetched.
    assert_eq!(summary.rows_upserted, ROWS_PER_DAY as u64);

    let wm = h
        .watermarks
        .get(&a, SourceType::SearchPerformance)
        .await
        .expect("get watermark")
        .expect("watermark exists");
    assert_eq!(wm.last_run_status, RunStatus::Success);
    assert_eq!(wm.last_date, Some(yesterday()));
}

#[tokio::test]
async fn up_to_date_property_spends_no_quota() {
    let h = harness();
    let a = prop("a.example");

    let first = h
        .orchestrator
        .run(scheduled(&[&a]))
        .await
        .expect("first run");
    assert_eq!(first.succeeded.len(), 1);
    let calls_after_first = h.source.calls();
    assert!(calls_after_first > 0);

    let second = h
        .orchestrator
        .run(scheduled(&[&a]))
        .await
        .expect("second run");
    assert_eq!(second.succeeded.len(), 1);
    assert_eq!(second.rows_upserted, 0);
    // No remote calls, so no tokens or daily quota consumed.
    assert_eq!(h.source.calls(), calls_after_first);
}

#[tokio::test]
async fn daily_quota_exhaustion_keeps_committed_days() {
    let h = harness();
    let a = prop("a.example");
    // Two calls per day fit; the third day's call is over the limit.
    h.admission
        .set_config(
            a.clone(),
            AdmissionConfig {
                daily_limit: 2,
                ..fast_admission()
            },
        )
        .expect("set config");

    let summary = h
        .orchestrator
        .run(scheduled(&[&a]))
        .await
        .expect("run completes");

    assert_eq!(summary.quota_exhausted.len(), 1);
    assert_eq!(summary.rows_upserted, 2 * ROWS_PER_DAY as u64);

    let wm = h
        .watermarks
        .get(&a, SourceType::SearchPerformance)
        .await
        .expect("get watermark")
        .expect("watermark exists");
    assert_eq!(wm.last_run_status, RunStatus::Failed);
    assert_eq!(wm.failure_reason.as_deref(), Some("quota_exhausted"));
    // The two committed days survive; the next run resumes after them.
    assert_eq!(wm.last_date, Some(yesterday().pred_opt().unwrap()));
}

#[tokio::test]
async fn expired_deadline_stops_cleanly_and_resumes_later() {
    // Production-default lease timeout: the stop must release the lease
    // itself, not rely on it expiring.
    let h = harness();
    let a = prop("a.example");

    let deadline = Utc::now() - chrono::Duration::seconds(1);
    let summary = h
        .orchestrator
        .run(scheduled(&[&a]).with_deadline(deadline))
        .await
        .expect("run completes");

    assert_eq!(summary.deadline_stopped.len(), 1);
    assert_eq!(summary.rows_upserted, 0);

    // The unit stopped in a resumable state, not an error state, and
    // handed its lease back.
    let wm = h
        .watermarks
        .get(&a, SourceType::SearchPerformance)
        .await
        .expect("get watermark")
        .expect("watermark exists");
    assert_eq!(wm.last_run_status, RunStatus::Running);
    assert!(wm.lease_expires_at.is_none());

    // An immediate re-invocation resumes instead of reporting the unit
    // as lease-skipped.
    let resumed = h
        .orchestrator
        .run(scheduled(&[&a]))
        .await
        .expect("resumed run completes");
    assert!(resumed.lease_skipped.is_empty());
    assert_eq!(resumed.succeeded.len(), 1);
    assert_eq!(
        resumed.rows_upserted,
        (BACKFILL_DAYS as usize * ROWS_PER_DAY) as u64
    );
}

#[tokio::test]
async fn mid_range_failure_keeps_committed_rows_in_the_summary() {
    let h = harness();
    let a = prop("a.example");
    // The first day syncs; every call after that hits a transient error
    // until retries run out.
    h.source
        .fail_property_after(a.clone(), FailMode::Transient, 1);

    let summary = h
        .orchestrator
        .run(scheduled(&[&a]))
        .await
        .expect("run completes");

    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].reason.contains("retries exhausted"));
    // The committed first day still counts in the summary.
    assert_eq!(summary.rows_upserted, ROWS_PER_DAY as u64);
    assert_eq!(h.facts.count().await.expect("count"), ROWS_PER_DAY as u64);

    let first_day = yesterday()
        .pred_opt()
        .and_then(|d| d.pred_opt())
        .expect("date arithmetic");
    let wm = h
        .watermarks
        .get(&a, SourceType::SearchPerformance)
        .await
        .expect("get watermark")
        .expect("watermark exists");
    assert_eq!(wm.last_run_status, RunStatus::Failed);
    assert_eq!(wm.last_date, Some(first_day));
}

#[tokio::test]
async fn dry_run_plans_without_touching_anything() {
    let h = harness();
    let a = prop("a.example");

    let summary = h
        .orchestrator
        .run(scheduled(&[&a]).dry_run())
        .await
        .expect("dry run completes");

    assert_eq!(summary.planned.len(), 1);
    let plan = &summary.planned[0];
    let range = plan.range.expect("fresh pair plans a backfill");
    assert_eq!(range.end, yesterday());
    assert_eq!(range.len_days(), u64::from(BACKFILL_DAYS));

    assert_eq!(h.source.calls(), 0);
    assert_eq!(h.facts.count().await.expect("count"), 0);
    assert_eq!(h.admission.key_count().expect("key count"), 0);
    assert!(h
        .watermarks
        .get(&a, SourceType::SearchPerformance)
        .await
        .expect("get watermark")
        .is_none());
}

#[tokio::test]
async fn reconcile_overwrites_without_duplicating() {
    let h = harness();
    let a = prop("a.example");

    h.orchestrator
        .run(scheduled(&[&a]))
        .await
        .expect("initial run");
    let count_before = h.facts.count().await.expect("count");

    // The remote side has corrected its numbers since the first sync.
    h.source.set_clicks(99);
    let options = RunOptions::reconcile(vec![PropertyConfig::new(
        a.clone(),
        vec![SourceType::SearchPerformance],
    )]);
    let summary = h.orchestrator.run(options).await.expect("reconcile run");
    assert_eq!(summary.succeeded.len(), 1);

    // Same keys, so the row count is unchanged.
    assert_eq!(h.facts.count().await.expect("count"), count_before);

    let key = FactKey::new(yesterday(), a, vec![("query".into(), "q0".into())]);
    let row = h
        .facts
        .get(&key)
        .await
        .expect("get row")
        .expect("row exists");
    assert_eq!(row.measures.clicks, 99);
}

#[tokio::test]
async fn permanent_failure_fails_the_unit_without_retries() {
    let h = harness();
    let a = prop("a.example");
    h.source.fail_property(a.clone(), FailMode::Permanent);

    let summary = h
        .orchestrator
        .run(scheduled(&[&a]))
        .await
        .expect("run completes");

    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].reason.contains("permanent"));
    // One attempt on the first day, no retries after a permanent error.
    assert_eq!(h.source.calls(), 1);
}
