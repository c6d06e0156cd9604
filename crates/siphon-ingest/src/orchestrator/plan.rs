//! Pure sync-plan computation.
//!
//! Planning is separated from execution so the outstanding-range logic is
//! testable without stores, sources, or clocks: callers pass `today` in
//! explicitly. The remote API's data for "today" is not final, so plans
//! never extend past yesterday.

use chrono::NaiveDate;
use serde::Serialize;

use siphon_core::{DateRange, PropertyKey, SourceType};

use crate::watermark::{RunStatus, Watermark};

/// The planned work for one property/source unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPlan {
    /// The property to sync.
    pub property: PropertyKey,
    /// The source to sync.
    pub source: SourceType,
    /// Outstanding date range; `None` when the unit is already up to date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<DateRange>,
    /// True when resuming a run that previously crashed mid-flight.
    pub resume: bool,
}

impl SyncPlan {
    /// Returns true if there is nothing to do.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.range.is_none()
    }
}

/// Inputs that shape a plan besides the watermark itself.
#[derive(Debug, Clone, Copy)]
pub struct PlanParams {
    /// Days to backfill for a pair that has never synced.
    pub default_backfill_days: u32,
    /// Reconcile window in days; `Some` selects reconcile planning.
    pub reconcile_window_days: Option<u32>,
    /// Manual backfill override; wins over watermark-derived ranges.
    pub override_range: Option<DateRange>,
}

/// Computes the outstanding range for one unit.
///
/// - No watermark: backfill `[today - default_backfill_days, yesterday]`.
/// - Watermark at `D`: resume from `D + 1`. A `Running` status from a
///   previous invocation means that run crashed; its committed days are
///   already reflected in `last_date`, so resuming from `D + 1` neither
///   re-fetches nor skips anything.
/// - Reconcile: the last N days regardless of watermark; persistence is
///   upsert-based so the overlap is harmless.
/// - An override range wins over all of the above (manual backfill),
///   clamped to yesterday like everything else.
#[must_use]
pub fn compute_plan(
    property: PropertyKey,
    source: SourceType,
    watermark: Option<&Watermark>,
    today: NaiveDate,
    params: &PlanParams,
) -> SyncPlan {
    let resume = watermark.is_some_and(|wm| wm.last_run_status == RunStatus::Running);
    let yesterday = today.pred_opt().unwrap_or(today);

    let range = if let Some(range) = params.override_range {
        range.clamp_end(yesterday)
    } else if let Some(window) = params.reconcile_window_days {
        let start = today - chrono::Duration::days(i64::from(window));
        (start <= yesterday).then(|| DateRange {
            start,
            end: yesterday,
        })
    } else {
        let start = match watermark.and_then(|wm| wm.last_date) {
            Some(last_date) => last_date.succ_opt().unwrap_or(last_date),
            None => today - chrono::Duration::days(i64::from(params.default_backfill_days)),
        };
        (start <= yesterday).then(|| DateRange {
            start,
            end: yesterday,
        })
    };

    SyncPlan {
        property,
        source,
        range,
        resume,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn property() -> PropertyKey {
        PropertyKey::new_unchecked("https://example.com/")
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn params() -> PlanParams {
        PlanParams {
            default_backfill_days: 14,
            reconcile_window_days: None,
            override_range: None,
        }
    }

    fn watermark_at(last_date: Option<NaiveDate>, status: RunStatus) -> Watermark {
        let mut wm = Watermark::pending(property(), SourceType::SearchPerformance, Utc::now());
        wm.last_date = last_date;
        wm.last_run_status = status;
        wm
    }

    #[test]
    fn never_synced_backfills_default_window() {
        let plan = compute_plan(
            property(),
            SourceType::SearchPerformance,
            None,
            date(20),
            &params(),
        );
        let range = plan.range.unwrap();
        assert_eq!(range.start, date(6));
        assert_eq!(range.end, date(19));
        assert!(!plan.resume);
    }

    #[test]
    fn synced_resumes_from_day_after_watermark() {
        let wm = watermark_at(Some(date(15)), RunStatus::Success);
        let plan = compute_plan(
            property(),
            SourceType::SearchPerformance,
            Some(&wm),
            date(20),
            &params(),
        );
        let range = plan.range.unwrap();
        assert_eq!(range.start, date(16));
        assert_eq!(range.end, date(19));
    }

    #[test]
    fn crashed_run_resumes_not_restarts() {
        let wm = watermark_at(Some(date(15)), RunStatus::Running);
        let plan = compute_plan(
            property(),
            SourceType::SearchPerformance,
            Some(&wm),
            date(20),
            &params(),
        );
        assert!(plan.resume);
        assert_eq!(plan.range.unwrap().start, date(16));
    }

    #[test]
    fn up_to_date_unit_has_empty_plan() {
        let wm = watermark_at(Some(date(19)), RunStatus::Success);
        let plan = compute_plan(
            property(),
            SourceType::SearchPerformance,
            Some(&wm),
            date(20),
            &params(),
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn reconcile_ignores_watermark() {
        let wm = watermark_at(Some(date(19)), RunStatus::Success);
        let plan = compute_plan(
            property(),
            SourceType::SearchPerformance,
            Some(&wm),
            date(20),
            &PlanParams {
                reconcile_window_days: Some(7),
                ..params()
            },
        );
        let range = plan.range.unwrap();
        assert_eq!(range.start, date(13));
        assert_eq!(range.end, date(19));
    }

    #[test]
    fn override_range_wins_and_is_clamped_to_yesterday() {
        let wm = watermark_at(Some(date(19)), RunStatus::Success);
        let plan = compute_plan(
            property(),
            SourceType::SearchPerformance,
            Some(&wm),
            date(20),
            &PlanParams {
                override_range: Some(DateRange::new(date(1), date(25)).unwrap()),
                ..params()
            },
        );
        let range = plan.range.unwrap();
        assert_eq!(range.start, date(1));
        assert_eq!(range.end, date(19));
    }

    #[test]
    fn override_range_entirely_in_future_is_empty() {
        let plan = compute_plan(
            property(),
            SourceType::SearchPerformance,
            None,
            date(20),
            &PlanParams {
                override_range: Some(DateRange::new(date(25), date(28)).unwrap()),
                ..params()
            },
        );
        assert!(plan.is_empty());
    }
}
