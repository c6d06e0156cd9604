//! Inclusive date ranges for sync planning.
//!
//! Ingestion is organized around whole UTC days: a sync plan covers an
//! inclusive `[start, end]` range and processes days in increasing order,
//! which is what lets the watermark advance monotonically.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// An inclusive range of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    /// First day of the range (inclusive).
    pub start: NaiveDate,
    /// Last day of the range (inclusive).
    pub end: NaiveDate,
}

impl DateRange {
    /// Creates a new inclusive date range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDateRange`] if `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidDateRange {
                message: format!("start {start} is after end {end}"),
            });
        }
        Ok(Self { start, end })
    }

    /// Creates a single-day range.
    #[must_use]
    pub const fn single(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    /// Returns the number of days in the range (at least 1).
    #[must_use]
    pub fn len_days(&self) -> u64 {
        u64::try_from((self.end - self.start).num_days()).unwrap_or(0) + 1
    }

    /// Returns a copy with the end clamped to `latest` if it extends past it.
    ///
    /// Returns `None` if the whole range starts after `latest`.
    #[must_use]
    pub fn clamp_end(&self, latest: NaiveDate) -> Option<Self> {
        if self.start > latest {
            return None;
        }
        Some(Self {
            start: self.start,
            end: self.end.min(latest),
        })
    }

    /// Iterates over the days in the range in increasing order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let start = self.start;
        let end = self.end;
        std::iter::successors(Some(start), move |d| {
            d.succ_opt().filter(|next| *next <= end)
        })
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(DateRange::new(date(2024, 5, 2), date(2024, 5, 1)).is_err());
    }

    #[test]
    fn single_day_range_has_len_one() {
        let range = DateRange::single(date(2024, 5, 1));
        assert_eq!(range.len_days(), 1);
        assert_eq!(range.days().count(), 1);
    }

    #[test]
    fn days_iterate_in_increasing_order() {
        let range = DateRange::new(date(2024, 4, 29), date(2024, 5, 2)).unwrap();
        let days: Vec<_> = range.days().collect();
        assert_eq!(
            days,
            vec![
                date(2024, 4, 29),
                date(2024, 4, 30),
                date(2024, 5, 1),
                date(2024, 5, 2),
            ]
        );
        assert_eq!(range.len_days(), 4);
    }

    #[test]
    fn clamp_end_truncates_future_dates() {
        let range = DateRange::new(date(2024, 5, 1), date(2024, 5, 10)).unwrap();
        let clamped = range.clamp_end(date(2024, 5, 3)).unwrap();
        assert_eq!(clamped.end, date(2024, 5, 3));

        // Range entirely past the clamp point disappears
        assert!(range.clamp_end(date(2024, 4, 30)).is_none());
    }
}
