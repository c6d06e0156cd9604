//! Fixed daily call ceiling per key.

use chrono::{DateTime, NaiveTime, Utc};

/// A per-key counter of calls within the current UTC day.
///
/// The window resets lazily: the first check after `window_start + 24h`
/// zeroes the counter. No background timer is involved. Checks do not
/// consume quota; `used <= limit` always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyQuota {
    limit: u32,
    used: u32,
    window_start: DateTime<Utc>,
}

fn utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

impl DailyQuota {
    /// Creates a quota window anchored at the UTC midnight containing `now`.
    #[must_use]
    pub fn new(limit: u32, now: DateTime<Utc>) -> Self {
        Self {
            limit,
            used: 0,
            window_start: utc_midnight(now),
        }
    }

    /// Returns true if counting `cost` calls now would exceed the limit.
    ///
    /// Lazily resets the window first if `now` has crossed the UTC day
    /// boundary since the last check. Never consumes quota.
    pub fn would_exceed(&mut self, cost: u32, now: DateTime<Utc>) -> bool {
        let current_window = utc_midnight(now);
        if current_window > self.window_start {
            self.window_start = current_window;
            self.used = 0;
        }

        match self.used.checked_add(cost) {
            Some(total) => total > self.limit,
            None => true,
        }
    }

    /// Counts `cost` calls against the current window.
    ///
    /// Callers must have checked [`DailyQuota::would_exceed`] first; the
    /// count saturates at the limit regardless.
    pub fn consume(&mut self, cost: u32) {
        self.used = self.used.saturating_add(cost).min(self.limit);
    }

    /// Calls consumed in the current window.
    #[must_use]
    pub const fn used(&self) -> u32 {
        self.used
    }

    /// The configured daily limit.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn noon(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn counts_until_limit_then_refuses() {
        let mut quota = DailyQuota::new(3, noon(1));
        for _ in 0..3 {
            assert!(!quota.would_exceed(1, noon(1)));
            quota.consume(1);
        }
        assert!(quota.would_exceed(1, noon(1)));
        assert_eq!(quota.used(), 3);
    }

    #[test]
    fn check_does_not_consume() {
        let mut quota = DailyQuota::new(2, noon(1));
        assert!(!quota.would_exceed(2, noon(1)));
        assert!(!quota.would_exceed(2, noon(1)));
        assert_eq!(quota.used(), 0);
    }

    #[test]
    fn window_resets_across_utc_midnight() {
        let mut quota = DailyQuota::new(1, noon(1));
        assert!(!quota.would_exceed(1, noon(1)));
        quota.consume(1);
        assert!(quota.would_exceed(1, noon(1)));

        // Next day, the first check resets the window.
        assert!(!quota.would_exceed(1, noon(2)));
        assert_eq!(quota.used(), 0);
    }

    #[test]
    fn cost_larger_than_limit_is_refused() {
        let mut quota = DailyQuota::new(5, noon(1));
        assert!(quota.would_exceed(6, noon(1)));
        assert_eq!(quota.used(), 0);
    }

    #[test]
    fn used_never_exceeds_limit() {
        let mut quota = DailyQuota::new(3, noon(1));
        quota.consume(10);
        assert!(quota.used() <= quota.limit());
    }
}
