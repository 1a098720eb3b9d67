//! Quota windows and limits.
//!
//! Quotas cap request *count* per rolling window, independent of credit
//! balance. Window keys encode the period (`YYYY-MM-DD` daily, `YYYY-MM`
//! monthly) so expiry is implicit: a new period simply queries a new key.

use chrono::{DateTime, Datelike, Months, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Which quota window a key or decision refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaWindow {
    /// Per-UTC-day window.
    Daily,

    /// Per-UTC-month window.
    Monthly,
}

impl QuotaWindow {
    /// The counter key for this window at `now`.
    #[must_use]
    pub fn key(self, now: DateTime<Utc>) -> String {
        match self {
            Self::Daily => now.format("%Y-%m-%d").to_string(),
            Self::Monthly => now.format("%Y-%m").to_string(),
        }
    }

    /// When the window containing `now` rolls over.
    ///
    /// # Panics
    ///
    /// Never panics for representable `DateTime<Utc>` inputs; date
    /// arithmetic stays within chrono's supported range.
    #[must_use]
    pub fn resets_at(self, now: DateTime<Utc>) -> DateTime<Utc> {
        let date = now.date_naive();
        let next = match self {
            Self::Daily => date.succ_opt().expect("date in supported range"),
            Self::Monthly => date
                .with_day(1)
                .and_then(|d| d.checked_add_months(Months::new(1)))
                .expect("date in supported range"),
        };
        Utc.from_utc_datetime(&next.and_time(NaiveTime::MIN))
    }
}

/// Request-count limits for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimits {
    /// Maximum requests per UTC day.
    pub daily: i64,

    /// Maximum requests per UTC month.
    pub monthly: i64,
}

/// Counter state for one window after an increment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuotaStatus {
    /// The window this status describes.
    pub window: QuotaWindow,

    /// The configured limit.
    pub limit: i64,

    /// The counter value after the increment.
    pub count: i64,

    /// When the window rolls over (unix-convertible).
    pub resets_at: DateTime<Utc>,
}

impl QuotaStatus {
    /// Requests left before the limit, clamped at zero.
    #[must_use]
    pub fn remaining(&self) -> i64 {
        (self.limit - self.count).max(0)
    }

    /// Whether the counter is over the limit.
    #[must_use]
    pub const fn exceeded(&self) -> bool {
        self.count > self.limit
    }
}

/// Outcome of an atomic check-and-increment across both windows.
///
/// The increment is always recorded, even over the limit, so usage beyond
/// the quota stays observable for audit. Only the decision differs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaDecision {
    /// Daily window state after the increment.
    pub daily: QuotaStatus,

    /// Monthly window state after the increment.
    pub monthly: QuotaStatus,
}

impl QuotaDecision {
    /// Whether the request is allowed (both windows within limits).
    #[must_use]
    pub fn allowed(&self) -> bool {
        !self.daily.exceeded() && !self.monthly.exceeded()
    }

    /// The first exhausted window, if any. Daily is reported before
    /// monthly since it resets sooner.
    #[must_use]
    pub fn exceeded_window(&self) -> Option<&QuotaStatus> {
        if self.daily.exceeded() {
            Some(&self.daily)
        } else if self.monthly.exceeded() {
            Some(&self.monthly)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 30, 0).unwrap()
    }

    #[test]
    fn window_keys() {
        let now = at(2026, 8, 6, 14);
        assert_eq!(QuotaWindow::Daily.key(now), "2026-08-06");
        assert_eq!(QuotaWindow::Monthly.key(now), "2026-08");
    }

    #[test]
    fn daily_reset_is_next_midnight() {
        let now = at(2026, 8, 6, 14);
        assert_eq!(
            QuotaWindow::Daily.resets_at(now),
            Utc.with_ymd_and_hms(2026, 8, 7, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn monthly_reset_crosses_year() {
        let now = at(2026, 12, 31, 23);
        assert_eq!(
            QuotaWindow::Monthly.resets_at(now),
            Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn status_remaining_clamps_at_zero() {
        let status = QuotaStatus {
            window: QuotaWindow::Daily,
            limit: 100,
            count: 101,
            resets_at: at(2026, 8, 7, 0),
        };
        assert_eq!(status.remaining(), 0);
        assert!(status.exceeded());
    }

    #[test]
    fn at_limit_is_not_exceeded() {
        let status = QuotaStatus {
            window: QuotaWindow::Daily,
            limit: 100,
            count: 100,
            resets_at: at(2026, 8, 7, 0),
        };
        assert!(!status.exceeded());
        assert_eq!(status.remaining(), 0);
    }

    #[test]
    fn decision_reports_daily_before_monthly() {
        let decision = QuotaDecision {
            daily: QuotaStatus {
                window: QuotaWindow::Daily,
                limit: 10,
                count: 11,
                resets_at: at(2026, 8, 7, 0),
            },
            monthly: QuotaStatus {
                window: QuotaWindow::Monthly,
                limit: 100,
                count: 101,
                resets_at: at(2026, 9, 1, 0),
            },
        };
        assert!(!decision.allowed());
        assert_eq!(
            decision.exceeded_window().unwrap().window,
            QuotaWindow::Daily
        );
    }
}
