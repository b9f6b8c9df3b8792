//! Calendar helpers for budget periods (UTC).

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use infergrid_core::budget::BudgetPeriod;

fn to_date(secs: u64) -> NaiveDate {
    DateTime::<Utc>::from_timestamp(secs as i64, 0)
        .unwrap_or_default()
        .date_naive()
}

/// `YYYY-MM-DD` for a unix timestamp in seconds.
pub fn date_string(secs: u64) -> String {
    to_date(secs).format("%Y-%m-%d").to_string()
}

/// Midnight starting the period that contains `now`.
///
/// Weeks start on Monday.
pub fn period_start(period: BudgetPeriod, now: u64) -> u64 {
    let date = to_date(now);
    let start = match period {
        BudgetPeriod::Daily => date,
        BudgetPeriod::Weekly => date - Days::new(date.weekday().num_days_from_monday() as u64),
        BudgetPeriod::Monthly => date.with_day(1).unwrap_or(date),
    };
    start
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp() as u64)
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-05-15 13:20:00 UTC, a Wednesday.
    const NOW: u64 = 1_715_779_200;

    #[test]
    fn formats_utc_date() {
        assert_eq!(date_string(NOW), "2024-05-15");
        assert_eq!(date_string(0), "1970-01-01");
    }

    #[test]
    fn period_starts() {
        assert_eq!(date_string(period_start(BudgetPeriod::Daily, NOW)), "2024-05-15");
        assert_eq!(date_string(period_start(BudgetPeriod::Weekly, NOW)), "2024-05-13");
        assert_eq!(date_string(period_start(BudgetPeriod::Monthly, NOW)), "2024-05-01");
        assert_eq!(period_start(BudgetPeriod::Daily, NOW) % 86_400, 0);
    }
}
