use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::models::DateWindow;

/// Parse an explicit `YYYY-MM-DD` date from the prompt.
pub fn parse_date_input(input: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d").ok()
}

/// Window for the "last day" shortcut: from the start of yesterday up to
/// `now`.
pub fn last_day_window(now: NaiveDateTime) -> DateWindow {
    let start = (now.date() - Duration::days(1)).and_time(NaiveTime::MIN);
    DateWindow { start, end: now }
}

/// Window for an explicit date pair. Both bounds sit at midnight of their
/// day, matching how the dates are typed. Rejects a start after the end.
pub fn explicit_window(start: NaiveDate, end: NaiveDate) -> Result<DateWindow, String> {
    let start = start.and_time(NaiveTime::MIN);
    let end = end.and_time(NaiveTime::MIN);
    if start > end {
        return Err("Start date must be before the end date.".to_string());
    }
    Ok(DateWindow { start, end })
}
