use chrono::NaiveDateTime;

use crate::models::{CandidateRow, DateWindow, Message};

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Whether a message belongs in the sync result: text present and matching
/// the keyword, date not past the window end. The lower bound is handled by
/// the scan's early exit, not here.
pub fn matches(message: &Message, window: &DateWindow, keyword: &str) -> bool {
    if message.date > window.end {
        return false;
    }
    match &message.text {
        Some(text) if !text.is_empty() => contains_keyword(text, keyword),
        _ => false,
    }
}

pub fn contains_keyword(text: &str, keyword: &str) -> bool {
    text.to_lowercase().contains(&keyword.to_lowercase())
}

pub fn format_date(date: NaiveDateTime) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Project messages that survived the scan into sheet rows. Messages with
/// absent or empty text never produce a row, keyword aside.
pub fn to_candidates(messages: &[Message]) -> Vec<CandidateRow> {
    messages
        .iter()
        .filter_map(|message| {
            let text = message.text.as_deref()?;
            if text.is_empty() {
                return None;
            }
            Some(CandidateRow::new(format_date(message.date), text))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    fn window() -> DateWindow {
        DateWindow {
            start: at(2024, 1, 1, 0, 0, 0),
            end: at(2024, 1, 31, 0, 0, 0),
        }
    }

    fn message(date: NaiveDateTime, text: &str) -> Message {
        Message {
            id: 1,
            date,
            text: Some(text.to_string()),
        }
    }

    #[test]
    fn keyword_is_case_insensitive() {
        let msg = message(at(2024, 1, 10, 12, 0, 0), "Look at BTC now");
        assert!(matches(&msg, &window(), "btc"));
        let msg = message(at(2024, 1, 10, 12, 0, 0), "btc to the moon");
        assert!(matches(&msg, &window(), "BTC"));
    }

    #[test]
    fn message_at_end_bound_is_kept() {
        let msg = message(at(2024, 1, 31, 0, 0, 0), "btc dip");
        assert!(matches(&msg, &window(), "btc"));
        let msg = message(at(2024, 1, 31, 0, 0, 1), "btc dip");
        assert!(!matches(&msg, &window(), "btc"));
    }

    #[test]
    fn absent_or_empty_text_never_matches() {
        let msg = Message {
            id: 1,
            date: at(2024, 1, 10, 0, 0, 0),
            text: None,
        };
        assert!(!matches(&msg, &window(), "btc"));
        let msg = message(at(2024, 1, 10, 0, 0, 0), "");
        assert!(!matches(&msg, &window(), "btc"));
    }

    #[test]
    fn formats_dates_zero_padded() {
        assert_eq!(format_date(at(2024, 3, 7, 9, 5, 1)), "2024-03-07 09:05:01");
    }

    #[test]
    fn projection_drops_empty_text() {
        let messages = vec![
            message(at(2024, 1, 2, 8, 30, 0), "btc pump"),
            Message {
                id: 2,
                date: at(2024, 1, 3, 0, 0, 0),
                text: None,
            },
            message(at(2024, 1, 4, 0, 0, 0), ""),
        ];
        let candidates = to_candidates(&messages);
        assert_eq!(
            candidates,
            vec![CandidateRow::new("2024-01-02 08:30:00", "btc pump")]
        );
    }
}
