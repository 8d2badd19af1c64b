use chrono::NaiveDateTime;

/// One channel message as the source hands it over. The gateway reports
/// unix timestamps; we keep them naive (UTC with the zone marker dropped).
#[derive(Clone, Debug)]
pub struct Message {
    pub id: i64,
    pub date: NaiveDateTime,
    pub text: Option<String>,
}

/// A filtered message projected into the two columns written to the sheet.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateRow {
    pub date: String,
    pub text: String,
}

impl CandidateRow {
    pub fn new(date: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            text: text.into(),
        }
    }
}

/// Inclusive date range for a sync run. Crossing strictly below `start`
/// terminates the channel scan; `end` is an ordinary filter bound.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DateWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}
