use std::collections::HashSet;
use std::io;

use crate::models::CandidateRow;

pub const HEADER: [&str; 2] = ["Date", "BTC Messages"];

#[derive(Debug)]
pub enum SheetError {
    Config(String),
    Auth(String),
    NotFound(String),
    Request(String),
    Io(String),
}

impl SheetError {
    pub fn message(&self) -> String {
        match self {
            SheetError::Config(msg) => msg.clone(),
            SheetError::Auth(msg) => msg.clone(),
            SheetError::NotFound(msg) => msg.clone(),
            SheetError::Request(msg) => msg.clone(),
            SheetError::Io(msg) => msg.clone(),
        }
    }
}

impl From<io::Error> for SheetError {
    fn from(err: io::Error) -> Self {
        SheetError::Io(err.to_string())
    }
}

/// The four operations the engine needs from a sheet tab. All side effects
/// are immediately visible to later calls in the same run; there is no
/// transaction across them, so a concurrent writer between `read_all` and
/// `append` can still double-insert (best effort, last writer wins).
pub trait SheetStore {
    /// Every row of the tab in order, row 0 included if present. Rows may be
    /// ragged; missing cells read as empty.
    fn read_all(&mut self, tab: &str) -> Result<Vec<Vec<String>>, SheetError>;

    /// Insert the bold `Date | BTC Messages` header at row 0 unless it is
    /// already there. Idempotent.
    fn ensure_header(&mut self, tab: &str) -> Result<(), SheetError>;

    /// Write `rows` after the current last row, preserving order. No-op for
    /// an empty slice.
    fn append(&mut self, tab: &str, rows: &[CandidateRow]) -> Result<(), SheetError>;

    /// Reorder everything below row 0 by column 0 descending (string
    /// comparison). Row 0 stays in place.
    fn sort_by_date_desc(&mut self, tab: &str) -> Result<(), SheetError>;
}

/// True for the fixed header row. Trailing empty cells are tolerated since
/// the values endpoint may pad rows read back from the grid.
pub fn is_header_row(row: &[String]) -> bool {
    row.len() >= 2
        && row[0] == HEADER[0]
        && row[1] == HEADER[1]
        && row.iter().skip(2).all(|cell| cell.is_empty())
}

fn row_key(row: &[String]) -> (String, String) {
    (
        row.first().cloned().unwrap_or_default(),
        row.get(1).cloned().unwrap_or_default(),
    )
}

/// Reconcile `candidates` against the tab's current contents and append the
/// delta. A candidate is appended unless its exact `(date, text)` pair is
/// already stored or either field is empty. The batch itself is not deduped:
/// the same pair twice among `candidates` lands twice. The tab is re-sorted
/// on every run, new rows or not, so manual edits get normalized too.
/// Returns the number of rows appended.
pub fn sync<S: SheetStore>(
    store: &mut S,
    tab: &str,
    candidates: &[CandidateRow],
) -> Result<usize, SheetError> {
    let mut existing = store.read_all(tab)?;
    if existing.first().is_some_and(|row| is_header_row(row)) {
        existing.remove(0);
    }
    let existing: HashSet<(String, String)> =
        existing.iter().map(|row| row_key(row)).collect();

    let new_rows: Vec<CandidateRow> = candidates
        .iter()
        .filter(|c| !c.date.is_empty() && !c.text.is_empty())
        .filter(|c| !existing.contains(&(c.date.clone(), c.text.clone())))
        .cloned()
        .collect();

    if !new_rows.is_empty() {
        store.ensure_header(tab)?;
        store.append(tab, &new_rows)?;
    }

    store.sort_by_date_desc(tab)?;
    Ok(new_rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory stand-in for the Google store, faithful to the contract:
    /// header pinned at row 0 during sorts, appends at the tail.
    struct MemStore {
        rows: Vec<Vec<String>>,
        sort_calls: usize,
    }

    impl MemStore {
        fn new(rows: Vec<Vec<String>>) -> Self {
            Self {
                rows,
                sort_calls: 0,
            }
        }

        fn empty() -> Self {
            Self::new(Vec::new())
        }
    }

    impl SheetStore for MemStore {
        fn read_all(&mut self, _tab: &str) -> Result<Vec<Vec<String>>, SheetError> {
            Ok(self.rows.clone())
        }

        fn ensure_header(&mut self, _tab: &str) -> Result<(), SheetError> {
            if !self.rows.first().is_some_and(|row| is_header_row(row)) {
                self.rows.insert(
                    0,
                    HEADER.iter().map(|cell| cell.to_string()).collect(),
                );
            }
            Ok(())
        }

        fn append(&mut self, _tab: &str, rows: &[CandidateRow]) -> Result<(), SheetError> {
            for row in rows {
                self.rows.push(vec![row.date.clone(), row.text.clone()]);
            }
            Ok(())
        }

        fn sort_by_date_desc(&mut self, _tab: &str) -> Result<(), SheetError> {
            self.sort_calls += 1;
            if self.rows.len() > 1 {
                let data = &mut self.rows[1..];
                data.sort_by(|a, b| {
                    let a0 = a.first().cloned().unwrap_or_default();
                    let b0 = b.first().cloned().unwrap_or_default();
                    b0.cmp(&a0)
                });
            }
            Ok(())
        }
    }

    fn candidate(date: &str, text: &str) -> CandidateRow {
        CandidateRow::new(date, text)
    }

    #[test]
    fn second_run_with_same_candidates_adds_nothing() {
        let mut store = MemStore::empty();
        let candidates = vec![
            candidate("2024-01-02 10:00:00", "btc up"),
            candidate("2024-01-01 09:00:00", "btc down"),
        ];
        assert_eq!(sync(&mut store, "BTC Messages", &candidates).unwrap(), 2);
        assert_eq!(sync(&mut store, "BTC Messages", &candidates).unwrap(), 0);
        // header + two data rows, nothing doubled
        assert_eq!(store.rows.len(), 3);
    }

    #[test]
    fn candidate_equal_to_existing_row_is_excluded() {
        let mut store = MemStore::new(vec![
            vec!["Date".to_string(), "BTC Messages".to_string()],
            vec!["2024-01-01 09:00:00".to_string(), "btc down".to_string()],
        ]);
        let candidates = vec![
            candidate("2024-01-01 09:00:00", "btc down"),
            candidate("2024-01-03 12:00:00", "btc fresh"),
        ];
        assert_eq!(sync(&mut store, "BTC Messages", &candidates).unwrap(), 1);
        assert_eq!(store.rows.len(), 3);
    }

    #[test]
    fn duplicate_pair_within_batch_is_appended_twice() {
        let mut store = MemStore::empty();
        let candidates = vec![
            candidate("2024-01-01 00:00:00", "btc pump"),
            candidate("2024-01-01 00:00:00", "btc pump"),
        ];
        assert_eq!(sync(&mut store, "BTC Messages", &candidates).unwrap(), 2);
        assert_eq!(store.rows.len(), 3);
    }

    #[test]
    fn data_rows_end_up_sorted_descending() {
        let mut store = MemStore::empty();
        let candidates = vec![
            candidate("2024-01-01 09:00:00", "older"),
            candidate("2024-01-05 10:00:00", "newest"),
            candidate("2024-01-03 11:00:00", "middle"),
        ];
        sync(&mut store, "BTC Messages", &candidates).unwrap();
        let dates: Vec<&str> = store.rows[1..]
            .iter()
            .map(|row| row[0].as_str())
            .collect();
        assert_eq!(
            dates,
            vec![
                "2024-01-05 10:00:00",
                "2024-01-03 11:00:00",
                "2024-01-01 09:00:00"
            ]
        );
    }

    #[test]
    fn sort_runs_even_when_nothing_new() {
        let mut store = MemStore::new(vec![
            vec!["Date".to_string(), "BTC Messages".to_string()],
            vec!["2024-01-01 09:00:00".to_string(), "btc down".to_string()],
            vec!["2024-01-04 09:00:00".to_string(), "btc up".to_string()],
        ]);
        assert_eq!(sync(&mut store, "BTC Messages", &[]).unwrap(), 0);
        assert_eq!(store.sort_calls, 1);
        assert_eq!(store.rows[1][0], "2024-01-04 09:00:00");
    }

    #[test]
    fn empty_field_candidates_are_rejected() {
        let mut store = MemStore::empty();
        let candidates = vec![
            candidate("2024-01-01 09:00:00", ""),
            candidate("", "btc orphan"),
        ];
        assert_eq!(sync(&mut store, "BTC Messages", &candidates).unwrap(), 0);
        // no header either: nothing new means no header call
        assert!(store.rows.is_empty());
    }

    #[test]
    fn ensure_header_twice_leaves_single_header() {
        let mut store = MemStore::new(vec![vec![
            "2024-01-01 09:00:00".to_string(),
            "btc down".to_string(),
        ]]);
        store.ensure_header("BTC Messages").unwrap();
        store.ensure_header("BTC Messages").unwrap();
        assert!(is_header_row(&store.rows[0]));
        let headers = store
            .rows
            .iter()
            .filter(|row| is_header_row(row))
            .count();
        assert_eq!(headers, 1);
    }

    #[test]
    fn header_row_recognition_tolerates_padding() {
        let padded = vec![
            "Date".to_string(),
            "BTC Messages".to_string(),
            String::new(),
        ];
        assert!(is_header_row(&padded));
        let wrong = vec!["Date".to_string(), "Messages".to_string()];
        assert!(!is_header_row(&wrong));
    }
}
