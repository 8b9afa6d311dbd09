// 📥 Landing Writer - statement CSV → transactions_landing, one row at a time
//
// Input files are headerless with a fixed positional schema:
//   Date, Amount, Description, Balance
// Every row gets Line = its 1-based position in the file. A row that fails to
// parse or to insert is recorded in the report and skipped; later rows keep
// their original positions, so the provenance trail may have gaps but never shifts.

use crate::db::{LandingRecord, LandingStore};
use crate::error::{PipelineError, Result};
use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

/// Number of positional fields in a statement row
pub const FIELD_COUNT: usize = 4;

// ============================================================================
// RAW INPUT ROW
// ============================================================================

/// One parsed CSV line, before any cleaning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawInputRow {
    pub date: String,
    pub amount: String,
    pub description: String,
    pub balance: String,
}

impl RawInputRow {
    /// Map a CSV record onto the fixed schema; any other column count is malformed
    pub fn from_record(record: &StringRecord, source: &str, line: i64) -> Result<Self> {
        if record.len() != FIELD_COUNT {
            return Err(PipelineError::RowParse {
                source_name: source.to_string(),
                line,
                message: format!(
                    "expected {} fields, found {}",
                    FIELD_COUNT,
                    record.len()
                ),
            });
        }

        Ok(RawInputRow {
            date: record[0].to_string(),
            amount: record[1].to_string(),
            description: record[2].to_string(),
            balance: record[3].to_string(),
        })
    }

    pub fn into_landing(self, source: &str, line: i64) -> LandingRecord {
        LandingRecord {
            tx_date: Some(self.date),
            amount: Some(self.amount),
            tx_description: Some(self.description),
            balance: Some(self.balance),
            data_source: source.to_string(),
            line,
        }
    }
}

// ============================================================================
// BATCH REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowFailureKind {
    Parse,
    Write,
}

/// A row that was attempted but not landed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFailure {
    pub line: i64,
    pub kind: RowFailureKind,
    pub message: String,
}

/// Outcome of landing one source file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LandingReport {
    pub source: String,
    /// Rows attempted (highest line position reached)
    pub rows_seen: i64,
    pub rows_written: i64,
    pub failures: Vec<RowFailure>,
}

impl LandingReport {
    fn new(source: &str) -> Self {
        LandingReport {
            source: source.to_string(),
            ..Default::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_lines(&self) -> Vec<i64> {
        self.failures.iter().map(|f| f.line).collect()
    }

    fn record(&mut self, line: i64, outcome: Result<()>) -> Result<()> {
        self.rows_seen = line;
        match outcome {
            Ok(()) => {
                self.rows_written += 1;
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                let kind = match e {
                    PipelineError::RowWrite { .. } => RowFailureKind::Write,
                    _ => RowFailureKind::Parse,
                };
                warn!(source = %self.source, line, error = %e, "row skipped");
                self.failures.push(RowFailure {
                    line,
                    kind,
                    message: e.to_string(),
                });
                Ok(())
            }
        }
    }
}

// ============================================================================
// LANDING WRITER
// ============================================================================

pub struct LandingWriter<'a> {
    store: &'a mut dyn LandingStore,
}

impl<'a> LandingWriter<'a> {
    pub fn new(store: &'a mut dyn LandingStore) -> Self {
        LandingWriter { store }
    }

    /// Land `dir/file_name`, tagging every row with `file_name` as its source
    pub fn land_file(&mut self, dir: &Path, file_name: &str) -> Result<LandingReport> {
        let path = dir.join(file_name);
        let file = File::open(&path).map_err(|e| PipelineError::SourceUnreadable {
            path: path.clone(),
            source: e,
        })?;

        self.land_reader(file_name, file)
    }

    /// Land already-open content for `source`.
    ///
    /// Only fatal errors (store unreachable, I/O failure on the input) are
    /// returned as `Err`; row failures end up in the report.
    pub fn land_reader<R: Read>(&mut self, source: &str, content: R) -> Result<LandingReport> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(content);

        let mut report = LandingReport::new(source);

        for (idx, result) in reader.records().enumerate() {
            let line = idx as i64 + 1;

            let outcome = match result {
                Ok(record) => RawInputRow::from_record(&record, source, line)
                    .and_then(|row| self.store.append(&row.into_landing(source, line))),
                Err(e) if e.is_io_error() => {
                    return Err(PipelineError::SourceUnreadable {
                        path: source.into(),
                        source: std::io::Error::other(e.to_string()),
                    });
                }
                Err(e) => Err(PipelineError::RowParse {
                    source_name: source.to_string(),
                    line,
                    message: e.to_string(),
                }),
            };

            report.record(line, outcome)?;
        }

        info!(
            source = %source,
            rows_seen = report.rows_seen,
            rows_written = report.rows_written,
            rows_failed = report.failures.len(),
            "source file landed"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::LineCursorStore;
    use crate::db::SqliteLandingStore;

    /// Landing store that rejects chosen lines, or goes down entirely
    struct FlakyLanding {
        inner: SqliteLandingStore,
        reject_lines: Vec<i64>,
        down_from: Option<i64>,
    }

    impl FlakyLanding {
        fn new() -> Self {
            FlakyLanding {
                inner: SqliteLandingStore::open_in_memory().unwrap(),
                reject_lines: Vec::new(),
                down_from: None,
            }
        }
    }

    impl LineCursorStore for FlakyLanding {
        fn max_line(&self, source: &str) -> Result<i64> {
            self.inner.max_line(source)
        }
    }

    impl LandingStore for FlakyLanding {
        fn append(&mut self, record: &LandingRecord) -> Result<()> {
            if self.down_from.is_some_and(|l| record.line >= l) {
                return Err(PipelineError::StoreUnavailable("connection refused".into()));
            }
            if self.reject_lines.contains(&record.line) {
                return Err(PipelineError::RowWrite {
                    source_name: record.data_source.clone(),
                    line: record.line,
                    message: "insert rejected".into(),
                });
            }
            self.inner.append(record)
        }

        fn rows_after(&self, source: &str, after_line: i64) -> Result<Vec<LandingRecord>> {
            self.inner.rows_after(source, after_line)
        }

        fn sources(&self) -> Result<Vec<String>> {
            self.inner.sources()
        }

        fn count_for(&self, source: &str) -> Result<i64> {
            self.inner.count_for(source)
        }
    }

    const STATEMENT: &str = "\
01/03/2024,-12.50,Coffee shop,987.50
02/03/2024,1500.00,Salary Value Date: 01/03/2024,2487.50
03/03/2024,-40.00,\"Groceries, weekly\",2447.50
";

    #[test]
    fn test_lands_every_row_with_position() {
        let mut store = SqliteLandingStore::open_in_memory().unwrap();

        let report = LandingWriter::new(&mut store)
            .land_reader("march.csv", STATEMENT.as_bytes())
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(report.rows_seen, 3);
        assert_eq!(report.rows_written, 3);

        let rows = store.rows_after("march.csv", 0).unwrap();
        let lines: Vec<i64> = rows.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![1, 2, 3]);
        assert!(rows.iter().all(|r| r.data_source == "march.csv"));
        assert_eq!(rows[2].tx_description.as_deref(), Some("Groceries, weekly"));
        assert_eq!(rows[0].balance.as_deref(), Some("987.50"));
    }

    #[test]
    fn test_first_row_is_data_not_header() {
        let mut store = SqliteLandingStore::open_in_memory().unwrap();

        LandingWriter::new(&mut store)
            .land_reader("h.csv", "Date,Amount,Description,Balance\n".as_bytes())
            .unwrap();

        let rows = store.rows_after("h.csv", 0).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tx_date.as_deref(), Some("Date"));
    }

    #[test]
    fn test_malformed_row_keeps_later_positions() {
        let mut store = SqliteLandingStore::open_in_memory().unwrap();
        let content = "\
01/03/2024,-1.00,A,10.00
02/03/2024,-2.00,B
03/03/2024,-3.00,C,7.00
";

        let report = LandingWriter::new(&mut store)
            .land_reader("gaps.csv", content.as_bytes())
            .unwrap();

        assert_eq!(report.rows_seen, 3);
        assert_eq!(report.rows_written, 2);
        assert_eq!(report.failed_lines(), vec![2]);
        assert_eq!(report.failures[0].kind, RowFailureKind::Parse);

        let lines: Vec<i64> = store
            .rows_after("gaps.csv", 0)
            .unwrap()
            .iter()
            .map(|r| r.line)
            .collect();
        assert_eq!(lines, vec![1, 3]);
    }

    #[test]
    fn test_write_failure_skips_only_that_row() {
        let mut store = FlakyLanding::new();
        store.reject_lines = vec![2];

        let report = LandingWriter::new(&mut store)
            .land_reader("march.csv", STATEMENT.as_bytes())
            .unwrap();

        assert_eq!(report.rows_written, 2);
        assert_eq!(report.failures[0].kind, RowFailureKind::Write);
        assert_eq!(store.max_line("march.csv").unwrap(), 3);
    }

    #[test]
    fn test_store_outage_aborts_file() {
        let mut store = FlakyLanding::new();
        store.down_from = Some(2);

        let err = LandingWriter::new(&mut store)
            .land_reader("march.csv", STATEMENT.as_bytes())
            .unwrap_err();

        assert!(matches!(err, PipelineError::StoreUnavailable(_)));
        // Rows already appended stay (no rollback)
        assert_eq!(store.max_line("march.csv").unwrap(), 1);
    }

    #[test]
    fn test_empty_fields_are_kept_raw() {
        let mut store = SqliteLandingStore::open_in_memory().unwrap();

        LandingWriter::new(&mut store)
            .land_reader("e.csv", ",,,\n".as_bytes())
            .unwrap();

        let rows = store.rows_after("e.csv", 0).unwrap();
        assert_eq!(rows[0].amount.as_deref(), Some(""));
    }

    #[test]
    fn test_relanding_duplicates_rows() {
        let mut store = SqliteLandingStore::open_in_memory().unwrap();

        for _ in 0..2 {
            LandingWriter::new(&mut store)
                .land_reader("march.csv", STATEMENT.as_bytes())
                .unwrap();
        }

        assert_eq!(store.count_for("march.csv").unwrap(), 6);
        assert_eq!(store.max_line("march.csv").unwrap(), 3);
    }

    #[test]
    fn test_land_missing_file_is_unreadable() {
        let mut store = SqliteLandingStore::open_in_memory().unwrap();
        let dir = tempfile::TempDir::new().unwrap();

        let err = LandingWriter::new(&mut store)
            .land_file(dir.path(), "nope.csv")
            .unwrap_err();

        assert!(matches!(err, PipelineError::SourceUnreadable { .. }));
    }
}
