// ⚠️ Error Taxonomy - what can go wrong between a CSV file and the ledger
// Fatal errors stop the run; row-level errors are collected into batch reports.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Input directory cannot be read (fatal for the run)
    #[error("directory unavailable: {}: {source}", .path.display())]
    DirectoryUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A listed file could not be opened (file skipped for this run)
    #[error("source file unreadable: {}: {source}", .path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed CSV row (row skipped)
    #[error("row parse error in {source_name} line {line}: {message}")]
    RowParse {
        source_name: String,
        line: i64,
        message: String,
    },

    /// Store rejected a single row (row skipped)
    #[error("row write error in {source_name} line {line}: {message}")]
    RowWrite {
        source_name: String,
        line: i64,
        message: String,
    },

    /// Present but unparseable date reaching transform
    #[error("date format error in {source_name} line {line}: {field} = {value:?} is not DD/MM/YYYY")]
    DateFormat {
        source_name: String,
        line: i64,
        field: &'static str,
        value: String,
    },

    /// Backing store unreachable (fatal for the run)
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// File could not be marked as processed
    #[error("archive failed for {}: {source}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Downstream checkpoint could not be executed
    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Fatal errors abort the whole run and are surfaced to the notification sink.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::DirectoryUnavailable { .. }
                | PipelineError::StoreUnavailable(_)
                | PipelineError::Config(_)
        )
    }

    pub fn config(msg: impl Into<String>) -> Self {
        PipelineError::Config(msg.into())
    }

    /// Classify a rusqlite error raised while writing one row.
    ///
    /// Connection-level failures make the store unusable for every later row,
    /// so they become `StoreUnavailable`. Anything else only concerns this row.
    pub fn from_row_write(err: rusqlite::Error, source_name: &str, line: i64) -> Self {
        if is_store_failure(&err) {
            PipelineError::StoreUnavailable(err.to_string())
        } else {
            PipelineError::RowWrite {
                source_name: source_name.to_string(),
                line,
                message: err.to_string(),
            }
        }
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::StoreUnavailable(err.to_string())
    }
}

/// True when the error says the database itself is unreachable.
pub fn is_store_failure(err: &rusqlite::Error) -> bool {
    use rusqlite::ErrorCode;

    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.code,
            ErrorCode::CannotOpen
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::NotADatabase
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
                | ErrorCode::ReadOnly
                | ErrorCode::OutOfMemory
        ),
        _ => false,
    }
}
