// Statement Pipeline - Core Library
// Incremental extract-and-transform of bank statement CSV exports:
// files → transactions_landing → transactions, resumable by line watermark.

pub mod archiver;
pub mod config;
pub mod cursor;
pub mod db;
pub mod error;
pub mod landing;
pub mod lister;
pub mod logging;
pub mod normalizer;
pub mod notify;
pub mod pipeline;
pub mod transform;
pub mod validation;

// Re-export commonly used types
pub use archiver::{archive_file, archived_path};
pub use config::{PipelineConfig, TelegramConfig};
pub use cursor::{LineCursorStore, SourceCursor};
pub use db::{
    AppendOutcome, LandingRecord, LandingStore, LedgerStore,
    SqliteLandingStore, SqliteLedgerStore, TransactionRecord,
};
pub use error::{PipelineError, Result};
pub use landing::{LandingReport, LandingWriter, RawInputRow, RowFailure, RowFailureKind};
pub use lister::list_source_files;
pub use normalizer::{extract_value_date, normalize};
pub use notify::{LogNotifier, Notification, NotificationKind, Notifier};
pub use pipeline::{run_with_retries, Pipeline, RunReport, Task};
pub use transform::{TransformReport, TransformWriter};
pub use validation::{CommandValidator, NoValidation, ValidationOutcome, Validator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
