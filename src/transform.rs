// 🔄 Transform Writer - transactions_landing → transactions, resumed by watermark
//
// For each source:
//   watermark_landing = MAX(line) in landing
//   watermark_ledger  = MAX(line) in ledger
// If the ledger is behind, every landing row with line > watermark_ledger is
// normalized and appended in ascending line order. Nothing else marks a row as
// processed, so re-running after a crash picks up at the first missing line.

use crate::cursor::SourceCursor;
use crate::db::{AppendOutcome, LandingStore, LedgerStore};
use crate::error::Result;
use crate::normalizer::normalize;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Why a source's batch stopped before reaching the landing watermark
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformHalt {
    pub line: i64,
    pub message: String,
}

/// Outcome of transforming one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformReport {
    pub source: String,
    pub watermark_landing: i64,
    /// Ledger watermark before this batch
    pub watermark_ledger: i64,
    pub rows_written: i64,
    /// Rows already present in the ledger under the same (source, line)
    pub rows_duplicate: i64,
    pub halted: Option<TransformHalt>,
}

impl TransformReport {
    pub fn is_noop(&self) -> bool {
        self.rows_written == 0 && self.rows_duplicate == 0 && self.halted.is_none()
    }

    pub fn is_complete(&self) -> bool {
        self.halted.is_none()
    }
}

pub struct TransformWriter<'a> {
    landing: &'a dyn LandingStore,
    ledger: &'a mut dyn LedgerStore,
}

impl<'a> TransformWriter<'a> {
    pub fn new(landing: &'a dyn LandingStore, ledger: &'a mut dyn LedgerStore) -> Self {
        TransformWriter { landing, ledger }
    }

    /// Bring the ledger up to the landing watermark for `source`.
    ///
    /// A row whose date cannot be parsed (or that the ledger rejects) halts the
    /// batch for this source: rows before it stay committed and the next run
    /// resumes at that row. `StoreUnavailable` is returned as `Err`.
    pub fn transform_source(&mut self, source: &str) -> Result<TransformReport> {
        let cursor = SourceCursor::read(source, self.landing, &*self.ledger)?;

        let mut report = TransformReport {
            source: source.to_string(),
            watermark_landing: cursor.landing,
            watermark_ledger: cursor.ledger,
            rows_written: 0,
            rows_duplicate: 0,
            halted: None,
        };

        if cursor.is_caught_up() {
            debug!(source = %source, watermark = cursor.ledger, "source caught up");
            return Ok(report);
        }

        let pending = self.landing.rows_after(source, cursor.ledger)?;

        for row in &pending {
            let appended = normalize(row).and_then(|tx| self.ledger.append(&tx));

            match appended {
                Ok(AppendOutcome::Inserted) => report.rows_written += 1,
                Ok(AppendOutcome::Duplicate) => report.rows_duplicate += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(source = %source, line = row.line, error = %e, "transform halted");
                    report.halted = Some(TransformHalt {
                        line: row.line,
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }

        info!(
            source = %source,
            from_line = cursor.ledger + 1,
            rows_written = report.rows_written,
            rows_duplicate = report.rows_duplicate,
            halted = report.halted.is_some(),
            "source transformed"
        );

        Ok(report)
    }

    /// Transform several sources in order, stopping only on a fatal error
    pub fn transform_sources(&mut self, sources: &[String]) -> Result<Vec<TransformReport>> {
        sources
            .iter()
            .map(|source| self.transform_source(source))
            .collect()
    }

    /// Every landed source whose ledger watermark is behind
    pub fn lagging_sources(&self) -> Result<Vec<String>> {
        let mut lagging = Vec::new();
        for source in self.landing.sources()? {
            let cursor = SourceCursor::read(&source, self.landing, &*self.ledger)?;
            if !cursor.is_caught_up() {
                lagging.push(source);
            }
        }
        Ok(lagging)
    }
}
