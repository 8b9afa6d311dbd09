// 📍 Line Cursors - per-source resumption watermarks in each store
//
// A watermark is never stored: it is re-derived every run as
// COALESCE(MAX(line), 0) over the store that owns the stage.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Anything that can answer "highest line already written for this source"
pub trait LineCursorStore {
    /// Highest `Line` stored for `source`, or 0 when the source has no rows
    fn max_line(&self, source: &str) -> Result<i64>;
}

/// Both watermarks for one source, read at the same moment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCursor {
    pub source: String,
    pub landing: i64,
    pub ledger: i64,
}

impl SourceCursor {
    /// Read the landing and ledger watermarks for `source`
    pub fn read<L, G>(source: &str, landing: &L, ledger: &G) -> Result<Self>
    where
        L: LineCursorStore + ?Sized,
        G: LineCursorStore + ?Sized,
    {
        Ok(SourceCursor {
            source: source.to_string(),
            landing: landing.max_line(source)?,
            ledger: ledger.max_line(source)?,
        })
    }

    /// Ledger already holds every landed line
    pub fn is_caught_up(&self) -> bool {
        self.ledger >= self.landing
    }

    /// Number of line positions between the two watermarks
    pub fn pending(&self) -> i64 {
        (self.landing - self.ledger).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixedCursor(HashMap<String, i64>);

    impl LineCursorStore for FixedCursor {
        fn max_line(&self, source: &str) -> Result<i64> {
            Ok(self.0.get(source).copied().unwrap_or(0))
        }
    }

    fn cursor_with(entries: &[(&str, i64)]) -> FixedCursor {
        FixedCursor(
            entries
                .iter()
                .map(|(s, l)| (s.to_string(), *l))
                .collect(),
        )
    }

    #[test]
    fn test_unknown_source_has_zero_watermark() {
        let landing = cursor_with(&[]);
        let ledger = cursor_with(&[]);

        let cursor = SourceCursor::read("a.csv", &landing, &ledger).unwrap();

        assert_eq!(cursor.landing, 0);
        assert_eq!(cursor.ledger, 0);
        assert!(cursor.is_caught_up());
        assert_eq!(cursor.pending(), 0);
    }

    #[test]
    fn test_pending_lines_between_watermarks() {
        let landing = cursor_with(&[("a.csv", 8)]);
        let ledger = cursor_with(&[("a.csv", 5)]);

        let cursor = SourceCursor::read("a.csv", &landing, &ledger).unwrap();

        assert!(!cursor.is_caught_up());
        assert_eq!(cursor.pending(), 3);
    }

    #[test]
    fn test_ledger_ahead_counts_as_caught_up() {
        let landing = cursor_with(&[("a.csv", 2)]);
        let ledger = cursor_with(&[("a.csv", 4)]);

        let cursor = SourceCursor::read("a.csv", &landing, &ledger).unwrap();

        assert!(cursor.is_caught_up());
        assert_eq!(cursor.pending(), 0);
    }
}
