use crate::cursor::LineCursorStore;
use crate::error::{PipelineError, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// RECORDS
// ============================================================================

/// One raw CSV row, tagged with where it came from.
/// Append-only: `(data_source, line)` is permanent once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LandingRecord {
    pub tx_date: Option<String>,
    pub amount: Option<String>,
    pub tx_description: Option<String>,
    pub balance: Option<String>,

    // Provenance (always present)
    pub data_source: String,
    pub line: i64,
}

impl LandingRecord {
    /// Build a landing record from the four positional CSV fields
    pub fn from_fields(
        date: &str,
        amount: &str,
        description: &str,
        balance: &str,
        data_source: &str,
        line: i64,
    ) -> Self {
        LandingRecord {
            tx_date: Some(date.to_string()),
            amount: Some(amount.to_string()),
            tx_description: Some(description.to_string()),
            balance: Some(balance.to_string()),
            data_source: data_source.to_string(),
            line,
        }
    }
}

/// Cleaned ledger row, derived from exactly one `LandingRecord`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactionRecord {
    pub tx_date: Option<NaiveDate>,
    pub amount: Option<String>,
    pub tx_description: Option<String>,
    pub balance: Option<String>,
    pub value_date: Option<NaiveDate>,

    // Join key back to the landing row
    pub data_source: String,
    pub line: i64,
}

/// Result of appending to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    /// `(data_source, line)` was already present
    Duplicate,
}

// ============================================================================
// STORE TRAITS
// ============================================================================

/// Append-only staging area, one record per raw input row
pub trait LandingStore: LineCursorStore {
    fn append(&mut self, record: &LandingRecord) -> Result<()>;

    /// Rows of `source` with `line > after_line`, ascending by line.
    /// When a line was landed more than once, only the first copy is returned.
    fn rows_after(&self, source: &str, after_line: i64) -> Result<Vec<LandingRecord>>;

    /// Every source that has at least one landed row
    fn sources(&self) -> Result<Vec<String>>;

    /// Number of landed rows for a source (duplicates included)
    fn count_for(&self, source: &str) -> Result<i64>;
}

/// Destination for normalized transaction records
pub trait LedgerStore: LineCursorStore {
    fn append(&mut self, record: &TransactionRecord) -> Result<AppendOutcome>;

    fn transactions_for(&self, source: &str) -> Result<Vec<TransactionRecord>>;

    fn count(&self) -> Result<i64>;
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_landing(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions_landing (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tx_date TEXT,
            amount TEXT,
            tx_description TEXT,
            balance TEXT,
            data_source TEXT NOT NULL,
            line INTEGER NOT NULL CHECK (line >= 1),
            landed_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_landing_source_line
         ON transactions_landing(data_source, line)",
        [],
    )?;

    Ok(())
}

pub fn setup_ledger(conn: &Connection) -> Result<()> {
    // Provenance is unique in the ledger: a double-landed file can never
    // produce two transactions for the same (data_source, line).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tx_date TEXT,
            amount TEXT,
            tx_description TEXT,
            balance TEXT,
            value_date TEXT,
            data_source TEXT NOT NULL,
            line INTEGER NOT NULL CHECK (line >= 1),
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (data_source, line)
        )",
        [],
    )?;

    Ok(())
}

fn open_with_wal(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).map_err(|e| {
        PipelineError::StoreUnavailable(format!("{}: {}", path.display(), e))
    })?;
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    Ok(conn)
}

fn max_line(conn: &Connection, table: &str, source: &str) -> Result<i64> {
    let sql = format!(
        "SELECT COALESCE(MAX(line), 0) FROM {} WHERE data_source = ?1",
        table
    );
    let max: i64 = conn.query_row(&sql, [source], |row| row.get(0))?;
    Ok(max)
}

// ============================================================================
// SQLITE LANDING STORE
// ============================================================================

pub struct SqliteLandingStore {
    conn: Connection,
}

impl SqliteLandingStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(open_with_wal(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        setup_landing(&conn)?;
        Ok(SqliteLandingStore { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl LineCursorStore for SqliteLandingStore {
    fn max_line(&self, source: &str) -> Result<i64> {
        max_line(&self.conn, "transactions_landing", source)
    }
}

impl LandingStore for SqliteLandingStore {
    fn append(&mut self, record: &LandingRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO transactions_landing (
                    tx_date, amount, tx_description, balance, data_source, line
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.tx_date,
                    record.amount,
                    record.tx_description,
                    record.balance,
                    record.data_source,
                    record.line,
                ],
            )
            .map_err(|e| PipelineError::from_row_write(e, &record.data_source, record.line))?;

        Ok(())
    }

    fn rows_after(&self, source: &str, after_line: i64) -> Result<Vec<LandingRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT tx_date, amount, tx_description, balance, data_source, line
             FROM transactions_landing
             WHERE id IN (
                 SELECT MIN(id) FROM transactions_landing
                 WHERE data_source = ?1 AND line > ?2
                 GROUP BY line
             )
             ORDER BY line ASC",
        )?;

        let rows = stmt
            .query_map(params![source, after_line], |row| {
                Ok(LandingRecord {
                    tx_date: row.get(0)?,
                    amount: row.get(1)?,
                    tx_description: row.get(2)?,
                    balance: row.get(3)?,
                    data_source: row.get(4)?,
                    line: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    fn sources(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT data_source FROM transactions_landing ORDER BY data_source",
        )?;

        let sources = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(sources)
    }

    fn count_for(&self, source: &str) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM transactions_landing WHERE data_source = ?1",
            [source],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

// ============================================================================
// SQLITE LEDGER STORE
// ============================================================================

pub struct SqliteLedgerStore {
    conn: Connection,
}

impl SqliteLedgerStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(open_with_wal(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        setup_ledger(&conn)?;
        Ok(SqliteLedgerStore { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Look up the ledger row for one provenance key
    pub fn find(&self, source: &str, line: i64) -> Result<Option<TransactionRecord>> {
        let tx = self
            .conn
            .query_row(
                "SELECT tx_date, amount, tx_description, balance, value_date, data_source, line
                 FROM transactions
                 WHERE data_source = ?1 AND line = ?2",
                params![source, line],
                transaction_from_row,
            )
            .optional()?;
        Ok(tx)
    }
}

fn format_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

fn parse_stored_date(value: Option<String>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    match value {
        Some(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d").map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        }),
        None => Ok(None),
    }
}

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<TransactionRecord> {
    Ok(TransactionRecord {
        tx_date: parse_stored_date(row.get(0)?, 0)?,
        amount: row.get(1)?,
        tx_description: row.get(2)?,
        balance: row.get(3)?,
        value_date: parse_stored_date(row.get(4)?, 4)?,
        data_source: row.get(5)?,
        line: row.get(6)?,
    })
}

impl LineCursorStore for SqliteLedgerStore {
    fn max_line(&self, source: &str) -> Result<i64> {
        max_line(&self.conn, "transactions", source)
    }
}

impl LedgerStore for SqliteLedgerStore {
    fn append(&mut self, record: &TransactionRecord) -> Result<AppendOutcome> {
        let result = self.conn.execute(
            "INSERT INTO transactions (
                tx_date, amount, tx_description, balance, value_date, data_source, line
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                format_date(record.tx_date),
                record.amount,
                record.tx_description,
                record.balance,
                format_date(record.value_date),
                record.data_source,
                record.line,
            ],
        );

        match result {
            Ok(_) => Ok(AppendOutcome::Inserted),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Ok(AppendOutcome::Duplicate)
            }
            Err(e) => Err(PipelineError::from_row_write(e, &record.data_source, record.line)),
        }
    }

    fn transactions_for(&self, source: &str) -> Result<Vec<TransactionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT tx_date, amount, tx_description, balance, value_date, data_source, line
             FROM transactions
             WHERE data_source = ?1
             ORDER BY line ASC",
        )?;

        let transactions = stmt
            .query_map([source], transaction_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(transactions)
    }

    fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landing_row(source: &str, line: i64) -> LandingRecord {
        LandingRecord::from_fields(
            "01/02/2024",
            "-12.50",
            &format!("Card purchase {}", line),
            "100.00",
            source,
            line,
        )
    }

    fn ledger_row(source: &str, line: i64) -> TransactionRecord {
        TransactionRecord {
            tx_date: NaiveDate::from_ymd_opt(2024, 2, 1),
            amount: Some("-12.50".to_string()),
            tx_description: Some("Card purchase".to_string()),
            balance: None,
            value_date: None,
            data_source: source.to_string(),
            line,
        }
    }

    #[test]
    fn test_landing_watermark_per_source() {
        let mut store = SqliteLandingStore::open_in_memory().unwrap();

        for line in 1..=3 {
            store.append(&landing_row("a.csv", line)).unwrap();
        }
        store.append(&landing_row("b.csv", 1)).unwrap();

        assert_eq!(store.max_line("a.csv").unwrap(), 3);
        assert_eq!(store.max_line("b.csv").unwrap(), 1);
        assert_eq!(store.max_line("missing.csv").unwrap(), 0);
        assert_eq!(
            store.sources().unwrap(),
            vec!["a.csv".to_string(), "b.csv".to_string()]
        );
    }

    #[test]
    fn test_rows_after_is_ordered_and_exclusive() {
        let mut store = SqliteLandingStore::open_in_memory().unwrap();

        // Written out of order on purpose
        for line in [3, 1, 5, 2, 4] {
            store.append(&landing_row("a.csv", line)).unwrap();
        }

        let rows = store.rows_after("a.csv", 2).unwrap();
        let lines: Vec<i64> = rows.iter().map(|r| r.line).collect();

        assert_eq!(lines, vec![3, 4, 5]);
    }

    #[test]
    fn test_rows_after_collapses_double_landing() {
        let mut store = SqliteLandingStore::open_in_memory().unwrap();

        for _ in 0..2 {
            for line in 1..=3 {
                store.append(&landing_row("a.csv", line)).unwrap();
            }
        }

        assert_eq!(store.count_for("a.csv").unwrap(), 6);
        assert_eq!(store.rows_after("a.csv", 0).unwrap().len(), 3);
    }

    #[test]
    fn test_landing_rejects_line_zero() {
        let mut store = SqliteLandingStore::open_in_memory().unwrap();

        let err = store.append(&landing_row("a.csv", 0)).unwrap_err();

        assert!(matches!(err, PipelineError::RowWrite { line: 0, .. }));
    }

    #[test]
    fn test_ledger_unique_provenance() {
        let mut store = SqliteLedgerStore::open_in_memory().unwrap();

        let first = store.append(&ledger_row("a.csv", 1)).unwrap();
        let second = store.append(&ledger_row("a.csv", 1)).unwrap();

        assert_eq!(first, AppendOutcome::Inserted);
        assert_eq!(second, AppendOutcome::Duplicate);
        assert_eq!(store.count().unwrap(), 1);

        println!("✅ Ledger uniqueness test PASSED");
    }

    #[test]
    fn test_ledger_dates_stored_as_iso() {
        let mut store = SqliteLedgerStore::open_in_memory().unwrap();
        let mut row = ledger_row("a.csv", 4);
        row.value_date = NaiveDate::from_ymd_opt(2024, 3, 15);
        store.append(&row).unwrap();

        let raw: String = store
            .connection()
            .query_row(
                "SELECT value_date FROM transactions WHERE line = 4",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(raw, "2024-03-15");

        let found = store.find("a.csv", 4).unwrap().unwrap();
        assert_eq!(found, row);
        assert!(store.find("a.csv", 5).unwrap().is_none());
    }
}
