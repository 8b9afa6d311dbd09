// 🧹 Field Normalizer - landing row → typed ledger row
// Pure: no store access, no clock, same input always gives the same output.

use crate::db::{LandingRecord, TransactionRecord};
use crate::error::{PipelineError, Result};
use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

/// Date format used by the statement exports
pub const SOURCE_DATE_FORMAT: &str = "%d/%m/%Y";

fn value_date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Value Date: ([0-9]{2}/[0-9]{2}/[0-9]{4})").expect("value date pattern compiles")
    })
}

fn source_date_shape() -> &'static Regex {
    static SHAPE: OnceLock<Regex> = OnceLock::new();
    SHAPE.get_or_init(|| {
        Regex::new(r"^[0-9]{1,2}/[0-9]{1,2}/[0-9]{4}$").expect("date shape pattern compiles")
    })
}

/// Empty string and absent both mean "no value"
fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|s| !s.is_empty()).cloned()
}

/// Parse a `DD/MM/YYYY` string. A present but malformed value is an error,
/// never silently turned into null.
pub fn parse_source_date(
    value: &str,
    field: &'static str,
    source: &str,
    line: i64,
) -> Result<NaiveDate> {
    let bad = || PipelineError::DateFormat {
        source_name: source.to_string(),
        line,
        field,
        value: value.to_string(),
    };

    if !source_date_shape().is_match(value) {
        return Err(bad());
    }
    NaiveDate::parse_from_str(value, SOURCE_DATE_FORMAT).map_err(|_| bad())
}

/// First "Value Date: DD/MM/YYYY" embedded in a description, as written
pub fn extract_value_date(description: &str) -> Option<&str> {
    value_date_pattern()
        .captures(description)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Clean one landing row.
///
/// - `TxDate`: empty → None, else `DD/MM/YYYY` → date (error when malformed)
/// - `Amount`, `TxDescription`, `Balance`: empty → None, else unchanged text
/// - `ValueDate`: taken from the description, parsed like `TxDate`
/// - `DataSource`, `Line`: copied
pub fn normalize(record: &LandingRecord) -> Result<TransactionRecord> {
    let source = record.data_source.as_str();

    let tx_date = match non_empty(&record.tx_date) {
        Some(raw) => Some(parse_source_date(&raw, "TxDate", source, record.line)?),
        None => None,
    };

    let tx_description = non_empty(&record.tx_description);

    let value_date = match tx_description.as_deref().and_then(extract_value_date) {
        Some(raw) => Some(parse_source_date(raw, "ValueDate", source, record.line)?),
        None => None,
    };

    Ok(TransactionRecord {
        tx_date,
        amount: non_empty(&record.amount),
        tx_description,
        balance: non_empty(&record.balance),
        value_date,
        data_source: record.data_source.clone(),
        line: record.line,
    })
}
