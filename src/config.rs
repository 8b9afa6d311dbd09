//! Pipeline configuration
//!
//! Defaults, overridden by `PIPELINE_*` environment variables, overridden by
//! CLI flags in `main.rs`.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_PIPELINE_ID: &str = "transactions_pipeline";
pub const DEFAULT_FILE_EXTENSION: &str = "csv";
pub const DEFAULT_ARCHIVE_SUFFIX: &str = ".bak";

/// Telegram Bot API destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name used in notifications
    pub pipeline_id: String,

    /// Directory scanned for statement files
    pub landing_dir: PathBuf,

    /// Input extension, without the dot
    pub file_extension: String,

    /// Appended to a file name once it has been landed
    pub archive_suffix: String,

    /// SQLite file holding `transactions_landing`
    pub landing_db: PathBuf,

    /// SQLite file holding `transactions` (may equal `landing_db`)
    pub ledger_db: PathBuf,

    /// External checkpoint run after transform
    #[serde(default)]
    pub validate_command: Option<String>,

    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            pipeline_id: DEFAULT_PIPELINE_ID.to_string(),
            landing_dir: PathBuf::from("./landing"),
            file_extension: DEFAULT_FILE_EXTENSION.to_string(),
            archive_suffix: DEFAULT_ARCHIVE_SUFFIX.to_string(),
            landing_db: PathBuf::from("./transactions_landing.db"),
            ledger_db: PathBuf::from("./transactions.db"),
            validate_command: None,
            telegram: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `PIPELINE_ID`
    /// - `PIPELINE_LANDING_DIR`
    /// - `PIPELINE_FILE_EXTENSION`
    /// - `PIPELINE_ARCHIVE_SUFFIX`
    /// - `PIPELINE_LANDING_DB`
    /// - `PIPELINE_LEDGER_DB`
    /// - `PIPELINE_VALIDATE_COMMAND`
    /// - `PIPELINE_TELEGRAM_TOKEN` + `PIPELINE_TELEGRAM_CHAT_ID`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    ///
    /// Values are not checked here; `validate` runs when the pipeline opens.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(id) = lookup("PIPELINE_ID") {
            config.pipeline_id = id;
        }

        if let Some(dir) = lookup("PIPELINE_LANDING_DIR") {
            config.landing_dir = PathBuf::from(dir);
        }

        if let Some(ext) = lookup("PIPELINE_FILE_EXTENSION") {
            config.file_extension = ext;
        }

        if let Some(suffix) = lookup("PIPELINE_ARCHIVE_SUFFIX") {
            config.archive_suffix = suffix;
        }

        if let Some(db) = lookup("PIPELINE_LANDING_DB") {
            config.landing_db = PathBuf::from(db);
        }

        if let Some(db) = lookup("PIPELINE_LEDGER_DB") {
            config.ledger_db = PathBuf::from(db);
        }

        if let Some(cmd) = lookup("PIPELINE_VALIDATE_COMMAND").filter(|c| !c.trim().is_empty()) {
            config.validate_command = Some(cmd);
        }

        match (lookup("PIPELINE_TELEGRAM_TOKEN"), lookup("PIPELINE_TELEGRAM_CHAT_ID")) {
            (Some(bot_token), Some(chat_id)) => {
                config.telegram = Some(TelegramConfig { bot_token, chat_id });
            }
            (None, None) => {}
            _ => {
                return Err(PipelineError::config(
                    "PIPELINE_TELEGRAM_TOKEN and PIPELINE_TELEGRAM_CHAT_ID must be set together",
                ))
            }
        }

        Ok(config)
    }

    /// Reject settings that would break listing or archiving
    pub fn validate(&self) -> Result<()> {
        let ext = self.file_extension.trim_start_matches('.');
        if ext.is_empty() {
            return Err(PipelineError::config("file extension must not be empty"));
        }

        if self.archive_suffix.is_empty() {
            return Err(PipelineError::config("archive suffix must not be empty"));
        }

        // An archived name must never look like an input file again
        if self.archive_suffix.ends_with(&format!(".{}", ext)) {
            return Err(PipelineError::config(format!(
                "archive suffix {:?} would keep archived files listed as .{}",
                self.archive_suffix, ext
            )));
        }

        if self.pipeline_id.trim().is_empty() {
            return Err(PipelineError::config("pipeline id must not be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.archive_suffix, ".bak");
        assert_eq!(config.file_extension, "csv");
    }

    #[test]
    fn test_env_overrides() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("PIPELINE_LANDING_DIR", "/srv/statements"),
            ("PIPELINE_LEDGER_DB", "/srv/ledger.db"),
            ("PIPELINE_ARCHIVE_SUFFIX", ".done"),
            ("PIPELINE_VALIDATE_COMMAND", "gx checkpoint run"),
            ("PIPELINE_TELEGRAM_TOKEN", "123:abc"),
            ("PIPELINE_TELEGRAM_CHAT_ID", "-100"),
        ]))
        .unwrap();

        assert_eq!(config.landing_dir, PathBuf::from("/srv/statements"));
        assert_eq!(config.ledger_db, PathBuf::from("/srv/ledger.db"));
        assert_eq!(config.archive_suffix, ".done");
        assert_eq!(config.validate_command.as_deref(), Some("gx checkpoint run"));
        assert_eq!(config.telegram.unwrap().chat_id, "-100");
    }

    #[test]
    fn test_half_configured_telegram_is_rejected() {
        let err = PipelineConfig::from_lookup(lookup_from(&[("PIPELINE_TELEGRAM_TOKEN", "x")]))
            .unwrap_err();

        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_archive_suffix_must_not_relist() {
        let config = PipelineConfig {
            archive_suffix: ".processed.csv".to_string(),
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_extension_rejected() {
        let config = PipelineConfig {
            file_extension: ".".to_string(),
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }
}
