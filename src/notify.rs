// 📣 Notification Sink - fire-and-forget status messages keyed by task and run
//
// Nothing here is read back by the pipeline. A sink that fails logs the
// failure and moves on; it never fails the run.

use crate::config::PipelineConfig;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Started,
    Success,
    Issue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub pipeline_id: String,
    pub run_id: String,
    pub task_id: Option<String>,
    pub detail: Option<String>,
}

impl Notification {
    pub fn started(pipeline_id: &str, run_id: &str) -> Self {
        Notification {
            kind: NotificationKind::Started,
            pipeline_id: pipeline_id.to_string(),
            run_id: run_id.to_string(),
            task_id: None,
            detail: None,
        }
    }

    pub fn success(pipeline_id: &str, run_id: &str, task_id: &str) -> Self {
        Notification {
            kind: NotificationKind::Success,
            pipeline_id: pipeline_id.to_string(),
            run_id: run_id.to_string(),
            task_id: Some(task_id.to_string()),
            detail: None,
        }
    }

    pub fn issue(pipeline_id: &str, run_id: &str, task_id: &str, detail: impl Into<String>) -> Self {
        Notification {
            kind: NotificationKind::Issue,
            pipeline_id: pipeline_id.to_string(),
            run_id: run_id.to_string(),
            task_id: Some(task_id.to_string()),
            detail: Some(detail.into()),
        }
    }

    /// Human-readable message body
    pub fn text(&self) -> String {
        let task = self.task_id.as_deref().unwrap_or("-");
        match self.kind {
            NotificationKind::Started => {
                format!("Started: {}\nRun id: {}", self.pipeline_id, self.run_id)
            }
            NotificationKind::Success => format!(
                "Success.\nTask id: {}\nPipeline id: {}\nRun id: {}",
                task, self.pipeline_id, self.run_id
            ),
            NotificationKind::Issue => format!(
                "Issue.\nException: {}\nTask id: {}\nPipeline id: {}\nRun id: {}",
                self.detail.as_deref().unwrap_or("unknown"),
                task,
                self.pipeline_id,
                self.run_id
            ),
        }
    }
}

pub trait Notifier {
    fn notify(&self, notification: &Notification);
}

/// Default sink: writes through tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, n: &Notification) {
        let task = n.task_id.as_deref().unwrap_or("-");
        match n.kind {
            NotificationKind::Started => {
                info!(pipeline = %n.pipeline_id, run_id = %n.run_id, "pipeline run started")
            }
            NotificationKind::Success => {
                info!(run_id = %n.run_id, task_id = %task, "task succeeded")
            }
            NotificationKind::Issue => error!(
                run_id = %n.run_id,
                task_id = %task,
                detail = n.detail.as_deref().unwrap_or(""),
                "task issue"
            ),
        }
    }
}

// ============================================================================
// TELEGRAM
// ============================================================================

#[cfg(feature = "telegram")]
pub struct TelegramNotifier {
    client: reqwest::blocking::Client,
    endpoint: String,
    chat_id: String,
}

#[cfg(feature = "telegram")]
impl TelegramNotifier {
    pub const API_BASE: &'static str = "https://api.telegram.org";

    pub fn new(bot_token: &str, chat_id: &str) -> Self {
        Self::with_api_base(Self::API_BASE, bot_token, chat_id)
    }

    pub fn with_api_base(api_base: &str, bot_token: &str, chat_id: &str) -> Self {
        TelegramNotifier {
            client: reqwest::blocking::Client::new(),
            endpoint: format!("{}/bot{}/sendMessage", api_base.trim_end_matches('/'), bot_token),
            chat_id: chat_id.to_string(),
        }
    }
}

#[cfg(feature = "telegram")]
impl Notifier for TelegramNotifier {
    fn notify(&self, n: &Notification) {
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": n.text(),
        });

        let sent = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .and_then(|resp| resp.error_for_status());

        if let Err(e) = sent {
            warn!(run_id = %n.run_id, error = %e, "telegram notification not delivered");
        }
    }
}

/// Pick the sink described by the configuration
pub fn from_config(config: &PipelineConfig) -> Box<dyn Notifier> {
    match &config.telegram {
        #[cfg(feature = "telegram")]
        Some(tg) => Box::new(TelegramNotifier::new(&tg.bot_token, &tg.chat_id)),
        #[cfg(not(feature = "telegram"))]
        Some(_) => {
            warn!("telegram configured but the `telegram` feature is disabled; logging notifications");
            Box::new(LogNotifier)
        }
        None => Box::new(LogNotifier),
    }
}
