// 🚦 Pipeline Run - list → land → archive → transform → validate
//
// One run is strictly sequential. Files are landed one at a time and each is
// archived as soon as its landing returns; transform starts only after every
// listed file has been through landing. Sources landed by earlier runs whose
// ledger is still behind are transformed as well, so a run that died after
// archiving loses nothing. Nothing is retried here: a fatal error ends the run
// and whoever calls `run()` on a timer decides about retries.

use crate::archiver::archive_file;
use crate::config::PipelineConfig;
use crate::cursor::SourceCursor;
use crate::db::{LandingStore, LedgerStore, SqliteLandingStore, SqliteLedgerStore};
use crate::error::Result;
use crate::landing::{LandingReport, LandingWriter};
use crate::lister::list_source_files;
use crate::notify::{self, LogNotifier, Notification, Notifier};
use crate::transform::{TransformReport, TransformWriter};
use crate::validation::{self, NoValidation, ValidationOutcome, Validator};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn};

// ============================================================================
// TASKS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    List,
    Extract,
    Rename,
    Transform,
    Validate,
}

impl Task {
    /// Identifier used in notifications
    pub fn id(&self) -> &'static str {
        match self {
            Task::List => "list_task",
            Task::Extract => "extract_task",
            Task::Rename => "rename_task",
            Task::Transform => "transform_task",
            Task::Validate => "validation_task",
        }
    }
}

// ============================================================================
// RUN REPORT
// ============================================================================

/// Listed file that could not be landed this run (left in place for the next one)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub source: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveOutcome {
    pub source: String,
    pub archived_to: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub listed: Vec<String>,
    pub skipped: Vec<SkippedFile>,
    pub landed: Vec<LandingReport>,
    pub archived: Vec<ArchiveOutcome>,
    pub transformed: Vec<TransformReport>,
    pub validation: Option<ValidationOutcome>,
}

impl RunReport {
    fn new(run_id: &str) -> Self {
        RunReport {
            run_id: run_id.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            listed: Vec::new(),
            skipped: Vec::new(),
            landed: Vec::new(),
            archived: Vec::new(),
            transformed: Vec::new(),
            validation: None,
        }
    }

    pub fn rows_landed(&self) -> i64 {
        self.landed.iter().map(|r| r.rows_written).sum()
    }

    pub fn rows_transformed(&self) -> i64 {
        self.transformed.iter().map(|r| r.rows_written).sum()
    }

    /// Row failures, skipped files, failed archives, halted transforms or a failed checkpoint
    pub fn has_issues(&self) -> bool {
        !self.skipped.is_empty()
            || self.landed.iter().any(|r| !r.is_clean())
            || self.archived.iter().any(|a| a.error.is_some())
            || self.transformed.iter().any(|t| !t.is_complete())
            || self.validation.as_ref().is_some_and(|v| !v.passed)
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    config: PipelineConfig,
    landing: Box<dyn LandingStore>,
    ledger: Box<dyn LedgerStore>,
    notifier: Box<dyn Notifier>,
    validator: Box<dyn Validator>,
}

impl Pipeline {
    /// Pipeline over the given stores, logging notifications and no checkpoint
    pub fn new(
        config: PipelineConfig,
        landing: Box<dyn LandingStore>,
        ledger: Box<dyn LedgerStore>,
    ) -> Self {
        Pipeline {
            config,
            landing,
            ledger,
            notifier: Box::new(LogNotifier),
            validator: Box::new(NoValidation),
        }
    }

    /// Open the SQLite stores and sinks named by the configuration
    pub fn open(config: PipelineConfig) -> Result<Self> {
        let notifier = notify::from_config(&config);
        Self::open_with_notifier(config, notifier)
    }

    /// Like `open`, but failures to open are reported to `notifier` under
    /// `list_task` with a fresh run id before being returned
    pub fn open_with_notifier(config: PipelineConfig, notifier: Box<dyn Notifier>) -> Result<Self> {
        let opened = config.validate().and_then(|_| {
            let landing = SqliteLandingStore::open(&config.landing_db)?;
            let ledger = SqliteLedgerStore::open(&config.ledger_db)?;
            let validator = validation::from_command(config.validate_command.as_deref())?;
            Ok((landing, ledger, validator))
        });

        match opened {
            Ok((landing, ledger, validator)) => {
                Ok(Pipeline::new(config, Box::new(landing), Box::new(ledger))
                    .with_notifier(notifier)
                    .with_validator(validator))
            }
            Err(e) => {
                let run_id = uuid::Uuid::new_v4().to_string();
                error!(run_id = %run_id, error = %e, "pipeline could not be opened");
                notifier.notify(&Notification::issue(
                    &config.pipeline_id,
                    &run_id,
                    Task::List.id(),
                    e.to_string(),
                ));
                Err(e)
            }
        }
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_validator(mut self, validator: Box<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &dyn LedgerStore {
        self.ledger.as_ref()
    }

    fn notify_success(&self, run_id: &str, task: Task) {
        self.notifier
            .notify(&Notification::success(&self.config.pipeline_id, run_id, task.id()));
    }

    fn notify_issue(&self, run_id: &str, task: Task, detail: impl Into<String>) {
        self.notifier.notify(&Notification::issue(
            &self.config.pipeline_id,
            run_id,
            task.id(),
            detail,
        ));
    }

    /// Notify the outcome of a task; errors pass through unchanged
    fn finish_task<T>(&self, run_id: &str, task: Task, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.notify_success(run_id, task),
            Err(e) => {
                error!(run_id = %run_id, task_id = task.id(), error = %e, "task failed");
                self.notify_issue(run_id, task, e.to_string());
            }
        }
        result
    }

    /// Execute one complete run.
    ///
    /// `Err` means a fatal condition (input directory or a store unreachable);
    /// it has already been sent to the notifier. Recoverable problems are in
    /// the returned report.
    pub fn run(&mut self) -> Result<RunReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("run", run_id = %run_id);
        let _guard = span.enter();

        self.notifier
            .notify(&Notification::started(&self.config.pipeline_id, &run_id));

        let mut report = RunReport::new(&run_id);

        // 1. List new files, plus sources an earlier run left behind the landing watermark
        let listed = list_source_files(
            &self.config.landing_dir,
            &self.config.file_extension,
            &self.config.archive_suffix,
        )
        .and_then(|files| {
            let lagging =
                TransformWriter::new(self.landing.as_ref(), self.ledger.as_mut()).lagging_sources()?;
            Ok((files, lagging))
        });
        let (files, lagging) = self.finish_task(&run_id, Task::List, listed)?;
        report.listed = files;

        if report.listed.is_empty() && lagging.is_empty() {
            info!("no source files waiting");
            report.finished_at = Some(Utc::now());
            return Ok(report);
        }

        // 2 + 3. Land each file, then archive it
        self.land_and_archive(&run_id, &mut report)?;

        // 4. Transform the sources landed in this run, then the lagging ones
        let mut sources: Vec<String> = report.landed.iter().map(|r| r.source.clone()).collect();
        for source in lagging {
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
        if sources.len() > report.landed.len() {
            info!(
                resumed = sources.len() - report.landed.len(),
                "resuming sources left behind by earlier runs"
            );
        }
        report.transformed = self.transform(&run_id, &sources)?;

        // 5. Downstream checkpoint
        report.validation = Some(self.validate(&run_id));

        report.finished_at = Some(Utc::now());
        info!(
            files = report.landed.len(),
            rows_landed = report.rows_landed(),
            rows_transformed = report.rows_transformed(),
            issues = report.has_issues(),
            "pipeline run finished"
        );

        Ok(report)
    }

    fn land_and_archive(&mut self, run_id: &str, report: &mut RunReport) -> Result<()> {
        let dir = self.config.landing_dir.clone();

        for file_name in report.listed.clone() {
            let landed = LandingWriter::new(self.landing.as_mut()).land_file(&dir, &file_name);

            match landed {
                Ok(landing_report) => {
                    report.landed.push(landing_report);
                    report.archived.push(self.archive(&dir, &file_name));
                }
                Err(e) if e.is_fatal() => {
                    return self.finish_task(run_id, Task::Extract, Err(e));
                }
                Err(e) => {
                    warn!(source = %file_name, error = %e, "source file skipped");
                    report.skipped.push(SkippedFile {
                        source: file_name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.notify_success(run_id, Task::Extract);

        let failed: Vec<String> = report
            .archived
            .iter()
            .filter_map(|a| a.error.clone())
            .collect();
        if failed.is_empty() {
            self.notify_success(run_id, Task::Rename);
        } else {
            // Not fatal, but these files will be landed again next run
            self.notify_issue(run_id, Task::Rename, failed.join("; "));
        }

        Ok(())
    }

    fn archive(&self, dir: &std::path::Path, file_name: &str) -> ArchiveOutcome {
        match archive_file(dir, file_name, &self.config.archive_suffix) {
            Ok(path) => ArchiveOutcome {
                source: file_name.to_string(),
                archived_to: Some(path.display().to_string()),
                error: None,
            },
            Err(e) => {
                warn!(source = %file_name, error = %e, "archive failed; file may be landed again");
                ArchiveOutcome {
                    source: file_name.to_string(),
                    archived_to: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn transform(&mut self, run_id: &str, sources: &[String]) -> Result<Vec<TransformReport>> {
        let transformed =
            TransformWriter::new(self.landing.as_ref(), self.ledger.as_mut()).transform_sources(sources);
        let reports = match transformed {
            Ok(reports) => reports,
            Err(e) => return self.finish_task(run_id, Task::Transform, Err(e)),
        };

        let halted: Vec<String> = reports
            .iter()
            .filter_map(|r| {
                r.halted
                    .as_ref()
                    .map(|h| format!("{} halted at line {}: {}", r.source, h.line, h.message))
            })
            .collect();

        if halted.is_empty() {
            self.notify_success(run_id, Task::Transform);
        } else {
            self.notify_issue(run_id, Task::Transform, halted.join("; "));
        }

        Ok(reports)
    }

    fn validate(&self, run_id: &str) -> ValidationOutcome {
        let outcome = self.validator.validate(run_id).unwrap_or_else(|e| ValidationOutcome {
            validator: self.validator.name().to_string(),
            passed: false,
            detail: e.to_string(),
        });

        if outcome.passed {
            self.notify_success(run_id, Task::Validate);
        } else {
            self.notify_issue(run_id, Task::Validate, outcome.detail.clone());
        }

        outcome
    }

    /// Transform every landed source whose ledger is behind, whether or not it
    /// was listed in this run. Used to resume sources halted in earlier runs.
    pub fn catch_up(&mut self) -> Result<Vec<TransformReport>> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("catch_up", run_id = %run_id);
        let _guard = span.enter();

        let lagging = TransformWriter::new(self.landing.as_ref(), self.ledger.as_mut()).lagging_sources();
        let lagging = self.finish_task(&run_id, Task::List, lagging)?;

        info!(sources = lagging.len(), "catching up lagging sources");
        self.transform(&run_id, &lagging)
    }

    /// Landing and ledger watermarks for every landed source
    pub fn status(&self) -> Result<Vec<SourceCursor>> {
        self.landing
            .sources()?
            .iter()
            .map(|source| SourceCursor::read(source, self.landing.as_ref(), self.ledger.as_ref()))
            .collect()
    }
}

/// Run `pipeline` and retry a fatal failure up to `retries` times.
///
/// `sleep` is called between attempts; pass `std::thread::sleep` with the
/// configured delay in production.
pub fn run_with_retries<F>(pipeline: &mut Pipeline, retries: u32, mut sleep: F) -> Result<RunReport>
where
    F: FnMut(u32),
{
    let mut attempt = 0;
    loop {
        match pipeline.run() {
            Ok(report) => return Ok(report),
            Err(e) if e.is_fatal() && attempt < retries => {
                attempt += 1;
                warn!(attempt, retries, error = %e, "run failed; retrying");
                sleep(attempt);
            }
            Err(e) => return Err(e),
        }
    }
}
