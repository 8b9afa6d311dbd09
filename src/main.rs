use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use statement_pipeline::logging::{init_logging, LogConfig, LogLevel};
use statement_pipeline::{
    run_with_retries, LogNotifier, Notification, Notifier, Pipeline, PipelineConfig, Task,
};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "statement-pipeline")]
#[command(author, version, about = "Land bank statement CSVs and transform them into the transaction ledger")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory scanned for statement files
    #[arg(long, env = "PIPELINE_LANDING_DIR", global = true)]
    landing_dir: Option<PathBuf>,

    /// SQLite file for transactions_landing
    #[arg(long, env = "PIPELINE_LANDING_DB", global = true)]
    landing_db: Option<PathBuf>,

    /// SQLite file for transactions
    #[arg(long, env = "PIPELINE_LEDGER_DB", global = true)]
    ledger_db: Option<PathBuf>,

    /// External checkpoint command run after transform
    #[arg(long, env = "PIPELINE_VALIDATE_COMMAND", global = true)]
    validate_command: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute one run: list, land, archive, transform, validate
    Run,

    /// Call `run` on a timer
    Watch {
        /// Seconds between runs
        #[arg(long, default_value_t = 3600)]
        interval_secs: u64,

        /// Retries of a run that failed fatally
        #[arg(long, default_value_t = 1)]
        retries: u32,

        /// Seconds between retries
        #[arg(long, default_value_t = 10)]
        retry_delay_secs: u64,
    },

    /// Transform every landed source whose ledger is behind
    Transform,

    /// Show landing and ledger watermarks per source
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env().context("Invalid logging configuration")?;
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    init_logging(&log_config)?;

    let config = build_config(&cli)?;
    // Open failures are sent to the configured notifier before they end up here
    let mut pipeline = Pipeline::open(config).context("Failed to open pipeline")?;

    match cli.command {
        Command::Run => {
            let report = pipeline.run()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Watch {
            interval_secs,
            retries,
            retry_delay_secs,
        } => watch(&mut pipeline, interval_secs, retries, retry_delay_secs),
        Command::Transform => {
            let reports = pipeline.catch_up()?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        Command::Status => {
            let cursors = pipeline.status()?;
            println!("{}", serde_json::to_string_pretty(&cursors)?);
        }
    }

    Ok(())
}

fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            // No notifier can be built from a broken configuration; log it as one
            LogNotifier.notify(&Notification::issue(
                &PipelineConfig::default().pipeline_id,
                &uuid::Uuid::new_v4().to_string(),
                Task::List.id(),
                e.to_string(),
            ));
            return Err(e).context("Invalid pipeline configuration");
        }
    };

    if let Some(dir) = &cli.landing_dir {
        config.landing_dir = dir.clone();
    }
    if let Some(db) = &cli.landing_db {
        config.landing_db = db.clone();
    }
    if let Some(db) = &cli.ledger_db {
        config.ledger_db = db.clone();
    }
    if let Some(cmd) = &cli.validate_command {
        config.validate_command = Some(cmd.clone());
    }

    Ok(config)
}

/// Runs forever; one run at a time by construction
fn watch(pipeline: &mut Pipeline, interval_secs: u64, retries: u32, retry_delay_secs: u64) -> ! {
    info!(interval_secs, retries, "watching {}", pipeline.config().landing_dir.display());

    loop {
        let outcome = run_with_retries(pipeline, retries, |_| {
            thread::sleep(Duration::from_secs(retry_delay_secs))
        });

        match outcome {
            Ok(report) => info!(
                run_id = %report.run_id,
                files = report.listed.len(),
                rows_transformed = report.rows_transformed(),
                "scheduled run complete"
            ),
            Err(e) => error!(error = %e, "scheduled run failed after retries"),
        }

        thread::sleep(Duration::from_secs(interval_secs));
    }
}
