// ✅ Downstream Validation Trigger - runs after transform, reports pass/fail
//
// The data-quality checkpoint itself lives outside this crate. The pipeline
// only needs to start it and learn whether it passed.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::process::Command;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub validator: String,
    pub passed: bool,
    pub detail: String,
}

pub trait Validator {
    fn name(&self) -> &str;

    /// Called once per run after every source has been transformed
    fn validate(&self, run_id: &str) -> Result<ValidationOutcome>;
}

/// Always passes; used when no checkpoint is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoValidation;

impl Validator for NoValidation {
    fn name(&self) -> &str {
        "none"
    }

    fn validate(&self, _run_id: &str) -> Result<ValidationOutcome> {
        Ok(ValidationOutcome {
            validator: self.name().to_string(),
            passed: true,
            detail: "no checkpoint configured".to_string(),
        })
    }
}

/// Runs an external checkpoint command; exit status 0 means pass.
/// The run identifier is exported as `PIPELINE_RUN_ID`.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    program: String,
    args: Vec<String>,
}

impl CommandValidator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        CommandValidator {
            program: program.into(),
            args,
        }
    }

    /// Split a whitespace-separated command line (no shell quoting)
    pub fn from_command_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| PipelineError::config("validate command is empty"))?;
        Ok(Self::new(program, parts.collect()))
    }
}

impl Validator for CommandValidator {
    fn name(&self) -> &str {
        &self.program
    }

    fn validate(&self, run_id: &str) -> Result<ValidationOutcome> {
        info!(command = %self.program, run_id = %run_id, "running validation checkpoint");

        let output = Command::new(&self.program)
            .args(&self.args)
            .env("PIPELINE_RUN_ID", run_id)
            .output()
            .map_err(|e| PipelineError::Validation(format!("{}: {}", self.program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = [stdout.trim(), stderr.trim()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ValidationOutcome {
            validator: self.program.clone(),
            passed: output.status.success(),
            detail: if detail.is_empty() {
                format!("exit status: {}", output.status)
            } else {
                detail
            },
        })
    }
}

/// Build the validator for an optional configured command line
pub fn from_command(command: Option<&str>) -> Result<Box<dyn Validator>> {
    match command {
        Some(line) => Ok(Box::new(CommandValidator::from_command_line(line)?)),
        None => Ok(Box::new(NoValidation)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_validation_passes() {
        let outcome = NoValidation.validate("run-1").unwrap();

        assert!(outcome.passed);
        assert_eq!(outcome.validator, "none");
    }

    #[test]
    fn test_command_line_parsing() {
        let v = CommandValidator::from_command_line("gx checkpoint run value_date").unwrap();

        assert_eq!(v.name(), "gx");
        assert_eq!(v.args, vec!["checkpoint", "run", "value_date"]);
        assert!(CommandValidator::from_command_line("   ").is_err());
    }

    #[test]
    fn test_missing_program_is_validation_error() {
        let v = CommandValidator::new("definitely-not-a-real-checkpoint-binary", vec![]);

        let err = v.validate("run-1").unwrap_err();

        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_status_decides_pass() {
        let pass = CommandValidator::new("true", vec![]).validate("run-1").unwrap();
        let fail = CommandValidator::new("false", vec![]).validate("run-1").unwrap();

        assert!(pass.passed);
        assert!(!fail.passed);
    }

    #[cfg(unix)]
    #[test]
    fn test_run_id_is_exported() {
        let v = CommandValidator::new(
            "sh",
            vec!["-c".to_string(), "echo $PIPELINE_RUN_ID".to_string()],
        );

        let outcome = v.validate("run-77").unwrap();

        assert_eq!(outcome.detail, "run-77");
    }

    #[cfg(unix)]
    #[test]
    fn test_stdout_and_stderr_are_separate_lines() {
        let v = CommandValidator::new(
            "sh",
            vec!["-c".to_string(), "echo 3 expectations; echo value_date failed >&2; exit 1".to_string()],
        );

        let outcome = v.validate("run-1").unwrap();

        assert!(!outcome.passed);
        assert_eq!(outcome.detail, "3 expectations\nvalue_date failed");
    }
}
