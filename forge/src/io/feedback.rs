//! Regeneration feedback built from failed attempts.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::types::{AttemptHistory, AttemptRecord, InstallOutcome};

const FEEDBACK_TEMPLATE: &str = include_str!("templates/feedback.md");

/// Failed attempt as seen by the feedback template.
#[derive(Debug, Clone, Serialize)]
struct FailureContext<'a> {
    number: u32,
    command: &'a str,
    mode: &'static str,
    install_error: Option<&'a str>,
    error: &'a str,
}

impl<'a> FailureContext<'a> {
    fn from_record(record: &'a AttemptRecord) -> Option<Self> {
        let error = record.result.outcome.failure_message()?;
        let install_error = match &record.result.install {
            InstallOutcome::Failed { message } => Some(message.as_str()),
            _ => None,
        };
        Some(Self {
            number: record.attempt,
            command: &record.spec.command,
            mode: record.spec.mode.as_str(),
            install_error,
            error: error.trim(),
        })
    }
}

/// Render feedback for every failed attempt in `history`.
///
/// Returns `None` when nothing has failed yet.
pub fn render_feedback(history: &AttemptHistory) -> Result<Option<String>> {
    let failures: Vec<FailureContext<'_>> = history
        .records()
        .iter()
        .filter_map(FailureContext::from_record)
        .collect();
    if failures.is_empty() {
        return Ok(None);
    }
    let rendered = Environment::new()
        .render_str(FEEDBACK_TEMPLATE, context! { failures => failures })
        .context("render feedback")?;
    Ok(Some(rendered.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ExecutionResult, Outcome, RunSpec};
    use std::time::Duration;

    fn spec(command: &str) -> RunSpec {
        RunSpec::new(command, "/tmp/project", Duration::from_secs(10))
    }

    #[test]
    fn empty_history_has_no_feedback() {
        assert_eq!(render_feedback(&AttemptHistory::new()).expect("render"), None);
    }

    #[test]
    fn failures_are_rendered_in_order() {
        let mut history = AttemptHistory::new();
        history.push(
            spec("python main.py"),
            ExecutionResult::failed("NameError: x\n", InstallOutcome::Skipped),
        );
        history.push(
            spec("uvicorn main:app"),
            ExecutionResult::failed(
                "ModuleNotFoundError: fastapi",
                InstallOutcome::Failed {
                    message: "pip offline".to_string(),
                },
            ),
        );

        let text = render_feedback(&history).expect("render").expect("some");
        assert!(text.starts_with("I generated code but encountered an error"));
        let first = text.find("Attempt 1 ran `python main.py` (one_shot)").expect("first");
        let second = text.find("Attempt 2 ran `uvicorn main:app` (service)").expect("second");
        assert!(first < second);
        assert!(text.contains("Please refine the code to resolve this error: NameError: x"));
        assert!(text.contains("Dependency installation failed: pip offline"));
        assert_eq!(text.matches("Dependency installation failed").count(), 1);
    }

    #[test]
    fn accepted_attempts_are_not_feedback() {
        let mut history = AttemptHistory::new();
        history.push(
            spec("streamlit run app.py"),
            ExecutionResult {
                outcome: Outcome::PresumedRunning {
                    service_url: "http://localhost:8501".to_string(),
                },
                captured_output: String::new(),
                captured_error: String::new(),
                install: InstallOutcome::Skipped,
                duration_ms: 2000,
            },
        );
        assert_eq!(render_feedback(&history).expect("render"), None);
    }
}
