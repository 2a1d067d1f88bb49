//! Shared deterministic types for the execution engine.
//!
//! These types define stable contracts between core components and the I/O
//! layer. They must not depend on external state.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::command::tokenize_command;
use crate::core::run_mode::classify_run_mode;

/// How a run command is expected to behave once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Short-lived script: runs to completion within the time budget.
    OneShot,
    /// Long-running server: healthy if it survives the startup grace period.
    Service,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::OneShot => "one_shot",
            RunMode::Service => "service",
        }
    }
}

/// Known long-running launchers, used to derive the service URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceLauncher {
    /// Interactive dashboard server (`streamlit run app.py`).
    Streamlit,
    /// ASGI server launcher (`uvicorn main:app`).
    Uvicorn,
}

/// Immutable description of one process launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    /// The command exactly as declared by the candidate.
    pub command: String,
    /// Whitespace-split argument tokens (`argv[0]` is the program).
    pub argv: Vec<String>,
    pub working_dir: PathBuf,
    /// Wall-clock budget for OneShot runs.
    pub timeout: Duration,
    pub mode: RunMode,
}

impl RunSpec {
    /// Build a spec whose mode is inferred from the command text.
    pub fn new(command: &str, working_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            command: command.to_string(),
            argv: tokenize_command(command),
            working_dir: working_dir.into(),
            timeout,
            mode: classify_run_mode(command),
        }
    }

    /// Override the inferred mode.
    pub fn with_mode(self, mode: RunMode) -> Self {
        Self { mode, ..self }
    }
}

/// Result of the dependency installation phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InstallOutcome {
    /// No manifest present; nothing to install.
    Skipped,
    Installed,
    /// Installer could not run or exited non-zero. Carries diagnostics.
    Failed { message: String },
}

impl InstallOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, InstallOutcome::Failed { .. })
    }
}

/// Terminal classification of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed { message: String },
    /// The service survived the grace period; `service_url` is a best guess.
    PresumedRunning { service_url: String },
}

impl Outcome {
    /// Whether the caller should accept the candidate.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Outcome::Failed { .. })
    }

    pub fn failure_message(&self) -> Option<&str> {
        match self {
            Outcome::Failed { message } => Some(message),
            _ => None,
        }
    }
}

/// Structured result of one attempt. Produced exactly once per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub outcome: Outcome,
    pub captured_output: String,
    pub captured_error: String,
    pub install: InstallOutcome,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn failed(message: impl Into<String>, install: InstallOutcome) -> Self {
        Self {
            outcome: Outcome::Failed {
                message: message.into(),
            },
            captured_output: String::new(),
            captured_error: String::new(),
            install,
            duration_ms: 0,
        }
    }
}

/// Phases of a single attempt, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    NotStarted,
    Installing,
    Starting,
    Probing,
    Succeeded,
    Failed,
    PresumedRunning,
}

impl AttemptPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptPhase::NotStarted => "not_started",
            AttemptPhase::Installing => "installing",
            AttemptPhase::Starting => "starting",
            AttemptPhase::Probing => "probing",
            AttemptPhase::Succeeded => "succeeded",
            AttemptPhase::Failed => "failed",
            AttemptPhase::PresumedRunning => "presumed_running",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptPhase::Succeeded | AttemptPhase::Failed | AttemptPhase::PresumedRunning
        )
    }

    /// The terminal phase corresponding to an outcome.
    pub fn from_outcome(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Succeeded => AttemptPhase::Succeeded,
            Outcome::Failed { .. } => AttemptPhase::Failed,
            Outcome::PresumedRunning { .. } => AttemptPhase::PresumedRunning,
        }
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Installer failure does not prevent `Installing -> Starting`, and a launch
    /// failure short-circuits `Starting -> Failed`.
    pub fn can_advance_to(self, next: AttemptPhase) -> bool {
        match (self, next) {
            (AttemptPhase::NotStarted, AttemptPhase::Installing) => true,
            (AttemptPhase::Installing, AttemptPhase::Starting) => true,
            (AttemptPhase::Starting, AttemptPhase::Probing) => true,
            (AttemptPhase::Starting, AttemptPhase::Failed) => true,
            (AttemptPhase::Probing, next) => next.is_terminal(),
            _ => false,
        }
    }
}

/// A generated file, addressed relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Relative path, e.g. `app/main.py`.
    pub name: String,
    pub content: String,
}

/// A candidate application produced by the code generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub generated_code: Vec<SourceFile>,
    pub run_command: String,
}

impl Candidate {
    pub fn file_names(&self) -> Vec<&str> {
        self.generated_code.iter().map(|f| f.name.as_str()).collect()
    }
}

/// One entry of the refinement history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// 1-indexed attempt number.
    pub attempt: u32,
    pub spec: RunSpec,
    pub result: ExecutionResult,
}

/// Ordered record of attempts made during one refinement session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptHistory {
    records: Vec<AttemptRecord>,
}

impl AttemptHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, spec: RunSpec, result: ExecutionResult) {
        let attempt = self.records.len() as u32 + 1;
        self.records.push(AttemptRecord {
            attempt,
            spec,
            result,
        });
    }

    pub fn records(&self) -> &[AttemptRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&AttemptRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_spec_infers_mode_and_tokens() {
        let spec = RunSpec::new(
            "uvicorn main:app --port 9100",
            "/tmp/project",
            Duration::from_secs(10),
        );
        assert_eq!(spec.mode, RunMode::Service);
        assert_eq!(spec.argv, vec!["uvicorn", "main:app", "--port", "9100"]);

        let spec = RunSpec::new("python main.py", "/tmp/project", Duration::from_secs(10));
        assert_eq!(spec.mode, RunMode::OneShot);
    }

    #[test]
    fn mode_override_keeps_command() {
        let spec = RunSpec::new("uvicorn main:app", "/tmp", Duration::from_secs(1))
            .with_mode(RunMode::OneShot);
        assert_eq!(spec.mode, RunMode::OneShot);
        assert_eq!(spec.command, "uvicorn main:app");
    }

    #[test]
    fn phase_transitions_follow_attempt_order() {
        use AttemptPhase::{Failed, Installing, NotStarted, PresumedRunning, Probing, Starting};
        assert!(NotStarted.can_advance_to(Installing));
        assert!(Installing.can_advance_to(Starting));
        assert!(Starting.can_advance_to(Probing));
        assert!(Starting.can_advance_to(Failed));
        assert!(Probing.can_advance_to(PresumedRunning));
        assert!(!NotStarted.can_advance_to(Starting));
        assert!(!Installing.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Installing));
    }

    #[test]
    fn install_failure_is_not_success() {
        assert!(InstallOutcome::Skipped.is_success());
        assert!(InstallOutcome::Installed.is_success());
        assert!(
            !InstallOutcome::Failed {
                message: "boom".to_string()
            }
            .is_success()
        );
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = Outcome::PresumedRunning {
            service_url: "http://localhost:8501".to_string(),
        };
        let json = serde_json::to_value(&outcome).expect("serialize");
        assert_eq!(json["status"], "presumed_running");
        assert_eq!(json["service_url"], "http://localhost:8501");
    }

    #[test]
    fn history_numbers_attempts_from_one() {
        let mut history = AttemptHistory::new();
        let spec = RunSpec::new("python main.py", "/tmp", Duration::from_secs(1));
        history.push(
            spec.clone(),
            ExecutionResult::failed("boom", InstallOutcome::Skipped),
        );
        history.push(spec, ExecutionResult::failed("again", InstallOutcome::Skipped));
        let attempts: Vec<u32> = history.records().iter().map(|r| r.attempt).collect();
        assert_eq!(attempts, vec![1, 2]);
        assert_eq!(
            history.last().and_then(|r| r.result.outcome.failure_message()),
            Some("again")
        );
    }
}
