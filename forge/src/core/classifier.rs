//! Deterministic classification of observed process behavior into an
//! [`Outcome`].
//!
//! The engine observes the process and hands the facts to these functions, so
//! every rule can be tested without spawning anything.

use std::time::Duration;

use crate::core::run_mode::is_service_command;
use crate::core::service_url::service_url;
use crate::core::types::Outcome;

/// Exit facts reduced from a platform exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitSummary {
    pub success: bool,
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl ExitSummary {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        Self {
            success: status.success(),
            code: status.code(),
        }
    }

    fn describe(&self) -> String {
        match self.code {
            Some(code) => format!("status {code}"),
            None => "a signal".to_string(),
        }
    }
}

/// What a bounded wait on a OneShot process observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneShotObservation {
    Exited(ExitSummary),
    /// The budget elapsed and the process was terminated.
    TimedOut(Duration),
}

/// What the post-grace liveness check of a Service process saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceObservation {
    Alive,
    Exited(ExitSummary),
}

/// Classify a OneShot run.
///
/// - exit with stderr text → `Failed(stderr)`
/// - exit non-zero without stderr → `Failed("process exited with ...")`
/// - clean exit without stderr → `Succeeded`
/// - timeout on a command naming a service launcher → `PresumedRunning`
/// - any other timeout → `Failed` with buffered stderr or a timeout message
pub fn classify_one_shot(command: &str, observation: OneShotObservation, stderr: &str) -> Outcome {
    match observation {
        OneShotObservation::Exited(exit) => {
            if has_text(stderr) {
                failed(stderr)
            } else if !exit.success {
                failed(format!("process exited with {}", exit.describe()))
            } else {
                Outcome::Succeeded
            }
        }
        OneShotObservation::TimedOut(after) => {
            if is_service_command(command) {
                presumed_running(command)
            } else if has_text(stderr) {
                failed(stderr)
            } else {
                failed(format!("process timed out after {}s", after.as_secs_f64()))
            }
        }
    }
}

/// Classify a Service run after its grace period.
pub fn classify_service(command: &str, observation: ServiceObservation, stderr: &str) -> Outcome {
    match observation {
        ServiceObservation::Alive => presumed_running(command),
        ServiceObservation::Exited(exit) => {
            if has_text(stderr) {
                failed(stderr)
            } else {
                failed(format!(
                    "process exited during startup grace period with {}",
                    exit.describe()
                ))
            }
        }
    }
}

fn presumed_running(command: &str) -> Outcome {
    Outcome::PresumedRunning {
        service_url: service_url(command).unwrap_or_else(|| "unknown".to_string()),
    }
}

fn failed(message: impl Into<String>) -> Outcome {
    Outcome::Failed {
        message: message.into(),
    }
}

fn has_text(stderr: &str) -> bool {
    !stderr.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN: ExitSummary = ExitSummary {
        success: true,
        code: Some(0),
    };
    const ERROR: ExitSummary = ExitSummary {
        success: false,
        code: Some(1),
    };

    #[test]
    fn clean_exit_without_stderr_succeeds() {
        let outcome = classify_one_shot("python main.py", OneShotObservation::Exited(CLEAN), "");
        assert_eq!(outcome, Outcome::Succeeded);
    }

    #[test]
    fn stderr_text_fails_verbatim_even_on_clean_exit() {
        let stderr = "Traceback (most recent call last):\n  NameError: x\n";
        let outcome = classify_one_shot("python main.py", OneShotObservation::Exited(CLEAN), stderr);
        assert_eq!(outcome.failure_message(), Some(stderr));
    }

    #[test]
    fn whitespace_stderr_is_not_an_error() {
        let outcome =
            classify_one_shot("python main.py", OneShotObservation::Exited(CLEAN), " \n");
        assert_eq!(outcome, Outcome::Succeeded);
    }

    #[test]
    fn nonzero_exit_without_stderr_fails() {
        let outcome = classify_one_shot("python main.py", OneShotObservation::Exited(ERROR), "");
        assert_eq!(
            outcome.failure_message(),
            Some("process exited with status 1")
        );
    }

    #[test]
    fn signal_exit_is_described() {
        let killed = ExitSummary {
            success: false,
            code: None,
        };
        let outcome = classify_one_shot("python main.py", OneShotObservation::Exited(killed), "");
        assert_eq!(
            outcome.failure_message(),
            Some("process exited with a signal")
        );
    }

    #[test]
    fn timeout_of_plain_script_fails() {
        let outcome = classify_one_shot(
            "python main.py",
            OneShotObservation::TimedOut(Duration::from_secs(10)),
            "",
        );
        assert_eq!(outcome.failure_message(), Some("process timed out after 10s"));
    }

    #[test]
    fn timeout_keeps_buffered_stderr() {
        let outcome = classify_one_shot(
            "python main.py",
            OneShotObservation::TimedOut(Duration::from_secs(10)),
            "waiting for input\n",
        );
        assert_eq!(outcome.failure_message(), Some("waiting for input\n"));
    }

    #[test]
    fn timeout_of_service_command_is_presumed_running() {
        let outcome = classify_one_shot(
            "uvicorn main:app --port 9100",
            OneShotObservation::TimedOut(Duration::from_secs(10)),
            "INFO: Started server process\n",
        );
        assert_eq!(
            outcome,
            Outcome::PresumedRunning {
                service_url: "http://localhost:9100/docs".to_string()
            }
        );
    }

    #[test]
    fn alive_service_is_presumed_running() {
        let outcome = classify_service("streamlit run app.py", ServiceObservation::Alive, "");
        assert_eq!(
            outcome,
            Outcome::PresumedRunning {
                service_url: "http://localhost:8501".to_string()
            }
        );
    }

    #[test]
    fn exited_service_fails_with_stderr() {
        let stderr = "ModuleNotFoundError: No module named 'fastapi'\n";
        let outcome = classify_service(
            "uvicorn main:app",
            ServiceObservation::Exited(ERROR),
            stderr,
        );
        assert_eq!(outcome.failure_message(), Some(stderr));
    }

    #[test]
    fn exited_service_without_stderr_still_fails() {
        let outcome = classify_service("uvicorn main:app", ServiceObservation::Exited(CLEAN), "");
        assert_eq!(
            outcome.failure_message(),
            Some("process exited during startup grace period with status 0")
        );
    }
}
