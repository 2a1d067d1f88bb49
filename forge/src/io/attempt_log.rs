//! Attempt logging into `<project>/.forge/attempt.json`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::types::{ExecutionResult, InstallOutcome, Outcome, RunMode, RunSpec};
use crate::io::project::FORGE_DIR;

const ATTEMPT_FILE: &str = "attempt.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptLog {
    pub attempt: u32,
    pub command: String,
    pub mode: RunMode,
    pub outcome: Outcome,
    pub install: InstallOutcome,
    pub captured_output: String,
    pub captured_error: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub duration_ms: u64,
}

impl AttemptLog {
    pub fn new(attempt: u32, spec: &RunSpec, result: &ExecutionResult) -> Self {
        Self {
            attempt,
            command: spec.command.clone(),
            mode: spec.mode,
            outcome: result.outcome.clone(),
            install: result.install.clone(),
            captured_output: result.captured_output.clone(),
            captured_error: result.captured_error.clone(),
            started_at: None,
            ended_at: None,
            duration_ms: result.duration_ms,
        }
    }

    pub fn with_times(self, started_at: String, ended_at: String) -> Self {
        Self {
            started_at: Some(started_at),
            ended_at: Some(ended_at),
            ..self
        }
    }
}

pub fn attempt_log_path(project_dir: &Path) -> PathBuf {
    project_dir.join(FORGE_DIR).join(ATTEMPT_FILE)
}

/// Write `log` for `project_dir`, replacing any earlier log.
pub fn write_attempt_log(project_dir: &Path, log: &AttemptLog) -> Result<PathBuf> {
    let path = attempt_log_path(project_dir);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create log dir {}", dir.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(log)?;
    buf.push('\n');
    fs::write(&path, buf).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

/// Read the attempt log, if one was written.
pub fn read_attempt_log(project_dir: &Path) -> Result<Option<AttemptLog>> {
    let path = attempt_log_path(project_dir);
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let log = serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(log))
}
