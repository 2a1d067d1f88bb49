//! Bounded generate-run-feedback loop for `forge generate`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::core::types::{
    AttemptHistory, AttemptRecord, Candidate, ExecutionResult, InstallOutcome, RunMode, RunSpec,
};
use crate::io::attempt_log::{AttemptLog, write_attempt_log};
use crate::io::config::ForgeConfig;
use crate::io::engine::ExecutionEngine;
use crate::io::feedback::render_feedback;
use crate::io::generator::{CandidateGenerator, GenerationRequest};
use crate::io::installer::DependencyInstaller;
use crate::io::materialize::write_files;
use crate::io::project::{ProjectStore, read_project_files, remove_project, write_run_command};

/// Loop limits and per-attempt run settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefineConfig {
    pub max_attempts: u32,
    /// OneShot wall-clock budget per attempt.
    pub timeout: Duration,
    /// Forces a run mode instead of inferring it from the command.
    pub mode: Option<RunMode>,
}

impl RefineConfig {
    pub fn from_config(cfg: &ForgeConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            timeout: cfg.execution.timeout(),
            mode: None,
        }
    }

    /// Run spec for `command` in `working_dir`, honouring the forced mode.
    pub fn spec_for(&self, command: &str, working_dir: &Path) -> RunSpec {
        let spec = RunSpec::new(command, working_dir, self.timeout);
        match self.mode {
            Some(mode) => spec.with_mode(mode),
            None => spec,
        }
    }
}

/// Result of a refinement session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefinementOutcome {
    /// An attempt succeeded or was presumed running.
    Accepted {
        project_dir: PathBuf,
        attempt: u32,
        result: ExecutionResult,
        history: AttemptHistory,
    },
    /// Every attempt failed, or the generator ran out of candidates.
    Exhausted {
        /// Directory of the final attempt, kept for inspection.
        last_project_dir: Option<PathBuf>,
        history: AttemptHistory,
    },
}

impl RefinementOutcome {
    pub fn history(&self) -> &AttemptHistory {
        match self {
            RefinementOutcome::Accepted { history, .. } => history,
            RefinementOutcome::Exhausted { history, .. } => history,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, RefinementOutcome::Accepted { .. })
    }
}

/// Run attempts until one is accepted or `config.max_attempts` is used up.
///
/// Failed attempt directories are deleted once a further attempt is about to
/// start; the last one always stays on disk. `on_attempt` sees every attempt
/// after it has been classified and logged.
#[instrument(skip_all, fields(max_attempts = config.max_attempts))]
pub fn run_refinement<G, I, F>(
    store: &ProjectStore,
    generator: &mut G,
    engine: &ExecutionEngine<I>,
    config: &RefineConfig,
    mut on_attempt: F,
) -> Result<RefinementOutcome>
where
    G: CandidateGenerator,
    I: DependencyInstaller,
    F: FnMut(&Path, &AttemptRecord),
{
    let mut history = AttemptHistory::new();
    let mut last_project_dir: Option<PathBuf> = None;

    for attempt in 1..=config.max_attempts {
        let feedback = render_feedback(&history)?;
        let request = GenerationRequest {
            attempt,
            feedback: feedback.as_deref(),
            history: &history,
            project_files: &[],
        };
        let Some(candidate) = generator.generate(&request)? else {
            info!(attempt, "generator has no more candidates");
            break;
        };

        if let Some(previous) = last_project_dir.take() {
            remove_project(&previous)?;
        }

        let project_dir = store.create_project()?;
        let (spec, result) = run_candidate(&project_dir, attempt, &candidate, engine, config)?;
        if let Some(message) = result.outcome.failure_message() {
            warn!(attempt, error = message, "attempt failed");
        }
        let accepted = result.outcome.is_accepted().then(|| result.clone());
        history.push(spec, result);
        if let Some(record) = history.last() {
            on_attempt(&project_dir, record);
        }

        if let Some(result) = accepted {
            info!(attempt, project = %project_dir.display(), "attempt accepted");
            return Ok(RefinementOutcome::Accepted {
                project_dir,
                attempt,
                result,
                history,
            });
        }
        last_project_dir = Some(project_dir);
    }

    Ok(RefinementOutcome::Exhausted {
        last_project_dir,
        history,
    })
}

/// A project copied and overlaid by [`run_update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedProject {
    pub project_dir: PathBuf,
    pub result: ExecutionResult,
}

/// Show the generator the sources of `existing`, copy the project with the
/// returned candidate on top and execute the copy once.
///
/// `existing` is never modified.
#[instrument(skip_all, fields(project = %existing.display()))]
pub fn run_update<G, I>(
    store: &ProjectStore,
    existing: &Path,
    generator: &mut G,
    engine: &ExecutionEngine<I>,
    config: &RefineConfig,
) -> Result<UpdatedProject>
where
    G: CandidateGenerator,
    I: DependencyInstaller,
{
    if !existing.is_dir() {
        bail!("project {} does not exist", existing.display());
    }
    let project_files = read_project_files(existing)?;
    let history = AttemptHistory::new();
    let candidate = generator
        .generate(&GenerationRequest {
            attempt: 1,
            feedback: None,
            history: &history,
            project_files: &project_files,
        })?
        .context("generator produced no update")?;

    let project_dir = store.create_updated_project(existing, &candidate)?;
    let spec = config.spec_for(&candidate.run_command, &project_dir);
    let result = execute_logged(engine, 1, &spec)?;
    Ok(UpdatedProject {
        project_dir,
        result,
    })
}

/// Materialize `candidate` into `project_dir`, execute it once and log it.
///
/// Invalid file names fail the attempt rather than the session.
pub fn run_candidate<I: DependencyInstaller>(
    project_dir: &Path,
    attempt: u32,
    candidate: &Candidate,
    engine: &ExecutionEngine<I>,
    config: &RefineConfig,
) -> Result<(RunSpec, ExecutionResult)> {
    write_run_command(project_dir, &candidate.run_command)?;
    let spec = config.spec_for(&candidate.run_command, project_dir);

    if let Err(err) = write_files(project_dir, &candidate.generated_code) {
        let result = ExecutionResult::failed(format!("{err:#}"), InstallOutcome::Skipped);
        let now = Utc::now().to_rfc3339();
        write_attempt_log(
            project_dir,
            &AttemptLog::new(attempt, &spec, &result).with_times(now.clone(), now),
        )?;
        return Ok((spec, result));
    }
    let result = execute_logged(engine, attempt, &spec)?;
    Ok((spec, result))
}

/// Execute `spec` and write the attempt log into its working directory.
pub fn execute_logged<I: DependencyInstaller>(
    engine: &ExecutionEngine<I>,
    attempt: u32,
    spec: &RunSpec,
) -> Result<ExecutionResult> {
    let started_at = Utc::now().to_rfc3339();
    let result = engine.execute(spec);
    let ended_at = Utc::now().to_rfc3339();
    write_attempt_log(
        &spec.working_dir,
        &AttemptLog::new(attempt, spec, &result).with_times(started_at, ended_at),
    )?;
    Ok(result)
}
