//! Execution engine: install, start, observe and classify one attempt.
//!
//! [`ExecutionEngine::execute`] never fails. Launch errors, supervision errors
//! and timeouts all end up in the returned [`ExecutionResult`], and the process
//! group is terminated and reaped before it returns.

use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::classifier::{
    ExitSummary, OneShotObservation, ServiceObservation, classify_one_shot, classify_service,
};
use crate::core::types::{AttemptPhase, ExecutionResult, Outcome, RunMode, RunSpec};
use crate::io::config::ForgeConfig;
use crate::io::installer::DependencyInstaller;
use crate::io::process::{CapturedOutput, ProcessHandle, ProcessSupervisor, WaitOutcome};

/// Tunables for the engine, taken from [`ForgeConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// How long a Service process must survive to be presumed healthy.
    pub grace_period: Duration,
    /// Delay between the polite and the forced kill.
    pub kill_grace: Duration,
    pub output_limit_bytes: usize,
}

impl EngineSettings {
    pub fn from_config(cfg: &ForgeConfig) -> Self {
        Self {
            grace_period: cfg.execution.grace_period(),
            kill_grace: cfg.execution.kill_grace(),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

/// Runs one attempt at a time.
pub struct ExecutionEngine<I> {
    installer: I,
    supervisor: ProcessSupervisor,
    grace_period: Duration,
}

impl<I: DependencyInstaller> ExecutionEngine<I> {
    pub fn new(installer: I, settings: EngineSettings) -> Self {
        Self {
            installer,
            supervisor: ProcessSupervisor::new(settings.output_limit_bytes, settings.kill_grace),
            grace_period: settings.grace_period,
        }
    }

    /// Execute one attempt described by `spec`.
    #[instrument(skip_all, fields(command = %spec.command, mode = spec.mode.as_str()))]
    pub fn execute(&self, spec: &RunSpec) -> ExecutionResult {
        let started = Instant::now();
        let mut phase = PhaseTracker::new();

        phase.advance(AttemptPhase::Installing);
        let install = self.installer.install(&spec.working_dir);
        if !install.is_success() {
            warn!(install = ?install, "dependency install failed, attempting to run anyway");
        }

        phase.advance(AttemptPhase::Starting);
        let mut handle = match self.supervisor.start(&spec.working_dir, &spec.argv) {
            Ok(handle) => handle,
            Err(err) => {
                let message = format!("{err:#}");
                warn!(err = %message, "failed to launch application");
                phase.advance(AttemptPhase::Failed);
                let mut result = ExecutionResult::failed(message, install);
                result.duration_ms = elapsed_ms(started);
                return result;
            }
        };

        phase.advance(AttemptPhase::Probing);
        let observed = match spec.mode {
            RunMode::Service => self.observe_service(&mut handle, spec),
            RunMode::OneShot => observe_one_shot(&mut handle, spec),
        };
        let (outcome, captured) = match observed {
            Ok(observed) => observed,
            Err(err) => {
                let message = format!("{err:#}");
                warn!(err = %message, "lost track of application process");
                let captured = handle.collect_output(false).unwrap_or_default();
                (Outcome::Failed { message }, captured)
            }
        };
        // Dropping the handle terminates and reaps anything still in the group.
        drop(handle);

        phase.advance(AttemptPhase::from_outcome(&outcome));
        info!(outcome = ?outcome, "attempt finished");
        ExecutionResult {
            outcome,
            captured_output: captured.stdout,
            captured_error: captured.stderr,
            install,
            duration_ms: elapsed_ms(started),
        }
    }

    /// Wait out the grace period, then check the process is still up.
    ///
    /// A live service is terminated after the check: the engine only verifies
    /// that it starts.
    fn observe_service(
        &self,
        handle: &mut ProcessHandle,
        spec: &RunSpec,
    ) -> Result<(Outcome, CapturedOutput)> {
        debug!(grace_ms = self.grace_period.as_millis() as u64, "waiting out grace period");
        handle.wait_timeout(self.grace_period)?;

        if handle.is_alive()? {
            let outcome = classify_service(&spec.command, ServiceObservation::Alive, "");
            let captured = handle.collect_output(false)?;
            return Ok((outcome, captured));
        }

        let captured = handle.collect_output(true)?;
        let exit = exit_summary(handle);
        let outcome = classify_service(
            &spec.command,
            ServiceObservation::Exited(exit),
            &captured.stderr,
        );
        Ok((outcome, captured))
    }
}

/// Wait for completion within the budget, terminating on timeout.
fn observe_one_shot(handle: &mut ProcessHandle, spec: &RunSpec) -> Result<(Outcome, CapturedOutput)> {
    let observation = match handle.wait_timeout(spec.timeout)? {
        WaitOutcome::Exited(status) => OneShotObservation::Exited(ExitSummary::from_status(status)),
        WaitOutcome::TimedOut => {
            warn!(
                timeout_secs = spec.timeout.as_secs(),
                "application did not exit within budget, terminating"
            );
            OneShotObservation::TimedOut(spec.timeout)
        }
    };
    let blocking = matches!(observation, OneShotObservation::Exited(_));
    let captured = handle.collect_output(blocking)?;
    let outcome = classify_one_shot(&spec.command, observation, &captured.stderr);
    Ok((outcome, captured))
}

fn exit_summary(handle: &ProcessHandle) -> ExitSummary {
    handle
        .exit_status()
        .map(ExitSummary::from_status)
        .unwrap_or(ExitSummary {
            success: false,
            code: None,
        })
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Tracks the attempt phase and logs each transition.
struct PhaseTracker {
    phase: AttemptPhase,
}

impl PhaseTracker {
    fn new() -> Self {
        Self {
            phase: AttemptPhase::NotStarted,
        }
    }

    fn advance(&mut self, next: AttemptPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal phase transition {:?} -> {:?}",
            self.phase,
            next
        );
        debug!(from = self.phase.as_str(), phase = next.as_str(), "attempt phase");
        self.phase = next;
    }
}
