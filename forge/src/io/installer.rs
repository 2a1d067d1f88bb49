//! Dependency installation ahead of each attempt.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::types::InstallOutcome;
use crate::io::config::InstallerConfig;
use crate::io::process::{ProcessSupervisor, WaitOutcome};

/// Installs declared dependencies for a project directory.
///
/// Implementations never fail: every problem is reported as
/// [`InstallOutcome::Failed`] so the attempt can proceed regardless.
pub trait DependencyInstaller {
    fn install(&self, project_dir: &Path) -> InstallOutcome;
}

/// Runs a package installer (`pip install -r requirements.txt` by default)
/// when the manifest exists.
///
/// The installer runs under the same supervision as the application, so a
/// timeout takes down everything it spawned.
#[derive(Debug, Clone)]
pub struct PipInstaller {
    command: Vec<String>,
    manifest: String,
    timeout: Duration,
    supervisor: ProcessSupervisor,
}

impl PipInstaller {
    pub fn new(config: &InstallerConfig, output_limit_bytes: usize, kill_grace: Duration) -> Self {
        Self {
            command: config.command.clone(),
            manifest: config.manifest.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            supervisor: ProcessSupervisor::new(output_limit_bytes, kill_grace),
        }
    }
}

impl DependencyInstaller for PipInstaller {
    #[instrument(skip_all, fields(project_dir = %project_dir.display()))]
    fn install(&self, project_dir: &Path) -> InstallOutcome {
        let manifest_path = project_dir.join(&self.manifest);
        if !manifest_path.is_file() {
            debug!(manifest = %self.manifest, "no manifest, skipping install");
            return InstallOutcome::Skipped;
        }
        let Some(program) = self.command.first() else {
            return InstallOutcome::Failed {
                message: "installer command is empty".to_string(),
            };
        };

        info!(manifest = %manifest_path.display(), "installing dependencies");
        // Manifest path relative to the working directory, so a relative `project_dir` works too.
        let mut argv = self.command.clone();
        argv.push(self.manifest.clone());

        let mut handle = match self.supervisor.start(project_dir, &argv) {
            Ok(handle) => handle,
            Err(err) => return failed(format!("run installer {program}: {err:#}")),
        };
        let status = match handle.wait_timeout(self.timeout) {
            Ok(WaitOutcome::Exited(status)) => status,
            Ok(WaitOutcome::TimedOut) => {
                // Terminates the installer's whole group before draining.
                if let Err(err) = handle.collect_output(false) {
                    debug!(err = %format!("{err:#}"), "no output from timed out installer");
                }
                return failed(format!(
                    "installer timed out after {}s",
                    self.timeout.as_secs()
                ));
            }
            Err(err) => return failed(format!("wait for installer {program}: {err:#}")),
        };
        // Sweeps anything the installer left behind, then drains.
        let stderr = match handle.collect_output(true) {
            Ok(output) => output.stderr.trim().to_string(),
            Err(err) => {
                debug!(err = %format!("{err:#}"), "installer output unavailable");
                String::new()
            }
        };

        if !status.success() {
            let message = if stderr.is_empty() {
                format!("installer exited with status {:?}", status.code())
            } else {
                stderr
            };
            warn!(exit_code = ?status.code(), stderr = %message, "dependency install failed");
            return InstallOutcome::Failed { message };
        }

        info!("dependencies installed");
        InstallOutcome::Installed
    }
}

fn failed(message: String) -> InstallOutcome {
    warn!(err = %message, "dependency install failed");
    InstallOutcome::Failed { message }
}
