//! Test-only collaborators and process fixtures.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::core::types::{Candidate, InstallOutcome, SourceFile};
use crate::io::generator::{CandidateGenerator, GenerationRequest};
use crate::io::installer::DependencyInstaller;

/// Installer returning a fixed outcome and counting calls across clones.
#[derive(Debug, Clone)]
pub struct ScriptedInstaller {
    outcome: InstallOutcome,
    calls: Arc<AtomicUsize>,
}

impl ScriptedInstaller {
    pub fn new(outcome: InstallOutcome) -> Self {
        Self {
            outcome,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn skipped() -> Self {
        Self::new(InstallOutcome::Skipped)
    }

    pub fn installed() -> Self {
        Self::new(InstallOutcome::Installed)
    }

    pub fn failing(message: &str) -> Self {
        Self::new(InstallOutcome::Failed {
            message: message.to_string(),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DependencyInstaller for ScriptedInstaller {
    fn install(&self, _project_dir: &Path) -> InstallOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

/// Generator that hands out queued candidates and records what it was shown.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerator {
    queue: VecDeque<Candidate>,
    feedback: Vec<Option<String>>,
    project_files: Vec<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self {
            queue: candidates.into(),
            ..Self::default()
        }
    }

    /// Feedback passed to each `generate` call, in call order.
    pub fn feedback(&self) -> &[Option<String>] {
        &self.feedback
    }

    /// Names of the project files passed to each `generate` call.
    pub fn project_files(&self) -> &[Vec<String>] {
        &self.project_files
    }
}

impl CandidateGenerator for ScriptedGenerator {
    fn generate(&mut self, request: &GenerationRequest<'_>) -> Result<Option<Candidate>> {
        self.feedback.push(request.feedback.map(str::to_string));
        self.project_files.push(
            request
                .project_files
                .iter()
                .map(|file| file.name.clone())
                .collect(),
        );
        Ok(self.queue.pop_front())
    }
}

/// Candidate with a single shell script run via `sh <name>`.
pub fn script_candidate(name: &str, body: &str, run_command: &str) -> Candidate {
    Candidate {
        generated_code: vec![SourceFile {
            name: name.to_string(),
            content: body.to_string(),
        }],
        run_command: run_command.to_string(),
    }
}

/// Write an executable script into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("chmod {}", path.display()))?;
    }
    Ok(path)
}

/// Read a pid written by a test script, waiting until it appears.
pub fn read_pid_file(path: &Path, timeout: Duration) -> Result<u32> {
    let deadline = Instant::now() + timeout;
    loop {
        let parsed = fs::read_to_string(path)
            .ok()
            .and_then(|raw| raw.trim().parse::<u32>().ok());
        if let Some(pid) = parsed {
            return Ok(pid);
        }
        if Instant::now() >= deadline {
            anyhow::bail!("pid file {} never appeared", path.display());
        }
        thread::sleep(Duration::from_millis(20));
    }
}

/// Whether `pid` is gone (or a zombie), polling for up to three seconds.
#[cfg(unix)]
pub fn process_gone(pid: u32) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if !process_exists(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(50));
    }
}

#[cfg(unix)]
fn process_exists(pid: u32) -> bool {
    use nix::sys::signal;
    use nix::unistd::Pid;

    let stat = Path::new("/proc").join(pid.to_string()).join("stat");
    if let Ok(raw) = fs::read_to_string(&stat) {
        let state = raw
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.trim_start().chars().next());
        return state != Some('Z');
    }
    let Ok(raw_pid) = i32::try_from(pid) else {
        return false;
    };
    signal::kill(Pid::from_raw(raw_pid), None).is_ok()
}
