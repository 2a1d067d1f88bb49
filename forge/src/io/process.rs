//! Child process supervision with process-group isolation, bounded waits and
//! bounded output capture.
//!
//! Every platform-specific detail of starting and killing processes lives in
//! this module. Callers only see [`ProcessSupervisor`] and [`ProcessHandle`].
//!
//! On Unix the leader's pid is the process group id, and `killpg` reaches
//! every member even after the leader is reaped. Windows has no such group
//! handle: `taskkill /T` only walks the tree while the leader is alive. Once
//! the leader has exited, the tree is swept from a process snapshot instead,
//! following parent ids (which Windows never rewrites) from the leader and
//! skipping anything started before it. A process that detached from the
//! tree on purpose is not found by either path.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::command::resolve_program;

/// Upper bound on waiting for output readers once the process group is gone.
///
/// A grandchild that escaped the group could keep a pipe open forever.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

type StreamResult = Result<(Vec<u8>, usize)>;

/// Text collected from a supervised process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
}

/// Result of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
}

/// Starts processes in their own process group.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    output_limit_bytes: usize,
    kill_grace: Duration,
}

impl ProcessSupervisor {
    pub fn new(output_limit_bytes: usize, kill_grace: Duration) -> Self {
        Self {
            output_limit_bytes,
            kill_grace,
        }
    }

    /// Spawn `argv` in `working_dir` with piped stdout/stderr.
    ///
    /// Output is drained by reader threads from the start so the child never
    /// blocks on a full pipe.
    #[instrument(skip_all, fields(working_dir = %working_dir.display(), program = ?argv.first()))]
    pub fn start(&self, working_dir: &Path, argv: &[String]) -> Result<ProcessHandle> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("empty run command"))?;
        if !working_dir.is_dir() {
            bail!("working directory {} does not exist", working_dir.display());
        }

        let mut cmd = Command::new(resolve_program(working_dir, program));
        cmd.args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        isolate_process_group(&mut cmd);

        debug!("spawning child process");
        #[cfg(windows)]
        let spawned_at = unix_now_secs();
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                error!(err = %e, "failed to spawn command");
                return Err(e).with_context(|| format!("spawn {program}"));
            }
        };
        let pid = child.id();
        debug!(pid, "child process started");

        let limit = self.output_limit_bytes;
        let stdout = child
            .stdout
            .take()
            .map(|stream| spawn_reader(stream, limit));
        let stderr = child
            .stderr
            .take()
            .map(|stream| spawn_reader(stream, limit));

        Ok(ProcessHandle {
            child,
            pid,
            status: None,
            terminated: false,
            stdout,
            stderr,
            captured: None,
            kill_grace: self.kill_grace,
            #[cfg(windows)]
            spawned_at,
        })
    }
}

/// Exclusive owner of one running child and its process group.
///
/// Dropping the handle terminates and reaps the whole group.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: u32,
    status: Option<ExitStatus>,
    terminated: bool,
    stdout: Option<Receiver<StreamResult>>,
    stderr: Option<Receiver<StreamResult>>,
    captured: Option<CapturedOutput>,
    kill_grace: Duration,
    /// Unix seconds just before spawning; lower bound for the orphan sweep.
    #[cfg(windows)]
    spawned_at: u64,
}

impl ProcessHandle {
    /// Native process id; also the process group id on Unix.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit status of the group leader, once observed.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Non-blocking liveness check of the group leader.
    pub fn is_alive(&mut self) -> Result<bool> {
        if self.status.is_some() {
            return Ok(false);
        }
        match self.child.try_wait().context("poll child")? {
            Some(status) => {
                self.status = Some(status);
                Ok(false)
            }
            None => Ok(true),
        }
    }

    /// Wait for the group leader to exit, at most `timeout`.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<WaitOutcome> {
        if let Some(status) = self.status {
            return Ok(WaitOutcome::Exited(status));
        }
        match self
            .child
            .wait_timeout(timeout)
            .context("wait for child")?
        {
            Some(status) => {
                self.status = Some(status);
                Ok(WaitOutcome::Exited(status))
            }
            None => Ok(WaitOutcome::TimedOut),
        }
    }

    /// Terminate the whole process group and reap the leader.
    ///
    /// Sends a polite signal first and escalates to a forced kill after the
    /// kill grace. Idempotent; a process that already exited is not an error.
    #[instrument(skip_all, fields(pid = self.pid))]
    pub fn terminate(&mut self) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        if self.status.is_none() {
            debug!("terminating process group");
            signal_group(self.pid, GroupSignal::Terminate)?;
            let status = match self
                .child
                .wait_timeout(self.kill_grace)
                .context("wait for terminated child")?
            {
                Some(status) => status,
                None => {
                    warn!(
                        kill_grace_ms = self.kill_grace.as_millis() as u64,
                        "process ignored termination, killing"
                    );
                    signal_group(self.pid, GroupSignal::Kill)?;
                    if let Err(err) = self.child.kill() {
                        debug!(err = %err, "direct kill after group kill failed");
                    }
                    self.child.wait().context("wait child after kill")?
                }
            };
            self.status = Some(status);
        }
        // Workers may outlive the leader; sweep whatever is left.
        #[cfg(unix)]
        signal_group(self.pid, GroupSignal::Kill)?;
        #[cfg(windows)]
        sweep_orphans(self.pid, self.spawned_at);
        self.terminated = true;
        Ok(())
    }

    /// Collect stdout/stderr.
    ///
    /// With `blocking`, waits for the leader to exit first; otherwise the group
    /// is terminated. Either way the readers are joined only after the group is
    /// gone, so the text is never read from a pipe that is still being written.
    pub fn collect_output(&mut self, blocking: bool) -> Result<CapturedOutput> {
        if let Some(captured) = &self.captured {
            return Ok(captured.clone());
        }
        if blocking && self.status.is_none() {
            let status = self.child.wait().context("wait for child")?;
            self.status = Some(status);
        }
        self.terminate()?;

        let (stdout, stdout_truncated) = drain_reader(self.stdout.take(), "stdout")?;
        let (stderr, stderr_truncated) = drain_reader(self.stderr.take(), "stderr")?;
        if stdout_truncated > 0 || stderr_truncated > 0 {
            warn!(stdout_truncated, stderr_truncated, "output truncated");
        }

        let captured = CapturedOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            stdout_truncated,
            stderr_truncated,
        };
        self.captured = Some(captured.clone());
        Ok(captured)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Err(err) = self.terminate() {
            warn!(pid = self.pid, err = %format!("{err:#}"), "failed to terminate process on drop");
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(stream: R, limit: usize) -> Receiver<StreamResult> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver may already be gone if draining timed out.
        let _ = tx.send(read_stream_limited(stream, limit));
    });
    rx
}

fn drain_reader(reader: Option<Receiver<StreamResult>>, label: &str) -> StreamResult {
    let Some(reader) = reader else {
        return Ok((Vec::new(), 0));
    };
    match reader.recv_timeout(OUTPUT_DRAIN_TIMEOUT) {
        Ok(result) => result.with_context(|| format!("read {label}")),
        Err(RecvTimeoutError::Timeout) => {
            warn!(stream = label, "pipe still open after process group exit, dropping output");
            Ok((Vec::new(), 0))
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("{label} reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> StreamResult {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(windows)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn isolate_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn signal_group(pid: u32, signal: GroupSignal) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(pid).context("process id out of range")?;
    let sig = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    match killpg(Pid::from_raw(pgid), sig) {
        Ok(()) => Ok(()),
        // Group already empty (ESRCH), or only zombies left (EPERM on some BSDs).
        Err(Errno::ESRCH) | Err(Errno::EPERM) => {
            debug!(pgid, signal = ?sig, "process group already gone");
            Ok(())
        }
        Err(err) => Err(anyhow!("signal process group {pgid}: {err}")),
    }
}

#[cfg(windows)]
fn signal_group(pid: u32, signal: GroupSignal) -> Result<()> {
    let mut cmd = Command::new("taskkill");
    cmd.arg("/T").arg("/PID").arg(pid.to_string());
    if signal == GroupSignal::Kill {
        cmd.arg("/F");
    }
    let output = cmd.output().context("run taskkill")?;
    if !output.status.success() {
        // Most often the tree is already gone.
        debug!(
            pid,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "taskkill reported failure"
        );
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn signal_group(_pid: u32, _signal: GroupSignal) -> Result<()> {
    Ok(())
}

/// One row of a process snapshot.
#[cfg(any(windows, test))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProcessEntry {
    pid: u32,
    parent: Option<u32>,
    /// Unix seconds.
    start_time: u64,
}

/// Pids descending from `root` that started at or after `since`.
///
/// Children started before `since` belong to an older process that held the
/// same pid.
#[cfg(any(windows, test))]
fn descendants_since(root: u32, since: u64, entries: &[ProcessEntry]) -> Vec<u32> {
    let mut found: Vec<u32> = Vec::new();
    let mut frontier = vec![root];
    while let Some(parent) = frontier.pop() {
        for entry in entries {
            if entry.parent == Some(parent)
                && entry.start_time >= since
                && entry.pid != root
                && !found.contains(&entry.pid)
            {
                found.push(entry.pid);
                frontier.push(entry.pid);
            }
        }
    }
    found.sort_unstable();
    found
}

#[cfg(windows)]
fn unix_now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[cfg(windows)]
fn sweep_orphans(root: u32, since: u64) {
    use sysinfo::{Pid, System};

    let mut system = System::new();
    system.refresh_processes();
    let entries: Vec<ProcessEntry> = system
        .processes()
        .values()
        .map(|process| ProcessEntry {
            pid: process.pid().as_u32(),
            parent: process.parent().map(|parent| parent.as_u32()),
            start_time: process.start_time(),
        })
        .collect();
    for pid in descendants_since(root, since, &entries) {
        match system.process(Pid::from_u32(pid)) {
            Some(process) if process.kill() => debug!(pid, "killed orphaned descendant"),
            _ => debug!(pid, "orphaned descendant already gone"),
        }
    }
}
