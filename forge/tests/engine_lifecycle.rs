//! Engine-level tests against real processes.
//!
//! Shell scripts stand in for the service launchers: a script named
//! `fake_uvicorn.sh` makes the command text match the uvicorn pattern while
//! only needing `sh` and `sleep` on the host.
#![cfg(unix)]

use std::path::Path;
use std::time::Duration;

use forge::core::types::{InstallOutcome, Outcome, RunMode, RunSpec};
use forge::io::engine::{EngineSettings, ExecutionEngine};
use forge::io::process::{ProcessSupervisor, WaitOutcome};
use forge::test_support::{ScriptedInstaller, process_gone, read_pid_file, write_script};

/// Leader records its pid, starts a worker in the same group and waits.
const SERVICE_SCRIPT: &str = "echo $$ > leader.pid\nsleep 30 &\necho $! > worker.pid\nwait\n";

fn engine() -> ExecutionEngine<ScriptedInstaller> {
    ExecutionEngine::new(
        ScriptedInstaller::skipped(),
        EngineSettings {
            grace_period: Duration::from_millis(500),
            kill_grace: Duration::from_millis(200),
            output_limit_bytes: 10_000,
        },
    )
}

fn spec(dir: &Path, command: &str) -> RunSpec {
    RunSpec::new(command, dir, Duration::from_secs(5))
}

fn assert_group_gone(dir: &Path) {
    for name in ["leader.pid", "worker.pid"] {
        let pid = read_pid_file(&dir.join(name), Duration::from_secs(2)).expect("pid file");
        assert!(process_gone(pid), "{name} ({pid}) still alive");
    }
}

#[test]
fn one_shot_clean_exit_succeeds() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(temp.path(), "main.sh", "echo computed 42\n").expect("script");

    let result = engine().execute(&spec(temp.path(), "sh main.sh"));

    assert_eq!(result.outcome, Outcome::Succeeded);
    assert_eq!(result.captured_output, "computed 42\n");
    assert_eq!(result.install, InstallOutcome::Skipped);
}

#[test]
fn one_shot_stderr_fails_with_text_verbatim() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(
        temp.path(),
        "main.sh",
        "echo partial\necho 'Traceback: ZeroDivisionError' >&2\n",
    )
    .expect("script");

    let result = engine().execute(&spec(temp.path(), "sh main.sh"));

    assert_eq!(
        result.outcome,
        Outcome::Failed {
            message: "Traceback: ZeroDivisionError\n".to_string()
        }
    );
    assert_eq!(result.captured_output, "partial\n");
    assert_eq!(result.captured_error, "Traceback: ZeroDivisionError\n");
}

#[test]
fn one_shot_non_zero_exit_without_stderr_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(temp.path(), "main.sh", "exit 3\n").expect("script");

    let result = engine().execute(&spec(temp.path(), "sh main.sh"));

    assert_eq!(
        result.outcome.failure_message(),
        Some("process exited with status 3")
    );
}

#[test]
fn service_with_port_is_presumed_running_then_stopped() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(temp.path(), "fake_uvicorn.sh", SERVICE_SCRIPT).expect("script");

    let spec = spec(temp.path(), "sh fake_uvicorn.sh main:app --port 9100");
    assert_eq!(spec.mode, RunMode::Service);
    let result = engine().execute(&spec);

    assert_eq!(
        result.outcome,
        Outcome::PresumedRunning {
            service_url: "http://localhost:9100/docs".to_string()
        }
    );
    assert_group_gone(temp.path());
}

#[test]
fn service_without_port_uses_default_docs_url() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(temp.path(), "fake_uvicorn.sh", SERVICE_SCRIPT).expect("script");

    let result = engine().execute(&spec(temp.path(), "sh fake_uvicorn.sh main:app"));

    assert_eq!(
        result.outcome,
        Outcome::PresumedRunning {
            service_url: "http://localhost:8000/docs".to_string()
        }
    );
    assert_group_gone(temp.path());
}

#[test]
fn dashboard_service_uses_dashboard_port() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(temp.path(), "fake_streamlit.sh", SERVICE_SCRIPT).expect("script");

    let result = engine().execute(&spec(temp.path(), "sh fake_streamlit.sh run app.py"));

    assert_eq!(
        result.outcome,
        Outcome::PresumedRunning {
            service_url: "http://localhost:8501".to_string()
        }
    );
    assert_group_gone(temp.path());
}

#[test]
fn service_crash_within_grace_fails_with_stderr() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(
        temp.path(),
        "fake_uvicorn.sh",
        "echo 'ImportError: cannot import name app' >&2\nexit 1\n",
    )
    .expect("script");

    let result = engine().execute(&spec(temp.path(), "sh fake_uvicorn.sh main:app"));

    assert_eq!(
        result.outcome,
        Outcome::Failed {
            message: "ImportError: cannot import name app\n".to_string()
        }
    );
}

#[test]
fn service_silent_exit_within_grace_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(temp.path(), "fake_streamlit.sh", "exit 0\n").expect("script");

    let result = engine().execute(&spec(temp.path(), "sh fake_streamlit.sh run app.py"));

    assert_eq!(
        result.outcome.failure_message(),
        Some("process exited during startup grace period with status 0")
    );
}

#[test]
fn one_shot_timeout_fails_and_kills_the_group() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(temp.path(), "hang.sh", SERVICE_SCRIPT).expect("script");

    let spec = RunSpec::new("sh hang.sh", temp.path(), Duration::from_millis(500));
    let result = engine().execute(&spec);

    assert_eq!(
        result.outcome.failure_message(),
        Some("process timed out after 0.5s")
    );
    assert_group_gone(temp.path());
}

#[test]
fn one_shot_timeout_keeps_buffered_stderr() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(
        temp.path(),
        "hang.sh",
        "echo 'waiting for input' >&2\nsleep 30\n",
    )
    .expect("script");

    let spec = RunSpec::new("sh hang.sh", temp.path(), Duration::from_millis(500));
    let result = engine().execute(&spec);

    assert_eq!(
        result.outcome.failure_message(),
        Some("waiting for input\n")
    );
}

#[test]
fn forced_one_shot_service_timeout_is_presumed_running() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(temp.path(), "fake_uvicorn.sh", SERVICE_SCRIPT).expect("script");

    let spec = RunSpec::new(
        "sh fake_uvicorn.sh main:app --port 9200",
        temp.path(),
        Duration::from_millis(500),
    )
    .with_mode(RunMode::OneShot);
    let result = engine().execute(&spec);

    assert_eq!(
        result.outcome,
        Outcome::PresumedRunning {
            service_url: "http://localhost:9200/docs".to_string()
        }
    );
    assert_group_gone(temp.path());
}

#[test]
fn chatty_process_is_captured_up_to_the_limit() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(
        temp.path(),
        "chatty.sh",
        "i=0\nwhile [ $i -lt 20000 ]; do echo \"line $i\"; i=$((i+1)); done\n",
    )
    .expect("script");

    let result = engine().execute(&spec(temp.path(), "sh chatty.sh"));

    assert_eq!(result.outcome, Outcome::Succeeded);
    assert_eq!(result.captured_output.len(), 10_000);
    assert!(result.captured_output.starts_with("line 0\n"));
}

#[test]
fn terminate_twice_after_exit_leaves_no_orphans() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(
        temp.path(),
        "spawner.sh",
        "echo $$ > leader.pid\nsleep 30 > /dev/null 2>&1 &\necho $! > worker.pid\n",
    )
    .expect("script");

    let supervisor = ProcessSupervisor::new(1000, Duration::from_millis(200));
    let argv = vec!["sh".to_string(), "spawner.sh".to_string()];
    let mut handle = supervisor.start(temp.path(), &argv).expect("start");
    let waited = handle.wait_timeout(Duration::from_secs(5)).expect("wait");
    assert!(matches!(waited, WaitOutcome::Exited(_)));

    handle.terminate().expect("first terminate");
    handle.terminate().expect("second terminate");
    assert!(!handle.is_alive().expect("alive"));
    assert_group_gone(temp.path());
}

#[test]
fn dropping_a_live_handle_reaps_the_group() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_script(temp.path(), "svc.sh", SERVICE_SCRIPT).expect("script");

    let supervisor = ProcessSupervisor::new(1000, Duration::from_millis(200));
    let argv = vec!["sh".to_string(), "svc.sh".to_string()];
    let handle = supervisor.start(temp.path(), &argv).expect("start");
    read_pid_file(&temp.path().join("worker.pid"), Duration::from_secs(2)).expect("worker");
    drop(handle);

    assert_group_gone(temp.path());
}
