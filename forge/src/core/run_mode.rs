//! Run mode classification from command text.
//!
//! The launcher table is the single place that decides which commands are
//! long-running services. Matching is a case-insensitive substring test, so
//! `python -m streamlit run app.py` and `./uvicorn_dev.sh` both count.

use crate::core::types::{RunMode, ServiceLauncher};

/// One row of the launcher table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LauncherPattern {
    /// Lowercase substring searched for in the command.
    pub pattern: &'static str,
    pub launcher: ServiceLauncher,
    pub mode: RunMode,
}

/// Known launchers, checked in order. Commands matching no row are OneShot.
pub const LAUNCHER_TABLE: &[LauncherPattern] = &[
    LauncherPattern {
        pattern: "streamlit",
        launcher: ServiceLauncher::Streamlit,
        mode: RunMode::Service,
    },
    LauncherPattern {
        pattern: "uvicorn",
        launcher: ServiceLauncher::Uvicorn,
        mode: RunMode::Service,
    },
];

/// First table row whose pattern occurs in `command`.
pub fn match_row(command: &str) -> Option<&'static LauncherPattern> {
    let lowered = command.to_lowercase();
    LAUNCHER_TABLE
        .iter()
        .find(|row| lowered.contains(row.pattern))
}

/// Launcher of the first matching row.
pub fn match_launcher(command: &str) -> Option<ServiceLauncher> {
    match_row(command).map(|row| row.launcher)
}

/// Classify a command. Pure function of the command string.
pub fn classify_run_mode(command: &str) -> RunMode {
    match_row(command).map_or(RunMode::OneShot, |row| row.mode)
}

/// Whether `command` names a known service launcher.
///
/// Also consulted when a OneShot run times out, so that a service forced
/// into OneShot mode is still reported as running.
pub fn is_service_command(command: &str) -> bool {
    match_launcher(command).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_scripts_are_one_shot() {
        for command in [
            "python main.py",
            "python3 -m pytest",
            "node index.js",
            "",
            "flask run",
        ] {
            assert_eq!(classify_run_mode(command), RunMode::OneShot, "{command}");
        }
    }

    #[test]
    fn known_launchers_are_services() {
        for command in [
            "streamlit run app.py",
            "uvicorn main:app --reload",
            "python -m streamlit run app.py",
            "python -m uvicorn main:app --port 9000",
            "Streamlit run app.py",
            "UVICORN main:app",
        ] {
            assert_eq!(classify_run_mode(command), RunMode::Service, "{command}");
        }
    }

    #[test]
    fn launcher_match_reports_kind() {
        assert_eq!(
            match_launcher("streamlit run app.py"),
            Some(ServiceLauncher::Streamlit)
        );
        assert_eq!(
            match_launcher("uvicorn main:app"),
            Some(ServiceLauncher::Uvicorn)
        );
        assert_eq!(match_launcher("python main.py"), None);
    }

    #[test]
    fn every_table_row_classifies_by_its_mode() {
        for row in LAUNCHER_TABLE {
            assert_eq!(classify_run_mode(row.pattern), row.mode);
            assert!(is_service_command(row.pattern));
            assert_eq!(match_launcher(row.pattern), Some(row.launcher));
            assert_eq!(match_row(row.pattern), Some(row));
        }
    }

    #[test]
    fn first_matching_row_wins() {
        let row = match_row("streamlit run proxy_to_uvicorn.py").expect("row");
        assert_eq!(row.launcher, ServiceLauncher::Streamlit);
        assert_eq!(row.mode, RunMode::Service);
        assert!(match_row("python main.py").is_none());
    }
}
