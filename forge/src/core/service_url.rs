//! Heuristic URL for a service that survived startup.

use crate::core::command::{flag_value, tokenize_command};
use crate::core::run_mode::match_launcher;
use crate::core::types::ServiceLauncher;

pub const STREAMLIT_DEFAULT_PORT: u16 = 8501;
pub const UVICORN_DEFAULT_PORT: u16 = 8000;
const UVICORN_DOCS_PATH: &str = "/docs";

/// Best-guess URL where a launched service can be reached.
///
/// Returns `None` for commands that match no known launcher.
pub fn service_url(command: &str) -> Option<String> {
    let launcher = match_launcher(command)?;
    let tokens = tokenize_command(command);
    let url = match launcher {
        ServiceLauncher::Streamlit => {
            let port = parse_port(flag_value(&tokens, "--server.port"), STREAMLIT_DEFAULT_PORT);
            format!("http://localhost:{port}")
        }
        ServiceLauncher::Uvicorn => {
            let port = parse_port(flag_value(&tokens, "--port"), UVICORN_DEFAULT_PORT);
            format!("http://localhost:{port}{UVICORN_DOCS_PATH}")
        }
    };
    Some(url)
}

fn parse_port(value: Option<&str>, default: u16) -> u16 {
    value
        .and_then(|raw| raw.parse::<u16>().ok())
        .filter(|port| *port != 0)
        .unwrap_or(default)
}
