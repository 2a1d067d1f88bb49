//! Execution-and-verification engine for generated applications.
//!
//! Generated source files are materialized into a fresh project directory,
//! dependencies are installed, and the declared run command is started and
//! classified under a time budget. The architecture keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (run-mode table, command parsing,
//!   service URLs, outcome classification). No I/O.
//! - **[`io`]**: Side-effecting operations (process supervision, installer,
//!   project directories, attempt logs). Collaborators sit behind traits so
//!   tests can script them.
//!
//! [`refine`] drives the bounded generate-run-feedback loop on top of both.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod refine;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
