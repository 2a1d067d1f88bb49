//! I/O helpers: processes, project directories and configuration.

pub mod attempt_log;
pub mod config;
pub mod engine;
pub mod feedback;
pub mod generator;
pub mod installer;
pub mod materialize;
pub mod process;
pub mod project;
