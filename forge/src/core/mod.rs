//! Deterministic, pure logic shared by the execution engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod command;
pub mod run_mode;
pub mod service_url;
pub mod types;
