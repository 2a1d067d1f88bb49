//! Stable exit codes for forge CLI commands.

/// Command succeeded, or the attempt was accepted.
pub const OK: i32 = 0;
/// Invalid arguments, config or project layout, or another error.
pub const INVALID: i32 = 1;
/// The attempt failed, or every attempt of a refinement session failed.
pub const FAILED: i32 = 2;
