//! Run command tokenization.
//!
//! Commands are split on whitespace only. There is no shell interpretation and
//! no quoting support: `python "my app.py"` yields three tokens.

use std::path::{Path, PathBuf};

/// Split a run command into argv tokens.
pub fn tokenize_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

/// Resolve the program token against the working directory.
///
/// Bare names (`python`) are left for `PATH` lookup. Relative paths with a
/// separator (`./run.sh`, `bin/serve`) are joined onto `working_dir` so they
/// resolve the same way on every platform.
pub fn resolve_program(working_dir: &Path, program: &str) -> PathBuf {
    let path = Path::new(program);
    let has_separator = program.contains('/') || program.contains('\\');
    if has_separator && path.is_relative() {
        working_dir.join(path)
    } else {
        path.to_path_buf()
    }
}

/// Return the value following `flag` in `tokens`, accepting `flag value` and
/// `flag=value`.
pub fn flag_value<'a>(tokens: &'a [String], flag: &str) -> Option<&'a str> {
    let mut iter = tokens.iter();
    while let Some(token) = iter.next() {
        if token == flag {
            return iter.next().map(String::as_str);
        }
        if let Some(value) = token
            .strip_prefix(flag)
            .and_then(|rest| rest.strip_prefix('='))
        {
            return Some(value);
        }
    }
    None
}
