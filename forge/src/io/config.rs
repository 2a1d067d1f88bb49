//! Forge configuration stored in `forge.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config file name, looked up in the current directory.
pub const CONFIG_FILE_NAME: &str = "forge.toml";

/// Forge configuration (TOML).
///
/// Missing fields default to the values the generator was tuned with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ForgeConfig {
    /// Directory holding one subdirectory per generated project.
    pub projects_dir: PathBuf,

    /// Attempts the refinement loop may spend before giving up.
    pub max_attempts: u32,

    /// Keep at most this many bytes of each captured stream.
    pub output_limit_bytes: usize,

    pub execution: ExecutionConfig,

    pub installer: InstallerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Budget for OneShot commands, in seconds.
    pub timeout_secs: u64,
    /// How long a Service command must stay up to be presumed healthy.
    pub grace_period_ms: u64,
    /// Delay between the polite and the forced kill of a process group.
    pub kill_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InstallerConfig {
    /// Installer argv; the manifest path is appended as the final argument.
    pub command: Vec<String>,
    /// Manifest file name at the project root.
    pub manifest: String,
    pub timeout_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            grace_period_ms: 2_000,
            kill_grace_ms: 500,
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            command: vec!["pip".to_string(), "install".to_string(), "-r".to_string()],
            manifest: "requirements.txt".to_string(),
            timeout_secs: 10 * 60,
        }
    }
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            projects_dir: PathBuf::from("generated_projects"),
            max_attempts: 3,
            output_limit_bytes: 100_000,
            execution: ExecutionConfig::default(),
            installer: InstallerConfig::default(),
        }
    }
}

impl ForgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.execution.timeout_secs == 0 {
            return Err(anyhow!("execution.timeout_secs must be > 0"));
        }
        if self.execution.grace_period_ms == 0 {
            return Err(anyhow!("execution.grace_period_ms must be > 0"));
        }
        if self.installer.timeout_secs == 0 {
            return Err(anyhow!("installer.timeout_secs must be > 0"));
        }
        if self.installer.command.is_empty() || self.installer.command[0].trim().is_empty() {
            return Err(anyhow!("installer.command must be a non-empty array"));
        }
        if self.installer.manifest.trim().is_empty() {
            return Err(anyhow!("installer.manifest must not be empty"));
        }
        if self.projects_dir.as_os_str().is_empty() {
            return Err(anyhow!("projects_dir must not be empty"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ForgeConfig::default()`.
pub fn load_config(path: &Path) -> Result<ForgeConfig> {
    if !path.exists() {
        let cfg = ForgeConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ForgeConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ForgeConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
