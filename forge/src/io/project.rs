//! Project directory management under the projects base directory.
//!
//! Every attempt gets a fresh directory; updates copy the original into a new
//! sibling instead of editing it in place, so each attempt stays auditable.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use minijinja::{Environment, context};
use rand::{Rng, distributions::Alphanumeric};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::core::run_mode::match_launcher;
use crate::core::types::{Candidate, ServiceLauncher, SourceFile};
use crate::io::materialize::write_files;

pub const RUN_COMMAND_FILE: &str = "run_command.txt";
pub const README_FILE: &str = "README.md";
/// Forge-owned metadata inside a project (attempt logs).
pub const FORGE_DIR: &str = ".forge";
const PROJECT_PREFIX: &str = "project_";
const MAIN_FILES_LIMIT: usize = 5;

const README_TEMPLATE: &str = include_str!("templates/readme.md");

/// Framework family of a project, guessed from its run command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProjectKind {
    Streamlit,
    FastApi,
    Unknown,
}

impl ProjectKind {
    pub fn from_run_command(command: &str) -> Self {
        match match_launcher(command) {
            Some(ServiceLauncher::Streamlit) => ProjectKind::Streamlit,
            Some(ServiceLauncher::Uvicorn) => ProjectKind::FastApi,
            None if command.to_lowercase().contains("fastapi") => ProjectKind::FastApi,
            None => ProjectKind::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ProjectKind::Streamlit => "Streamlit",
            ProjectKind::FastApi => "FastAPI",
            ProjectKind::Unknown => "Unknown",
        }
    }
}

/// Summary of an existing project for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectInfo {
    pub name: String,
    pub path: PathBuf,
    pub kind: ProjectKind,
    /// Local creation time, `YYYY-MM-DD HH:MM:SS`.
    pub created: String,
    pub run_command: Option<String>,
    pub main_files: Vec<String>,
}

/// Owner of the projects base directory.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    base_dir: PathBuf,
    manifest: String,
}

impl ProjectStore {
    /// `manifest` is the dependency manifest name mentioned in READMEs.
    pub fn new(base_dir: impl Into<PathBuf>, manifest: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            manifest: manifest.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create `project_<timestamp>_<id>` with a README.
    pub fn create_project(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.base_dir)
            .with_context(|| format!("create projects dir {}", self.base_dir.display()))?;
        let name = build_project_name(&generate_timestamp(), &generate_short_id());
        let root = self.base_dir.join(name);
        fs::create_dir(&root).with_context(|| format!("create project {}", root.display()))?;
        write_readme(&root, &self.manifest)?;
        info!(project = %root.display(), "created project directory");
        Ok(root)
    }

    /// All `project_*` directories, newest first.
    pub fn find_existing_projects(&self) -> Result<Vec<PathBuf>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }
        let mut projects = Vec::new();
        for entry in fs::read_dir(&self.base_dir)
            .with_context(|| format!("read {}", self.base_dir.display()))?
        {
            let entry = entry.context("read entry")?;
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(PROJECT_PREFIX) {
                continue;
            }
            if !entry.file_type().context("read file type")?.is_dir() {
                continue;
            }
            let created = created_time(&entry.path())?;
            projects.push((created, entry.path()));
        }
        projects.sort_by(|a, b| b.cmp(a));
        Ok(projects.into_iter().map(|(_, path)| path).collect())
    }

    /// Copy `existing` into a new sibling directory and overlay `candidate`.
    ///
    /// The copy skips forge metadata; `run_command.txt` is rewritten.
    pub fn create_updated_project(&self, existing: &Path, candidate: &Candidate) -> Result<PathBuf> {
        if !existing.is_dir() {
            bail!("project {} does not exist", existing.display());
        }
        let name = existing
            .file_name()
            .with_context(|| format!("project path has no name {}", existing.display()))?
            .to_string_lossy()
            .into_owned();
        let parent = existing.parent().unwrap_or(self.base_dir.as_path());
        let updated = parent.join(build_updated_name(
            &name,
            &generate_timestamp(),
            &generate_short_id(),
        ));

        let built = copy_project(existing, &updated)
            .and_then(|()| write_files(&updated, &candidate.generated_code))
            .and_then(|()| write_run_command(&updated, &candidate.run_command));
        if let Err(err) = built {
            if updated.exists() {
                if let Err(cleanup) = remove_project(&updated) {
                    warn!(
                        dir = %updated.display(),
                        err = %format!("{cleanup:#}"),
                        "failed to remove partial update"
                    );
                }
            }
            return Err(err);
        }
        info!(from = %existing.display(), to = %updated.display(), "created updated project");
        Ok(updated)
    }
}

pub fn build_project_name(timestamp: &str, short_id: &str) -> String {
    format!("{PROJECT_PREFIX}{timestamp}_{short_id}")
}

pub fn build_updated_name(name: &str, timestamp: &str, short_id: &str) -> String {
    format!("{name}_updated_{timestamp}_{short_id}")
}

fn generate_timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

fn generate_short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase()
}

fn write_readme(root: &Path, manifest: &str) -> Result<()> {
    let created = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let rendered = Environment::new()
        .render_str(
            README_TEMPLATE,
            context! {
                created => created,
                manifest => manifest,
                run_command_file => RUN_COMMAND_FILE,
            },
        )
        .context("render README")?;
    let path = root.join(README_FILE);
    fs::write(&path, rendered).with_context(|| format!("write {}", path.display()))
}

/// Persist the exact command used for an attempt.
pub fn write_run_command(root: &Path, command: &str) -> Result<()> {
    let path = root.join(RUN_COMMAND_FILE);
    fs::write(&path, command).with_context(|| format!("write {}", path.display()))
}

/// Read `run_command.txt`, trimmed. `None` when missing or blank.
pub fn read_run_command(root: &Path) -> Result<Option<String>> {
    let path = root.join(RUN_COMMAND_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let trimmed = raw.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

/// Delete a project directory (used for discarded intermediate attempts).
pub fn remove_project(root: &Path) -> Result<()> {
    fs::remove_dir_all(root).with_context(|| format!("remove {}", root.display()))?;
    debug!(project = %root.display(), "removed project directory");
    Ok(())
}

/// Collect listing information for one project.
pub fn project_info(root: &Path) -> Result<ProjectInfo> {
    let run_command = read_run_command(root)?;
    let kind = run_command
        .as_deref()
        .map(ProjectKind::from_run_command)
        .unwrap_or(ProjectKind::Unknown);
    let created: DateTime<Local> = created_time(root)?.into();

    let mut main_files = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if entry.file_type().is_file() && has_extension(entry.path(), "py") {
            main_files.push(relative_name(root, entry.path())?);
            if main_files.len() == MAIN_FILES_LIMIT {
                break;
            }
        }
    }

    Ok(ProjectInfo {
        name: root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path: root.to_path_buf(),
        kind,
        created: created.format("%Y-%m-%d %H:%M:%S").to_string(),
        run_command,
        main_files,
    })
}

/// Read the source files an update request needs: every `.py` and `.html`
/// file plus the root `requirements.txt`, sorted by path.
pub fn read_project_files(root: &Path) -> Result<Vec<SourceFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_manifest = entry.depth() == 1 && entry.file_name() == "requirements.txt";
        if !(is_manifest || has_extension(path, "py") || has_extension(path, "html")) {
            continue;
        }
        let content =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        files.push(SourceFile {
            name: relative_name(root, path)?,
            content,
        });
    }
    Ok(files)
}

fn copy_project(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from)
        .into_iter()
        .filter_entry(|e| e.file_name() != FORGE_DIR)
    {
        let entry = entry.with_context(|| format!("walk {}", from.display()))?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .with_context(|| format!("strip prefix {}", from.display()))?;
        let target = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("create {}", target.display()))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("copy {} to {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}

fn created_time(path: &Path) -> Result<SystemTime> {
    let meta = fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    meta.created()
        .or_else(|_| meta.modified())
        .with_context(|| format!("read timestamps of {}", path.display()))
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().is_some_and(|e| e == ext)
}

/// Forward-slash relative name, stable across platforms.
fn relative_name(root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .with_context(|| format!("strip prefix {}", root.display()))?;
    Ok(rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}
