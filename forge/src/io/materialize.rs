//! Writing generated files into a project directory.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::core::types::SourceFile;

/// Write `files` under `project_dir`, creating parent directories as needed.
///
/// Later entries overwrite earlier ones with the same path. Paths that would
/// escape the project directory are rejected before anything is written.
pub fn write_files(project_dir: &Path, files: &[SourceFile]) -> Result<()> {
    let targets = files
        .iter()
        .map(|file| Ok((contained_path(project_dir, &file.name)?, file)))
        .collect::<Result<Vec<_>>>()?;

    for (path, file) in targets {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, &file.content).with_context(|| format!("write {}", path.display()))?;
        debug!(path = %path.display(), bytes = file.content.len(), "materialized file");
    }
    Ok(())
}

/// Join `relative` onto `root`, refusing absolute paths and `..` components.
fn contained_path(root: &Path, relative: &str) -> Result<PathBuf> {
    let rel = Path::new(relative);
    if relative.trim().is_empty() {
        bail!("generated file has an empty name");
    }
    let mut joined = root.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                bail!("generated file {relative} escapes the project directory");
            }
        }
    }
    if joined == root {
        bail!("generated file {relative} does not name a file");
    }
    Ok(joined)
}
