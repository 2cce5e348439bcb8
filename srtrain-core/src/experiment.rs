//! Experiment directory layout.
//!
//! Every training run owns `experiments/<name>` with `models/`,
//! `training_states/` and `visualization/` below it. A fresh run never writes
//! into a directory that already exists: the first free `<name>_<n>` is used
//! instead.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::logging::get_time_str;

/// Paths derived from an experiment root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentPaths {
    pub experiments_root: PathBuf,
    pub models: PathBuf,
    pub training_states: PathBuf,
    pub log: PathBuf,
    pub visualization: PathBuf,
}

impl ExperimentPaths {
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            models: root.join("models"),
            training_states: root.join("training_states"),
            log: root.clone(),
            visualization: root.join("visualization"),
            experiments_root: root,
        }
    }

    /// Name of the run as shown to the tracking backend (last path component).
    pub fn run_name(&self) -> String {
        self.experiments_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Return `base` if it does not exist, else the first free `base_<n>`.
pub fn versioned_root(base: &Path) -> PathBuf {
    if !base.exists() {
        return base.to_path_buf();
    }
    let mut n = 1usize;
    loop {
        let candidate = suffixed(base, n);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

fn suffixed(base: &Path, n: usize) -> PathBuf {
    let mut name = base
        .file_name()
        .map(|s| s.to_os_string())
        .unwrap_or_default();
    name.push(format!("_{n}"));
    base.with_file_name(name)
}

/// Create the experiment root and its sub-directories.
pub fn make_exp_dirs(paths: &ExperimentPaths) -> std::io::Result<()> {
    for dir in [
        &paths.experiments_root,
        &paths.models,
        &paths.training_states,
        &paths.visualization,
    ] {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Create `path`, archiving an existing directory as `<path>_archived_<time>`.
pub fn mkdir_and_rename(path: &Path) -> std::io::Result<Option<PathBuf>> {
    let archived = if path.exists() {
        let mut name = path
            .file_name()
            .map(|s| s.to_os_string())
            .unwrap_or_default();
        name.push(format!("_archived_{}", get_time_str()));
        let target = path.with_file_name(name);
        tracing::info!(
            "Path already exists. Rename it to {}",
            target.display()
        );
        std::fs::rename(path, &target)?;
        Some(target)
    } else {
        None
    };
    std::fs::create_dir_all(path)?;
    Ok(archived)
}
