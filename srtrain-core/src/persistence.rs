//! Atomic file writes for checkpoints, training states and run metadata.
//!
//! A crash while a checkpoint is being written must never leave a truncated
//! `<iter>.state` behind, otherwise the resume locator would pick it up as the
//! newest state. Every write goes to a `.partial` sibling which is renamed
//! into place once complete.

use std::io;
use std::path::{Path, PathBuf};

use crate::error::CoreError;

/// Sibling path used while `path` is being written.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Atomically write raw bytes to a file, creating parent directories.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = partial_path(path);
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Atomically write `data` as pretty-printed JSON.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> Result<(), CoreError> {
    let json = serde_json::to_vec_pretty(data)?;
    atomic_write(path, &json)?;
    Ok(())
}

/// Load and deserialize JSON from a file.
///
/// Returns `Ok(None)` if the file doesn't exist.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, CoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read(path)?;
    Ok(Some(serde_json::from_slice(&data)?))
}
