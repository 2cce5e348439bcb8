//! Network and training-state checkpoints.
//!
//! Each save writes `models/net_g_<tag>.json` and
//! `training_states/<tag>.state`, then records both in
//! `models/checkpoints.json` together with a SHA-256 of the weights file.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use srtrain_core::persistence::{atomic_write_json, load_json};
use srtrain_core::resume::{ResumeState, STATE_SUFFIX};

use super::network::NetworkWeights;
use crate::error::MlError;

const MANIFEST: &str = "checkpoints.json";

/// Which checkpoint slot a save goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTag {
    Iter(u64),
    Latest,
}

impl fmt::Display for SaveTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Iter(i) => write!(f, "{i}"),
            Self::Latest => f.write_str("latest"),
        }
    }
}

/// One manifest entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub id: String,
    pub tag: String,
    pub epoch: usize,
    pub iter: u64,
    pub network: PathBuf,
    pub state: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CheckpointManager {
    models_dir: PathBuf,
    states_dir: PathBuf,
}

fn sha256_file(path: &Path) -> Result<(String, u64), MlError> {
    let bytes = std::fs::read(path)?;
    Ok((format!("{:x}", Sha256::digest(&bytes)), bytes.len() as u64))
}

impl CheckpointManager {
    pub fn new(models_dir: impl Into<PathBuf>, states_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            states_dir: states_dir.into(),
        }
    }

    pub fn network_path(&self, tag: SaveTag) -> PathBuf {
        self.models_dir.join(format!("net_g_{tag}.json"))
    }

    pub fn state_path(&self, tag: SaveTag) -> PathBuf {
        self.states_dir.join(format!("{tag}.{STATE_SUFFIX}"))
    }

    fn manifest_path(&self) -> PathBuf {
        self.models_dir.join(MANIFEST)
    }

    pub fn list(&self) -> Result<Vec<CheckpointRecord>, MlError> {
        Ok(load_json(&self.manifest_path())?.unwrap_or_default())
    }

    /// Write weights and state for `tag`; a previous entry with the same tag
    /// is replaced.
    pub fn save(
        &self,
        weights: &NetworkWeights,
        state: &ResumeState,
        tag: SaveTag,
    ) -> Result<CheckpointRecord, MlError> {
        std::fs::create_dir_all(&self.models_dir)?;
        std::fs::create_dir_all(&self.states_dir)?;

        let network = self.network_path(tag);
        let state_path = self.state_path(tag);
        atomic_write_json(&network, weights)?;
        atomic_write_json(&state_path, state)?;
        let (sha256, size_bytes) = sha256_file(&network)?;

        let record = CheckpointRecord {
            id: uuid::Uuid::new_v4().to_string(),
            tag: tag.to_string(),
            epoch: state.epoch,
            iter: state.iter,
            network,
            state: state_path,
            sha256,
            size_bytes,
            created_at: Utc::now(),
        };

        let mut records = self.list()?;
        records.retain(|r| r.tag != record.tag);
        records.push(record.clone());
        atomic_write_json(&self.manifest_path(), &records)?;
        Ok(record)
    }
}

/// Reject a weights file whose hash no longer matches the manifest entry
/// beside it. Files the manifest does not list are accepted as is.
pub fn verify_recorded_network(path: &Path) -> Result<(), MlError> {
    let (Some(models_dir), Some(file_name)) = (path.parent(), path.file_name()) else {
        return Ok(());
    };
    let records: Vec<CheckpointRecord> = load_json(&models_dir.join(MANIFEST))?.unwrap_or_default();
    let Some(record) = records
        .iter()
        .find(|r| r.network.file_name() == Some(file_name))
    else {
        return Ok(());
    };
    if sha256_file(path)?.0 != record.sha256 {
        return Err(MlError::model(format!(
            "{} does not match the hash recorded at iter {}",
            path.display(),
            record.iter
        )));
    }
    Ok(())
}

/// Read a `net_g_*.json` weights file.
pub fn load_network(path: &Path) -> Result<NetworkWeights, MlError> {
    load_json(path)?.ok_or_else(|| MlError::not_found(format!("{}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::network::UpsampleAffine;
    use pretty_assertions::assert_eq;

    fn state(iter: u64) -> ResumeState {
        ResumeState {
            epoch: 1,
            iter,
            optimizers: vec![],
            schedulers: vec![],
        }
    }

    #[test]
    fn test_tag_display() {
        assert_eq!(SaveTag::Iter(500).to_string(), "500");
        assert_eq!(SaveTag::Latest.to_string(), "latest");
    }

    #[test]
    fn test_save_writes_files_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path().join("models"), dir.path().join("training_states"));
        let weights = UpsampleAffine::new(2, 3).unwrap().to_weights(None);

        let rec = mgr.save(&weights, &state(100), SaveTag::Iter(100)).unwrap();
        assert_eq!(rec.network, dir.path().join("models/net_g_100.json"));
        assert_eq!(rec.state, dir.path().join("training_states/100.state"));
        verify_recorded_network(&rec.network).unwrap();
        assert_eq!(load_network(&rec.network).unwrap(), weights);
        assert_eq!(ResumeState::load(&rec.state).unwrap(), state(100));

        mgr.save(&weights, &state(200), SaveTag::Latest).unwrap();
        mgr.save(&weights, &state(300), SaveTag::Latest).unwrap();
        let tags: Vec<_> = mgr.list().unwrap().into_iter().map(|r| (r.tag, r.iter)).collect();
        assert_eq!(tags, vec![("100".to_string(), 100), ("latest".to_string(), 300)]);
    }

    #[test]
    fn test_verify_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path().join("m"), dir.path().join("s"));
        let weights = UpsampleAffine::new(1, 1).unwrap().to_weights(None);
        let rec = mgr.save(&weights, &state(1), SaveTag::Iter(1)).unwrap();
        std::fs::write(&rec.network, "{}").unwrap();
        assert!(matches!(verify_recorded_network(&rec.network), Err(MlError::Model(_))));
    }

    #[test]
    fn test_verify_accepts_unlisted_network() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net_g_external.json");
        std::fs::write(&path, "{}").unwrap();
        verify_recorded_network(&path).unwrap();
    }

    #[test]
    fn test_load_missing_network() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_network(&dir.path().join("net_g_1.json")),
            Err(MlError::NotFound(_))
        ));
    }
}
