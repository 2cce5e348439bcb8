//! Resume-state discovery.
//!
//! Checkpoints are written as `<iter>.state` files in an experiment's
//! `training_states/` directory. With auto-resume the numerically largest
//! one wins; otherwise an explicit `path.resume_state` is honoured.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{CoreError, ResumeError};
use crate::options::TrainOptions;

/// Suffix of training-state files.
pub const STATE_SUFFIX: &str = "state";

/// Counters and optimizer/scheduler state saved by a previous run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeState {
    pub epoch: usize,
    pub iter: u64,
    #[serde(default)]
    pub optimizers: Vec<serde_json::Value>,
    #[serde(default)]
    pub schedulers: Vec<serde_json::Value>,
}

impl ResumeState {
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        match crate::persistence::load_json(path) {
            Ok(Some(state)) => Ok(state),
            Ok(None) => Err(ResumeError::NotFound {
                path: path.to_path_buf(),
            }
            .into()),
            Err(CoreError::Serialization(e)) => Err(ResumeError::Corrupt {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
            .into()),
            Err(e) => Err(e),
        }
    }
}

/// Numeric prefix of a `<n>.state` file name.
fn state_number(file_name: &str) -> Option<f64> {
    let stem = file_name.strip_suffix(STATE_SUFFIX)?.strip_suffix('.')?;
    stem.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// The `<n>.state` file with the largest `n` directly inside `dir`.
///
/// Files whose prefix is not a number (`latest.state`) are ignored.
pub fn latest_state_file(dir: &Path) -> Option<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let n = state_number(&e.file_name().to_string_lossy())?;
            Some((n, e.into_path()))
        })
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, path)| path)
}

/// Training-states directory scanned by auto-resume.
pub fn auto_resume_dir(opts: &TrainOptions) -> PathBuf {
    opts.root_path
        .join("experiments")
        .join(&opts.name)
        .join("training_states")
}

/// Models directory that belongs to a state file (`<root>/training_states/<n>.state`).
pub fn models_dir_for_state(state_path: &Path) -> Option<PathBuf> {
    Some(state_path.parent()?.parent()?.join("models"))
}

/// What resuming changed in the options.
///
/// Resume state is located before the run log exists, so the messages are
/// kept here and emitted by [`ResumeNotes::log`] once logging is up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResumeNotes {
    /// Pretrained network the resume overrides.
    pub ignored_pretrain: Option<PathBuf>,
    /// Network the resumed run loads.
    pub network_g: Option<PathBuf>,
}

impl ResumeNotes {
    pub fn log(&self) {
        if self.ignored_pretrain.is_some() {
            warn!("pretrain_network path will be ignored during resuming.");
        }
        if let Some(network) = &self.network_g {
            info!("Set pretrain_network_g to {}", network.display());
        }
    }
}

/// A loaded resume state and the option changes it caused.
#[derive(Debug, Clone, PartialEq)]
pub struct Resumed {
    pub state: ResumeState,
    pub path: PathBuf,
    pub notes: ResumeNotes,
}

/// Locate and load the resume state, recording its path in `opts.path.resume_state`.
pub fn load_resume_state(opts: &mut TrainOptions) -> Result<Option<Resumed>, CoreError> {
    let resume_path = if opts.auto_resume {
        let dir = auto_resume_dir(opts);
        let found = if dir.is_dir() {
            latest_state_file(&dir)
        } else {
            None
        };
        if let Some(path) = &found {
            opts.path.resume_state = Some(path.clone());
        }
        found
    } else {
        opts.path.resume_state.clone()
    };

    let Some(path) = resume_path else {
        return Ok(None);
    };
    let state = ResumeState::load(&path)?;
    let notes = check_resume(opts, &path, state.iter);
    Ok(Some(Resumed { state, path, notes }))
}

/// Point `pretrain_network_g` at the network saved alongside the resume state.
pub fn check_resume(opts: &mut TrainOptions, state_path: &Path, resume_iter: u64) -> ResumeNotes {
    let mut notes = ResumeNotes {
        ignored_pretrain: opts.path.pretrain_network_g.clone(),
        network_g: None,
    };
    if opts
        .path
        .ignore_resume_networks
        .iter()
        .any(|n| n == "network_g")
    {
        return notes;
    }
    let models = models_dir_for_state(state_path)
        .or_else(|| opts.path.models.clone())
        .unwrap_or_else(|| PathBuf::from("models"));
    let network = models.join(format!("net_g_{resume_iter}.json"));
    opts.path.pretrain_network_g = Some(network.clone());
    notes.network_g = Some(network);
    notes
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), "{}").unwrap();
    }

    #[test]
    fn test_state_number() {
        assert_eq!(state_number("1000.state"), Some(1000.0));
        assert_eq!(state_number("latest.state"), None);
        assert_eq!(state_number("1000.pth"), None);
        assert_eq!(state_number("1000state"), None);
    }

    #[test]
    fn test_latest_state_is_numeric_max() {
        let dir = TempDir::new().unwrap();
        for name in ["5000.state", "10000.state", "900.state", "latest.state", "20000.pth"] {
            touch(dir.path(), name);
        }
        std::fs::create_dir(dir.path().join("99999.state.d")).unwrap();
        assert_eq!(
            latest_state_file(dir.path()),
            Some(dir.path().join("10000.state"))
        );
    }

    #[test]
    fn test_latest_state_empty_dir() {
        let dir = TempDir::new().unwrap();
        assert_eq!(latest_state_file(dir.path()), None);
    }

    #[test]
    fn test_latest_state_ignores_nested() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "10.state");
        let nested = dir.path().join("old");
        std::fs::create_dir(&nested).unwrap();
        touch(&nested, "500.state");
        assert_eq!(latest_state_file(dir.path()), Some(dir.path().join("10.state")));
    }

    #[test]
    fn test_models_dir_for_state() {
        assert_eq!(
            models_dir_for_state(Path::new("/exp/run/training_states/100.state")),
            Some(PathBuf::from("/exp/run/models"))
        );
    }

    fn options(root: &Path, extra_path: &str) -> TrainOptions {
        let text = format!(
            "name: resumable\nnum_gpu: 0\ndatasets: {{}}\npath:\n{extra_path}  strict_load_g: true\ntrain:\n  total_iter: 10\nlogger:\n  print_freq: 1\n  save_checkpoint_freq: 1\n"
        );
        let args = crate::options::ParseArgs {
            opt: text,
            auto_resume: true,
            ..Default::default()
        };
        crate::options::parse_options(&args, root, true).unwrap()
    }

    #[test]
    fn test_auto_resume_without_states_is_none() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(dir.path(), "");
        assert_eq!(load_resume_state(&mut opts).unwrap(), None);
        assert_eq!(opts.path.resume_state, None);
    }

    #[test]
    fn test_auto_resume_reports_overridden_pretrain() {
        let dir = TempDir::new().unwrap();
        let states = dir.path().join("experiments/resumable/training_states");
        std::fs::create_dir_all(&states).unwrap();
        let state = ResumeState {
            epoch: 2,
            iter: 40,
            optimizers: vec![],
            schedulers: vec![],
        };
        std::fs::write(states.join("40.state"), serde_json::to_string(&state).unwrap()).unwrap();

        let mut opts = options(dir.path(), "  pretrain_network_g: old/net_g.json\n");
        let resumed = load_resume_state(&mut opts).unwrap().unwrap();
        let network = dir.path().join("experiments/resumable/models/net_g_40.json");

        assert_eq!(resumed.state, state);
        assert_eq!(resumed.path, states.join("40.state"));
        assert_eq!(
            resumed.notes,
            ResumeNotes {
                ignored_pretrain: Some(PathBuf::from("old/net_g.json")),
                network_g: Some(network.clone()),
            }
        );
        assert_eq!(opts.path.pretrain_network_g, Some(network));
    }

    #[test]
    fn test_resume_state_load_errors() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("1.state");
        assert!(matches!(
            ResumeState::load(&missing),
            Err(CoreError::Resume(ResumeError::NotFound { .. }))
        ));
        std::fs::write(&missing, "garbage").unwrap();
        assert!(matches!(
            ResumeState::load(&missing),
            Err(CoreError::Resume(ResumeError::Corrupt { .. }))
        ));
    }
}
