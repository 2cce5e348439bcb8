//! # srtrain-core: options, experiment layout and resume discovery
//!
//! Everything a training run needs before the first batch is drawn:
//! YAML option loading with `--force_yml` overrides, launcher rank/world
//! size, versioned experiment directories, resume-state lookup, atomic
//! persistence helpers, logging and reproducibility snapshots.

pub mod dist;
pub mod error;
pub mod experiment;
pub mod logging;
pub mod options;
pub mod persistence;
pub mod reproducibility;
pub mod resume;

pub use dist::{DistInfo, Launcher};
pub use error::{CoreError, OptionsError, ResumeError};
pub use experiment::ExperimentPaths;
pub use options::{ParseArgs, TrainOptions, parse_options};
pub use resume::{ResumeNotes, ResumeState, Resumed, load_resume_state};
