//! # srtrain-ml: datasets, models and the training loop
//!
//! Builds loaders and a model from parsed options, then drives an
//! iteration-based training loop with periodic logging, checkpointing,
//! validation and experiment tracking.
//!
//! ## Layout
//! - [`data`]: paired LQ/GT datasets, the enlarged sampler, loaders and prefetchers
//! - [`models`]: the [`models::TrainableModel`] trait and the reference SR model
//! - [`training`]: the loop, message logger, event log and tracking session

pub mod data;
pub mod error;
pub mod models;
pub mod training;

pub use data::{DatasetRegistry, create_train_val_dataloader};
pub use error::MlError;
pub use models::{ModelRegistry, TrainableModel};
pub use training::{TrainArgs, train_pipeline};
