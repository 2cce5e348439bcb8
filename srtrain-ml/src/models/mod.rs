//! Trainable models and their building blocks.

pub mod checkpoint;
pub mod loss;
pub mod lr_scheduler;
pub mod metrics;
pub mod network;
pub mod optim;
pub mod sr_model;

use std::collections::HashMap;

use srtrain_core::options::TrainOptions;
use srtrain_core::resume::ResumeState;
use tracing::info;

pub use checkpoint::{CheckpointManager, SaveTag};
pub use metrics::BestMetric;
pub use sr_model::SrModel;

use crate::data::{Batch, DataLoader};
use crate::error::MlError;
use crate::training::event_log::EventLog;

/// What the training loop drives.
pub trait TrainableModel {
    fn feed_data(&mut self, batch: &Batch) -> Result<(), MlError>;

    fn optimize_parameters(&mut self, current_iter: u64) -> Result<(), MlError>;

    /// Step schedulers (after the first iteration) and apply linear warmup
    /// while `current_iter < warmup_iter`.
    fn update_learning_rate(&mut self, current_iter: u64, warmup_iter: i64);

    /// Current rate of every parameter group.
    fn current_learning_rate(&self) -> Vec<f64>;

    /// Losses of the last optimize step.
    fn current_log(&self) -> Vec<(String, f64)>;

    fn save(&mut self, epoch: usize, tag: SaveTag) -> Result<(), MlError>;

    fn validation(
        &mut self,
        loader: &DataLoader,
        current_iter: u64,
        event_log: Option<&mut EventLog>,
        save_img: bool,
    ) -> Result<(), MlError>;

    /// Metric averages of the most recent validation run.
    fn metric_results(&self) -> Vec<(String, f64)>;

    fn best_metric_results(&self, dataset: &str) -> Option<Vec<(String, BestMetric)>>;

    /// Restore optimizer and scheduler state.
    fn resume_training(&mut self, state: &ResumeState) -> Result<(), MlError>;
}

/// Constructor for one `model_type`.
pub type ModelBuilder = fn(&TrainOptions) -> Result<Box<dyn TrainableModel>, MlError>;

pub struct ModelRegistry {
    builders: HashMap<String, ModelBuilder>,
}

fn build_sr_model(opts: &TrainOptions) -> Result<Box<dyn TrainableModel>, MlError> {
    Ok(Box::new(SrModel::new(opts)?))
}

impl Default for ModelRegistry {
    fn default() -> Self {
        let mut registry = Self {
            builders: HashMap::new(),
        };
        registry.register("SRModel", build_sr_model);
        registry
    }
}

impl ModelRegistry {
    pub fn register(&mut self, model_type: &str, builder: ModelBuilder) {
        self.builders.insert(model_type.to_string(), builder);
    }

    pub fn build_model(&self, opts: &TrainOptions) -> Result<Box<dyn TrainableModel>, MlError> {
        let builder = self
            .builders
            .get(&opts.model_type)
            .ok_or_else(|| MlError::config(format!("Model {} is not registered.", opts.model_type)))?;
        let model = builder(opts)?;
        info!("Model [{}] is created.", opts.model_type);
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use srtrain_core::options::{ParseArgs, parse_options};

    fn options(model_type: &str) -> TrainOptions {
        let text = format!(
            "name: reg\nmodel_type: {model_type}\nscale: 2\nnum_gpu: 0\nmanual_seed: 1\ndatasets: {{}}\npath: {{}}\ntrain:\n  total_iter: 4\n  optim_g:\n    type: Adam\n    lr: 0.001\n  pixel_opt:\n    type: MSELoss\nlogger:\n  print_freq: 1\n  save_checkpoint_freq: 2\n"
        );
        let args = ParseArgs {
            opt: text,
            ..Default::default()
        };
        parse_options(&args, std::path::Path::new("/tmp/srtrain-reg"), true).unwrap()
    }

    #[test]
    fn test_builds_registered_model() {
        let model = ModelRegistry::default().build_model(&options("SRModel")).unwrap();
        assert_eq!(model.current_learning_rate(), vec![0.001]);
        assert!(model.current_log().is_empty());
    }

    #[test]
    fn test_unregistered_model_type() {
        let err = ModelRegistry::default().build_model(&options("GANModel")).err().unwrap();
        assert!(err.to_string().contains("GANModel"));
    }
}
