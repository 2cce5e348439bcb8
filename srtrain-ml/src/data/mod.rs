//! Datasets, sampling and batch loading.

pub mod image;
pub mod loader;
pub mod meta_info;
pub mod netpbm;
pub mod paired;
pub mod prefetch;
pub mod sampler;
pub mod synthetic;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_yaml::Value;
use srtrain_core::options::{DatasetOptions, TrainOptions};
use srtrain_core::OptionsError;
use srtrain_core::reproducibility::SeedManager;
use tracing::info;

pub use image::Image;
pub use loader::DataLoader;
pub use prefetch::{CpuPrefetcher, Prefetcher, QueuePrefetcher, build_prefetcher};
pub use sampler::EnlargedSampler;

use crate::error::MlError;

/// One LQ/GT training pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub lq: Image,
    pub gt: Option<Image>,
    pub lq_path: PathBuf,
    pub gt_path: Option<PathBuf>,
}

/// Samples collated into one step's input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub samples: Vec<Sample>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Random-access image-pair dataset.
pub trait Dataset: Send + Sync {
    fn name(&self) -> &str;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Result<Sample, MlError>;
}

pub(crate) fn extra_usize(opts: &DatasetOptions, key: &str, default: usize) -> Result<usize, MlError> {
    match opts.extra.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| MlError::config(format!("{}: {key} must be a non-negative integer", opts.name))),
    }
}

pub(crate) fn extra_bool(opts: &DatasetOptions, key: &str, default: bool) -> Result<bool, MlError> {
    match opts.extra.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| MlError::config(format!("{}: {key} must be a boolean", opts.name))),
    }
}

pub(crate) fn require_scale(opts: &DatasetOptions) -> Result<usize, MlError> {
    match opts.scale {
        Some(s) if s > 0 => Ok(s as usize),
        _ => Err(MlError::config(format!("{}: scale must be set", opts.name))),
    }
}

/// Constructor for one dataset `type`.
pub type DatasetBuilder = fn(&DatasetOptions, u64) -> Result<Arc<dyn Dataset>, MlError>;

/// Dataset constructors keyed by the `type` field of a dataset section.
pub struct DatasetRegistry {
    builders: HashMap<String, DatasetBuilder>,
}

impl Default for DatasetRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("SyntheticPairedDataset", build_synthetic);
        registry.register("PairedImageDataset", build_paired);
        registry
    }
}

fn build_synthetic(opts: &DatasetOptions, seed: u64) -> Result<Arc<dyn Dataset>, MlError> {
    Ok(Arc::new(synthetic::SyntheticPairedDataset::from_options(opts, seed)?))
}

fn build_paired(opts: &DatasetOptions, seed: u64) -> Result<Arc<dyn Dataset>, MlError> {
    Ok(Arc::new(paired::PairedImageDataset::from_options(opts, seed)?))
}

impl DatasetRegistry {
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    pub fn register(&mut self, type_name: &str, builder: DatasetBuilder) {
        self.builders.insert(type_name.to_string(), builder);
    }

    pub fn build_dataset(&self, opts: &DatasetOptions, seed: u64) -> Result<Arc<dyn Dataset>, MlError> {
        let builder = self
            .builders
            .get(&opts.dataset_type)
            .ok_or_else(|| MlError::config(format!("Dataset type {} is not registered.", opts.dataset_type)))?;
        let dataset = builder(opts, seed)?;
        info!("Dataset [{}] - {} is built.", opts.dataset_type, opts.name);
        Ok(dataset)
    }
}

/// Training loader plus every validation loader of a run.
#[derive(Debug)]
pub struct TrainValLoaders {
    pub train: DataLoader,
    pub train_options: DatasetOptions,
    pub val: Vec<(String, DataLoader)>,
    pub num_iter_per_epoch: usize,
    pub total_epochs: usize,
    pub total_iters: u64,
}

/// Build the `train` loader and every `val*` loader from the options.
pub fn create_train_val_dataloader(
    opts: &TrainOptions,
    registry: &DatasetRegistry,
) -> Result<TrainValLoaders, MlError> {
    let mut train = None;
    let mut val = Vec::new();
    // train shards draw rank-offset streams; validation data is identical on every rank
    let mut train_seeds = SeedManager::new(opts.seed(), opts.rank);
    let mut val_seeds = SeedManager::new(opts.seed(), 0);

    for (_, dataset_opt) in &opts.datasets {
        match dataset_opt.phase.as_str() {
            "train" => {
                let ratio = dataset_opt.dataset_enlarge_ratio;
                let batch_size = dataset_opt
                    .batch_size_per_gpu
                    .ok_or_else(|| OptionsError::missing("datasets.train.batch_size_per_gpu"))?;
                let seed = train_seeds.seed_for(&dataset_opt.name);
                let dataset = registry.build_dataset(dataset_opt, seed)?;
                let sampler =
                    EnlargedSampler::new(dataset.len(), opts.world_size, opts.rank, ratio)?;
                let loader = DataLoader::train(Arc::clone(&dataset), batch_size, sampler)?;

                // the train loader drops the last partial batch, so an epoch
                // yields exactly `loader.len()` iterations
                let num_iter_per_epoch = loader.len();
                if num_iter_per_epoch == 0 {
                    return Err(MlError::dataset(format!(
                        "training dataset {} yields no full batch of {batch_size}",
                        dataset_opt.name
                    )));
                }
                let total_iters = opts.train.total_iter;
                let total_epochs = total_iters.div_ceil(num_iter_per_epoch as u64) as usize;
                info!(
                    "Training statistics:\n\tNumber of train images: {}\n\tDataset enlarge ratio: {}\n\tBatch size per gpu: {}\n\tWorld size (gpu number): {}\n\tRequire iter number per epoch: {}\n\tTotal epochs: {}; iters: {}.",
                    dataset.len(),
                    ratio,
                    batch_size,
                    opts.world_size,
                    num_iter_per_epoch,
                    total_epochs,
                    total_iters
                );
                train = Some(TrainValLoaders {
                    train: loader,
                    train_options: dataset_opt.clone(),
                    val: Vec::new(),
                    num_iter_per_epoch,
                    total_epochs,
                    total_iters,
                });
            }
            "val" => {
                let dataset = registry.build_dataset(dataset_opt, val_seeds.seed_for(&dataset_opt.name))?;
                info!(
                    "Number of val images/folders in {}: {}",
                    dataset_opt.name,
                    dataset.len()
                );
                val.push((dataset_opt.name.clone(), DataLoader::val(dataset)));
            }
            other => {
                return Err(OptionsError::UnknownPhase {
                    phase: other.to_string(),
                }
                .into());
            }
        }
    }

    let mut loaders =
        train.ok_or_else(|| MlError::config("datasets must contain a train phase"))?;
    loaders.val = val;
    Ok(loaders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use srtrain_core::options::{ParseArgs, parse_options};
    use std::path::Path;

    const OPTS: &str = r#"
name: loaders
scale: 2
num_gpu: 1
manual_seed: 3
datasets:
  train:
    name: syn
    type: SyntheticPairedDataset
    num_images: 10
    gt_size: 8
    batch_size_per_gpu: 4
    dataset_enlarge_ratio: 3
  val:
    name: syn_val
    type: SyntheticPairedDataset
    num_images: 2
    gt_size: 8
path: {}
train:
  total_iter: 100
logger:
  print_freq: 10
  save_checkpoint_freq: 50
"#;

    fn parse(text: &str) -> TrainOptions {
        let args = ParseArgs {
            opt: text.to_string(),
            ..Default::default()
        };
        parse_options(&args, Path::new("/tmp/srtrain"), true).unwrap()
    }

    #[test]
    fn test_epoch_arithmetic() {
        let loaders = create_train_val_dataloader(&parse(OPTS), &DatasetRegistry::default()).unwrap();
        // 10 * 3 = 30 samples, 7 full batches of 4, ceil(100 / 7) = 15 epochs
        assert_eq!(loaders.num_iter_per_epoch, 7);
        assert_eq!(loaders.num_iter_per_epoch, loaders.train.len());
        assert_eq!(loaders.total_epochs, 15);
        assert_eq!(loaders.total_iters, 100);
        assert_eq!(loaders.val.len(), 1);
        assert_eq!(loaders.val[0].0, "syn_val");
    }

    #[test]
    fn test_epochs_cover_total_iter_when_batch_does_not_divide() {
        let text = OPTS
            .replace("num_images: 10", "num_images: 5")
            .replace("batch_size_per_gpu: 4", "batch_size_per_gpu: 2")
            .replace("dataset_enlarge_ratio: 3", "dataset_enlarge_ratio: 1")
            .replace("total_iter: 100", "total_iter: 9");
        let mut loaders = create_train_val_dataloader(&parse(&text), &DatasetRegistry::default()).unwrap();
        assert_eq!(loaders.num_iter_per_epoch, 2);
        assert_eq!(loaders.total_epochs, 5);

        let mut batches = 0;
        for epoch in 0..loaders.total_epochs {
            loaders.train.set_epoch(epoch);
            batches += loaders.train.iter().count();
        }
        assert!(batches as u64 >= loaders.total_iters);
    }

    #[test]
    fn test_batch_larger_than_epoch_is_rejected() {
        let text = OPTS
            .replace("batch_size_per_gpu: 4", "batch_size_per_gpu: 64");
        let err = create_train_val_dataloader(&parse(&text), &DatasetRegistry::default()).unwrap_err();
        assert!(matches!(err, MlError::Dataset(_)));
    }

    #[test]
    fn test_unknown_phase() {
        let text = OPTS.replace("  val:\n", "  test:\n");
        let err = create_train_val_dataloader(&parse(&text), &DatasetRegistry::default()).unwrap_err();
        assert!(matches!(err, MlError::Options(OptionsError::UnknownPhase { ref phase }) if phase == "test"));
    }

    #[test]
    fn test_unregistered_type() {
        let text = OPTS.replace("type: SyntheticPairedDataset\n    num_images: 10", "type: Lmdb\n    num_images: 10");
        let err = create_train_val_dataloader(&parse(&text), &DatasetRegistry::default()).unwrap_err();
        assert!(matches!(err, MlError::Config(_)));
    }

    #[test]
    fn test_extra_helpers() {
        let mut opts = DatasetOptions::default();
        opts.extra.insert(Value::from("gt_size"), Value::from(16));
        opts.extra.insert(Value::from("use_hflip"), Value::from("yes"));
        assert_eq!(extra_usize(&opts, "gt_size", 0).unwrap(), 16);
        assert_eq!(extra_usize(&opts, "missing", 7).unwrap(), 7);
        assert!(extra_bool(&opts, "use_hflip", false).is_err());
        assert!(require_scale(&opts).is_err());
    }
}
