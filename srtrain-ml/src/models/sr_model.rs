//! Single-image super-resolution model.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use srtrain_core::options::{MetricOptions, TrainOptions};
use srtrain_core::resume::ResumeState;
use tracing::info;

use super::checkpoint::{CheckpointManager, SaveTag, load_network, verify_recorded_network};
use super::loss::PixelLoss;
use super::lr_scheduler::LrScheduler;
use super::metrics::{BestMetric, Better, calculate_metric};
use super::network::{NET_TYPE, UpsampleAffine};
use super::optim::Optimizer;
use super::TrainableModel;
use crate::data::{Batch, DataLoader, Image, netpbm};
use crate::error::MlError;
use crate::training::event_log::EventLog;

/// Exponential moving average of the generator weights.
#[derive(Debug, Clone)]
struct Ema {
    decay: f64,
    params: Vec<f32>,
}

impl Ema {
    fn update(&mut self, params: &[f32]) {
        let d = self.decay as f32;
        for (e, p) in self.params.iter_mut().zip(params) {
            *e = d * *e + (1.0 - d) * p;
        }
    }
}

#[derive(Debug)]
pub struct SrModel {
    rank: usize,
    is_train: bool,
    net_g: UpsampleAffine,
    ema: Option<Ema>,
    pixel_loss: PixelLoss,
    optimizer: Optimizer,
    schedulers: Vec<LrScheduler>,
    checkpoints: Option<CheckpointManager>,
    visualization: Option<PathBuf>,
    metrics: Vec<(String, MetricOptions)>,
    batch: Option<Batch>,
    current_iter: u64,
    log: Vec<(String, f64)>,
    metric_results: Vec<(String, f64)>,
    best_metric_results: HashMap<String, Vec<(String, BestMetric)>>,
}

impl SrModel {
    pub fn new(opts: &TrainOptions) -> Result<Self, MlError> {
        let mut net_g = UpsampleAffine::from_options(&opts.network_g, opts.scale)?;
        info!(
            "Network [{NET_TYPE}] is created with {} parameters.",
            net_g.num_params()
        );

        let mut ema = opts
            .train
            .ema_decay
            .filter(|d| *d > 0.0)
            .map(|decay| Ema {
                decay,
                params: net_g.params(),
            });
        if let Some(ema) = &ema {
            info!("Use Exponential Moving Average with decay: {}", ema.decay);
        }

        if let Some(path) = &opts.path.pretrain_network_g {
            info!("Loading {NET_TYPE} model from {}", path.display());
            let weights = load_network(path)?;
            verify_recorded_network(path)?;
            net_g.load_weights(&weights, opts.path.strict_load_g)?;
            if let Some(ema) = &mut ema {
                ema.params = match &weights.params_ema {
                    Some(p) if p.len() == ema.params.len() => p.clone(),
                    _ => net_g.params(),
                };
            }
        }

        let pixel_loss = opts
            .train
            .pixel_opt
            .as_ref()
            .ok_or_else(|| MlError::config("Both pixel and perceptual losses are None."))
            .and_then(PixelLoss::from_options)?;
        let optim_opts = opts
            .train
            .optim_g
            .as_ref()
            .ok_or_else(|| MlError::config("train.optim_g is required"))?;
        let optimizer = Optimizer::from_options(optim_opts, net_g.num_params())?;
        let schedulers = opts
            .train
            .scheduler
            .as_ref()
            .map(LrScheduler::from_options)
            .transpose()?
            .into_iter()
            .collect();

        let checkpoints = match (&opts.path.models, &opts.path.training_states) {
            (Some(models), Some(states)) => Some(CheckpointManager::new(models, states)),
            _ => None,
        };

        Ok(Self {
            rank: opts.rank,
            is_train: opts.is_train,
            net_g,
            ema,
            pixel_loss,
            optimizer,
            schedulers,
            checkpoints,
            visualization: opts.path.visualization.clone(),
            metrics: opts
                .val
                .as_ref()
                .map(|v| v.metrics.clone())
                .unwrap_or_default(),
            batch: None,
            current_iter: 0,
            log: Vec::new(),
            metric_results: Vec::new(),
            best_metric_results: HashMap::new(),
        })
    }

    /// Inference with the EMA weights when they exist.
    fn test(&self, lq: &Image) -> Result<Image, MlError> {
        match &self.ema {
            Some(ema) => {
                let mut net = self.net_g.clone();
                net.set_params(&ema.params)?;
                net.forward(lq)
            }
            None => self.net_g.forward(lq),
        }
    }

    fn init_best_metric_results(&mut self, dataset: &str) -> Result<(), MlError> {
        if self.best_metric_results.contains_key(dataset) {
            return Ok(());
        }
        let entries = self
            .metrics
            .iter()
            .map(|(name, m)| Ok((name.clone(), BestMetric::new(Better::parse(m.better.as_deref())?))))
            .collect::<Result<Vec<_>, MlError>>()?;
        self.best_metric_results.insert(dataset.to_string(), entries);
        Ok(())
    }

    fn update_best_metric_result(&mut self, dataset: &str, metric: &str, val: f64, iter: u64) {
        if let Some(entry) = self
            .best_metric_results
            .get_mut(dataset)
            .and_then(|m| m.iter_mut().find(|(name, _)| name == metric))
        {
            entry.1.update(val, iter);
        }
    }

    fn log_validation_metric_values(
        &self,
        current_iter: u64,
        dataset: &str,
        event_log: Option<&mut EventLog>,
    ) {
        let best = self.best_metric_results.get(dataset);
        let mut log_str = format!("Validation {dataset}\n");
        for (metric, value) in &self.metric_results {
            log_str.push_str(&format!("\t # {metric}: {value:.4}"));
            if let Some((_, b)) = best.and_then(|m| m.iter().find(|(n, _)| n == metric)) {
                log_str.push_str(&format!("\tBest: {:.4} @ {} iter", b.val, b.iter));
            }
            log_str.push('\n');
        }
        info!("{log_str}");
        if let Some(events) = event_log {
            for (metric, value) in &self.metric_results {
                events.add_scalar(&format!("metrics/{dataset}/{metric}"), *value, current_iter);
            }
        }
    }

    fn save_image(&self, dataset: &str, lq_path: &Path, img: &Image, iter: u64) -> Result<(), MlError> {
        let Some(root) = &self.visualization else {
            return Ok(());
        };
        let img_name = lq_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let file = if self.is_train {
            format!("{img_name}_{iter}.ppm")
        } else {
            format!("{img_name}_{dataset}.ppm")
        };
        netpbm::write(&root.join(dataset).join(file), img)
    }
}

impl TrainableModel for SrModel {
    fn feed_data(&mut self, batch: &Batch) -> Result<(), MlError> {
        if batch.is_empty() {
            return Err(MlError::training("empty batch"));
        }
        self.batch = Some(batch.clone());
        Ok(())
    }

    fn optimize_parameters(&mut self, current_iter: u64) -> Result<(), MlError> {
        let batch = self
            .batch
            .as_ref()
            .ok_or_else(|| MlError::training("optimize_parameters called before feed_data"))?;

        let mut grads = vec![0.0f32; self.net_g.num_params()];
        let mut l_pix = 0.0;
        for sample in &batch.samples {
            let gt = sample
                .gt
                .as_ref()
                .ok_or_else(|| MlError::training("training samples need a GT image"))?;
            let output = self.net_g.forward(&sample.lq)?;
            let (loss, grad_out) = self.pixel_loss.forward(&output, gt)?;
            let g = self.net_g.backward(&sample.lq, &grad_out)?;
            for (acc, v) in grads.iter_mut().zip(g) {
                *acc += v;
            }
            l_pix += loss;
        }
        let n = batch.len() as f32;
        grads.iter_mut().for_each(|g| *g /= n);

        let mut params = self.net_g.params();
        self.optimizer.step(&mut params, &grads)?;
        self.net_g.set_params(&params)?;
        if let Some(ema) = &mut self.ema {
            ema.update(&params);
        }

        self.current_iter = current_iter;
        self.log = vec![("l_pix".to_string(), l_pix / batch.len() as f64)];
        Ok(())
    }

    fn update_learning_rate(&mut self, current_iter: u64, warmup_iter: i64) {
        if current_iter > 1 {
            for scheduler in &mut self.schedulers {
                scheduler.step(&mut self.optimizer);
            }
        }
        if (current_iter as i64) < warmup_iter {
            self.optimizer.lr = self.optimizer.initial_lr * current_iter as f64 / warmup_iter as f64;
        }
    }

    fn current_learning_rate(&self) -> Vec<f64> {
        vec![self.optimizer.lr]
    }

    fn current_log(&self) -> Vec<(String, f64)> {
        self.log.clone()
    }

    fn save(&mut self, epoch: usize, tag: SaveTag) -> Result<(), MlError> {
        if self.rank != 0 {
            return Ok(());
        }
        let checkpoints = self
            .checkpoints
            .as_ref()
            .ok_or_else(|| MlError::config("path.models and path.training_states must be set"))?;
        let iter = match tag {
            SaveTag::Iter(i) => i,
            SaveTag::Latest => self.current_iter,
        };
        let state = ResumeState {
            epoch,
            iter,
            optimizers: vec![self.optimizer.state()?],
            schedulers: self
                .schedulers
                .iter()
                .map(LrScheduler::state)
                .collect::<Result<_, _>>()?,
        };
        let weights = self
            .net_g
            .to_weights(self.ema.as_ref().map(|e| e.params.clone()));
        let record = checkpoints.save(&weights, &state, tag)?;
        info!("Saved checkpoint {} ({})", record.tag, record.network.display());
        Ok(())
    }

    fn validation(
        &mut self,
        loader: &DataLoader,
        current_iter: u64,
        event_log: Option<&mut EventLog>,
        save_img: bool,
    ) -> Result<(), MlError> {
        let dataset = loader.dataset().name().to_string();
        self.init_best_metric_results(&dataset)?;

        let mut sums = vec![0.0f64; self.metrics.len()];
        let mut count = 0usize;
        for batch in loader.iter() {
            for sample in batch?.samples {
                let mut output = self.test(&sample.lq)?;
                output.clamp01();
                if save_img {
                    self.save_image(&dataset, &sample.lq_path, &output, current_iter)?;
                }
                if let Some(gt) = &sample.gt {
                    for (sum, (_, m)) in sums.iter_mut().zip(&self.metrics) {
                        *sum += calculate_metric(m, &output, gt)?;
                    }
                }
                count += 1;
            }
        }

        if self.metrics.is_empty() {
            self.metric_results.clear();
            return Ok(());
        }
        let n = count.max(1) as f64;
        self.metric_results = self
            .metrics
            .iter()
            .zip(sums)
            .map(|((name, _), sum)| (name.clone(), sum / n))
            .collect();
        for (metric, value) in self.metric_results.clone() {
            self.update_best_metric_result(&dataset, &metric, value, current_iter);
        }
        self.log_validation_metric_values(current_iter, &dataset, event_log);
        Ok(())
    }

    fn metric_results(&self) -> Vec<(String, f64)> {
        self.metric_results.clone()
    }

    fn best_metric_results(&self, dataset: &str) -> Option<Vec<(String, BestMetric)>> {
        self.best_metric_results.get(dataset).cloned()
    }

    fn resume_training(&mut self, state: &ResumeState) -> Result<(), MlError> {
        if state.optimizers.len() != 1 {
            return Err(MlError::training("Wrong lengths of optimizers"));
        }
        if state.schedulers.len() != self.schedulers.len() {
            return Err(MlError::training("Wrong lengths of schedulers"));
        }
        self.optimizer.load_state(&state.optimizers[0])?;
        for (scheduler, s) in self.schedulers.iter_mut().zip(&state.schedulers) {
            scheduler.load_state(s)?;
        }
        self.current_iter = state.iter;
        Ok(())
    }
}
