//! The iteration-driven training loop.
//!
//! Epochs are only a pacing device: every epoch boundary reseeds the
//! sampler and restarts the prefetcher, while stopping, logging, saving and
//! validation are all keyed on the global iteration counter.

use std::time::Instant;

use srtrain_core::options::TrainOptions;
use srtrain_core::resume::ResumeState;
use tracing::{info, warn};

use super::event_log::EventLog;
use super::message_logger::{LogRecord, MessageLogger, format_duration};
use super::timer::AvgTimer;
use super::tracking::TrackingSession;
use crate::data::DataLoader;
use crate::data::prefetch::Prefetcher;
use crate::error::MlError;
use crate::models::{BestMetric, SaveTag, TrainableModel};

/// Counters and frequencies for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    pub start_epoch: usize,
    pub start_iter: u64,
    pub total_epochs: usize,
    pub total_iters: u64,
    pub warmup_iter: i64,
    pub print_freq: u64,
    pub save_checkpoint_freq: u64,
    /// `(val_freq, save_img)` when validation is configured.
    pub val: Option<(u64, bool)>,
}

impl LoopConfig {
    pub fn from_options(opts: &TrainOptions, total_epochs: usize, resume: Option<&ResumeState>) -> Self {
        let (start_epoch, start_iter) = resume.map_or((0, 0), |s| (s.epoch, s.iter));
        Self {
            start_epoch,
            start_iter,
            total_epochs,
            total_iters: opts.train.total_iter,
            warmup_iter: opts.train.warmup_iter,
            print_freq: opts.logger.print_freq,
            save_checkpoint_freq: opts.logger.save_checkpoint_freq,
            val: opts.val.as_ref().map(|v| (v.val_freq, v.save_img)),
        }
    }
}

/// Optional outputs of a run besides the text log.
#[derive(Debug, Default)]
pub struct Sinks {
    pub event_log: Option<EventLog>,
    pub tracking: Option<TrackingSession>,
}

impl Sinks {
    pub fn close(self) -> Result<(), MlError> {
        if let Some(events) = self.event_log {
            events.close();
        }
        if let Some(tracking) = self.tracking {
            tracking.finish()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopOutcome {
    pub epochs_started: usize,
    pub optimize_steps: u64,
    pub final_iter: u64,
}

/// True on every `freq`-th iteration.
pub fn every(freq: u64, iter: u64) -> bool {
    freq > 0 && iter % freq == 0
}

/// One tracking row: the print-interval part (`iter`, first learning rate,
/// model log) followed by the validation part (`<metric>`, `best_<metric>`).
pub fn wandb_record(
    print: Option<(u64, f64, &[(String, f64)])>,
    validation: Option<(&[(String, f64)], &[(String, BestMetric)])>,
) -> Vec<(String, f64)> {
    let mut row = Vec::new();
    if let Some((iter, lr, log)) = print {
        row.push(("iter".to_string(), iter as f64));
        row.push(("lrs".to_string(), lr));
        row.extend(log.iter().cloned());
    }
    if let Some((results, best)) = validation {
        for (metric, value) in results {
            row.push((metric.clone(), *value));
            if let Some((_, b)) = best.iter().find(|(name, _)| name == metric) {
                row.push((format!("best_{metric}"), b.val));
            }
        }
    }
    row
}

#[derive(Debug, Clone)]
pub struct TrainLoop {
    config: LoopConfig,
}

impl TrainLoop {
    pub fn new(config: LoopConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    fn validate_all(
        &self,
        model: &mut dyn TrainableModel,
        val_loaders: &[(String, DataLoader)],
        current_iter: u64,
        event_log: &mut Option<EventLog>,
        save_img: bool,
    ) -> Result<(), MlError> {
        if val_loaders.len() > 1 {
            warn!("Multiple validation datasets are *only* supported by SRModel.");
        }
        for (_, loader) in val_loaders {
            model.validation(loader, current_iter, event_log.as_mut(), save_img)?;
        }
        Ok(())
    }

    /// Drive `model` until `total_iters`, then save `latest` and run the
    /// final validation.
    pub fn run(
        &self,
        model: &mut dyn TrainableModel,
        prefetcher: &mut dyn Prefetcher,
        val_loaders: &[(String, DataLoader)],
        sinks: &mut Sinks,
        msg_logger: &mut MessageLogger,
    ) -> Result<LoopOutcome, MlError> {
        let cfg = &self.config;
        let mut outcome = LoopOutcome::default();
        let mut current_iter = cfg.start_iter;
        let mut last_epoch = cfg.start_epoch;
        let mut data_timer = AvgTimer::default();
        let mut iter_timer = AvgTimer::default();
        let start_time = Instant::now();

        info!("Start training from epoch: {}, iter: {current_iter}", cfg.start_epoch);

        'epochs: for epoch in cfg.start_epoch..=cfg.total_epochs {
            if current_iter >= cfg.total_iters {
                break;
            }
            prefetcher.set_epoch(epoch);
            prefetcher.reset()?;
            outcome.epochs_started += 1;
            last_epoch = epoch;
            data_timer.start();
            iter_timer.start();

            while let Some(batch) = prefetcher.next_batch()? {
                data_timer.record();
                if current_iter >= cfg.total_iters {
                    break 'epochs;
                }
                current_iter += 1;

                model.update_learning_rate(current_iter, cfg.warmup_iter);
                model.feed_data(&batch)?;
                model.optimize_parameters(current_iter)?;
                outcome.optimize_steps += 1;
                iter_timer.record();
                if current_iter == 1 {
                    // resets the ETA clock so it ignores startup time
                    msg_logger.reset_start_time();
                }

                let lrs = model.current_learning_rate();
                let log = model.current_log();
                let printed = every(cfg.print_freq, current_iter);
                if printed {
                    let record = LogRecord {
                        epoch,
                        iter: current_iter,
                        lrs: lrs.clone(),
                        timing: Some((iter_timer.avg_time(), data_timer.avg_time())),
                        values: log.clone(),
                    };
                    msg_logger.log(&record, sinks.event_log.as_mut());
                }

                if every(cfg.save_checkpoint_freq, current_iter) {
                    info!("Saving models and training states.");
                    model.save(epoch, SaveTag::Iter(current_iter))?;
                }

                let mut validated = None;
                if let Some((val_freq, save_img)) = cfg.val {
                    if every(val_freq, current_iter) {
                        self.validate_all(model, val_loaders, current_iter, &mut sinks.event_log, save_img)?;
                        let best = val_loaders
                            .last()
                            .and_then(|(_, loader)| model.best_metric_results(loader.dataset().name()))
                            .unwrap_or_default();
                        validated = Some((model.metric_results(), best));
                    }
                }

                if let Some(tracking) = sinks.tracking.as_mut() {
                    let lr = lrs.first().copied().unwrap_or_default();
                    let row = wandb_record(
                        printed.then_some((current_iter, lr, log.as_slice())),
                        validated.as_ref().map(|(r, b)| (r.as_slice(), b.as_slice())),
                    );
                    tracking.log(&row, current_iter)?;
                }

                data_timer.start();
                iter_timer.start();
            }
        }

        if current_iter < cfg.total_iters {
            warn!(
                "Training data ran out at iter {current_iter} of {}.",
                cfg.total_iters
            );
        }
        info!(
            "End of training. Time consumed: {}",
            format_duration(start_time.elapsed().as_secs())
        );
        info!("Save the latest model.");
        model.save(last_epoch, SaveTag::Latest)?;
        if let Some((_, save_img)) = cfg.val {
            self.validate_all(model, val_loaders, current_iter, &mut sinks.event_log, save_img)?;
        }

        outcome.final_iter = current_iter;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::metrics::Better;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_every() {
        assert!(every(5, 10));
        assert!(!every(5, 11));
        assert!(!every(0, 10));
    }

    #[test]
    fn test_print_row() {
        let log = vec![("l_pix".to_string(), 0.5)];
        let row = wandb_record(Some((100, 2e-4, log.as_slice())), None);
        assert_eq!(
            row,
            vec![
                ("iter".to_string(), 100.0),
                ("lrs".to_string(), 2e-4),
                ("l_pix".to_string(), 0.5),
            ]
        );
    }

    #[test]
    fn test_validation_row_carries_best() {
        let results = vec![("psnr".to_string(), 30.0), ("ssim".to_string(), 0.9)];
        let mut best = BestMetric::new(Better::Higher);
        best.update(31.0, 50);
        let bests = vec![("psnr".to_string(), best)];
        let row = wandb_record(None, Some((results.as_slice(), bests.as_slice())));
        assert_eq!(
            row,
            vec![
                ("psnr".to_string(), 30.0),
                ("best_psnr".to_string(), 31.0),
                ("ssim".to_string(), 0.9),
            ]
        );
    }

    #[test]
    fn test_empty_row() {
        assert!(wandb_record(None, None).is_empty());
    }
}
