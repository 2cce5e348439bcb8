//! End-to-end training entry point: options in, trained checkpoints out.

use std::path::{Path, PathBuf};

use srtrain_core::experiment::{ExperimentPaths, make_exp_dirs, mkdir_and_rename, versioned_root};
use srtrain_core::logging::{LogSettings, init_logging, log_file_path};
use srtrain_core::options::{OptimOverride, ParseArgs, TrainOptions, copy_opt_file, parse_options};
use srtrain_core::reproducibility::EnvironmentSnapshot;
use srtrain_core::resume::{ResumeNotes, load_resume_state};
use tracing::info;

use super::event_log::EventLog;
use super::message_logger::MessageLogger;
use super::tracking::{TrackingArgs, TrackingSession};
use super::train_loop::{LoopConfig, LoopOutcome, Sinks, TrainLoop};
use crate::data::{DatasetRegistry, build_prefetcher, create_train_val_dataloader};
use crate::error::MlError;
use crate::models::ModelRegistry;

/// Everything the `train` command passes in.
#[derive(Debug, Clone, Default)]
pub struct TrainArgs {
    pub parse: ParseArgs,
    /// Optimizer sweep values, applied only when a tracking project is set.
    pub optim: OptimOverride,
    pub verbose: u8,
    pub quiet: bool,
}

impl TrainArgs {
    pub fn tracking_args(&self) -> TrackingArgs {
        TrackingArgs {
            opt: self.parse.opt.clone(),
            launcher: self.parse.launcher.to_string(),
            auto_resume: self.parse.auto_resume,
            debug: self.parse.debug,
            local_rank: self.parse.local_rank,
            force_yml: self.parse.force_yml.clone(),
            optim: self.optim.optim.clone(),
            lr: self.optim.lr,
            weight_decay: self.optim.weight_decay,
            b1: self.optim.b1,
            b2: self.optim.b2,
        }
    }
}

/// Where a run ended up and what it did.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub experiments_root: PathBuf,
    pub resumed_from: Option<u64>,
    pub outcome: LoopOutcome,
}

fn command_line() -> String {
    std::env::args().collect::<Vec<_>>().join(" ")
}

/// Tracking session for rank 0 of a non-debug run with a project configured.
fn init_tracking(
    opts: &TrainOptions,
    run_name: &str,
    args: &TrainArgs,
) -> Result<Option<TrackingSession>, MlError> {
    let Some(wandb) = opts.logger.wandb.as_ref().filter(|w| w.project.is_some()) else {
        return Ok(None);
    };
    if opts.is_debug() || !opts.dist_info().is_main_process() {
        return Ok(None);
    }
    if !opts.logger.use_tb_logger {
        return Err(MlError::config("should turn on tensorboard when using wandb"));
    }
    TrackingSession::init(&opts.root_path, wandb, run_name, &args.tracking_args(), opts).map(Some)
}

pub fn train_pipeline(args: &TrainArgs, root_path: &Path) -> Result<PipelineReport, MlError> {
    train_pipeline_with(args, root_path, &DatasetRegistry::default(), &ModelRegistry::default())
}

/// [`train_pipeline`] with caller-provided dataset and model registries.
pub fn train_pipeline_with(
    args: &TrainArgs,
    root_path: &Path,
    datasets: &DatasetRegistry,
    models: &ModelRegistry,
) -> Result<PipelineReport, MlError> {
    let mut opts = parse_options(&args.parse, root_path, true)?;

    if opts.tracking_project().is_some() {
        opts.apply_optimizer_override(&args.optim);
    }

    let (resume_state, resume_notes) = match load_resume_state(&mut opts)? {
        Some(resumed) => (Some(resumed.state), resumed.notes),
        None => (None, ResumeNotes::default()),
    };

    // a fresh run never reuses an existing experiment directory, including
    // an auto-resume run that found no training states
    if resume_state.is_none() {
        let current = opts.path.experiment_paths()?;
        let versioned = versioned_root(&current.experiments_root);
        if versioned != current.experiments_root {
            opts.path.set_experiment_paths(&ExperimentPaths::for_root(versioned));
        }
    }

    let paths = opts.path.experiment_paths()?;
    make_exp_dirs(&paths)?;
    let run_name = paths.run_name();
    let main_process = opts.dist_info().is_main_process();
    let use_event_log = opts.logger.use_tb_logger && !opts.is_debug() && main_process;
    let tb_dir = opts.root_path.join("tb_logger").join(&run_name);
    if resume_state.is_none() && use_event_log {
        mkdir_and_rename(&tb_dir)?;
    }

    let opt_file = Path::new(&args.parse.opt);
    if main_process && opt_file.is_file() {
        copy_opt_file(opt_file, &paths.experiments_root, &command_line())?;
    }

    let _log_guard = init_logging(&LogSettings {
        log_file: Some(log_file_path(&paths.log, &opts.name)),
        verbose: args.verbose,
        quiet: args.quiet,
        rank: opts.rank,
    })?;
    info!("{}", EnvironmentSnapshot::capture().render());
    info!("{}", opts.to_log_string());
    resume_notes.log();

    let tracking = init_tracking(&opts, &run_name, args)?;
    let event_log = if use_event_log {
        Some(EventLog::create(&tb_dir)?)
    } else {
        None
    };
    let mut sinks = Sinks { event_log, tracking };

    let loaders = create_train_val_dataloader(&opts, datasets)?;

    let mut model = models.build_model(&opts)?;
    if let Some(state) = &resume_state {
        model.resume_training(state)?;
        info!("Resuming training from epoch: {}, iter: {}.", state.epoch, state.iter);
    }
    let start_iter = resume_state.as_ref().map_or(0, |s| s.iter);
    let mut msg_logger = MessageLogger::new(&opts, start_iter);

    let mut prefetcher = build_prefetcher(loaders.train, &loaders.train_options)?;
    let train_loop = TrainLoop::new(LoopConfig::from_options(
        &opts,
        loaders.total_epochs,
        resume_state.as_ref(),
    ));
    let outcome = train_loop.run(
        model.as_mut(),
        prefetcher.as_mut(),
        &loaders.val,
        &mut sinks,
        &mut msg_logger,
    )?;
    sinks.close()?;

    Ok(PipelineReport {
        experiments_root: paths.experiments_root,
        resumed_from: resume_state.map(|s| s.iter),
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use srtrain_core::Launcher;

    #[test]
    fn test_tracking_args_mirror_the_command_line() {
        let args = TrainArgs {
            parse: ParseArgs {
                opt: "options/train.yml".into(),
                launcher: Launcher::Slurm,
                force_yml: vec!["train:total_iter=5".into()],
                ..Default::default()
            },
            optim: OptimOverride {
                optim: "AdamW".into(),
                lr: 1e-3,
                ..Default::default()
            },
            ..Default::default()
        };
        let t = args.tracking_args();
        assert_eq!(t.launcher, "slurm");
        assert_eq!(t.optim, "AdamW");
        assert_eq!(t.lr, 1e-3);
        assert_eq!(t.force_yml, vec!["train:total_iter=5".to_string()]);
    }
}
