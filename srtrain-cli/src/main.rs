//! srtrain CLI: launch super-resolution training runs from YAML option files.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use srtrain_core::Launcher;
use srtrain_core::logging::{LogSettings, init_logging};
use srtrain_core::options::{OptimOverride, ParseArgs};
use srtrain_ml::data::meta_info::generate_meta_info;
use srtrain_ml::training::{TrainArgs, train_pipeline};

/// Train a super-resolution model from an option file.
#[derive(Parser, Debug)]
#[command(name = "srtrain", version, about, long_about = None, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(flatten)]
    train: TrainFlags,

    /// Project root; experiments/, tb_logger/ and wandb/ are created here
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Args, Debug)]
struct TrainFlags {
    /// Path to option YAML file.
    #[arg(long, default_value = "options/train/train_SRx4.yml")]
    opt: String,

    /// Job launcher
    #[arg(long, value_enum, default_value_t = Launcher::None)]
    launcher: Launcher,

    #[arg(long = "auto_resume")]
    auto_resume: bool,

    #[arg(long)]
    debug: bool,

    #[arg(long = "local_rank", default_value_t = 0)]
    local_rank: usize,

    /// Force to update yml files. Examples: train:ema_decay=0.999
    #[arg(long = "force_yml", num_args = 1..)]
    force_yml: Vec<String>,

    #[arg(long = "weight_decay", default_value_t = 0.0)]
    weight_decay: f64,

    #[arg(long, default_value_t = 0.9)]
    b1: f64,

    #[arg(long, default_value_t = 0.99)]
    b2: f64,

    #[arg(long, default_value = "Adam")]
    optim: String,

    #[arg(long, default_value_t = 1e-5)]
    lr: f64,
}

impl TrainFlags {
    fn into_train_args(self, verbose: u8, quiet: bool) -> TrainArgs {
        TrainArgs {
            parse: ParseArgs {
                opt: self.opt,
                launcher: self.launcher,
                auto_resume: self.auto_resume,
                debug: self.debug,
                local_rank: self.local_rank,
                force_yml: self.force_yml,
            },
            optim: OptimOverride {
                optim: self.optim,
                lr: self.lr,
                weight_decay: self.weight_decay,
                b1: self.b1,
                b2: self.b2,
            },
            verbose,
            quiet,
        }
    }
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Write a meta-info file listing every GT image with its shape
    MetaInfo {
        /// Folder of ground-truth images
        #[arg(long)]
        gt_folder: PathBuf,
        /// Output text file
        #[arg(long)]
        output: PathBuf,
    },
}

/// Accept the legacy single-dash `-opt` spelling.
fn normalize_args<I: IntoIterator<Item = String>>(args: I) -> Vec<String> {
    args.into_iter()
        .map(|arg| match arg.strip_prefix("-opt") {
            Some(rest) if rest.is_empty() || rest.starts_with('=') => format!("--opt{rest}"),
            _ => arg,
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse_from(normalize_args(std::env::args()));

    match cli.command {
        Some(Commands::MetaInfo { gt_folder, output }) => {
            let _guard = init_logging(&LogSettings {
                verbose: cli.verbose,
                quiet: cli.quiet,
                ..Default::default()
            })?;
            let count = generate_meta_info(&gt_folder, &output)
                .with_context(|| format!("failed to scan {}", gt_folder.display()))?;
            info!("Wrote {count} entries to {}", output.display());
        }
        None => {
            let root = cli
                .root
                .canonicalize()
                .with_context(|| format!("cannot resolve root {}", cli.root.display()))?;
            let args = cli.train.into_train_args(cli.verbose, cli.quiet);
            let report = train_pipeline(&args, &root).context("training failed")?;
            info!(
                "Finished at iter {} ({} steps) in {}",
                report.outcome.final_iter,
                report.outcome.optimize_steps,
                report.experiments_root.display()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(normalize_args(args.iter().map(|s| s.to_string())))
    }

    #[test]
    fn test_legacy_opt_flag() {
        assert_eq!(
            normalize_args(["srtrain", "-opt", "a.yml", "-optim"].map(String::from)),
            vec!["srtrain", "--opt", "a.yml", "-optim"]
        );
        assert_eq!(normalize_args(["-opt=b.yml".to_string()]), vec!["--opt=b.yml"]);
        assert_eq!(parse(&["srtrain", "-opt", "x.yml"]).train.opt, "x.yml");
    }

    #[test]
    fn test_defaults_match_sweep_flags() {
        let cli = parse(&["srtrain"]);
        let args = cli.train.into_train_args(0, false);
        assert_eq!(args.parse.opt, "options/train/train_SRx4.yml");
        assert_eq!(args.parse.launcher, Launcher::None);
        assert_eq!(args.optim, OptimOverride::default());
    }

    #[test]
    fn test_train_flags() {
        let cli = parse(&[
            "srtrain",
            "--opt",
            "o.yml",
            "--launcher",
            "slurm",
            "--auto_resume",
            "--force_yml",
            "train:total_iter=5",
            "logger:print_freq=1",
            "--lr",
            "0.001",
            "-vv",
        ]);
        assert_eq!(cli.verbose, 2);
        let args = cli.train.into_train_args(2, false);
        assert_eq!(args.parse.launcher, Launcher::Slurm);
        assert!(args.parse.auto_resume);
        assert_eq!(args.parse.force_yml, vec!["train:total_iter=5", "logger:print_freq=1"]);
        assert_eq!(args.optim.lr, 0.001);
    }

    #[test]
    fn test_meta_info_subcommand() {
        let cli = parse(&["srtrain", "meta-info", "--gt-folder", "gt", "--output", "meta.txt"]);
        match cli.command {
            Some(Commands::MetaInfo { gt_folder, output }) => {
                assert_eq!(gt_folder, PathBuf::from("gt"));
                assert_eq!(output, PathBuf::from("meta.txt"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
