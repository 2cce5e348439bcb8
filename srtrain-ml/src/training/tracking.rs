//! Experiment tracking as a wandb-compatible offline run directory.
//!
//! `<root>/wandb/offline-run-<time>-<id>/` holds `config.json`,
//! `wandb-history.jsonl` (one row per upload, keyed by `_step`) and
//! `wandb-summary.json` (last value of every key). The directory can be
//! pushed later with `wandb sync`.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use srtrain_core::logging::get_time_str;
use srtrain_core::options::{TrainOptions, WandbOptions};
use srtrain_core::persistence::atomic_write_json;
use tracing::info;

use crate::error::MlError;

pub const HISTORY_FILE: &str = "wandb-history.jsonl";
pub const SUMMARY_FILE: &str = "wandb-summary.json";
pub const CONFIG_FILE: &str = "config.json";

/// Command-line arguments recorded as the run config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingArgs {
    pub opt: String,
    pub launcher: String,
    pub auto_resume: bool,
    pub debug: bool,
    pub local_rank: usize,
    pub force_yml: Vec<String>,
    pub optim: String,
    pub lr: f64,
    pub weight_decay: f64,
    pub b1: f64,
    pub b2: f64,
}

pub struct TrackingSession {
    run_dir: PathBuf,
    id: String,
    history: BufWriter<File>,
    summary: Map<String, Value>,
    uploads: usize,
}

impl std::fmt::Debug for TrackingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingSession")
            .field("run_dir", &self.run_dir)
            .field("id", &self.id)
            .field("uploads", &self.uploads)
            .finish()
    }
}

impl TrackingSession {
    /// Start a run named `run_name` under `root/wandb`.
    pub fn init(
        root: &Path,
        wandb: &WandbOptions,
        run_name: &str,
        args: &TrackingArgs,
        opts: &TrainOptions,
    ) -> Result<Self, MlError> {
        let project = wandb
            .project
            .as_deref()
            .ok_or_else(|| MlError::config("logger.wandb.project is not set"))?;
        let resumed = wandb.resume_id.is_some();
        let id = match &wandb.resume_id {
            Some(id) => id.clone(),
            None => uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
        };
        let run_dir = root
            .join("wandb")
            .join(format!("offline-run-{}-{id}", get_time_str()));
        std::fs::create_dir_all(&run_dir)?;

        let config = json!({
            "project": project,
            "entity": wandb.entity,
            "name": run_name,
            "id": id,
            "resumed": resumed,
            "args": serde_json::to_value(args)?,
            "options": serde_json::to_value(opts)?,
        });
        atomic_write_json(&run_dir.join(CONFIG_FILE), &config)?;

        let history = OpenOptions::new()
            .create(true)
            .append(true)
            .open(run_dir.join(HISTORY_FILE))?;
        info!("Use wandb logger with id={id}; project={project}.");
        Ok(Self {
            run_dir,
            id,
            history: BufWriter::new(history),
            summary: Map::new(),
            uploads: 0,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn uploads(&self) -> usize {
        self.uploads
    }

    /// Upload one flat row at `step`. Empty rows are ignored.
    pub fn log(&mut self, row: &[(String, f64)], step: u64) -> Result<(), MlError> {
        if row.is_empty() {
            return Ok(());
        }
        let mut entry = Map::new();
        entry.insert("_step".to_string(), json!(step));
        for (k, v) in row {
            entry.insert(k.clone(), json!(v));
            self.summary.insert(k.clone(), json!(v));
        }
        writeln!(self.history, "{}", Value::Object(entry))?;
        self.history.flush()?;
        atomic_write_json(&self.run_dir.join(SUMMARY_FILE), &self.summary)?;
        self.uploads += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), MlError> {
        self.history.flush()?;
        Ok(())
    }
}
