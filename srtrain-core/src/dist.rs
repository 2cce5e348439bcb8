//! Distributed launch information.
//!
//! srtrain never negotiates a process group itself. The launcher (torchrun
//! style or slurm) assigns ranks through the environment and this module only
//! reads them back so that paths and samplers can be parameterized.

use serde::{Deserialize, Serialize};

use crate::error::OptionsError;

/// How the training processes were started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Launcher {
    #[default]
    None,
    Pytorch,
    Slurm,
}

impl std::fmt::Display for Launcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Launcher::None => write!(f, "none"),
            Launcher::Pytorch => write!(f, "pytorch"),
            Launcher::Slurm => write!(f, "slurm"),
        }
    }
}

/// Rank of this process and the number of processes in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistInfo {
    pub rank: usize,
    pub world_size: usize,
}

impl Default for DistInfo {
    fn default() -> Self {
        Self {
            rank: 0,
            world_size: 1,
        }
    }
}

impl DistInfo {
    pub fn is_main_process(&self) -> bool {
        self.rank == 0
    }
}

/// Optional `dist_params` block of the option file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistParams {
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

fn env_usize(var: &str, default: usize) -> Result<usize, OptionsError> {
    match std::env::var(var) {
        Ok(value) => value.trim().parse().map_err(|_| OptionsError::BadEnv {
            var: var.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

/// Resolve rank and world size for the given launcher.
pub fn init_dist(
    launcher: Launcher,
    params: Option<&DistParams>,
) -> Result<DistInfo, OptionsError> {
    match launcher {
        Launcher::None => Ok(DistInfo::default()),
        Launcher::Pytorch => Ok(DistInfo {
            rank: env_usize("RANK", 0)?,
            world_size: env_usize("WORLD_SIZE", 1)?.max(1),
        }),
        Launcher::Slurm => {
            if let Some(port) = params.and_then(|p| p.port) {
                // SAFETY: called once during startup before any worker threads exist.
                unsafe { std::env::set_var("MASTER_PORT", port.to_string()) };
            }
            Ok(DistInfo {
                rank: env_usize("SLURM_PROCID", 0)?,
                world_size: env_usize("SLURM_NTASKS", 1)?.max(1),
            })
        }
    }
}

/// Number of devices listed in `CUDA_VISIBLE_DEVICES`, used for `num_gpu: auto`.
pub fn visible_device_count() -> usize {
    match std::env::var("CUDA_VISIBLE_DEVICES") {
        Ok(list) => list
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty() && *d != "-1")
            .count(),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_launcher_is_single_process() {
        let info = init_dist(Launcher::None, None).unwrap();
        assert_eq!(info, DistInfo { rank: 0, world_size: 1 });
        assert!(info.is_main_process());
    }

    #[test]
    fn test_launcher_display() {
        assert_eq!(Launcher::None.to_string(), "none");
        assert_eq!(Launcher::Pytorch.to_string(), "pytorch");
        assert_eq!(Launcher::Slurm.to_string(), "slurm");
    }

    #[test]
    fn test_dist_params_deserialize() {
        let params: DistParams = serde_yaml::from_str("backend: nccl\nport: 29500\n").unwrap();
        assert_eq!(params.backend.as_deref(), Some("nccl"));
        assert_eq!(params.port, Some(29500));
    }
}
