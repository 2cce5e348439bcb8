//! Logging setup: human-readable stderr plus a per-run log file.
//!
//! The file lives in the experiment root as `train_<name>_<time>.log` so
//! every run keeps its own transcript next to its checkpoints.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Environment variable overriding the stderr filter.
pub const LOG_ENV: &str = "SRTRAIN_LOG";

/// Timestamp used in log and archive names.
pub fn get_time_str() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Path of the run log inside `log_dir`.
pub fn log_file_path(log_dir: &Path, name: &str) -> PathBuf {
    log_dir.join(format!("train_{name}_{}.log", get_time_str()))
}

/// Inputs for [`init_logging`].
#[derive(Debug, Clone, Default)]
pub struct LogSettings {
    pub log_file: Option<PathBuf>,
    pub verbose: u8,
    pub quiet: bool,
    pub rank: usize,
}

impl LogSettings {
    fn level(&self) -> &'static str {
        if self.rank != 0 {
            return "error";
        }
        match self.verbose {
            0 if self.quiet => "error",
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Keeps the non-blocking file writer alive; flushes on drop.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber.
///
/// Installing twice (tests, repeated pipeline runs in one process) keeps the
/// first subscriber.
pub fn init_logging(settings: &LogSettings) -> std::io::Result<LogGuard> {
    let level = settings.level();
    let stderr_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    let (file_layer, guard) = match &settings.log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "train.log".to_string());
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new(level));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    if tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global subscriber already installed; keeping it");
    }

    Ok(LogGuard { _file: guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_str_shape() {
        let s = get_time_str();
        assert_eq!(s.len(), 15);
        assert_eq!(&s[8..9], "_");
    }

    #[test]
    fn test_log_file_path() {
        let p = log_file_path(Path::new("/exp/run"), "HAT_x4");
        let name = p.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("train_HAT_x4_"));
        assert!(name.ends_with(".log"));
        assert_eq!(p.parent().unwrap(), Path::new("/exp/run"));
    }

    #[test]
    fn test_levels() {
        let mut s = LogSettings::default();
        assert_eq!(s.level(), "info");
        s.verbose = 1;
        assert_eq!(s.level(), "debug");
        s.verbose = 3;
        assert_eq!(s.level(), "trace");
        s.verbose = 0;
        s.quiet = true;
        assert_eq!(s.level(), "error");
        s.quiet = false;
        s.rank = 2;
        assert_eq!(s.level(), "error");
    }
}
