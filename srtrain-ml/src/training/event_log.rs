//! Local scalar event log, one JSON object per line.
//!
//! Lives at `<root>/tb_logger/<name>/events.jsonl`. A failed write is logged
//! and skipped; it never stops training.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::MlError;

pub const EVENTS_FILE: &str = "events.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarEvent {
    pub tag: String,
    pub step: u64,
    pub value: f64,
    pub wall_time: f64,
}

pub struct EventLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("path", &self.path).finish()
    }
}

fn wall_time() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}

impl EventLog {
    /// Open (appending) the event file inside `log_dir`.
    pub fn create(log_dir: &Path) -> Result<Self, MlError> {
        std::fs::create_dir_all(log_dir)?;
        let path = log_dir.join(EVENTS_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_scalar(&mut self, tag: &str, value: f64, step: u64) {
        let event = ScalarEvent {
            tag: tag.to_string(),
            step,
            value,
            wall_time: wall_time(),
        };
        let result = serde_json::to_string(&event)
            .map_err(std::io::Error::from)
            .and_then(|line| writeln!(self.writer, "{line}"));
        if let Err(e) = result {
            warn!(path = %self.path.display(), "Failed to write event {tag}: {e}");
        }
    }

    pub fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!(path = %self.path.display(), "Failed to flush event log: {e}");
        }
    }

    pub fn close(mut self) {
        self.flush();
    }
}

impl Drop for EventLog {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Read every event from an `events.jsonl` file.
pub fn read_events(path: &Path) -> Result<Vec<ScalarEvent>, MlError> {
    let reader = BufReader::new(File::open(path)?);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            events.push(serde_json::from_str(&line)?);
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = EventLog::create(&dir.path().join("tb_logger/run")).unwrap();
        log.add_scalar("losses/l_pix", 0.5, 10);
        log.add_scalar("metrics/Set5/psnr", 30.0, 20);
        let path = log.path().to_path_buf();
        log.close();

        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].tag, "losses/l_pix");
        assert_eq!(events[1].step, 20);

        // reopening keeps earlier events
        let mut log = EventLog::create(path.parent().unwrap()).unwrap();
        log.add_scalar("x", 1.0, 30);
        log.close();
        assert_eq!(read_events(&path).unwrap().len(), 3);
    }
}
