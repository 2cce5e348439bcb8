//! Formatted progress lines with ETA, mirrored into the event log.

use std::time::Instant;

use srtrain_core::options::TrainOptions;
use tracing::info;

use super::event_log::EventLog;

/// Values reported at one print interval.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogRecord {
    pub epoch: usize,
    pub iter: u64,
    pub lrs: Vec<f64>,
    /// `(iteration time, data time)` averages in seconds.
    pub timing: Option<(f64, f64)>,
    pub values: Vec<(String, f64)>,
}

/// `1.000e-04` style scientific notation.
pub fn sci(v: f64, precision: usize) -> String {
    let s = format!("{v:.precision$e}");
    match s.split_once('e') {
        Some((mantissa, exp)) => match exp.parse::<i32>() {
            Ok(e) => format!("{mantissa}e{}{:02}", if e < 0 { '-' } else { '+' }, e.abs()),
            Err(_) => s,
        },
        None => s,
    }
}

/// `12,345` grouping.
pub fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// `H:MM:SS`, prefixed with `N day(s), ` past one day.
pub fn format_duration(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let rem = total_secs % 86_400;
    let hms = format!("{}:{:02}:{:02}", rem / 3600, (rem % 3600) / 60, rem % 60);
    match days {
        0 => hms,
        1 => format!("1 day, {hms}"),
        d => format!("{d} days, {hms}"),
    }
}

#[derive(Debug, Clone)]
pub struct MessageLogger {
    exp_name: String,
    max_iters: u64,
    start_iter: u64,
    use_event_log: bool,
    start_time: Instant,
}

impl MessageLogger {
    pub fn new(opts: &TrainOptions, start_iter: u64) -> Self {
        Self {
            exp_name: opts.name.clone(),
            max_iters: opts.train.total_iter,
            start_iter,
            use_event_log: opts.logger.use_tb_logger && !opts.is_debug(),
            start_time: Instant::now(),
        }
    }

    pub fn reset_start_time(&mut self) {
        self.start_time = Instant::now();
    }

    pub fn format(&self, record: &LogRecord) -> String {
        let prefix: String = self.exp_name.chars().take(5).collect();
        let lrs: String = record.lrs.iter().map(|v| format!("{},", sci(*v, 3))).collect();
        let mut message = format!(
            "[{prefix}..][epoch:{:3}, iter:{:>8}, lr:({lrs})] ",
            record.epoch,
            thousands(record.iter)
        );

        if let Some((iter_time, data_time)) = record.timing {
            let done = record.iter.saturating_sub(self.start_iter) + 1;
            let avg = self.start_time.elapsed().as_secs_f64() / done as f64;
            let eta = avg * self.max_iters.saturating_sub(record.iter + 1) as f64;
            message.push_str(&format!(
                "[eta: {}, time (data): {iter_time:.3} ({data_time:.3})] ",
                format_duration(eta as u64)
            ));
        }

        for (k, v) in &record.values {
            message.push_str(&format!("{k}: {} ", sci(*v, 4)));
        }
        message
    }

    /// Log the line and write each value to `event_log` (`losses/<k>` for
    /// `l_*` keys).
    pub fn log(&self, record: &LogRecord, event_log: Option<&mut EventLog>) -> String {
        let message = self.format(record);
        if self.use_event_log {
            if let Some(events) = event_log {
                for (k, v) in &record.values {
                    let tag = if k.starts_with("l_") {
                        format!("losses/{k}")
                    } else {
                        k.clone()
                    };
                    events.add_scalar(&tag, *v, record.iter);
                }
            }
        }
        info!("{message}");
        message
    }
}
