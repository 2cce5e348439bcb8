//! Window-averaged step timer.

use std::time::Instant;

const DEFAULT_WINDOW: usize = 200;

/// Averages the time between `start`/`record` pairs; the running average
/// restarts every `window` records.
#[derive(Debug, Clone)]
pub struct AvgTimer {
    window: usize,
    tic: Instant,
    current: f64,
    total: f64,
    count: usize,
    avg: f64,
}

impl Default for AvgTimer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl AvgTimer {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            tic: Instant::now(),
            current: 0.0,
            total: 0.0,
            count: 0,
            avg: 0.0,
        }
    }

    pub fn start(&mut self) {
        self.tic = Instant::now();
    }

    pub fn record(&mut self) {
        self.count += 1;
        self.current = self.tic.elapsed().as_secs_f64();
        self.total += self.current;
        self.avg = self.total / self.count as f64;
        if self.count > self.window {
            self.count = 0;
            self.total = 0.0;
        }
        self.tic = Instant::now();
    }

    pub fn current_time(&self) -> f64 {
        self.current
    }

    pub fn avg_time(&self) -> f64 {
        self.avg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_is_non_negative_and_tracks_current() {
        let mut t = AvgTimer::new(2);
        assert_eq!(t.avg_time(), 0.0);
        for _ in 0..5 {
            t.record();
            assert!(t.current_time() >= 0.0);
            assert!(t.avg_time() >= 0.0);
        }
    }

    #[test]
    fn test_window_resets_running_sum() {
        let mut t = AvgTimer::new(1);
        t.record();
        t.record();
        assert_eq!(t.count, 0);
        assert_eq!(t.total, 0.0);
    }
}
