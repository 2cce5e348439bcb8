//! Iteration-based learning-rate schedules.
//!
//! Schedulers are stepped once per iteration and compute the rate in closed
//! form from the optimizer's initial rate, so restoring `last_epoch` is
//! enough to resume.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use srtrain_core::options::SchedulerOptions;

use super::optim::Optimizer;
use crate::error::MlError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Schedule {
    MultiStep {
        milestones: Vec<u64>,
        gamma: f64,
    },
    CosineRestart {
        periods: Vec<u64>,
        restart_weights: Vec<f64>,
        eta_min: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LrScheduler {
    pub schedule: Schedule,
    pub last_epoch: u64,
}

impl LrScheduler {
    pub fn from_options(opts: &SchedulerOptions) -> Result<Self, MlError> {
        let schedule = match opts {
            SchedulerOptions::MultiStepLR { milestones, gamma } => Schedule::MultiStep {
                milestones: milestones.clone(),
                gamma: *gamma,
            },
            SchedulerOptions::CosineAnnealingRestartLR {
                periods,
                restart_weights,
                eta_min,
            } => {
                if periods.is_empty() || periods.contains(&0) {
                    return Err(MlError::config("periods must be non-empty and positive"));
                }
                let restart_weights = if restart_weights.is_empty() {
                    vec![1.0; periods.len()]
                } else {
                    restart_weights.clone()
                };
                if restart_weights.len() != periods.len() {
                    return Err(MlError::config(
                        "periods and restart_weights should have the same length.",
                    ));
                }
                Schedule::CosineRestart {
                    periods: periods.clone(),
                    restart_weights,
                    eta_min: *eta_min,
                }
            }
        };
        Ok(Self {
            schedule,
            last_epoch: 0,
        })
    }

    /// Rate at `last_epoch` for a group starting at `base_lr`.
    pub fn lr_at(&self, base_lr: f64) -> f64 {
        let t = self.last_epoch;
        match &self.schedule {
            Schedule::MultiStep { milestones, gamma } => {
                let passed = milestones.iter().filter(|&&m| m <= t).count();
                base_lr * gamma.powi(passed as i32)
            }
            Schedule::CosineRestart {
                periods,
                restart_weights,
                eta_min,
            } => {
                let mut restart = 0u64;
                let mut idx = periods.len() - 1;
                for (i, p) in periods.iter().enumerate() {
                    if t <= restart + p {
                        idx = i;
                        break;
                    }
                    if i + 1 < periods.len() {
                        restart += p;
                    }
                }
                let period = periods[idx] as f64;
                let progress = ((t - restart.min(t)) as f64 / period).min(1.0);
                eta_min + restart_weights[idx] * 0.5 * (base_lr - eta_min) * (1.0 + (PI * progress).cos())
            }
        }
    }

    pub fn step(&mut self, optimizer: &mut Optimizer) {
        self.last_epoch += 1;
        optimizer.lr = self.lr_at(optimizer.initial_lr);
    }

    pub fn state(&self) -> Result<serde_json::Value, MlError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn load_state(&mut self, state: &serde_json::Value) -> Result<(), MlError> {
        *self = serde_json::from_value(state.clone())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multistep() -> LrScheduler {
        LrScheduler::from_options(&SchedulerOptions::MultiStepLR {
            milestones: vec![2, 4],
            gamma: 0.5,
        })
        .unwrap()
    }

    #[test]
    fn test_multistep_decays_at_milestones() {
        let mut s = multistep();
        let lrs: Vec<f64> = (1..=5)
            .map(|t| {
                s.last_epoch = t;
                s.lr_at(1.0)
            })
            .collect();
        assert_eq!(lrs, vec![1.0, 0.5, 0.5, 0.25, 0.25]);
    }

    #[test]
    fn test_cosine_restart_shape() {
        let s = |t| {
            let mut s = LrScheduler::from_options(&SchedulerOptions::CosineAnnealingRestartLR {
                periods: vec![10, 10],
                restart_weights: vec![1.0, 0.5],
                eta_min: 0.0,
            })
            .unwrap();
            s.last_epoch = t;
            s.lr_at(1.0)
        };
        assert!((s(0) - 1.0).abs() < 1e-12);
        assert!((s(5) - 0.5).abs() < 1e-12);
        assert!(s(10).abs() < 1e-12);
        // second cycle restarts at half weight
        assert!((s(11) - 0.5 * 0.5 * (1.0 + (PI * 0.1).cos())).abs() < 1e-12);
    }

    #[test]
    fn test_cosine_rejects_mismatched_weights() {
        assert!(LrScheduler::from_options(&SchedulerOptions::CosineAnnealingRestartLR {
            periods: vec![10, 10],
            restart_weights: vec![1.0],
            eta_min: 0.0,
        })
        .is_err());
    }

    #[test]
    fn test_state_restores_position() {
        let mut s = multistep();
        s.last_epoch = 3;
        let state = s.state().unwrap();
        let mut fresh = multistep();
        fresh.load_state(&state).unwrap();
        assert_eq!(fresh.last_epoch, 3);
    }
}
