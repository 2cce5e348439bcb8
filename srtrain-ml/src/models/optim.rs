//! First-order optimizers over a flat parameter vector.

use serde::{Deserialize, Serialize};
use srtrain_core::options::OptimizerOptions;

use crate::error::MlError;

const ADAM_EPS: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerKind {
    Adam,
    AdamW,
    #[serde(rename = "SGD")]
    Sgd,
}

impl OptimizerKind {
    pub fn parse(name: &str) -> Result<Self, MlError> {
        match name {
            "Adam" => Ok(Self::Adam),
            "AdamW" => Ok(Self::AdamW),
            "SGD" => Ok(Self::Sgd),
            other => Err(MlError::config(format!("optimizer {other} is not supported yet."))),
        }
    }
}

/// Optimizer together with its running state; serialized into
/// training-state files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Optimizer {
    pub kind: OptimizerKind,
    pub lr: f64,
    pub initial_lr: f64,
    pub weight_decay: f64,
    pub betas: [f64; 2],
    pub momentum: f64,
    pub step: u64,
    exp_avg: Vec<f64>,
    exp_avg_sq: Vec<f64>,
}

impl Optimizer {
    pub fn from_options(opts: &OptimizerOptions, num_params: usize) -> Result<Self, MlError> {
        if !(opts.lr.is_finite() && opts.lr >= 0.0) {
            return Err(MlError::config(format!("invalid learning rate {}", opts.lr)));
        }
        Ok(Self {
            kind: OptimizerKind::parse(&opts.optim_type)?,
            lr: opts.lr,
            initial_lr: opts.lr,
            weight_decay: opts.weight_decay,
            betas: opts.betas,
            momentum: opts.momentum,
            step: 0,
            exp_avg: vec![0.0; num_params],
            exp_avg_sq: vec![0.0; num_params],
        })
    }

    pub fn step(&mut self, params: &mut [f32], grads: &[f32]) -> Result<(), MlError> {
        if params.len() != grads.len() || params.len() != self.exp_avg.len() {
            return Err(MlError::training(format!(
                "optimizer tracks {} params, got {} params and {} grads",
                self.exp_avg.len(),
                params.len(),
                grads.len()
            )));
        }
        self.step += 1;
        let [b1, b2] = self.betas;
        let bias1 = 1.0 - b1.powi(self.step as i32);
        let bias2 = 1.0 - b2.powi(self.step as i32);

        for (i, p) in params.iter_mut().enumerate() {
            let mut g = grads[i] as f64;
            let mut w = *p as f64;
            match self.kind {
                OptimizerKind::Adam | OptimizerKind::AdamW => {
                    if self.kind == OptimizerKind::AdamW {
                        w *= 1.0 - self.lr * self.weight_decay;
                    } else {
                        g += self.weight_decay * w;
                    }
                    self.exp_avg[i] = b1 * self.exp_avg[i] + (1.0 - b1) * g;
                    self.exp_avg_sq[i] = b2 * self.exp_avg_sq[i] + (1.0 - b2) * g * g;
                    let m_hat = self.exp_avg[i] / bias1;
                    let v_hat = self.exp_avg_sq[i] / bias2;
                    w -= self.lr * m_hat / (v_hat.sqrt() + ADAM_EPS);
                }
                OptimizerKind::Sgd => {
                    g += self.weight_decay * w;
                    if self.momentum != 0.0 {
                        // first step seeds the buffer with the raw gradient
                        self.exp_avg[i] = if self.step == 1 {
                            g
                        } else {
                            self.momentum * self.exp_avg[i] + g
                        };
                        g = self.exp_avg[i];
                    }
                    w -= self.lr * g;
                }
            }
            *p = w as f32;
        }
        Ok(())
    }

    pub fn state(&self) -> Result<serde_json::Value, MlError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Restore running state saved by [`Optimizer::state`].
    pub fn load_state(&mut self, state: &serde_json::Value) -> Result<(), MlError> {
        let saved: Optimizer = serde_json::from_value(state.clone())?;
        if saved.exp_avg.len() != self.exp_avg.len() {
            return Err(MlError::training(format!(
                "saved optimizer tracks {} params, model has {}",
                saved.exp_avg.len(),
                self.exp_avg.len()
            )));
        }
        *self = saved;
        Ok(())
    }
}
