//! Pixel losses.

use srtrain_core::options::LossOptions;

use crate::data::Image;
use crate::error::MlError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossKind {
    L1,
    Mse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Mean,
    Sum,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PixelLoss {
    pub kind: LossKind,
    pub weight: f64,
    pub reduction: Reduction,
}

impl PixelLoss {
    pub fn from_options(opts: &LossOptions) -> Result<Self, MlError> {
        let kind = match opts.loss_type.as_str() {
            "L1Loss" => LossKind::L1,
            "MSELoss" => LossKind::Mse,
            other => return Err(MlError::config(format!("Loss type {other} is not supported."))),
        };
        let reduction = match opts.reduction.as_str() {
            "mean" => Reduction::Mean,
            "sum" => Reduction::Sum,
            other => {
                return Err(MlError::config(format!(
                    "Unsupported reduction mode: {other}. Supported ones are: mean | sum"
                )));
            }
        };
        Ok(Self {
            kind,
            weight: opts.loss_weight,
            reduction,
        })
    }

    /// Weighted loss and its gradient with respect to `pred`.
    pub fn forward(&self, pred: &Image, target: &Image) -> Result<(f64, Vec<f32>), MlError> {
        if pred.shape() != target.shape() {
            return Err(MlError::training(format!(
                "prediction {:?} and target {:?} differ in shape",
                pred.shape(),
                target.shape()
            )));
        }
        let n = pred.data.len().max(1) as f64;
        let norm = match self.reduction {
            Reduction::Mean => self.weight / n,
            Reduction::Sum => self.weight,
        };
        let mut total = 0.0f64;
        let grad = pred
            .data
            .iter()
            .zip(&target.data)
            .map(|(&p, &t)| {
                let d = (p - t) as f64;
                match self.kind {
                    LossKind::L1 => {
                        total += d.abs();
                        (if d == 0.0 { 0.0 } else { norm * d.signum() }) as f32
                    }
                    LossKind::Mse => {
                        total += d * d;
                        (norm * 2.0 * d) as f32
                    }
                }
            })
            .collect();
        Ok((total * norm, grad))
    }
}
