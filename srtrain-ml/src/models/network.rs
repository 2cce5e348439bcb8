//! `UpsampleAffine`: nearest-neighbour upsampling followed by a learned
//! per-channel gain and bias.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use srtrain_core::options::NetworkOptions;
use tracing::{info, warn};

use crate::data::Image;
use crate::error::MlError;

pub const NET_TYPE: &str = "UpsampleAffine";

#[derive(Debug, Clone, PartialEq)]
pub struct UpsampleAffine {
    pub scale: usize,
    pub channels: usize,
    gain: Vec<f32>,
    bias: Vec<f32>,
}

/// Serialized weights, as written to `net_g_<tag>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkWeights {
    pub net_type: String,
    pub scale: usize,
    pub channels: usize,
    pub params: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params_ema: Option<Vec<f32>>,
}

fn net_usize(opts: &NetworkOptions, key: &str) -> Result<Option<usize>, MlError> {
    match opts.extra.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| MlError::config(format!("network_g.{key} must be a positive integer"))),
    }
}

impl UpsampleAffine {
    /// Identity-initialised network (unit gain, zero bias).
    pub fn new(scale: usize, channels: usize) -> Result<Self, MlError> {
        if scale == 0 || channels == 0 {
            return Err(MlError::model("scale and channels must be positive"));
        }
        Ok(Self {
            scale,
            channels,
            gain: vec![1.0; channels],
            bias: vec![0.0; channels],
        })
    }

    /// Build from `network_g`; `upscale` falls back to the top-level scale
    /// and `num_in_ch` defaults to 3.
    pub fn from_options(opts: &NetworkOptions, scale: Option<u32>) -> Result<Self, MlError> {
        if opts.net_type != NET_TYPE {
            return Err(MlError::config(format!(
                "Network type {} is not supported.",
                opts.net_type
            )));
        }
        let scale = match net_usize(opts, "upscale")? {
            Some(s) => s,
            None => scale
                .map(|s| s as usize)
                .ok_or_else(|| MlError::config("network_g.upscale or scale must be set"))?,
        };
        let channels = net_usize(opts, "num_in_ch")?.unwrap_or(3);
        Self::new(scale, channels)
    }

    pub fn num_params(&self) -> usize {
        2 * self.channels
    }

    /// Flat parameter vector: gains then biases.
    pub fn params(&self) -> Vec<f32> {
        self.gain.iter().chain(&self.bias).copied().collect()
    }

    pub fn set_params(&mut self, params: &[f32]) -> Result<(), MlError> {
        if params.len() != self.num_params() {
            return Err(MlError::model(format!(
                "expected {} parameters, got {}",
                self.num_params(),
                params.len()
            )));
        }
        let (gain, bias) = params.split_at(self.channels);
        self.gain.copy_from_slice(gain);
        self.bias.copy_from_slice(bias);
        Ok(())
    }

    fn check_input(&self, lq: &Image) -> Result<(), MlError> {
        if lq.channels != self.channels {
            return Err(MlError::model(format!(
                "network expects {} channels, input has {}",
                self.channels, lq.channels
            )));
        }
        Ok(())
    }

    pub fn forward(&self, lq: &Image) -> Result<Image, MlError> {
        self.check_input(lq)?;
        let mut out = lq.upsample_nearest(self.scale);
        let n = out.pixels_per_channel();
        for c in 0..self.channels {
            for v in &mut out.data[c * n..(c + 1) * n] {
                *v = self.gain[c] * *v + self.bias[c];
            }
        }
        Ok(out)
    }

    /// Parameter gradients given `d loss / d output`.
    pub fn backward(&self, lq: &Image, grad_out: &[f32]) -> Result<Vec<f32>, MlError> {
        self.check_input(lq)?;
        let up = lq.upsample_nearest(self.scale);
        if grad_out.len() != up.data.len() {
            return Err(MlError::model("gradient shape does not match output"));
        }
        let n = up.pixels_per_channel();
        let mut grads = vec![0.0f32; self.num_params()];
        for c in 0..self.channels {
            let range = c * n..(c + 1) * n;
            for (g, x) in grad_out[range.clone()].iter().zip(&up.data[range]) {
                grads[c] += g * x;
                grads[self.channels + c] += g;
            }
        }
        Ok(grads)
    }

    pub fn to_weights(&self, params_ema: Option<Vec<f32>>) -> NetworkWeights {
        NetworkWeights {
            net_type: NET_TYPE.to_string(),
            scale: self.scale,
            channels: self.channels,
            params: self.params(),
            params_ema,
        }
    }

    /// Load pretrained weights. Strict loading refuses any geometry
    /// mismatch; otherwise a mismatching file is skipped with a warning.
    pub fn load_weights(&mut self, weights: &NetworkWeights, strict: bool) -> Result<(), MlError> {
        let compatible = weights.net_type == NET_TYPE
            && weights.scale == self.scale
            && weights.channels == self.channels
            && weights.params.len() == self.num_params();
        if !compatible {
            let msg = format!(
                "pretrained {} (x{}, {} ch) does not match {NET_TYPE} (x{}, {} ch)",
                weights.net_type, weights.scale, weights.channels, self.scale, self.channels
            );
            if strict {
                return Err(MlError::model(msg));
            }
            warn!("{msg}; keeping initial weights");
            return Ok(());
        }
        self.set_params(&weights.params)?;
        info!("Loaded {NET_TYPE} weights ({} params)", self.num_params());
        Ok(())
    }
}
