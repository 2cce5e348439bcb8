//! Image-quality metrics computed on 8-bit-quantised images.

use serde::{Deserialize, Serialize};
use srtrain_core::options::MetricOptions;

use crate::data::Image;
use crate::error::MlError;

/// Best value seen for one metric of one validation dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestMetric {
    pub better: Better,
    pub val: f64,
    /// `-1` until the metric has been evaluated.
    pub iter: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Better {
    Higher,
    Lower,
}

impl Better {
    pub fn parse(opt: Option<&str>) -> Result<Self, MlError> {
        match opt {
            None | Some("higher") => Ok(Self::Higher),
            Some("lower") => Ok(Self::Lower),
            Some(other) => Err(MlError::config(format!(
                "metric direction must be higher or lower, not {other}"
            ))),
        }
    }
}

impl BestMetric {
    pub fn new(better: Better) -> Self {
        let val = match better {
            Better::Higher => f64::NEG_INFINITY,
            Better::Lower => f64::INFINITY,
        };
        Self { better, val, iter: -1 }
    }

    /// Record `val` at `iter` if it beats the current best.
    pub fn update(&mut self, val: f64, iter: u64) -> bool {
        let improved = match self.better {
            Better::Higher => val >= self.val,
            Better::Lower => val <= self.val,
        };
        if improved {
            self.val = val;
            self.iter = iter as i64;
        }
        improved
    }
}

/// Quantise to the 0..=255 range the way saved images are.
fn to_u8_range(img: &Image) -> Vec<f64> {
    img.data
        .iter()
        .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as f64)
        .collect()
}

/// ITU-R BT.601 luma of an RGB image, in the 16..=235 studio range.
fn y_channel(img: &Image) -> Result<Vec<f64>, MlError> {
    if img.channels != 3 {
        return Err(MlError::model("test_y_channel needs an RGB image"));
    }
    let px = to_u8_range(img);
    let n = img.pixels_per_channel();
    Ok((0..n)
        .map(|i| {
            let (r, g, b) = (px[i] / 255.0, px[n + i] / 255.0, px[2 * n + i] / 255.0);
            16.0 + 65.481 * r + 128.553 * g + 24.966 * b
        })
        .collect())
}

/// Peak signal-to-noise ratio in dB; `inf` for identical images.
pub fn calculate_psnr(
    img: &Image,
    img2: &Image,
    crop_border: usize,
    test_y_channel: bool,
) -> Result<f64, MlError> {
    if img.shape() != img2.shape() {
        return Err(MlError::model(format!(
            "Image shapes are different: {:?}, {:?}.",
            img.shape(),
            img2.shape()
        )));
    }
    let (a, b) = (img.crop_border(crop_border)?, img2.crop_border(crop_border)?);
    let (a, b) = if test_y_channel {
        (y_channel(&a)?, y_channel(&b)?)
    } else {
        (to_u8_range(&a), to_u8_range(&b))
    };
    let mse = a.iter().zip(&b).map(|(x, y)| (x - y).powi(2)).sum::<f64>() / a.len().max(1) as f64;
    if mse == 0.0 {
        return Ok(f64::INFINITY);
    }
    Ok(10.0 * (255.0f64 * 255.0 / mse).log10())
}

/// Evaluate one configured metric.
pub fn calculate_metric(opts: &MetricOptions, output: &Image, gt: &Image) -> Result<f64, MlError> {
    match opts.metric_type.as_str() {
        "calculate_psnr" => calculate_psnr(output, gt, opts.crop_border, opts.test_y_channel),
        other => Err(MlError::config(format!("Metric {other} is not supported."))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(v: f32) -> Image {
        Image::from_data(3, 4, 4, vec![v; 48]).unwrap()
    }

    #[test]
    fn test_identical_images_are_infinite() {
        assert!(calculate_psnr(&flat(0.5), &flat(0.5), 0, false).unwrap().is_infinite());
    }

    #[test]
    fn test_known_psnr() {
        // every pixel off by 255 levels: 10*log10(255^2/255^2) = 0
        let p = calculate_psnr(&flat(0.0), &flat(1.0), 1, false).unwrap();
        assert!(p.abs() < 1e-9);
    }

    #[test]
    fn test_y_channel_requires_rgb() {
        let gray = Image::zeros(1, 4, 4);
        assert!(calculate_psnr(&gray, &gray, 0, true).is_err());
        assert!(calculate_psnr(&flat(0.2), &flat(0.3), 0, true).unwrap().is_finite());
    }

    #[test]
    fn test_shape_mismatch() {
        assert!(calculate_psnr(&flat(0.0), &Image::zeros(3, 2, 2), 0, false).is_err());
    }

    #[test]
    fn test_best_metric_directions() {
        let mut hi = BestMetric::new(Better::Higher);
        assert!(hi.update(20.0, 10));
        assert!(!hi.update(19.0, 20));
        assert_eq!((hi.val, hi.iter), (20.0, 10));

        let mut lo = BestMetric::new(Better::Lower);
        assert!(lo.update(0.5, 1));
        assert!(lo.update(0.4, 2));
        assert_eq!(lo.iter, 2);
    }

    #[test]
    fn test_unknown_metric() {
        let opts = MetricOptions {
            metric_type: "calculate_niqe".into(),
            crop_border: 0,
            test_y_channel: false,
            better: None,
        };
        assert!(calculate_metric(&opts, &flat(0.0), &flat(0.0)).is_err());
    }
}
