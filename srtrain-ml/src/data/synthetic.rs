//! Deterministic paired dataset built from smooth procedural patterns.
//!
//! Every GT image is a sum of low-frequency sinusoids drawn from an RNG
//! seeded by `(seed, index)`, so the same index always yields the same
//! pair. The LQ image is the GT box-downsampled by `scale`.

use std::f32::consts::TAU;
use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use srtrain_core::options::DatasetOptions;

use super::{Dataset, Sample, extra_usize, image::Image, require_scale};
use crate::error::MlError;

const DEFAULT_NUM_IMAGES: usize = 32;
const DEFAULT_GT_SIZE: usize = 32;
const DEFAULT_CHANNELS: usize = 3;

#[derive(Debug, Clone)]
pub struct SyntheticPairedDataset {
    name: String,
    num_images: usize,
    gt_size: usize,
    channels: usize,
    scale: usize,
    seed: u64,
}

impl SyntheticPairedDataset {
    pub fn new(
        name: impl Into<String>,
        num_images: usize,
        gt_size: usize,
        channels: usize,
        scale: usize,
        seed: u64,
    ) -> Result<Self, MlError> {
        if scale == 0 || gt_size % scale != 0 {
            return Err(MlError::config(format!(
                "gt_size {gt_size} must be a multiple of scale {scale}"
            )));
        }
        if channels != 1 && channels != 3 {
            return Err(MlError::config(format!(
                "synthetic images have 1 or 3 channels, not {channels}"
            )));
        }
        Ok(Self {
            name: name.into(),
            num_images,
            gt_size,
            channels,
            scale,
            seed,
        })
    }

    /// Keys: `num_images`, `gt_size`, `channels`, optional `seed`.
    pub fn from_options(opts: &DatasetOptions, seed: u64) -> Result<Self, MlError> {
        let seed = match opts.extra.get("seed") {
            Some(v) => v
                .as_u64()
                .ok_or_else(|| MlError::config(format!("{}: seed must be an integer", opts.name)))?,
            None => seed,
        };
        Self::new(
            opts.name.clone(),
            extra_usize(opts, "num_images", DEFAULT_NUM_IMAGES)?,
            extra_usize(opts, "gt_size", DEFAULT_GT_SIZE)?,
            extra_usize(opts, "channels", DEFAULT_CHANNELS)?,
            require_scale(opts)?,
            seed,
        )
    }

    fn gt_image(&self, index: usize) -> Image {
        let mut rng = StdRng::seed_from_u64(
            self.seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ index as u64,
        );
        let n = self.gt_size as f32;
        let mut img = Image::zeros(self.channels, self.gt_size, self.gt_size);
        for c in 0..self.channels {
            let fx = rng.gen_range(0.5f32..3.0) * TAU / n;
            let fy = rng.gen_range(0.5f32..3.0) * TAU / n;
            let (px, py) = (rng.gen_range(0.0f32..TAU), rng.gen_range(0.0f32..TAU));
            let base = rng.gen_range(0.3f32..0.7);
            for y in 0..self.gt_size {
                for x in 0..self.gt_size {
                    let v = base + 0.25 * (fx * x as f32 + px).sin() * (fy * y as f32 + py).cos();
                    img.set(c, y, x, v);
                }
            }
        }
        img.clamp01();
        img
    }
}

impl Dataset for SyntheticPairedDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.num_images
    }

    fn get(&self, index: usize) -> Result<Sample, MlError> {
        if index >= self.num_images {
            return Err(MlError::dataset(format!(
                "index {index} out of range for {} images",
                self.num_images
            )));
        }
        let gt = self.gt_image(index);
        let lq = gt.downsample_box(self.scale)?;
        let path = PathBuf::from(format!("{}/{index:04}.ppm", self.name));
        Ok(Sample {
            lq,
            gt: Some(gt),
            lq_path: path.clone(),
            gt_path: Some(path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_per_index() {
        let ds = SyntheticPairedDataset::new("syn", 4, 16, 3, 4, 7).unwrap();
        let a = ds.get(2).unwrap();
        let b = ds.get(2).unwrap();
        assert_eq!(a.gt, b.gt);
        assert_ne!(ds.get(1).unwrap().gt, a.gt);
    }

    #[test]
    fn test_lq_shape_follows_scale() {
        let ds = SyntheticPairedDataset::new("syn", 1, 16, 1, 2, 0).unwrap();
        let s = ds.get(0).unwrap();
        assert_eq!(s.lq.shape(), (1, 8, 8));
        assert_eq!(s.gt.unwrap().shape(), (1, 16, 16));
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(SyntheticPairedDataset::new("syn", 1, 10, 3, 4, 0).is_err());
        assert!(SyntheticPairedDataset::new("syn", 1, 8, 2, 4, 0).is_err());
    }

    #[test]
    fn test_out_of_range() {
        let ds = SyntheticPairedDataset::new("syn", 2, 8, 3, 4, 0).unwrap();
        assert!(ds.get(2).is_err());
    }
}
