//! Planar `f32` images in CHW layout with values in `[0, 1]`.

use serde::{Deserialize, Serialize};

use crate::error::MlError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl Image {
    pub fn zeros(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
            data: vec![0.0; channels * height * width],
        }
    }

    pub fn from_data(
        channels: usize,
        height: usize,
        width: usize,
        data: Vec<f32>,
    ) -> Result<Self, MlError> {
        if data.len() != channels * height * width {
            return Err(MlError::codec(format!(
                "buffer of {} values does not match {channels}x{height}x{width}",
                data.len()
            )));
        }
        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    #[inline]
    fn offset(&self, c: usize, y: usize, x: usize) -> usize {
        (c * self.height + y) * self.width + x
    }

    #[inline]
    pub fn get(&self, c: usize, y: usize, x: usize) -> f32 {
        self.data[self.offset(c, y, x)]
    }

    #[inline]
    pub fn set(&mut self, c: usize, y: usize, x: usize, value: f32) {
        let i = self.offset(c, y, x);
        self.data[i] = value;
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }

    pub fn pixels_per_channel(&self) -> usize {
        self.height * self.width
    }

    pub fn channel(&self, c: usize) -> &[f32] {
        let n = self.pixels_per_channel();
        &self.data[c * n..(c + 1) * n]
    }

    /// Average-pool by `scale` (the degradation used for synthetic pairs).
    pub fn downsample_box(&self, scale: usize) -> Result<Image, MlError> {
        if scale == 0 || self.height % scale != 0 || self.width % scale != 0 {
            return Err(MlError::dataset(format!(
                "{}x{} image is not divisible by scale {scale}",
                self.height, self.width
            )));
        }
        let (h, w) = (self.height / scale, self.width / scale);
        let mut out = Image::zeros(self.channels, h, w);
        let norm = (scale * scale) as f32;
        for c in 0..self.channels {
            for y in 0..h {
                for x in 0..w {
                    let mut acc = 0.0;
                    for dy in 0..scale {
                        for dx in 0..scale {
                            acc += self.get(c, y * scale + dy, x * scale + dx);
                        }
                    }
                    out.set(c, y, x, acc / norm);
                }
            }
        }
        Ok(out)
    }

    /// Nearest-neighbour upsampling by `scale`.
    pub fn upsample_nearest(&self, scale: usize) -> Image {
        let (h, w) = (self.height * scale, self.width * scale);
        let mut out = Image::zeros(self.channels, h, w);
        for c in 0..self.channels {
            for y in 0..h {
                for x in 0..w {
                    out.set(c, y, x, self.get(c, y / scale, x / scale));
                }
            }
        }
        out
    }

    /// Crop a `height x width` window starting at `(top, left)`.
    pub fn crop(&self, top: usize, left: usize, height: usize, width: usize) -> Result<Image, MlError> {
        if top + height > self.height || left + width > self.width {
            return Err(MlError::dataset(format!(
                "crop {height}x{width}@({top},{left}) exceeds {}x{}",
                self.height, self.width
            )));
        }
        let mut out = Image::zeros(self.channels, height, width);
        for c in 0..self.channels {
            for y in 0..height {
                for x in 0..width {
                    out.set(c, y, x, self.get(c, top + y, left + x));
                }
            }
        }
        Ok(out)
    }

    /// Drop `border` pixels on every side.
    pub fn crop_border(&self, border: usize) -> Result<Image, MlError> {
        if border == 0 {
            return Ok(self.clone());
        }
        if 2 * border >= self.height || 2 * border >= self.width {
            return Err(MlError::dataset(format!(
                "crop_border {border} leaves nothing of {}x{}",
                self.height, self.width
            )));
        }
        self.crop(
            border,
            border,
            self.height - 2 * border,
            self.width - 2 * border,
        )
    }

    pub fn flip_horizontal(&self) -> Image {
        let mut out = Image::zeros(self.channels, self.height, self.width);
        for c in 0..self.channels {
            for y in 0..self.height {
                for x in 0..self.width {
                    out.set(c, y, self.width - 1 - x, self.get(c, y, x));
                }
            }
        }
        out
    }

    pub fn clamp01(&mut self) {
        for v in &mut self.data {
            *v = v.clamp(0.0, 1.0);
        }
    }
}
