//! GT/LQ image pairs read from two folders of netpbm files.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use srtrain_core::options::DatasetOptions;
use tracing::debug;
use walkdir::WalkDir;

use super::{Dataset, Sample, extra_bool, extra_usize, image::Image, netpbm, require_scale};
use crate::error::MlError;

#[derive(Debug)]
pub struct PairedImageDataset {
    name: String,
    gt_root: PathBuf,
    lq_root: PathBuf,
    files: Vec<PathBuf>,
    scale: usize,
    /// GT patch size for random crops in the training phase.
    gt_size: Option<usize>,
    use_hflip: bool,
    train: bool,
    seed: u64,
    draws: AtomicU64,
}

/// Relative paths listed in a meta-info file (first token of each line).
fn paths_from_meta_info(meta: &Path) -> Result<Vec<PathBuf>, MlError> {
    let text = std::fs::read_to_string(meta)
        .map_err(|e| MlError::dataset(format!("{}: {e}", meta.display())))?;
    Ok(text
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(PathBuf::from)
        .collect())
}

fn paths_from_folder(root: &Path) -> Result<Vec<PathBuf>, MlError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| MlError::dataset(e.to_string()))?;
        if entry.file_type().is_file() && netpbm::is_netpbm(entry.path()) {
            if let Ok(rel) = entry.path().strip_prefix(root) {
                files.push(rel.to_path_buf());
            }
        }
    }
    Ok(files)
}

impl PairedImageDataset {
    pub fn from_options(opts: &DatasetOptions, seed: u64) -> Result<Self, MlError> {
        let gt_root = opts
            .dataroot_gt
            .clone()
            .ok_or_else(|| MlError::config(format!("{}: dataroot_gt is required", opts.name)))?;
        let lq_root = opts
            .dataroot_lq
            .clone()
            .ok_or_else(|| MlError::config(format!("{}: dataroot_lq is required", opts.name)))?;
        let files = match &opts.meta_info_file {
            Some(meta) => paths_from_meta_info(meta)?,
            None => paths_from_folder(&gt_root)?,
        };
        debug!(dataset = %opts.name, files = files.len(), "Paired image list loaded");
        let gt_size = match extra_usize(opts, "gt_size", 0)? {
            0 => None,
            n => Some(n),
        };
        Ok(Self {
            name: opts.name.clone(),
            gt_root,
            lq_root,
            files,
            scale: require_scale(opts)?,
            gt_size,
            use_hflip: extra_bool(opts, "use_hflip", false)?,
            train: opts.phase == "train",
            seed,
            draws: AtomicU64::new(0),
        })
    }

    /// Crop aligned LQ/GT patches at a random LQ position.
    fn paired_random_crop(
        &self,
        gt: &Image,
        lq: &Image,
        gt_size: usize,
        rng: &mut StdRng,
    ) -> Result<(Image, Image), MlError> {
        let lq_size = gt_size / self.scale;
        if gt.height != lq.height * self.scale || gt.width != lq.width * self.scale {
            return Err(MlError::dataset(format!(
                "Scale mismatches. GT ({}, {}) is not {}x multiplication of LQ ({}, {}).",
                gt.height, gt.width, self.scale, lq.height, lq.width
            )));
        }
        if lq.height < lq_size || lq.width < lq_size {
            return Err(MlError::dataset(format!(
                "LQ ({}, {}) is smaller than patch size ({lq_size}, {lq_size}).",
                lq.height, lq.width
            )));
        }
        let top = rng.gen_range(0..=lq.height - lq_size);
        let left = rng.gen_range(0..=lq.width - lq_size);
        let lq = lq.crop(top, left, lq_size, lq_size)?;
        let gt = gt.crop(top * self.scale, left * self.scale, gt_size, gt_size)?;
        Ok((gt, lq))
    }
}

impl Dataset for PairedImageDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.files.len()
    }

    fn get(&self, index: usize) -> Result<Sample, MlError> {
        let rel = self
            .files
            .get(index)
            .ok_or_else(|| MlError::dataset(format!("index {index} out of range")))?;
        let gt_path = self.gt_root.join(rel);
        let lq_path = self.lq_root.join(rel);
        let mut gt = netpbm::read(&gt_path)?;
        let mut lq = netpbm::read(&lq_path)?;

        if self.train {
            let draw = self.draws.fetch_add(1, Ordering::Relaxed);
            let mut rng =
                StdRng::seed_from_u64(self.seed ^ draw.rotate_left(17) ^ index as u64);
            if let Some(gt_size) = self.gt_size {
                (gt, lq) = self.paired_random_crop(&gt, &lq, gt_size, &mut rng)?;
            }
            if self.use_hflip && rng.gen_bool(0.5) {
                gt = gt.flip_horizontal();
                lq = lq.flip_horizontal();
            }
        } else {
            let (h, w) = (lq.height * self.scale, lq.width * self.scale);
            if gt.height > h || gt.width > w {
                gt = gt.crop(0, 0, h.min(gt.height), w.min(gt.width))?;
            }
        }

        Ok(Sample {
            lq,
            gt: Some(gt),
            lq_path,
            gt_path: Some(gt_path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value;

    fn write_pair(dir: &Path, name: &str, size: usize, scale: usize) {
        let mut gt = Image::zeros(3, size, size);
        for (i, v) in gt.data.iter_mut().enumerate() {
            *v = (i % 7) as f32 / 7.0;
        }
        let lq = gt.downsample_box(scale).unwrap();
        std::fs::create_dir_all(dir.join("gt")).unwrap();
        std::fs::create_dir_all(dir.join("lq")).unwrap();
        netpbm::write(&dir.join("gt").join(name), &gt).unwrap();
        netpbm::write(&dir.join("lq").join(name), &lq).unwrap();
    }

    fn options(dir: &Path, phase: &str) -> DatasetOptions {
        let mut opts = DatasetOptions {
            name: "pairs".into(),
            dataset_type: "PairedImageDataset".into(),
            phase: phase.into(),
            scale: Some(2),
            dataroot_gt: Some(dir.join("gt")),
            dataroot_lq: Some(dir.join("lq")),
            ..Default::default()
        };
        opts.extra.insert(Value::from("gt_size"), Value::from(4));
        opts.extra.insert(Value::from("use_hflip"), Value::from(true));
        opts
    }

    #[test]
    fn test_folder_listing_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "b.ppm", 8, 2);
        write_pair(dir.path(), "a.ppm", 8, 2);
        let ds = PairedImageDataset::from_options(&options(dir.path(), "val"), 0).unwrap();
        assert_eq!(ds.files, vec![PathBuf::from("a.ppm"), PathBuf::from("b.ppm")]);
    }

    #[test]
    fn test_train_crop_is_aligned() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "a.ppm", 8, 2);
        let ds = PairedImageDataset::from_options(&options(dir.path(), "train"), 3).unwrap();
        let s = ds.get(0).unwrap();
        assert_eq!(s.lq.shape(), (3, 2, 2));
        assert_eq!(s.gt.unwrap().shape(), (3, 4, 4));
    }

    #[test]
    fn test_val_keeps_full_image() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "a.ppm", 8, 2);
        let ds = PairedImageDataset::from_options(&options(dir.path(), "val"), 0).unwrap();
        let s = ds.get(0).unwrap();
        assert_eq!(s.gt.unwrap().shape(), (3, 8, 8));
    }

    #[test]
    fn test_meta_info_file_selects_entries() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "a.ppm", 8, 2);
        write_pair(dir.path(), "b.ppm", 8, 2);
        let meta = dir.path().join("meta.txt");
        std::fs::write(&meta, "b.ppm (8,8,3)\n").unwrap();
        let mut opts = options(dir.path(), "val");
        opts.meta_info_file = Some(meta);
        let ds = PairedImageDataset::from_options(&opts, 0).unwrap();
        assert_eq!(ds.len(), 1);
        assert!(ds.get(0).unwrap().gt_path.unwrap().ends_with("b.ppm"));
    }

    #[test]
    fn test_requires_lq_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path(), "val");
        opts.dataroot_lq = None;
        assert!(PairedImageDataset::from_options(&opts, 0).is_err());
    }
}
