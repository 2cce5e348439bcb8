//! Batching over a [`Dataset`].

use std::sync::Arc;

use super::sampler::EnlargedSampler;
use super::{Batch, Dataset};
use crate::error::MlError;

pub struct DataLoader {
    dataset: Arc<dyn Dataset>,
    batch_size: usize,
    drop_last: bool,
    sampler: Option<EnlargedSampler>,
    epoch: usize,
}

impl std::fmt::Debug for DataLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLoader")
            .field("dataset", &self.dataset.name())
            .field("batch_size", &self.batch_size)
            .field("drop_last", &self.drop_last)
            .field("epoch", &self.epoch)
            .finish()
    }
}

impl DataLoader {
    /// Training loader: sampler-driven, incomplete last batch dropped.
    pub fn train(
        dataset: Arc<dyn Dataset>,
        batch_size: usize,
        sampler: EnlargedSampler,
    ) -> Result<Self, MlError> {
        if batch_size == 0 {
            return Err(MlError::config("batch_size_per_gpu must be positive"));
        }
        Ok(Self {
            dataset,
            batch_size,
            drop_last: true,
            sampler: Some(sampler),
            epoch: 0,
        })
    }

    /// Validation loader: one image per batch, dataset order.
    pub fn val(dataset: Arc<dyn Dataset>) -> Self {
        Self {
            dataset,
            batch_size: 1,
            drop_last: false,
            sampler: None,
            epoch: 0,
        }
    }

    pub fn dataset(&self) -> &Arc<dyn Dataset> {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn sampler(&self) -> Option<&EnlargedSampler> {
        self.sampler.as_ref()
    }

    /// Reseed the sampler for `epoch`.
    pub fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        if let Some(sampler) = &mut self.sampler {
            sampler.set_epoch(epoch);
        }
    }

    fn indices(&self) -> Vec<usize> {
        match &self.sampler {
            Some(sampler) => sampler.indices(),
            None => (0..self.dataset.len()).collect(),
        }
    }

    /// Number of batches in one pass.
    pub fn len(&self) -> usize {
        let n = self.sampler.as_ref().map_or(self.dataset.len(), EnlargedSampler::len);
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> BatchIter {
        BatchIter {
            dataset: Arc::clone(&self.dataset),
            indices: self.indices(),
            batch_size: self.batch_size,
            drop_last: self.drop_last,
            pos: 0,
        }
    }
}

/// Owned iterator over one pass; `Send` so a prefetch thread can drive it.
pub struct BatchIter {
    dataset: Arc<dyn Dataset>,
    indices: Vec<usize>,
    batch_size: usize,
    drop_last: bool,
    pos: usize,
}

impl std::fmt::Debug for BatchIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchIter")
            .field("dataset", &self.dataset.name())
            .field("pos", &self.pos)
            .field("len", &self.indices.len())
            .finish()
    }
}

impl Iterator for BatchIter {
    type Item = Result<Batch, MlError>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.indices.len().saturating_sub(self.pos);
        if remaining == 0 || (self.drop_last && remaining < self.batch_size) {
            return None;
        }
        let end = (self.pos + self.batch_size).min(self.indices.len());
        let chunk = &self.indices[self.pos..end];
        self.pos = end;
        Some(
            chunk
                .iter()
                .map(|&i| self.dataset.get(i))
                .collect::<Result<Vec<_>, _>>()
                .map(|samples| Batch { samples }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::SyntheticPairedDataset;

    fn dataset(n: usize) -> Arc<dyn Dataset> {
        Arc::new(SyntheticPairedDataset::new("syn", n, 8, 1, 2, 0).unwrap())
    }

    #[test]
    fn test_train_drops_last() {
        let sampler = EnlargedSampler::new(10, 1, 0, 1).unwrap();
        let loader = DataLoader::train(dataset(10), 4, sampler).unwrap();
        assert_eq!(loader.len(), 2);
        let batches: Vec<_> = loader.iter().collect::<Result<_, _>>().unwrap();
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == 4));
    }

    #[test]
    fn test_val_keeps_every_image() {
        let loader = DataLoader::val(dataset(3));
        assert_eq!(loader.len(), 3);
        let paths: Vec<_> = loader
            .iter()
            .map(|b| b.unwrap().samples[0].lq_path.clone())
            .collect();
        assert_eq!(paths.len(), 3);
        assert!(paths[0].ends_with("0000.ppm"));
    }

    #[test]
    fn test_set_epoch_reaches_sampler() {
        let sampler = EnlargedSampler::new(10, 1, 0, 1).unwrap();
        let mut loader = DataLoader::train(dataset(10), 2, sampler).unwrap();
        loader.set_epoch(5);
        assert_eq!(loader.sampler().unwrap().epoch(), 5);
    }

    #[test]
    fn test_zero_batch_rejected() {
        let sampler = EnlargedSampler::new(10, 1, 0, 1).unwrap();
        assert!(DataLoader::train(dataset(10), 0, sampler).is_err());
    }
}
