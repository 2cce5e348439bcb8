//! Distributed sampler that virtually enlarges the dataset.
//!
//! Iterating a small dataset several times per epoch saves the per-epoch
//! restart cost. Each rank draws a disjoint strided slice of one shuffled
//! permutation, and indices wrap modulo the real dataset length.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::error::MlError;

#[derive(Debug, Clone)]
pub struct EnlargedSampler {
    dataset_len: usize,
    world_size: usize,
    rank: usize,
    epoch: usize,
    num_samples: usize,
    total_size: usize,
}

impl EnlargedSampler {
    pub fn new(
        dataset_len: usize,
        world_size: usize,
        rank: usize,
        ratio: usize,
    ) -> Result<Self, MlError> {
        if world_size == 0 || rank >= world_size {
            return Err(MlError::config(format!(
                "rank {rank} is not valid for world size {world_size}"
            )));
        }
        if ratio == 0 {
            return Err(MlError::config("dataset_enlarge_ratio must be positive"));
        }
        let num_samples = (dataset_len * ratio).div_ceil(world_size);
        Ok(Self {
            dataset_len,
            world_size,
            rank,
            epoch: 0,
            num_samples,
            total_size: num_samples * world_size,
        })
    }

    pub fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Samples drawn by this rank per epoch.
    pub fn len(&self) -> usize {
        self.num_samples
    }

    pub fn is_empty(&self) -> bool {
        self.num_samples == 0
    }

    /// This rank's indices for the current epoch.
    pub fn indices(&self) -> Vec<usize> {
        if self.dataset_len == 0 {
            return Vec::new();
        }
        let mut perm: Vec<usize> = (0..self.total_size).collect();
        perm.shuffle(&mut StdRng::seed_from_u64(self.epoch as u64));
        perm.into_iter()
            .skip(self.rank)
            .step_by(self.world_size)
            .map(|v| v % self.dataset_len)
            .collect()
    }
}
