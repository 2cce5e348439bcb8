//! Batch prefetchers driving a [`DataLoader`] across epochs.

use std::sync::mpsc::{Receiver, sync_channel};
use std::thread::JoinHandle;

use srtrain_core::options::DatasetOptions;
use tracing::info;

use super::loader::{BatchIter, DataLoader};
use super::Batch;
use crate::error::MlError;

/// Source of training batches, restarted at each epoch boundary.
pub trait Prefetcher: Send {
    /// Reseed the underlying sampler.
    fn set_epoch(&mut self, epoch: usize);

    /// Start a new pass over the loader.
    fn reset(&mut self) -> Result<(), MlError>;

    /// Next batch of the current pass, `None` once it is exhausted.
    fn next_batch(&mut self) -> Result<Option<Batch>, MlError>;
}

/// Loads batches synchronously on the calling thread.
#[derive(Debug)]
pub struct CpuPrefetcher {
    loader: DataLoader,
    iter: Option<BatchIter>,
}

impl CpuPrefetcher {
    pub fn new(loader: DataLoader) -> Self {
        Self { loader, iter: None }
    }
}

impl Prefetcher for CpuPrefetcher {
    fn set_epoch(&mut self, epoch: usize) {
        self.loader.set_epoch(epoch);
    }

    fn reset(&mut self) -> Result<(), MlError> {
        self.iter = Some(self.loader.iter());
        Ok(())
    }

    fn next_batch(&mut self) -> Result<Option<Batch>, MlError> {
        match self.iter.as_mut().and_then(Iterator::next) {
            Some(batch) => batch.map(Some),
            None => Ok(None),
        }
    }
}

/// Loads batches on a background thread into a bounded queue so loading
/// overlaps with the optimize step.
pub struct QueuePrefetcher {
    loader: DataLoader,
    capacity: usize,
    rx: Option<Receiver<Result<Batch, MlError>>>,
    worker: Option<JoinHandle<()>>,
}

impl QueuePrefetcher {
    pub fn new(loader: DataLoader, capacity: usize) -> Self {
        Self {
            loader,
            capacity: capacity.max(1),
            rx: None,
            worker: None,
        }
    }

    fn stop(&mut self) {
        // dropping the receiver makes the worker's next send fail
        self.rx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Prefetcher for QueuePrefetcher {
    fn set_epoch(&mut self, epoch: usize) {
        self.loader.set_epoch(epoch);
    }

    fn reset(&mut self) -> Result<(), MlError> {
        self.stop();
        let (tx, rx) = sync_channel(self.capacity);
        let iter = self.loader.iter();
        let worker = std::thread::Builder::new()
            .name("srtrain-prefetch".to_string())
            .spawn(move || {
                for batch in iter {
                    if tx.send(batch).is_err() {
                        break;
                    }
                }
            })?;
        self.rx = Some(rx);
        self.worker = Some(worker);
        Ok(())
    }

    fn next_batch(&mut self) -> Result<Option<Batch>, MlError> {
        match self.rx.as_ref().map(Receiver::recv) {
            Some(Ok(batch)) => batch.map(Some),
            // sender gone: the pass is over
            Some(Err(_)) | None => Ok(None),
        }
    }
}

impl Drop for QueuePrefetcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pick the prefetcher named by `prefetch_mode`.
///
/// Absent or `cpu` loads inline; `cuda` uses the queued loader and requires
/// `pin_memory: true`.
pub fn build_prefetcher(
    loader: DataLoader,
    opts: &DatasetOptions,
) -> Result<Box<dyn Prefetcher>, MlError> {
    match opts.prefetch_mode.as_deref() {
        None | Some("cpu") => {
            info!("Use cpu prefetch dataloader: num_prefetch_queue = {}", opts.num_prefetch_queue);
            Ok(Box::new(CpuPrefetcher::new(loader)))
        }
        Some("cuda") => {
            if !opts.pin_memory {
                return Err(MlError::config("Please set pin_memory=True for CUDAPrefetcher."));
            }
            info!("Use queued prefetch dataloader: num_prefetch_queue = {}", opts.num_prefetch_queue);
            Ok(Box::new(QueuePrefetcher::new(loader, opts.num_prefetch_queue)))
        }
        Some(other) => Err(MlError::config(format!(
            "Wrong prefetch_mode {other}. Supported ones are: None, 'cuda', 'cpu'."
        ))),
    }
}
