use super::ThreadPool;
use crate::{CacheError, Result};

/// A pool backed by `rayon`'s work-stealing scheduler. Threads pull from
/// their own local queue and steal from others when idle, which tends to
/// balance load better than a single shared queue under bursty submission.
pub struct RayonThreadPool(rayon::ThreadPool);

impl ThreadPool for RayonThreadPool {
    fn new(threads: u32) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads as usize)
            .build()
            .map_err(|e| CacheError::IllegalState(format!("failed to build rayon pool: {}", e)))?;
        Ok(RayonThreadPool(pool))
    }

    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.0.spawn(job)
    }
}
