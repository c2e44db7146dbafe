use std::thread;

use super::ThreadPool;
use crate::Result;

/// Not actually a pool: spawns a brand new OS thread on every call to
/// `spawn`. Useful for tests and for the smallest deployments where pooling
/// overhead isn't worth the complexity.
pub struct NaiveThreadPool;

impl ThreadPool for NaiveThreadPool {
    fn new(_threads: u32) -> Result<Self> {
        Ok(NaiveThreadPool)
    }

    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        thread::spawn(job);
    }
}

