//! Thread pool abstractions shared by the background trim worker (CORE-A)
//! and the load/display engine's cached/uncached executors (CORE-B).
//!
//! All three implementations are interchangeable: callers depend only on
//! the [`ThreadPool`] trait, never on a concrete pool type.

mod naive;
mod rayon;
mod shared_queue;

pub use self::naive::NaiveThreadPool;
pub use self::rayon::RayonThreadPool;
pub use self::shared_queue::SharedQueueThreadPool;

use crate::Result;

/// A pool that jobs can be spawned into.
pub trait ThreadPool {
    /// Creates a new thread pool, immediately spawning the specified number
    /// of threads.
    ///
    /// Returns an error if any thread fails to spawn. All previously-spawned
    /// threads are terminated rather than leaking a half-started pool.
    fn new(threads: u32) -> Result<Self>
    where
        Self: Sized;

    /// Spawns a function into the thread pool.
    ///
    /// Spawning always succeeds, but if the function panics the pool
    /// continues to operate with the same number of threads — the thread
    /// count is not reduced nor is the pool destroyed or corrupted.
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static;
}
