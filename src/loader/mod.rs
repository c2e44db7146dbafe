//! The single-flight load/display engine (CORE-B): deduplicates concurrent
//! loads of the same URI, honours pause/resume and cancellation, and routes
//! work between a small pool for cache misses and a larger one for hits.

mod collaborators;
mod uri_locks;

pub use collaborators::{DecodedImage, Decoder, DisplayListener, DisplayTarget, Dispatcher, Downloader, FailureReason, MemoryCache};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use log::debug;

use crate::error::CancelReason;
use crate::key_adapter::KeyedDiskCache;
use crate::thread_pool::ThreadPool;

use uri_locks::UriLockMap;

/// Sizing and timing knobs for a [`LoadEngine`].
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub uncached_pool_size: u32,
    pub cached_pool_size: u32,
    pub dispatch_pool_size: u32,
    /// How long a paused/slow-network checkpoint sleeps between cancellation
    /// rechecks.
    pub poll_interval: Duration,
    /// Whether a failed task sets the target's configured failure image
    /// before invoking the listener. Off for callers that would rather
    /// leave the view untouched (or handle it themselves) on failure.
    pub show_failure_image: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        LoaderOptions {
            uncached_pool_size: 3,
            cached_pool_size: 8,
            dispatch_pool_size: 2,
            poll_interval: Duration::from_millis(200),
            show_failure_image: true,
        }
    }
}

/// Per-request knobs; distinct from the engine-wide [`LoaderOptions`].
#[derive(Debug, Clone, Default)]
pub struct DisplayOptions {
    pub target_width: u32,
    pub target_height: u32,
    /// Run the final display step on the calling thread instead of via the
    /// [`Dispatcher`].
    pub synchronous: bool,
}

pub struct DisplayRequest {
    pub uri: String,
    pub options: DisplayOptions,
}

/// Coordinates [`KeyedDiskCache`] lookups, a downloader, a decoder, a memory
/// cache, and a main-thread dispatcher into single-flight, cancellable
/// display tasks.
///
/// Generic over the thread pool implementation so callers can pick
/// `NaiveThreadPool`, `SharedQueueThreadPool`, or `RayonThreadPool` for the
/// dispatch/cached/uncached executors; the engine uses the same pool type for
/// all three.
pub struct LoadEngine<P: ThreadPool> {
    disk_cache: KeyedDiskCache,
    decoder: Arc<dyn Decoder>,
    downloader: Arc<dyn Downloader>,
    memory_cache: Arc<dyn MemoryCache>,
    dispatcher: Arc<dyn Dispatcher>,
    key_for_view: Mutex<HashMap<u64, String>>,
    uri_locks: UriLockMap,
    dispatch_pool: P,
    cached_pool: P,
    uncached_pool: P,
    paused: Arc<(Mutex<bool>, Condvar)>,
    stopped: Arc<AtomicBool>,
    deny_network_downloads: Arc<AtomicBool>,
    handle_slow_network: Arc<AtomicBool>,
    poll_interval: Duration,
    show_failure_image: bool,
}

impl<P: ThreadPool + Send + Sync + 'static> LoadEngine<P> {
    pub fn new(
        disk_cache: KeyedDiskCache,
        decoder: Arc<dyn Decoder>,
        downloader: Arc<dyn Downloader>,
        memory_cache: Arc<dyn MemoryCache>,
        dispatcher: Arc<dyn Dispatcher>,
        options: LoaderOptions,
    ) -> crate::error::Result<Arc<Self>> {
        Ok(Arc::new(LoadEngine {
            disk_cache,
            decoder,
            downloader,
            memory_cache,
            dispatcher,
            key_for_view: Mutex::new(HashMap::new()),
            uri_locks: UriLockMap::new(),
            dispatch_pool: P::new(options.dispatch_pool_size)?,
            cached_pool: P::new(options.cached_pool_size)?,
            uncached_pool: P::new(options.uncached_pool_size)?,
            paused: Arc::new((Mutex::new(false), Condvar::new())),
            stopped: Arc::new(AtomicBool::new(false)),
            deny_network_downloads: Arc::new(AtomicBool::new(false)),
            handle_slow_network: Arc::new(AtomicBool::new(false)),
            poll_interval: options.poll_interval,
            show_failure_image: options.show_failure_image,
        }))
    }

    pub fn pause(&self) {
        let (lock, _) = &*self.paused;
        *lock.lock().expect("pause mutex poisoned") = true;
    }

    pub fn resume(&self) {
        let (lock, cvar) = &*self.paused;
        *lock.lock().expect("pause mutex poisoned") = false;
        cvar.notify_all();
    }

    /// Stops accepting new work from in-flight tasks: every checkpoint they
    /// hit from now on cancels with `Interrupted`. Already-dispatched tasks
    /// that are past their last checkpoint still complete.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.resume(); // don't leave paused tasks stuck waiting forever
    }

    pub fn deny_network_downloads(&self, deny: bool) {
        self.deny_network_downloads.store(deny, Ordering::SeqCst);
    }

    pub fn handle_slow_network(&self, slow: bool) {
        self.handle_slow_network.store(slow, Ordering::SeqCst);
    }

    /// Marks any task currently targeting this view as stale: it will cancel
    /// with `ViewReused` at its next checkpoint.
    pub fn cancel_display_task_for(&self, view_id: u64) {
        self.key_for_view
            .lock()
            .expect("key_for_view mutex poisoned")
            .remove(&view_id);
    }

    /// Entry point: looks up the memory cache synchronously, and on miss
    /// hands off to the dispatch pool for the disk lookup that picks between
    /// the cached and uncached executors.
    pub fn submit(
        self: &Arc<Self>,
        request: DisplayRequest,
        target: Arc<dyn DisplayTarget>,
        mut listener: Box<dyn DisplayListener>,
    ) {
        let key = request.uri.clone();
        self.key_for_view
            .lock()
            .expect("key_for_view mutex poisoned")
            .insert(target.id(), key.clone());

        listener.on_loading_started(&request.uri);

        if let Some(image) = self.memory_cache.get(&key) {
            self.publish(&request.uri, &target, listener, image, request.options.synchronous);
            return;
        }

        let engine = Arc::clone(self);
        self.dispatch_pool.spawn(move || {
            engine.dispatch(request, target, listener);
        });
    }

    fn dispatch(
        self: Arc<Self>,
        request: DisplayRequest,
        target: Arc<dyn DisplayTarget>,
        listener: Box<dyn DisplayListener>,
    ) {
        if let Some(reason) = self.checkpoint(&*target, &request.uri) {
            self.cancel(&request.uri, reason, listener);
            return;
        }

        match self.disk_cache.get(&request.uri) {
            Ok(cached_path) => {
                let engine = Arc::clone(&self);
                let pool = if cached_path.is_some() {
                    &self.cached_pool
                } else {
                    &self.uncached_pool
                };
                pool.spawn(move || engine.run(request, target, listener, cached_path));
            }
            Err(_) => self.fail(&request.uri, &target, FailureReason::Io, listener),
        }
    }

    fn run(
        self: Arc<Self>,
        request: DisplayRequest,
        target: Arc<dyn DisplayTarget>,
        listener: Box<dyn DisplayListener>,
        cached_path: Option<PathBuf>,
    ) {
        if let Some(reason) = self.wait_while_paused(&*target, &request.uri) {
            self.cancel(&request.uri, reason, listener);
            return;
        }

        if self.handle_slow_network.load(Ordering::SeqCst) && cached_path.is_none() {
            std::thread::sleep(self.poll_interval);
            if let Some(reason) = self.checkpoint(&*target, &request.uri) {
                self.cancel(&request.uri, reason, listener);
                return;
            }
        }

        let uri_lock = self.uri_locks.lock_for(&request.uri);
        let _guard = uri_lock.lock().expect("uri lock poisoned");

        if let Some(reason) = self.checkpoint(&*target, &request.uri) {
            self.cancel(&request.uri, reason, listener);
            return;
        }

        if let Some(image) = self.memory_cache.get(&request.uri) {
            self.publish(&request.uri, &target, listener, image, request.options.synchronous);
            return;
        }

        // `cached_path` was looked up in `dispatch` before this task ever
        // reached the URI lock, purely to pick a pool. It can be stale by
        // now: a peer that held the lock first may have just downloaded and
        // committed this same URI. Re-check the disk cache here, under the
        // lock, so single-flight actually holds — this is the only lookup
        // this task's download decision may rely on.
        let disk_path = match self.disk_cache.get(&request.uri) {
            Ok(path) => path,
            Err(_) => {
                self.fail(&request.uri, &target, FailureReason::Io, listener);
                return;
            }
        };

        let path = match disk_path {
            Some(path) => path,
            None => {
                if self.deny_network_downloads.load(Ordering::SeqCst) {
                    self.fail(&request.uri, &target, FailureReason::NetworkDenied, listener);
                    return;
                }
                let mut stream = match self.downloader.open_stream(&request.uri) {
                    Ok(stream) => stream,
                    Err(_) => {
                        self.fail(&request.uri, &target, FailureReason::Network, listener);
                        return;
                    }
                };
                let saved = self.disk_cache.save_stream(&request.uri, &mut *stream, None);
                match saved {
                    Ok(true) => {}
                    Ok(false) => {
                        self.fail(&request.uri, &target, FailureReason::Io, listener);
                        return;
                    }
                    Err(_) => {
                        self.fail(&request.uri, &target, FailureReason::Io, listener);
                        return;
                    }
                }
                match self.disk_cache.get(&request.uri) {
                    Ok(Some(path)) => path,
                    _ => {
                        self.fail(&request.uri, &target, FailureReason::Io, listener);
                        return;
                    }
                }
            }
        };

        let image = match self
            .decoder
            .decode(&path, request.options.target_width, request.options.target_height)
        {
            Ok(image) => image,
            Err(_) => {
                self.fail(&request.uri, &target, FailureReason::Decode, listener);
                return;
            }
        };

        self.memory_cache.put(&request.uri, image.clone());
        self.publish(&request.uri, &target, listener, image, request.options.synchronous);
    }

    fn publish(
        &self,
        uri: &str,
        target: &Arc<dyn DisplayTarget>,
        mut listener: Box<dyn DisplayListener>,
        image: DecodedImage,
        synchronous: bool,
    ) {
        if let Some(reason) = self.checkpoint(&**target, uri) {
            self.cancel(uri, reason, listener);
            return;
        }
        let target = Arc::clone(target);
        let uri = uri.to_owned();
        if synchronous {
            target.set_image(image);
            listener.on_loading_complete(&uri);
        } else {
            self.dispatcher.dispatch(Box::new(move || {
                target.set_image(image);
                listener.on_loading_complete(&uri);
            }));
        }
    }

    fn fail(
        &self,
        uri: &str,
        target: &Arc<dyn DisplayTarget>,
        reason: FailureReason,
        mut listener: Box<dyn DisplayListener>,
    ) {
        debug!("load task for {:?} failed: {:?}", uri, reason);
        let uri = uri.to_owned();
        let target = Arc::clone(target);
        let show_failure_image = self.show_failure_image;
        self.dispatcher.dispatch(Box::new(move || {
            if show_failure_image {
                target.set_failure_image();
            }
            listener.on_loading_failed(&uri, reason);
        }));
    }

    fn cancel(&self, uri: &str, reason: CancelReason, mut listener: Box<dyn DisplayListener>) {
        debug!("load task for {:?} cancelled: {:?}", uri, reason);
        let uri = uri.to_owned();
        self.dispatcher.dispatch(Box::new(move || {
            listener.on_loading_cancelled(&uri, reason);
        }));
    }

    /// Single non-blocking cancellation check: stopped, view collected, or
    /// view reused.
    fn checkpoint(&self, target: &dyn DisplayTarget, expected_key: &str) -> Option<CancelReason> {
        if self.stopped.load(Ordering::SeqCst) {
            return Some(CancelReason::Interrupted);
        }
        if target.is_collected() {
            return Some(CancelReason::ViewCollected);
        }
        let map = self.key_for_view.lock().expect("key_for_view mutex poisoned");
        match map.get(&target.id()) {
            Some(k) if k == expected_key => None,
            _ => Some(CancelReason::ViewReused),
        }
    }

    /// Blocks on the pause gate, waking periodically to recheck
    /// cancellation. Returns the reason if cancelled while paused.
    fn wait_while_paused(&self, target: &dyn DisplayTarget, expected_key: &str) -> Option<CancelReason> {
        let (lock, cvar) = &*self.paused;
        let mut guard = lock.lock().expect("pause mutex poisoned");
        while *guard {
            if let Some(reason) = self.checkpoint(target, expected_key) {
                return Some(if reason == CancelReason::ViewReused || reason == CancelReason::ViewCollected {
                    CancelReason::PausedThenCancelled
                } else {
                    reason
                });
            }
            let (next, _timeout) = cvar
                .wait_timeout(guard, self.poll_interval)
                .expect("pause mutex poisoned");
            guard = next;
        }
        None
    }
}
