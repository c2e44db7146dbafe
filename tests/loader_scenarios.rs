//! Property tests for the single-flight load/display engine (CORE-B),
//! exercised against fake decoder/downloader/memory-cache/dispatcher
//! collaborators rather than real network or bitmap code.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use snapcache::thread_pool::NaiveThreadPool;
use snapcache::{
    DecodedImage, Decoder, DisplayListener, DisplayOptions, DisplayRequest, DisplayTarget,
    Dispatcher, Downloader, FailureReason, KeyedDiskCache, LoadEngine, LoaderOptions, MemoryCache,
    NameGenerator, Result,
};

struct IdentityGenerator;
impl NameGenerator for IdentityGenerator {
    fn generate(&self, identifier: &str) -> String {
        // Map arbitrary URIs onto the cache's constrained alphabet with a
        // cheap stand-in hash, the same role a real name generator plays.
        format!("k{:x}", fnv1a(identifier.as_bytes()))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

struct CountingDownloader {
    calls: Arc<AtomicU32>,
    delay: Duration,
}
impl Downloader for CountingDownloader {
    fn open_stream(&self, uri: &str) -> Result<Box<dyn std::io::Read + Send>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Ok(Box::new(Cursor::new(uri.as_bytes().to_vec())))
    }
}

struct EchoDecoder;
impl Decoder for EchoDecoder {
    fn decode(&self, path: &std::path::Path, _w: u32, _h: u32) -> Result<DecodedImage> {
        let bytes = std::fs::read(path)?;
        Ok(DecodedImage { width: 1, height: 1, bytes })
    }
}

#[derive(Default)]
struct NullMemoryCache;
impl MemoryCache for NullMemoryCache {
    fn put(&self, _key: &str, _image: DecodedImage) {}
    fn get(&self, _key: &str) -> Option<DecodedImage> {
        None
    }
    fn remove(&self, _key: &str) {}
    fn clear(&self) {}
}

struct InlineDispatcher;
impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, job: Box<dyn FnOnce() + Send>) {
        job();
    }
}

struct FakeTarget {
    id: u64,
    collected: AtomicBool,
}
impl DisplayTarget for FakeTarget {
    fn id(&self) -> u64 {
        self.id
    }
    fn set_image(&self, _image: DecodedImage) {}
    fn set_failure_image(&self) {}
    fn is_collected(&self) -> bool {
        self.collected.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct RecordingListener {
    completed: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    failed: Arc<Mutex<Option<FailureReason>>>,
}
impl DisplayListener for RecordingListener {
    fn on_loading_complete(&mut self, _uri: &str) {
        self.completed.store(true, Ordering::SeqCst);
    }
    fn on_loading_cancelled(&mut self, _uri: &str, _reason: snapcache::CancelReason) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
    fn on_loading_failed(&mut self, _uri: &str, reason: FailureReason) {
        *self.failed.lock().unwrap() = Some(reason);
    }
}

fn build_engine(
    downloader: Arc<dyn Downloader>,
) -> Arc<LoadEngine<NaiveThreadPool>> {
    let dir = tempfile::tempdir().unwrap();
    // Leak the tempdir path's owner for the duration of the test process; the
    // directory is cleaned up by the OS/test harness regardless.
    let dir = Box::leak(Box::new(dir));
    let disk_cache = KeyedDiskCache::open(
        dir.path(),
        None,
        Default::default(),
        Arc::new(IdentityGenerator),
    )
    .unwrap();

    LoadEngine::new(
        disk_cache,
        Arc::new(EchoDecoder),
        downloader,
        Arc::new(NullMemoryCache::default()),
        Arc::new(InlineDispatcher),
        LoaderOptions::default(),
    )
    .unwrap()
}

#[test]
fn concurrent_requests_for_same_uri_download_exactly_once() {
    let calls = Arc::new(AtomicU32::new(0));
    let downloader = Arc::new(CountingDownloader {
        calls: Arc::clone(&calls),
        delay: Duration::from_millis(100),
    });
    let engine = build_engine(downloader);

    let uri = "http://example.com/shared.png";
    let mut handles = Vec::new();
    for i in 0..5u64 {
        let engine = Arc::clone(&engine);
        let target = Arc::new(FakeTarget { id: i, collected: AtomicBool::new(false) });
        let completed = Arc::new(AtomicBool::new(false));
        let listener = RecordingListener { completed: Arc::clone(&completed), ..Default::default() };
        handles.push(std::thread::spawn(move || {
            engine.submit(
                DisplayRequest { uri: uri.to_owned(), options: DisplayOptions::default() },
                target,
                Box::new(listener),
            );
            completed
        }));
    }
    let completions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while completions.iter().any(|c| !c.load(Ordering::SeqCst))
        && std::time::Instant::now() < deadline
    {
        std::thread::sleep(Duration::from_millis(20));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1, "expected exactly one download for the shared URI");
}

#[test]
fn view_reuse_before_dispatch_suppresses_display() {
    let downloader = Arc::new(CountingDownloader {
        calls: Arc::new(AtomicU32::new(0)),
        delay: Duration::from_millis(50),
    });
    let engine = build_engine(downloader);

    let target = Arc::new(FakeTarget { id: 42, collected: AtomicBool::new(false) });
    let completed = Arc::new(AtomicBool::new(false));
    let cancelled = Arc::new(AtomicBool::new(false));
    let listener = RecordingListener {
        completed: Arc::clone(&completed),
        cancelled: Arc::clone(&cancelled),
        ..Default::default()
    };

    engine.submit(
        DisplayRequest {
            uri: "http://example.com/a.png".to_owned(),
            options: DisplayOptions::default(),
        },
        Arc::clone(&target) as Arc<dyn DisplayTarget>,
        Box::new(listener),
    );

    // Rebind the same physical view slot to a different URI right away,
    // before the first task reaches its checkpoints.
    engine.cancel_display_task_for(42);

    std::thread::sleep(Duration::from_millis(300));

    assert!(!completed.load(Ordering::SeqCst), "a reused view must never be displayed by the stale task");
}

#[test]
fn pause_blocks_request_until_resumed() {
    let downloader = Arc::new(CountingDownloader {
        calls: Arc::new(AtomicU32::new(0)),
        delay: Duration::from_millis(10),
    });
    let engine = build_engine(downloader);
    engine.pause();

    let target = Arc::new(FakeTarget { id: 1, collected: AtomicBool::new(false) });
    let completed = Arc::new(AtomicBool::new(false));
    let listener = RecordingListener { completed: Arc::clone(&completed), ..Default::default() };

    engine.submit(
        DisplayRequest {
            uri: "http://example.com/b.png".to_owned(),
            options: DisplayOptions::default(),
        },
        target,
        Box::new(listener),
    );

    std::thread::sleep(Duration::from_millis(300));
    assert!(!completed.load(Ordering::SeqCst), "a paused engine must not reach display before resume");

    engine.resume();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !completed.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(completed.load(Ordering::SeqCst), "resume must let the request proceed to completion");
}

#[test]
fn deny_network_downloads_fails_uncached_requests() {
    let downloader = Arc::new(CountingDownloader {
        calls: Arc::new(AtomicU32::new(0)),
        delay: Duration::from_millis(1),
    });
    let engine = build_engine(downloader);
    engine.deny_network_downloads(true);

    let target = Arc::new(FakeTarget { id: 9, collected: AtomicBool::new(false) });
    let failed = Arc::new(Mutex::new(None));
    let listener = RecordingListener { failed: Arc::clone(&failed), ..Default::default() };

    engine.submit(
        DisplayRequest {
            uri: "http://example.com/c.png".to_owned(),
            options: DisplayOptions::default(),
        },
        target,
        Box::new(listener),
    );

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while failed.lock().unwrap().is_none() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(*failed.lock().unwrap(), Some(FailureReason::NetworkDenied));
}
