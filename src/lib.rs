//! A bounded, crash-safe on-disk cache with a write-ahead journal (CORE-A),
//! and a single-flight URI load/display engine built on top of it (CORE-B).
//!
//! The disk cache is the part worth trusting under process death: every
//! mutation goes through an append-only journal that is replayed on open,
//! with LRU eviction keeping it within a configured size and file-count
//! budget. The loader above it deduplicates concurrent requests for the same
//! URI, supports pausing and cancellation, and routes work between a small
//! pool for cache misses and a larger one for hits.

mod disk_cache;
mod editor;
mod entry;
mod error;
mod journal;
mod key;
mod key_adapter;
mod line_reader;
mod loader;
mod snapshot;
pub mod thread_pool;

pub use disk_cache::{DiskCache, DiskCacheOptions};
pub use editor::{Editor, SlotWriter};
pub use error::{CacheError, CancelReason, Result};
pub use key::validate_key;
pub use key_adapter::{BitmapCompressor, KeyedDiskCache, NameGenerator, ProgressListener};
pub use loader::{
    DecodedImage, Decoder, DisplayListener, DisplayOptions, DisplayRequest, DisplayTarget,
    Dispatcher, Downloader, FailureReason, LoadEngine, LoaderOptions, MemoryCache,
};
pub use snapshot::Snapshot;
