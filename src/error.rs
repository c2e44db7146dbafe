use failure::Fail;
use std::io;

/// Why a load/display task was cancelled (CORE-B only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The target view was rebound to a different URI before this task
    /// reached the display step.
    ViewReused,
    /// The target view was dropped by the runtime.
    ViewCollected,
    /// The task thread was interrupted while blocked.
    Interrupted,
    /// The task was paused and then cancelled before it could resume.
    PausedThenCancelled,
}

/// Error type for the cache and loader.
#[derive(Fail, Debug)]
pub enum CacheError {
    /// Bad key, null directory, non-positive bound, and similar caller
    /// mistakes.
    #[fail(display = "invalid argument: {}", _0)]
    InvalidArgument(String),
    /// Operation attempted on a closed cache, commit of a detached editor,
    /// or a new-entry commit that did not write every slot.
    #[fail(display = "illegal state: {}", _0)]
    IllegalState(String),
    /// Underlying filesystem failure.
    #[fail(display = "IO error: {}", _0)]
    Io(#[cause] io::Error),
    /// Journal header mismatch or an unparseable record. The cache directory
    /// is deleted and reinitialised when this is detected internally; this
    /// variant is also returned when that recovery itself fails.
    #[fail(display = "cache corruption: {}", _0)]
    Corruption(String),
    /// `edit` was called for a key that already has a live editor.
    #[fail(display = "no editor available: entry is busy")]
    Busy,
    /// `edit(key, seq)` was called with a sequence number that no longer
    /// matches the entry's current one.
    #[fail(display = "no editor available: snapshot is stale")]
    Stale,
}

impl From<io::Error> for CacheError {
    fn from(err: io::Error) -> CacheError {
        CacheError::Io(err)
    }
}

/// Result type for the cache and loader.
pub type Result<T> = std::result::Result<T, CacheError>;
