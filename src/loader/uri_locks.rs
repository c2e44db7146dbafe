use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// Weakly-held map from URI to a re-entrant-by-convention mutex, so that
/// concurrent requests for the same URI serialise at the decode/download
/// stage (single-flight) without leaking a mutex per ever-seen URI: once the
/// last holder drops its `Arc`, the entry is replaced on next lookup rather
/// than kept alive forever.
#[derive(Default)]
pub struct UriLockMap {
    locks: Mutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl UriLockMap {
    pub fn new() -> Self {
        UriLockMap {
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock_for(&self, uri: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("uri lock map poisoned");
        if let Some(existing) = locks.get(uri).and_then(Weak::upgrade) {
            return existing;
        }
        let fresh = Arc::new(Mutex::new(()));
        locks.insert(uri.to_owned(), Arc::downgrade(&fresh));
        fresh
    }
}
