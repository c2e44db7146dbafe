use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{error, warn};

use crate::editor::Editor;
use crate::entry::EntryTable;
use crate::error::{CacheError, Result};
use crate::journal::{clean_path, dirty_path, Journal, OpenedJournal};
use crate::key::validate_key;
use crate::snapshot::Snapshot;
use crate::thread_pool::{SharedQueueThreadPool, ThreadPool};

/// Configuration for [`DiskCache::open`].
#[derive(Debug, Clone)]
pub struct DiskCacheOptions {
    /// Bumping this invalidates any existing cache at the directory, the
    /// same way a journal header mismatch does.
    pub app_version: u64,
    /// Number of value slots each entry holds. The cache in practice only
    /// ever uses 1, but the design supports any `N >= 1`.
    pub value_count: usize,
    /// Advisory total size, in bytes, of all readable entries' clean files.
    pub max_size: u64,
    /// Advisory total count of existing clean slot files.
    pub max_file_count: u64,
}

impl Default for DiskCacheOptions {
    fn default() -> Self {
        DiskCacheOptions {
            app_version: 1,
            value_count: 1,
            max_size: 10 * 1024 * 1024,
            max_file_count: 10_000,
        }
    }
}

impl DiskCacheOptions {
    fn validate(&self) -> Result<()> {
        if self.value_count == 0 {
            return Err(CacheError::InvalidArgument(
                "value_count must be at least 1".into(),
            ));
        }
        if self.max_size == 0 {
            return Err(CacheError::InvalidArgument("max_size must be > 0".into()));
        }
        if self.max_file_count == 0 {
            return Err(CacheError::InvalidArgument(
                "max_file_count must be > 0".into(),
            ));
        }
        Ok(())
    }
}

pub(crate) struct Inner {
    pub(crate) dir: PathBuf,
    pub(crate) table: EntryTable,
    pub(crate) journal: Journal,
    pub(crate) size: u64,
    pub(crate) file_count: u64,
    pub(crate) max_size: u64,
    pub(crate) max_file_count: u64,
    pub(crate) app_version: u64,
    pub(crate) value_count: usize,
    next_editor_token: u64,
    closed: bool,
}

/// The journaled, bounded, crash-safe on-disk cache (CORE-A).
///
/// Cheap to clone: every clone shares the same directory, entry table, and
/// background cleanup worker through `Arc`.
#[derive(Clone)]
pub struct DiskCache {
    inner: Arc<Mutex<Inner>>,
    worker: Arc<SharedQueueThreadPool>,
}

fn open_journal_with_recovery(
    dir: &Path,
    app_version: u64,
    value_count: usize,
) -> Result<OpenedJournal> {
    match Journal::open(dir, app_version, value_count) {
        Ok(opened) => Ok(opened),
        Err(e) => match &e {
            CacheError::Corruption(_) | CacheError::Io(_) => {
                warn!(
                    "cache at {:?} failed to open ({}), deleting and recreating",
                    dir, e
                );
                fs::remove_dir_all(dir).ok();
                Journal::open(dir, app_version, value_count)
            }
            _ => Err(e),
        },
    }
}

impl DiskCache {
    /// Runs the full open sequence (§4.3/§4.6): journal replay, dangling-edit
    /// cleanup, and — on corruption or I/O failure during that replay — one
    /// delete-and-recreate retry before giving up.
    pub fn open(dir: impl AsRef<Path>, options: DiskCacheOptions) -> Result<Self> {
        options.validate()?;
        let dir = dir.as_ref().to_path_buf();
        let opened = open_journal_with_recovery(&dir, options.app_version, options.value_count)?;

        let inner = Inner {
            dir,
            table: opened.table,
            journal: opened.journal,
            size: opened.size,
            file_count: opened.file_count,
            max_size: options.max_size,
            max_file_count: options.max_file_count,
            app_version: options.app_version,
            value_count: options.value_count,
            next_editor_token: 0,
            closed: false,
        };

        // Background trim/rebuild is serialized on exactly one thread: a
        // pool would let two compactions interleave and corrupt the journal.
        let worker = SharedQueueThreadPool::new(1).map_err(|e| {
            CacheError::IllegalState(format!("failed to start cleanup worker: {}", e))
        })?;

        Ok(DiskCache {
            inner: Arc::new(Mutex::new(inner)),
            worker: Arc::new(worker),
        })
    }

    pub fn max_size(&self) -> u64 {
        self.inner.lock().expect("disk cache mutex poisoned").max_size
    }

    pub fn size(&self) -> u64 {
        self.inner.lock().expect("disk cache mutex poisoned").size
    }

    pub fn file_count(&self) -> u64 {
        self.inner
            .lock()
            .expect("disk cache mutex poisoned")
            .file_count
    }

    /// Changes the size bound at runtime and schedules a trim if the new
    /// bound is already exceeded.
    pub fn set_max_size(&self, max_size: u64) -> Result<()> {
        if max_size == 0 {
            return Err(CacheError::InvalidArgument("max_size must be > 0".into()));
        }
        let exceeded = {
            let mut guard = self.inner.lock().expect("disk cache mutex poisoned");
            guard.max_size = max_size;
            guard.size > guard.max_size
        };
        if exceeded {
            schedule_background_cleanup(&self.inner, &self.worker);
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<Snapshot>> {
        validate_key(key)?;
        let mut guard = self.inner.lock().expect("disk cache mutex poisoned");
        if guard.closed {
            return Err(CacheError::IllegalState("cache is closed".into()));
        }
        let (sequence_number, visible) = match guard.table.get(key) {
            Some(e) => (e.sequence_number, e.visible()),
            None => return Ok(None),
        };
        if !visible {
            return Ok(None);
        }

        let mut files = Vec::with_capacity(guard.value_count);
        for slot in 0..guard.value_count {
            match File::open(clean_path(&guard.dir, key, slot)) {
                Ok(f) => files.push(f),
                Err(_) => {
                    // Opened handles drop here; the entry's clean files are
                    // inconsistent with the table, which `get` never exposes.
                    return Ok(None);
                }
            }
        }

        guard.table.touch(key);
        guard.journal.append_read(key)?;
        let should_compact = guard.journal.should_compact(guard.table.len() as u64);
        drop(guard);
        if should_compact {
            schedule_background_cleanup(&self.inner, &self.worker);
        }

        Ok(Some(Snapshot::new(key.to_owned(), sequence_number, files)))
    }

    pub fn edit(&self, key: &str) -> Result<Option<Editor>> {
        self.edit_internal(key, None)
    }

    /// As [`edit`](Self::edit), but refuses (returns `Ok(None)`) if the
    /// entry's current sequence number no longer matches `expected_sequence`
    /// — i.e. the snapshot this edit is based on is stale.
    pub fn edit_if_current(&self, key: &str, expected_sequence: u64) -> Result<Option<Editor>> {
        self.edit_internal(key, Some(expected_sequence))
    }

    fn edit_internal(&self, key: &str, expected_sequence: Option<u64>) -> Result<Option<Editor>> {
        validate_key(key)?;
        let mut guard = self.inner.lock().expect("disk cache mutex poisoned");
        if guard.closed {
            return Err(CacheError::IllegalState("cache is closed".into()));
        }

        if let Some(entry) = guard.table.get(key) {
            if entry.has_editor() {
                return Ok(None);
            }
            if let Some(expected) = expected_sequence {
                if entry.sequence_number != expected {
                    return Ok(None);
                }
            }
        }

        let was_readable = guard.table.get(key).map(|e| e.readable).unwrap_or(false);
        let token = guard.next_editor_token;
        guard.next_editor_token += 1;
        {
            let entry = guard.table.get_or_create(key);
            entry.editor_token = Some(token);
        }
        guard.table.touch(key);
        guard.journal.append_dirty(key)?;
        let dir = guard.dir.clone();
        let value_count = guard.value_count;
        drop(guard);

        Ok(Some(Editor::new(
            self.inner.clone(),
            self.worker.clone(),
            dir,
            key.to_owned(),
            token,
            value_count,
            was_readable,
        )))
    }

    /// Evicts `key` if present and not mid-edit. Returns whether anything was
    /// evicted.
    pub fn remove(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let mut guard = self.inner.lock().expect("disk cache mutex poisoned");
        if guard.closed {
            return Err(CacheError::IllegalState("cache is closed".into()));
        }
        match guard.table.get(key) {
            Some(e) if e.has_editor() => return Ok(false),
            Some(_) => {}
            None => return Ok(false),
        }

        let value_count = guard.value_count;
        let dir = guard.dir.clone();
        let entry = guard.table.remove(key).expect("checked present above");
        if entry.readable {
            for slot in 0..value_count {
                guard.size = guard.size.saturating_sub(entry.lengths[slot]);
                guard.file_count = guard.file_count.saturating_sub(1);
                let _ = fs::remove_file(clean_path(&dir, key, slot));
            }
        }
        guard.journal.append_remove(key)?;
        Ok(true)
    }

    /// Trims to bounds and flushes the journal.
    pub fn flush(&self) -> Result<()> {
        let mut guard = self.inner.lock().expect("disk cache mutex poisoned");
        if guard.closed {
            return Err(CacheError::IllegalState("cache is closed".into()));
        }
        trim(&mut guard)?;
        guard.journal.flush()?;
        Ok(())
    }

    /// Aborts every entry left mid-edit, trims, and closes the journal.
    /// Idempotent; subsequent operations fail with `IllegalState`.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.inner.lock().expect("disk cache mutex poisoned");
        if guard.closed {
            return Ok(());
        }

        let dangling: Vec<String> = guard
            .table
            .iter()
            .filter(|(_, e)| e.has_editor())
            .map(|(k, _)| k.to_owned())
            .collect();
        for key in dangling {
            let was_readable = guard.table.get(&key).map(|e| e.readable).unwrap_or(false);
            for slot in 0..guard.value_count {
                let _ = fs::remove_file(dirty_path(&guard.dir, &key, slot));
            }
            if was_readable {
                if let Some(entry) = guard.table.get_mut(&key) {
                    entry.editor_token = None;
                }
            } else {
                guard.table.remove(&key);
            }
            // Swallowed: the cache is being torn down regardless.
            let _ = guard.journal.append_remove(&key);
        }

        if let Err(e) = trim(&mut guard) {
            error!("trim during close failed: {}", e);
        }
        let _ = guard.journal.flush();
        guard.closed = true;
        Ok(())
    }

    /// `close()` followed by a recursive delete of the cache directory.
    pub fn delete(&self) -> Result<()> {
        self.close()?;
        let dir = self.inner.lock().expect("disk cache mutex poisoned").dir.clone();
        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}

pub(crate) fn schedule_background_cleanup(
    inner: &Arc<Mutex<Inner>>,
    worker: &Arc<SharedQueueThreadPool>,
) {
    let inner = Arc::clone(inner);
    worker.spawn(move || {
        let mut guard = inner.lock().expect("disk cache mutex poisoned");
        if guard.closed {
            return;
        }
        if let Err(e) = trim(&mut guard) {
            error!("background trim failed: {}", e);
            return;
        }
        if guard.journal.should_compact(guard.table.len() as u64) {
            if let Err(e) = rebuild(&mut guard) {
                error!("background journal rebuild failed: {}", e);
            }
        }
    });
}

/// Repeatedly evicts the LRU entry until both bounds hold. Entries with a
/// live editor are skipped — they cannot be removed — so trim never blocks
/// waiting for one to finish.
fn trim(inner: &mut Inner) -> Result<()> {
    loop {
        if inner.size <= inner.max_size && inner.file_count <= inner.max_file_count {
            return Ok(());
        }
        let victim = inner
            .table
            .keys_lru_order()
            .find(|k| !inner.table.get(k).expect("key just listed").has_editor())
            .map(str::to_owned);
        let victim = match victim {
            Some(k) => k,
            None => return Ok(()), // everything evictable is mid-edit; try again later
        };
        let entry = inner.table.remove(&victim).expect("just located");
        if entry.readable {
            for slot in 0..inner.value_count {
                inner.size = inner.size.saturating_sub(entry.lengths[slot]);
                inner.file_count = inner.file_count.saturating_sub(1);
                let _ = fs::remove_file(clean_path(&inner.dir, &victim, slot));
            }
        }
        inner.journal.append_remove(&victim)?;
    }
}

fn rebuild(inner: &mut Inner) -> Result<()> {
    let dir = inner.dir.clone();
    let app_version = inner.app_version;
    let value_count = inner.value_count;
    inner.journal.compact(&dir, app_version, value_count, &inner.table)
}
