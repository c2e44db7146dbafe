use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;

use crate::disk_cache::{DiskCache, DiskCacheOptions};
use crate::error::Result;
use crate::journal::clean_path;

/// Maps a free-form identifier (typically a URI) to a key the disk cache
/// accepts. Collisions are the generator's responsibility, not the cache's.
pub trait NameGenerator: Send + Sync {
    fn generate(&self, identifier: &str) -> String;
}

/// Reports progress while streaming a `save` and may cancel it by returning
/// `false`.
pub trait ProgressListener: Send {
    fn on_progress(&mut self, bytes_so_far: u64, total: Option<u64>) -> bool;
}

/// Compresses an in-memory bitmap into the editor's slot-0 stream.
pub trait BitmapCompressor: Send + Sync {
    fn compress(&self, bitmap: &[u8], out: &mut dyn Write) -> std::io::Result<()>;
}

/// Wraps [`DiskCache`] with the single-value, streaming-save shape the image
/// loader actually uses: one slot per key, identifiers instead of raw keys,
/// and a fallback cache directory if the primary one cannot be opened.
pub struct KeyedDiskCache {
    cache: DiskCache,
    dir: PathBuf,
    options: DiskCacheOptions,
    name_generator: Arc<dyn NameGenerator>,
}

impl KeyedDiskCache {
    /// Opens `dir`; if that fails, retries once against `reserve_dir` before
    /// giving up. `options.value_count` is forced to 1 — this adapter only
    /// ever uses slot 0.
    pub fn open(
        dir: impl AsRef<Path>,
        reserve_dir: Option<&Path>,
        mut options: DiskCacheOptions,
        name_generator: Arc<dyn NameGenerator>,
    ) -> Result<Self> {
        options.value_count = 1;
        let dir = dir.as_ref().to_path_buf();
        let cache = match DiskCache::open(&dir, options.clone()) {
            Ok(cache) => (cache, dir.clone()),
            Err(e) => match reserve_dir {
                Some(reserve) => {
                    warn!(
                        "primary cache dir {:?} failed to open ({}), falling back to {:?}",
                        dir, e, reserve
                    );
                    (DiskCache::open(reserve, options.clone())?, reserve.to_path_buf())
                }
                None => return Err(e),
            },
        };
        let (cache, dir) = cache;
        Ok(KeyedDiskCache {
            cache,
            dir,
            options,
            name_generator,
        })
    }

    fn key_for(&self, id: &str) -> String {
        self.name_generator.generate(id)
    }

    /// Streams `reader` into the cache under `id`, reporting progress and
    /// allowing the listener to cancel. Returns whether the save committed.
    pub fn save_stream(
        &self,
        id: &str,
        reader: &mut dyn Read,
        mut listener: Option<&mut dyn ProgressListener>,
    ) -> Result<bool> {
        let key = self.key_for(id);
        let editor = match self.cache.edit(&key)? {
            Some(editor) => editor,
            None => return Ok(false),
        };
        let mut editor = editor;
        let mut out = editor.new_output_stream(0)?;

        let mut buf = [0u8; 8192];
        let mut total = 0u64;
        let mut cancelled = false;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
            total += n as u64;
            if let Some(l) = listener.as_deref_mut() {
                if !l.on_progress(total, None) {
                    cancelled = true;
                    break;
                }
            }
        }
        drop(out);

        if cancelled {
            editor.abort()?;
            Ok(false)
        } else {
            editor.commit()?;
            Ok(true)
        }
    }

    /// Compresses `bitmap` directly into the cache under `id`.
    pub fn save_bitmap(
        &self,
        id: &str,
        bitmap: &[u8],
        compressor: &dyn BitmapCompressor,
    ) -> Result<bool> {
        let key = self.key_for(id);
        let editor = match self.cache.edit(&key)? {
            Some(editor) => editor,
            None => return Ok(false),
        };
        let mut editor = editor;
        let mut out = editor.new_output_stream(0)?;
        let compressed = compressor.compress(bitmap, &mut out).is_ok();
        drop(out);
        if compressed {
            editor.commit()?;
            Ok(true)
        } else {
            editor.abort()?;
            Ok(false)
        }
    }

    /// Returns the path to slot 0's clean file for `id`, for out-of-band
    /// decoding. The snapshot itself is closed immediately; only the path is
    /// handed back.
    pub fn get(&self, id: &str) -> Result<Option<PathBuf>> {
        let key = self.key_for(id);
        match self.cache.get(&key)? {
            Some(snapshot) => {
                let path = clean_path(&self.dir, &key, 0);
                snapshot.close();
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        let key = self.key_for(id);
        self.cache.remove(&key)
    }

    /// Deletes the cache directory entirely and reopens it fresh, under the
    /// same options. The directory and options are latched into locals
    /// before `delete()` runs, since `delete()` also closes the cache this
    /// adapter otherwise still holds a handle to.
    pub fn clear(&mut self) -> Result<()> {
        let dir = self.dir.clone();
        let options = self.options.clone();
        self.cache.delete()?;
        self.cache = DiskCache::open(&dir, options)?;
        Ok(())
    }
}
