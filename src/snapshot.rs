use std::fs::File;
use std::io::{self, Read};

/// A read-only, point-in-time view of an entry's slot files, returned by
/// [`crate::DiskCache::get`].
///
/// Every slot's clean file is opened eagerly, before `get` returns, so the
/// snapshot observes a consistent set of bytes even if the entry is
/// subsequently edited or evicted — renames do not disturb handles already
/// open on the old file (on the filesystems this cache targets).
pub struct Snapshot {
    key: String,
    sequence_number: u64,
    files: Vec<File>,
}

impl Snapshot {
    pub(crate) fn new(key: String, sequence_number: u64, files: Vec<File>) -> Self {
        Snapshot {
            key,
            sequence_number,
            files,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The entry's sequence number at the moment this snapshot was taken.
    /// A later `edit(key, expected_sequence)` call that passes this value
    /// will be refused if the entry has been committed again since.
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn slot_count(&self) -> usize {
        self.files.len()
    }

    /// Borrows the open file handle for slot `i`, seeked to its start.
    pub fn slot(&mut self, i: usize) -> io::Result<&mut File> {
        use std::io::{Seek, SeekFrom};
        let file = &mut self.files[i];
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }

    /// Reads slot `i` to completion into a fresh buffer.
    pub fn read_slot_to_vec(&mut self, i: usize) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.slot(i)?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Closes every open slot file. Dropping the snapshot has the same
    /// effect; this exists for callers that want the point made explicit.
    pub fn close(self) {}
}
