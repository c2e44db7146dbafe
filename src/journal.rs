use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::entry::EntryTable;
use crate::error::{CacheError, Result};
use crate::line_reader::LineReader;

const MAGIC: &str = "snapcache.journal";
const FORMAT_VERSION: &str = "1";

/// Once redundant records outnumber live entries by this much (or there are
/// at least this many outright), a rebuild is worth the I/O.
pub const COMPACTION_MIN_REDUNDANT: u64 = 2000;

fn journal_path(dir: &Path) -> PathBuf {
    dir.join("journal")
}
fn journal_tmp_path(dir: &Path) -> PathBuf {
    dir.join("journal.tmp")
}
fn journal_bkp_path(dir: &Path) -> PathBuf {
    dir.join("journal.bkp")
}

pub fn clean_path(dir: &Path, key: &str, slot: usize) -> PathBuf {
    dir.join(format!("{}.{}", key, slot))
}

pub fn dirty_path(dir: &Path, key: &str, slot: usize) -> PathBuf {
    dir.join(format!("{}.{}.tmp", key, slot))
}

#[derive(Debug)]
enum Record {
    Dirty(String),
    Clean(String, Vec<u64>),
    Remove(String),
    Read(String),
}

fn parse_record(line: &str) -> Result<Record> {
    let mut parts = line.split(' ');
    let op = parts
        .next()
        .ok_or_else(|| CacheError::Corruption("empty journal record".into()))?;
    let key = parts
        .next()
        .ok_or_else(|| CacheError::Corruption(format!("journal record missing key: {:?}", line)))?
        .to_owned();
    match op {
        "DIRTY" => Ok(Record::Dirty(key)),
        "REMOVE" => Ok(Record::Remove(key)),
        "READ" => Ok(Record::Read(key)),
        "CLEAN" => {
            let lengths = parts
                .map(|p| {
                    p.parse::<u64>()
                        .map_err(|_| CacheError::Corruption(format!("bad CLEAN length in {:?}", line)))
                })
                .collect::<Result<Vec<u64>>>()?;
            Ok(Record::Clean(key, lengths))
        }
        _ => Err(CacheError::Corruption(format!(
            "unrecognised journal op {:?}",
            op
        ))),
    }
}

/// Replays journal records (not including the header) into a fresh entry
/// table, returning the number of records processed. `lines` must already
/// have consumed the five header lines.
fn replay<R: std::io::Read>(
    lines: &mut LineReader<R>,
    table: &mut EntryTable,
) -> Result<u64> {
    let mut line_count = 0u64;
    while let Some(line) = lines.read_line()? {
        line_count += 1;
        match parse_record(&line)? {
            Record::Dirty(key) => {
                let e = table.get_or_create(&key);
                e.editor_token = Some(line_count);
            }
            Record::Clean(key, lengths) => {
                let e = table.get_or_create(&key);
                e.lengths = lengths;
                e.readable = true;
                e.editor_token = None;
                e.sequence_number += 1;
                table.touch(&key);
            }
            Record::Remove(key) => {
                table.remove(&key);
            }
            Record::Read(key) => {
                table.touch(&key);
            }
        }
    }
    Ok(line_count)
}

fn write_header<W: Write>(w: &mut W, app_version: u64, slot_count: usize) -> Result<()> {
    writeln!(w, "{}", MAGIC)?;
    writeln!(w, "{}", FORMAT_VERSION)?;
    writeln!(w, "{}", app_version)?;
    writeln!(w, "{}", slot_count)?;
    writeln!(w)?;
    Ok(())
}

fn parse_header<R: std::io::Read>(reader: R, app_version: u64, slot_count: usize) -> Result<()> {
    let mut lines = LineReader::new(reader);
    let magic = lines.read_line()?;
    let version = lines.read_line()?;
    let app = lines.read_line()?;
    let slots = lines.read_line()?;
    let blank = lines.read_line()?;
    let mismatch = |what: &str| CacheError::Corruption(format!("journal header mismatch: {}", what));
    if magic.as_deref() != Some(MAGIC) {
        return Err(mismatch("magic"));
    }
    if version.as_deref() != Some(FORMAT_VERSION) {
        return Err(mismatch("format version"));
    }
    if app.as_deref() != Some(&app_version.to_string()) {
        return Err(mismatch("application version"));
    }
    if slots.as_deref() != Some(&slot_count.to_string()) {
        return Err(mismatch("slot count"));
    }
    if blank.as_deref() != Some("") {
        return Err(mismatch("blank fifth line"));
    }
    Ok(())
}

/// Result of a successful journal open: the live journal writer, the replayed
/// entry table, and the `(size, file_count)` computed while processing it.
pub struct OpenedJournal {
    pub journal: Journal,
    pub table: EntryTable,
    pub size: u64,
    pub file_count: u64,
}

pub struct Journal {
    writer: BufWriter<File>,
    line_count: u64,
}

impl Journal {
    /// Runs the full §4.3 open sequence: bkp/tmp reconciliation, header
    /// validation, replay, dangling-dirty cleanup, and reopening for append.
    pub fn open(dir: &Path, app_version: u64, slot_count: usize) -> Result<OpenedJournal> {
        fs::create_dir_all(dir)?;

        let path = journal_path(dir);
        let bkp = journal_bkp_path(dir);
        let tmp = journal_tmp_path(dir);

        if bkp.exists() {
            if path.exists() {
                fs::remove_file(&bkp)?;
            } else {
                fs::rename(&bkp, &path)?;
            }
        }

        let mut table = EntryTable::new(slot_count);
        let mut line_count = 0u64;

        if path.exists() {
            let file = File::open(&path)?;
            parse_header(&file, app_version, slot_count)?;
            let file = File::open(&path)?;
            let mut lines = LineReader::new(file);
            // Skip the five header lines; parse_header already validated them.
            for _ in 0..5 {
                lines.read_line()?;
            }
            line_count = replay(&mut lines, &mut table)?;
        } else {
            let file = File::create(&path)?;
            let mut w = BufWriter::new(file);
            write_header(&mut w, app_version, slot_count)?;
            w.flush()?;
        }

        if tmp.exists() {
            fs::remove_file(&tmp)?;
        }

        // Process: drop dangling DIRTY entries (delete their files), and sum
        // clean-file sizes for everyone else.
        let mut size = 0u64;
        let mut file_count = 0u64;
        let dangling: Vec<String> = table
            .iter()
            .filter(|(_, e)| e.has_editor())
            .map(|(k, _)| k.to_owned())
            .collect();
        for key in &dangling {
            for slot in 0..slot_count {
                let _ = fs::remove_file(clean_path(dir, key, slot));
                let _ = fs::remove_file(dirty_path(dir, key, slot));
            }
            table.remove(key);
        }
        let readable: Vec<String> = table
            .iter()
            .filter(|(_, e)| e.readable)
            .map(|(k, _)| k.to_owned())
            .collect();
        for key in &readable {
            let mut corrupt = false;
            let mut entry_size = 0u64;
            for slot in 0..slot_count {
                match fs::metadata(clean_path(dir, key, slot)) {
                    Ok(meta) => entry_size += meta.len(),
                    Err(_) => {
                        corrupt = true;
                        break;
                    }
                }
            }
            if corrupt {
                warn!("entry {:?} missing a clean slot file, dropping", key);
                table.remove(key);
                continue;
            }
            size += entry_size;
            file_count += slot_count as u64;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let journal = Journal {
            writer: BufWriter::new(file),
            line_count,
        };

        Ok(OpenedJournal {
            journal,
            table,
            size,
            file_count,
        })
    }

    pub fn redundant_op_count(&self, table_size: u64) -> u64 {
        self.line_count.saturating_sub(table_size)
    }

    pub fn should_compact(&self, table_size: u64) -> bool {
        self.redundant_op_count(table_size) >= COMPACTION_MIN_REDUNDANT.max(table_size)
    }

    fn append(&mut self, line: &str) -> Result<()> {
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()?;
        self.line_count += 1;
        Ok(())
    }

    pub fn append_dirty(&mut self, key: &str) -> Result<()> {
        self.append(&format!("DIRTY {}", key))
    }

    pub fn append_clean(&mut self, key: &str, lengths: &[u64]) -> Result<()> {
        let mut line = format!("CLEAN {}", key);
        for len in lengths {
            line.push(' ');
            line.push_str(&len.to_string());
        }
        self.append(&line)
    }

    pub fn append_remove(&mut self, key: &str) -> Result<()> {
        self.append(&format!("REMOVE {}", key))
    }

    pub fn append_read(&mut self, key: &str) -> Result<()> {
        self.append(&format!("READ {}", key))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Rewrites the journal down to the minimum set of records describing
    /// `table`'s current state: `CLEAN` for committed entries, `DIRTY` for
    /// entries with a live editor. Crash-safe via a `.tmp` staging file and a
    /// `.bkp` witness for the atomic swap.
    pub fn compact(
        &mut self,
        dir: &Path,
        app_version: u64,
        slot_count: usize,
        table: &EntryTable,
    ) -> Result<()> {
        let tmp = journal_tmp_path(dir);
        let path = journal_path(dir);
        let bkp = journal_bkp_path(dir);

        {
            let file = File::create(&tmp)?;
            let mut w = BufWriter::new(file);
            write_header(&mut w, app_version, slot_count)?;
            for (key, entry) in table.iter() {
                if entry.has_editor() {
                    writeln!(w, "DIRTY {}", key)?;
                } else if entry.readable {
                    let mut line = format!("CLEAN {}", key);
                    for len in &entry.lengths {
                        line.push(' ');
                        line.push_str(&len.to_string());
                    }
                    writeln!(w, "{}", line)?;
                }
            }
            w.flush()?;
        }

        if path.exists() {
            fs::rename(&path, &bkp)?;
        }
        fs::rename(&tmp, &path)?;
        if bkp.exists() {
            fs::remove_file(&bkp)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.writer = BufWriter::new(file);
        self.line_count = table.len() as u64;
        debug!("journal compacted to {} live records", self.line_count);
        Ok(())
    }
}
