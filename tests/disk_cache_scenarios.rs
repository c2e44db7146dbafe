//! End-to-end scenarios from the disk cache's testable-properties section,
//! run against a real temp directory rather than a fake filesystem.

use std::io::{Read, Write};

use snapcache::{DiskCache, DiskCacheOptions};

fn options(max_size: u64, max_file_count: u64) -> DiskCacheOptions {
    DiskCacheOptions {
        app_version: 1,
        value_count: 1,
        max_size,
        max_file_count,
    }
}

fn write_and_commit(cache: &DiskCache, key: &str, bytes: &[u8]) {
    let mut editor = cache.edit(key).unwrap().expect("entry not busy");
    editor.new_output_stream(0).unwrap().write_all(bytes).unwrap();
    editor.commit().unwrap();
}

#[test]
fn scenario_1_single_commit_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::open(dir.path(), options(1_000_000, 100)).unwrap();

    write_and_commit(&cache, "abc", &[7u8; 500]);

    let mut snap = cache.get("abc").unwrap().expect("entry should be readable");
    let bytes = snap.read_slot_to_vec(0).unwrap();
    assert_eq!(bytes.len(), 500);
    assert_eq!(bytes, vec![7u8; 500]);
}

#[test]
fn scenario_2_re_edit_replaces_length_and_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::open(dir.path(), options(1_000_000, 100)).unwrap();

    write_and_commit(&cache, "abc", &[1u8; 500]);
    write_and_commit(&cache, "abc", &[2u8; 300]);

    let mut snap = cache.get("abc").unwrap().unwrap();
    let bytes = snap.read_slot_to_vec(0).unwrap();
    assert_eq!(bytes.len(), 300);
    assert_eq!(bytes, vec![2u8; 300]);
}

#[test]
fn scenario_3_trim_evicts_lru_when_over_budget() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::open(dir.path(), options(1000, 100)).unwrap();

    write_and_commit(&cache, "a", &[0u8; 600]);
    write_and_commit(&cache, "b", &[0u8; 500]);
    cache.flush().unwrap();

    assert!(cache.get("a").unwrap().is_none());
    let mut snap = cache.get("b").unwrap().expect("b should survive trim");
    assert_eq!(snap.read_slot_to_vec(0).unwrap().len(), 500);

    // Reopening must replay to the same post-trim state.
    cache.close().unwrap();
    let reopened = DiskCache::open(dir.path(), options(1000, 100)).unwrap();
    assert!(reopened.get("a").unwrap().is_none());
    assert!(reopened.get("b").unwrap().is_some());
}

#[test]
fn scenario_4_busy_editor_then_available_after_abort() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::open(dir.path(), options(1_000_000, 100)).unwrap();

    let first = cache.edit("x").unwrap().expect("first edit succeeds");
    assert!(cache.edit("x").unwrap().is_none(), "second edit must be refused while busy");

    first.abort().unwrap();
    assert!(cache.edit("x").unwrap().is_some(), "edit should succeed once the first aborts");
}

#[test]
fn scenario_5_commit_survives_simulated_crash_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let cache = DiskCache::open(dir.path(), options(1_000_000, 100)).unwrap();
        write_and_commit(&cache, "z", &[9u8; 200]);
        // No explicit close: simulates the process dying right after commit,
        // with only the journal append (already flushed by commit) surviving.
    }

    let reopened = DiskCache::open(dir.path(), options(1_000_000, 100)).unwrap();
    let mut snap = reopened.get("z").unwrap().expect("commit must survive a crash-reopen");
    assert_eq!(snap.read_slot_to_vec(0).unwrap(), vec![9u8; 200]);
}

#[test]
fn scenario_6_many_commits_trigger_compaction() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::open(dir.path(), options(50 * 1024 * 1024, 100_000)).unwrap();

    for i in 0..2500 {
        let key = format!("k{}", i);
        write_and_commit(&cache, &key, b"x");
    }
    cache.flush().unwrap();

    // Compaction runs on the single background worker; poll rather than
    // sleep a fixed amount so the test isn't flaky under slow CI machines.
    let journal_path = dir.path().join("journal");
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    // Uncompacted, 2500 keys cost one DIRTY line plus one CLEAN line each;
    // compacted, they cost one CLEAN line each, so the journal should be well
    // under half the append-only total once compaction has run.
    let threshold = 2500 * 20;
    let mut journal_len = std::fs::metadata(&journal_path).unwrap().len();
    while journal_len >= threshold && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(50));
        journal_len = std::fs::metadata(&journal_path).unwrap().len();
    }
    assert!(
        journal_len < threshold,
        "expected compaction to shrink the journal, got {} bytes",
        journal_len
    );

    let mut snap = cache.get("k0").unwrap().unwrap();
    let mut buf = Vec::new();
    snap.slot(0).unwrap().read_to_end(&mut buf).unwrap();
    assert_eq!(buf, b"x");
}

#[test]
fn invalid_key_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::open(dir.path(), options(1_000_000, 100)).unwrap();
    assert!(cache.get("Has Spaces").is_err());
    assert!(cache.edit("UPPER").is_err());
}

#[test]
fn zero_bounds_are_rejected_at_open() {
    let dir = tempfile::tempdir().unwrap();
    assert!(DiskCache::open(dir.path(), options(0, 100)).is_err());
    assert!(DiskCache::open(dir.path(), options(1_000_000, 0)).is_err());
}

#[test]
fn clear_then_open_preserves_entries_across_process_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let cache = DiskCache::open(dir.path(), options(1_000_000, 100)).unwrap();
        write_and_commit(&cache, "p", &[5u8; 10]);
        cache.close().unwrap();
    }
    let cache = DiskCache::open(dir.path(), options(1_000_000, 100)).unwrap();
    assert!(cache.get("p").unwrap().is_some());
}

#[test]
fn truncated_journal_is_treated_as_corruption_not_a_thrown_error() {
    let dir = tempfile::tempdir().unwrap();
    {
        let cache = DiskCache::open(dir.path(), options(1_000_000, 100)).unwrap();
        write_and_commit(&cache, "q", &[1u8; 10]);
    }

    // Truncate the journal mid-line to simulate a torn write.
    let journal_path = dir.path().join("journal");
    let mut bytes = std::fs::read(&journal_path).unwrap();
    bytes.truncate(bytes.len() - 2);
    std::fs::write(&journal_path, bytes).unwrap();

    // open() must not propagate the corruption as an error: it resets the
    // cache to empty instead.
    let cache = DiskCache::open(dir.path(), options(1_000_000, 100)).unwrap();
    assert!(cache.get("q").unwrap().is_none());
}

#[test]
fn app_version_bump_invalidates_existing_cache() {
    let dir = tempfile::tempdir().unwrap();
    {
        let cache = DiskCache::open(dir.path(), options(1_000_000, 100)).unwrap();
        write_and_commit(&cache, "v", &[1u8; 10]);
    }

    let mut bumped = options(1_000_000, 100);
    bumped.app_version = 2;
    let cache = DiskCache::open(dir.path(), bumped).unwrap();
    assert!(cache.get("v").unwrap().is_none());
}

#[test]
fn snapshot_observes_pre_edit_bytes_until_closed() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::open(dir.path(), options(1_000_000, 100)).unwrap();
    write_and_commit(&cache, "r", b"before");

    let mut snap = cache.get("r").unwrap().unwrap();

    write_and_commit(&cache, "r", b"after-and-longer");

    let mut buf = Vec::new();
    snap.slot(0).unwrap().read_to_end(&mut buf).unwrap();
    assert_eq!(buf, b"before");

    let mut fresh = cache.get("r").unwrap().unwrap();
    assert_eq!(fresh.read_slot_to_vec(0).unwrap(), b"after-and-longer");
}

#[test]
fn stale_sequence_number_refuses_edit() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::open(dir.path(), options(1_000_000, 100)).unwrap();
    write_and_commit(&cache, "s", b"v1");

    let snap = cache.get("s").unwrap().unwrap();
    let stale_seq = snap.sequence_number();

    write_and_commit(&cache, "s", b"v2");

    assert!(cache.edit_if_current("s", stale_seq).unwrap().is_none());
    assert!(cache.edit_if_current("s", stale_seq + 1).unwrap().is_some());
}
