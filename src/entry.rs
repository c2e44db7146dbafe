use indexmap::IndexMap;

/// Per-key bookkeeping the facade maintains in memory. Mirrors exactly what
/// is durable in the journal: which slots are committed, how big they are,
/// and whether an editor currently owns the entry.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Byte length of each committed slot; `0` means never committed.
    pub lengths: Vec<u64>,
    /// False until the first successful commit.
    pub readable: bool,
    /// Token identifying the live editor, if any. The entry does not own the
    /// editor object itself (that would create a reference cycle between the
    /// table and the editor); it only records that one is outstanding, and
    /// which one, so a stale editor can tell it no longer owns the entry.
    pub editor_token: Option<u64>,
    /// Monotonically increasing, assigned on every successful commit.
    pub sequence_number: u64,
}

impl Entry {
    fn new(slot_count: usize) -> Self {
        Entry {
            lengths: vec![0; slot_count],
            readable: false,
            editor_token: None,
            sequence_number: 0,
        }
    }

    pub fn has_editor(&self) -> bool {
        self.editor_token.is_some()
    }

    pub fn visible(&self) -> bool {
        self.readable && self.editor_token.is_none()
    }
}

/// Insertion-ordered `key -> Entry` map with access-order semantics: a
/// successful `get`, `edit`, or commit moves the key to the most-recently-used
/// end. Iterating from the front yields eviction candidates, oldest first.
///
/// Built on `IndexMap` rather than a hash-only map so that ordering never
/// depends on hash iteration, only on explicit moves.
pub struct EntryTable {
    map: IndexMap<String, Entry>,
    slot_count: usize,
}

impl EntryTable {
    pub fn new(slot_count: usize) -> Self {
        EntryTable {
            map: IndexMap::new(),
            slot_count,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.map.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Entry> {
        self.map.get_mut(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Returns the entry for `key`, creating a fresh unreadable one at the
    /// MRU end if it did not already exist.
    pub fn get_or_create(&mut self, key: &str) -> &mut Entry {
        if !self.map.contains_key(key) {
            self.map.insert(key.to_owned(), Entry::new(self.slot_count));
        }
        self.map.get_mut(key).expect("just inserted")
    }

    /// Moves `key` to the MRU end without otherwise changing the entry.
    /// No-op if the key is absent.
    pub fn touch(&mut self, key: &str) {
        if let Some(idx) = self.map.get_index_of(key) {
            let last = self.map.len() - 1;
            self.map.move_index(idx, last);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Entry> {
        self.map.shift_remove(key)
    }

    /// Keys from the LRU end to the MRU end, the order eviction walks.
    pub fn keys_lru_order(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_moves_to_mru_end() {
        let mut t = EntryTable::new(1);
        t.get_or_create("a");
        t.get_or_create("b");
        t.get_or_create("c");
        assert_eq!(
            t.keys_lru_order().collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
        t.touch("a");
        assert_eq!(
            t.keys_lru_order().collect::<Vec<_>>(),
            vec!["b", "c", "a"]
        );
    }

    #[test]
    fn remove_drops_entry() {
        let mut t = EntryTable::new(1);
        t.get_or_create("a");
        assert!(t.remove("a").is_some());
        assert!(t.get("a").is_none());
    }

    #[test]
    fn new_entry_is_not_visible_until_readable() {
        let mut t = EntryTable::new(1);
        let e = t.get_or_create("a");
        assert!(!e.visible());
        e.readable = true;
        assert!(t.get("a").unwrap().visible());
    }
}
