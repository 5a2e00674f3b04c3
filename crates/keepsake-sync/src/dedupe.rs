//! In-memory deduplication store for one fetch pass.
//!
//! Keys are record ids; the first record seen with a given id wins and later
//! copies are dropped. Arrival order across relays is non-deterministic, so
//! "first seen in this run" is the only tie-break, not record age.
//!
//! Thread-safe: shared by every relay session in a batch behind one mutex,
//! and each insert is a single check-and-insert under that lock.

use keepsake_core::Record;
use parking_lot::Mutex;
use std::collections::HashSet;

/// Insertion-ordered set of records keyed by id.
#[derive(Debug, Default)]
pub struct DedupStore {
    inner: Mutex<DedupInner>,
}

#[derive(Debug, Default)]
struct DedupInner {
    seen: HashSet<String>,
    records: Vec<Record>,
}

impl DedupStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record if its id is new.
    ///
    /// Returns `true` if the record was added, `false` if the id was already
    /// present (the stored copy is left untouched).
    pub fn insert(&self, record: Record) -> bool {
        let mut inner = self.inner.lock();
        if inner.seen.contains(&record.id) {
            return false;
        }
        inner.seen.insert(record.id.clone());
        inner.records.push(record);
        true
    }

    /// Check whether a record id has been seen.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().seen.contains(id)
    }

    /// Snapshot of every stored record, in first-seen order.
    pub fn all(&self) -> Vec<Record> {
        self.inner.lock().records.clone()
    }

    /// Consume the store, returning its records without cloning.
    pub fn into_records(self) -> Vec<Record> {
        self.inner.into_inner().records
    }

    /// Number of unique records.
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Whether nothing has been inserted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, content: &str) -> Record {
        Record {
            id: id.to_string(),
            pubkey: "aa".repeat(32),
            created_at: 1,
            kind: 1,
            tags: vec![],
            content: content.to_string(),
            sig: "00".repeat(64),
        }
    }

    #[test]
    fn test_insert_is_idempotent() {
        let store = DedupStore::new();

        // First time should return true (is new)
        assert!(store.insert(record("01", "a")));
        assert_eq!(store.len(), 1);

        // Same id again should return false and not grow the store
        assert!(!store.insert(record("01", "a")));
        assert_eq!(store.len(), 1);

        // Different id should return true
        assert!(store.insert(record("02", "b")));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_first_seen_wins() {
        let store = DedupStore::new();
        store.insert(record("01", "first"));
        store.insert(record("01", "second"));

        let all = store.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].content, "first");
    }

    #[test]
    fn test_all_never_contains_duplicate_ids() {
        let store = DedupStore::new();
        for i in 0..50 {
            store.insert(record(&format!("{:02}", i % 7), "x"));
        }

        let all = store.all();
        let unique: HashSet<_> = all.iter().map(|r| r.id.clone()).collect();
        assert_eq!(all.len(), 7);
        assert_eq!(unique.len(), all.len());
    }

    #[test]
    fn test_contains_and_into_records() {
        let store = DedupStore::new();
        assert!(store.is_empty());
        store.insert(record("02", "x"));
        store.insert(record("01", "y"));

        assert!(store.contains("01"));
        assert!(!store.contains("03"));

        let ids: Vec<_> = store.into_records().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["02", "01"]);
    }

    #[test]
    fn test_concurrent_inserts_keep_one_copy() {
        let store = std::sync::Arc::new(DedupStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..100)
                        .filter(|i| store.insert(record(&format!("{i:03}"), "x")))
                        .count()
                })
            })
            .collect();

        let inserted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(inserted, 100);
        assert_eq!(store.len(), 100);
    }
}
