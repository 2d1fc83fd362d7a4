//! In-memory storage implementation
//!
//! Used by tests and by offline runs that should not touch a real store.

use anyhow::{Result, bail};
use std::collections::HashSet;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{RecordStore, StoredRecord, SyncRecord};

/// In-memory implementation of RecordStore
///
/// Rows live in a Vec protected by an RwLock for thread-safe access.
/// Writes can be made to fail per dedup key to exercise partial failures.
pub struct InMemoryRecordStore<R> {
    collection_id: String,
    rows: RwLock<Vec<StoredRecord<R>>>,
    next_id: AtomicUsize,
    failing_keys: RwLock<HashSet<String>>,
    fail_listing: RwLock<bool>,
    writes: AtomicUsize,
}

impl<R: SyncRecord> InMemoryRecordStore<R> {
    /// Create a new empty in-memory collection
    pub fn new(collection_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            rows: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            failing_keys: RwLock::new(HashSet::new()),
            fail_listing: RwLock::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    /// Create a collection pre-populated with rows
    pub fn with_records(collection_id: impl Into<String>, records: Vec<R>) -> Self {
        let store = Self::new(collection_id);
        {
            let mut rows = store.rows.write().unwrap();
            for record in records {
                let id = store.allocate_id();
                rows.push(StoredRecord::new(id, record));
            }
        }
        store
    }

    /// Make creates and updates for `key` fail
    pub fn fail_writes_for(&self, key: impl Into<String>) {
        self.failing_keys.write().unwrap().insert(key.into());
    }

    /// Make `list_records` fail
    pub fn fail_listing(&self, fail: bool) {
        *self.fail_listing.write().unwrap() = fail;
    }

    /// Snapshot of all stored records
    pub fn records(&self) -> Vec<R> {
        self.rows
            .read()
            .unwrap()
            .iter()
            .map(|row| row.record.clone())
            .collect()
    }

    /// Number of successful creates and updates so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn allocate_id(&self) -> String {
        format!("{}-{}", self.collection_id, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn check_writable(&self, record: &R) -> Result<()> {
        let key = record.dedup_key();
        if self.failing_keys.read().unwrap().contains(&key) {
            bail!("write rejected for {}", key);
        }
        Ok(())
    }
}

impl<R: SyncRecord> RecordStore<R> for InMemoryRecordStore<R> {
    fn collection_id(&self) -> &str {
        &self.collection_id
    }

    fn list_records(&self) -> Result<Vec<StoredRecord<R>>> {
        if *self.fail_listing.read().unwrap() {
            bail!("listing {} failed", self.collection_id);
        }
        Ok(self.rows.read().unwrap().clone())
    }

    fn create_record(&self, record: &R) -> Result<String> {
        self.check_writable(record)?;
        let id = self.allocate_id();
        self.rows
            .write()
            .unwrap()
            .push(StoredRecord::new(id.clone(), record.clone()));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn update_record(&self, existing_id: &str, record: &R) -> Result<()> {
        self.check_writable(record)?;
        let mut rows = self.rows.write().unwrap();
        let Some(row) = rows.iter_mut().find(|row| row.id == existing_id) else {
            bail!("no record with id {}", existing_id);
        };
        row.record = record.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
