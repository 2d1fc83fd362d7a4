//! Storage trait definitions

use anyhow::Result;

/// A record type that can be synced into a remote collection
///
/// The dedup key decides create vs. update vs. skip; field equality decides
/// whether an update is a no-op.
pub trait SyncRecord: Clone + std::fmt::Debug + Send + Sync {
    /// Identity of the logical record across runs
    fn dedup_key(&self) -> String;

    /// Whether every synced field matches `other`
    fn fields_equal(&self, other: &Self) -> bool;

    /// Whether this record should replace `other` when both share a key in
    /// one batch. Defaults to "later in the batch wins".
    fn supersedes(&self, _other: &Self) -> bool {
        true
    }
}

/// A record as it currently exists in the remote store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord<R> {
    /// Remote row identifier (e.g. a Notion page id)
    pub id: String,
    pub record: R,
}

impl<R> StoredRecord<R> {
    pub fn new(id: impl Into<String>, record: R) -> Self {
        Self {
            id: id.into(),
            record,
        }
    }
}

/// Trait for one remote collection of records
///
/// This trait abstracts over different backends (Notion database, in-memory)
/// and provides the three operations a sync needs.
pub trait RecordStore<R: SyncRecord>: Send + Sync {
    /// Stable identifier of the collection, used for locking and logs
    fn collection_id(&self) -> &str;

    /// List every existing record in the collection
    fn list_records(&self) -> Result<Vec<StoredRecord<R>>>;

    /// Create a record, returning its remote id
    fn create_record(&self, record: &R) -> Result<String>;

    /// Overwrite the record stored under `existing_id`
    fn update_record(&self, existing_id: &str, record: &R) -> Result<()>;

    /// `record` as [`list_records`](Self::list_records) would return it once
    /// written. Backends that store values lossily override this.
    fn as_stored(&self, record: R) -> R {
        record
    }
}
