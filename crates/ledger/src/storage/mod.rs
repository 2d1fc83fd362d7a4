//! Storage traits and implementations
//!
//! This module defines the abstraction over the remote tabular store that
//! sync runs write into. The trait-based design allows swapping the Notion
//! backend for an in-memory store in tests.

mod locks;
mod memory;
mod traits;

pub use locks::{CollectionGuard, CollectionLocks};
pub use memory::InMemoryRecordStore;
pub use traits::{RecordStore, StoredRecord, SyncRecord};
