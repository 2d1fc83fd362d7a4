//! Ledger crate - business logic for usage and invoice bookkeeping
//!
//! This crate provides:
//! - Domain models (UsageRecord, InvoiceRecord, DateRange, RunRequest)
//! - Date range resolution in arbitrary IANA timezones
//! - fal.ai usage, Gmail and OpenAI clients behind narrow source traits
//! - Storage trait abstractions with Notion and in-memory backends
//! - An idempotent, conflict-aware sync engine
//!
//! The crate has no UI dependencies; the `tally` binary is a thin wrapper.

pub mod config;
pub mod dates;
pub mod error;
pub mod fal;
pub mod gmail;
pub mod models;
pub mod notion;
pub mod openai;
pub mod storage;
pub mod sync;

pub use config::{ApiKeys, GmailCredentials, KeyFlags, Settings};
pub use dates::{infer_timeframe, local_midnight, parse_timezone, resolve_range};
pub use error::{SyncError, failure_kind};
pub use fal::FalClient;
pub use gmail::{GmailAuth, GmailClient};
pub use models::{
    ChangeKind, DateRange, DateSelector, FailureKind, InvoiceRecord, MailMessage, PaidStatus,
    PlannedChange, Preset, RecordError, RunMode, RunRequest, SyncOutcome, Timeframe, UsageEvent,
    UsageRecord,
};
pub use notion::{NotionClient, NotionCollection, NotionRecord};
pub use openai::OpenAiExtractor;
pub use storage::{CollectionLocks, InMemoryRecordStore, RecordStore, StoredRecord, SyncRecord};
pub use sync::{
    InvoiceFieldExtractor, MailSearch, Mailbox, ModeSummary, RunSummary, SyncOptions,
    SyncServices, UsageSource, run_sync, sync_records,
};
