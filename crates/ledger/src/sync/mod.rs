//! Sync engine
//!
//! Turns usage events and receipt emails into records and upserts them into
//! a [`RecordStore`](crate::storage::RecordStore).

mod invoice;
mod orchestrator;
mod sources;
mod syncer;
mod usage;

pub use invoice::{
    InvoiceBatch, MAILBOX_KEY, build_invoice, extract_invoices, parse_amount, sanitize_service,
};
pub use orchestrator::{ModeSummary, RunSummary, SyncServices, run_sync};
pub use sources::{InvoiceFieldExtractor, MailSearch, Mailbox, UsageSource};
pub use syncer::{
    PlannedRecord, SyncDecision, SyncOptions, SyncPlan, apply_plan, dedup_batch, plan_sync,
    sync_records,
};
pub use usage::{UsageBatch, aggregate_events, aggregate_usage, bucket_start};
