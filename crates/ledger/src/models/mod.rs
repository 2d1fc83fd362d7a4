//! Domain models for usage and invoice sync

mod date_range;
mod invoice;
mod outcome;
mod run;
mod usage;

pub use date_range::{DateRange, DateSelector, Preset, Timeframe};
pub use invoice::{ExtractedInvoice, InvoiceRecord, MailMessage, PaidStatus};
pub use outcome::{ChangeKind, FailureKind, PlannedChange, RecordError, SyncOutcome};
pub use run::{RunMode, RunRequest};
pub use usage::{UNKNOWN_KEY, UsageEvent, UsageRecord};
