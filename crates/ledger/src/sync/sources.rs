//! Narrow interfaces over the remote services a sync reads from

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{DateRange, ExtractedInvoice, MailMessage, RecordError, UsageEvent};

/// Source of raw per-model usage events
pub trait UsageSource: Send + Sync {
    /// Fetch every usage event for `model` inside the range's `[start, end)`
    fn fetch_usage_events(&self, model: &str, range: &DateRange) -> Result<Vec<UsageEvent>>;
}

/// Messages found by a mailbox search
#[derive(Debug, Clone, Default)]
pub struct MailSearch {
    pub messages: Vec<MailMessage>,
    /// Matches that could not be fetched, keyed by message id
    pub failures: Vec<RecordError>,
}

impl From<Vec<MailMessage>> for MailSearch {
    fn from(messages: Vec<MailMessage>) -> Self {
        Self {
            messages,
            failures: Vec::new(),
        }
    }
}

/// Mailbox that can be searched for receipt emails
pub trait Mailbox: Send + Sync {
    /// Messages matching any keyword, received between `start` and `end`.
    ///
    /// `Err` means the search itself failed; a single message that cannot be
    /// fetched is reported in [`MailSearch::failures`].
    fn search_messages(
        &self,
        keywords: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MailSearch>;
}

/// Natural-language extraction of invoice fields from an email body
pub trait InvoiceFieldExtractor: Send + Sync {
    fn extract_invoice_fields(&self, body: &str) -> Result<ExtractedInvoice>;
}
