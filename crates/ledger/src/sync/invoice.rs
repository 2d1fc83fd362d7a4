//! Invoice extraction from receipt emails

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use super::sources::{InvoiceFieldExtractor, MailSearch, Mailbox};
use crate::error::{SyncError, failure_kind};
use crate::models::{
    DateRange, ExtractedInvoice, InvoiceRecord, MailMessage, PaidStatus, RecordError,
};

/// Placeholder for optional text fields the model left empty
const NOT_AVAILABLE: &str = "N/A";

/// Key used for failures of the mailbox search itself
pub const MAILBOX_KEY: &str = "mailbox";

/// Invoices extracted from one mailbox search
#[derive(Debug, Default)]
pub struct InvoiceBatch {
    pub records: Vec<InvoiceRecord>,
    pub failures: Vec<RecordError>,
    /// Matching messages handed to the extractor
    pub messages_seen: usize,
}

/// Search the mailbox and extract one invoice per matching message.
///
/// Messages outside the range or matching no keyword are ignored. A message
/// whose extraction fails is reported under its message id and the rest of
/// the batch continues. Invoices sharing an invoice number are coalesced,
/// keeping the latest payment date.
pub fn extract_invoices(
    mailbox: &dyn Mailbox,
    extractor: &dyn InvoiceFieldExtractor,
    range: &DateRange,
    keywords: &[String],
) -> InvoiceBatch {
    let mut batch = InvoiceBatch::default();

    let MailSearch { messages, failures } =
        match mailbox.search_messages(keywords, range.start(), range.end()) {
            Ok(search) => search,
            Err(e) => {
                warn!("Mailbox search failed: {:#}", e);
                batch.failures.push(RecordError {
                    key: MAILBOX_KEY.to_string(),
                    kind: failure_kind(&e),
                    message: format!("{:#}", e),
                });
                return batch;
            }
        };
    batch.failures = failures;

    let mut seen_ids = HashSet::new();
    let mut extracted: Vec<(InvoiceRecord, DateTime<Utc>)> = Vec::new();

    for message in messages {
        if !range.contains(message.timestamp) || !message.matches_any(keywords) {
            debug!("Skipping message {} ({})", message.id, message.subject);
            continue;
        }
        if !seen_ids.insert(message.id.clone()) {
            continue;
        }
        batch.messages_seen += 1;

        let fields = match extractor.extract_invoice_fields(&message.body) {
            Ok(fields) => fields,
            Err(e) => {
                warn!("Extraction failed for message {}: {:#}", message.id, e);
                batch.failures.push(RecordError {
                    key: message.id.clone(),
                    kind: failure_kind(&e),
                    message: format!("{:#}", e),
                });
                continue;
            }
        };

        match build_invoice(&message, fields) {
            Ok(record) => {
                debug!("Extracted invoice {} from {}", record.invoice_number, message.id);
                extracted.push((record, message.timestamp));
            }
            Err(e) => {
                warn!("Rejected invoice from message {}: {}", message.id, e);
                batch.failures.push(RecordError {
                    key: message.id.clone(),
                    kind: e.kind(),
                    message: e.to_string(),
                });
            }
        }
    }

    batch.records = coalesce(extracted);
    info!(
        "Extracted {} invoices from {} messages ({} failed)",
        batch.records.len(),
        batch.messages_seen,
        batch.failures.len()
    );
    batch
}

/// Validate extracted fields and build an [`InvoiceRecord`].
///
/// `invoice_number`, `date_paid`, `service` and `amount` are required.
/// Missing optional text fields become `N/A` and a missing status means paid.
pub fn build_invoice(
    message: &MailMessage,
    fields: ExtractedInvoice,
) -> Result<InvoiceRecord, SyncError> {
    let invoice_number = non_empty(fields.invoice_number);
    let service = non_empty(fields.service);
    let date_paid = non_empty(fields.date_paid);
    let amount = fields.amount.filter(|v| !is_blank(v));

    let mut missing = Vec::new();
    if invoice_number.is_none() {
        missing.push("invoice_number".to_string());
    }
    if date_paid.is_none() {
        missing.push("date_paid".to_string());
    }
    if service.is_none() {
        missing.push("service".to_string());
    }
    if amount.is_none() {
        missing.push("amount".to_string());
    }

    let (Some(invoice_number), Some(date_paid), Some(service), Some(amount)) =
        (invoice_number, date_paid, service, amount)
    else {
        return Err(SyncError::ExtractionIncomplete { missing });
    };

    let date_paid = NaiveDate::parse_from_str(date_paid.trim(), "%Y-%m-%d").map_err(|_| {
        SyncError::ExtractionIncomplete {
            missing: vec![format!("date_paid (unparseable: {})", date_paid)],
        }
    })?;

    let amount = parse_amount(&amount)?;

    Ok(InvoiceRecord {
        invoice_number,
        date_paid,
        service: sanitize_service(&service),
        amount,
        email_subject: message.subject.clone(),
        description: non_empty(fields.description).unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        period: non_empty(fields.period).unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        paid_status: fields
            .paid_status
            .as_deref()
            .map(PaidStatus::parse)
            .unwrap_or_default(),
    })
}

/// Parse a currency amount from a JSON number or string.
///
/// Strings may carry a `$` sign, thousands separators or a `USD` suffix.
pub fn parse_amount(value: &Value) -> Result<Decimal, SyncError> {
    let raw = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => return Err(SyncError::InvalidAmount(format!("not a number: {}", other))),
    };

    let cleaned: String = raw
        .trim()
        .trim_end_matches("USD")
        .trim_start_matches("USD")
        .chars()
        .filter(|c| !matches!(c, '$' | ',') && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return Err(SyncError::InvalidAmount(format!("empty amount: {:?}", raw)));
    }

    let amount = Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .map_err(|_| SyncError::InvalidAmount(format!("not a number: {:?}", raw)))?;

    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(SyncError::InvalidAmount(format!("negative amount: {}", amount)));
    }
    Ok(amount)
}

/// Select options cannot contain commas
pub fn sanitize_service(service: &str) -> String {
    service.trim().replace(',', " -")
}

fn coalesce(extracted: Vec<(InvoiceRecord, DateTime<Utc>)>) -> Vec<InvoiceRecord> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<(InvoiceRecord, DateTime<Utc>)> = Vec::with_capacity(extracted.len());

    for (record, received) in extracted {
        match index.get(&record.invoice_number) {
            Some(&pos) => {
                let (kept, kept_received) = &out[pos];
                if (record.date_paid, received) > (kept.date_paid, *kept_received) {
                    debug!("Invoice {} seen again, keeping newer copy", record.invoice_number);
                    out[pos] = (record, received);
                }
            }
            None => {
                index.insert(record.invoice_number.clone(), out.len());
                out.push((record, received));
            }
        }
    }

    out.into_iter().map(|(record, _)| record).collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}
