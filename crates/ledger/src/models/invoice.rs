//! Invoice records extracted from receipt emails

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::storage::SyncRecord;

/// Payment status reported on an invoice
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PaidStatus {
    #[default]
    Paid,
    Unpaid,
    Pending,
    Overdue,
    Other(String),
}

impl PaidStatus {
    /// Parse a free-form status, case-insensitively
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "paid" => Self::Paid,
            "unpaid" => Self::Unpaid,
            "pending" => Self::Pending,
            "overdue" => Self::Overdue,
            _ => Self::Other(trimmed.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Paid => "Paid",
            Self::Unpaid => "Unpaid",
            Self::Pending => "Pending",
            Self::Overdue => "Overdue",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for PaidStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured invoice, identified by its invoice number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub invoice_number: String,
    pub date_paid: NaiveDate,
    pub service: String,
    pub amount: Decimal,
    pub email_subject: String,
    pub description: String,
    pub period: String,
    pub paid_status: PaidStatus,
}

impl SyncRecord for InvoiceRecord {
    fn dedup_key(&self) -> String {
        self.invoice_number.clone()
    }

    fn fields_equal(&self, other: &Self) -> bool {
        self == other
    }

    fn supersedes(&self, other: &Self) -> bool {
        // Ties keep the record seen first
        self.date_paid > other.date_paid
    }
}

/// Raw invoice fields returned by the extraction call
///
/// Every field is optional; the extractor enforces completeness.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExtractedInvoice {
    #[serde(default, alias = "invoice_id")]
    pub invoice_number: Option<String>,
    #[serde(default, alias = "date")]
    pub date_paid: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    /// Number or string; parsed by the extractor
    #[serde(default)]
    pub amount: Option<serde_json::Value>,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub paid_status: Option<String>,
}

/// A mailbox message matched by an invoice search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailMessage {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    pub body: String,
}

impl MailMessage {
    /// Case-insensitive match of any keyword against subject, sender or body
    pub fn matches_any(&self, keywords: &[String]) -> bool {
        let subject = self.subject.to_lowercase();
        let sender = self.sender.to_lowercase();
        let body = self.body.to_lowercase();
        keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .any(|k| subject.contains(&k) || sender.contains(&k) || body.contains(&k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paid_status_parse() {
        assert_eq!(PaidStatus::parse("PAID"), PaidStatus::Paid);
        assert_eq!(PaidStatus::parse(""), PaidStatus::Paid);
        assert_eq!(PaidStatus::parse("overdue"), PaidStatus::Overdue);
        assert_eq!(
            PaidStatus::parse("Refunded"),
            PaidStatus::Other("Refunded".to_string())
        );
    }

    #[test]
    fn test_extracted_invoice_accepts_legacy_names() {
        let json = r#"{"invoice_id": "INV-1", "date": "2025-01-15", "amount": 29.99}"#;
        let extracted: ExtractedInvoice = serde_json::from_str(json).unwrap();
        assert_eq!(extracted.invoice_number.as_deref(), Some("INV-1"));
        assert_eq!(extracted.date_paid.as_deref(), Some("2025-01-15"));
        assert!(extracted.service.is_none());
    }

    #[test]
    fn test_message_keyword_match() {
        let message = MailMessage {
            id: "m1".into(),
            subject: "Your Replit receipt".into(),
            sender: "billing@replit.com".into(),
            timestamp: Utc::now(),
            body: "Thanks for your payment".into(),
        };
        assert!(message.matches_any(&["replit receipt".to_string()]));
        assert!(message.matches_any(&["nope".to_string(), "BILLING@".to_string()]));
        assert!(!message.matches_any(&["aws".to_string()]));
        assert!(!message.matches_any(&["  ".to_string()]));
    }
}
