//! Usage events and aggregated usage rows

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::storage::SyncRecord;

/// Key name recorded when the provider reports no key alias
pub const UNKNOWN_KEY: &str = "Unknown";

/// A raw usage event as reported by the usage API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub timestamp: DateTime<Utc>,
    pub request_count: u64,
    pub quantity: Decimal,
    /// Provider-reported cost for this event
    pub cost: Decimal,
    /// API key alias the usage was billed to, if reported
    pub key_alias: Option<String>,
}

impl UsageEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        request_count: u64,
        quantity: Decimal,
        cost: Decimal,
    ) -> Self {
        Self {
            timestamp,
            request_count,
            quantity,
            cost,
            key_alias: None,
        }
    }

    pub fn with_key_alias(mut self, alias: impl Into<String>) -> Self {
        self.key_alias = Some(alias.into());
        self
    }
}

/// One reporting bucket for one model
///
/// Identity is `(model, time_label)`: two rows with the same pair describe the
/// same bucket and must not both exist in the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Calendar date of the bucket start in the run's timezone
    pub date: NaiveDate,
    pub model: String,
    pub requests: u64,
    pub quantity: Decimal,
    pub cost: Decimal,
    pub unit_price: Decimal,
    /// Bucket label, `YYYY-MM-DD` or `YYYY-MM-DD HH:MM` for sub-daily buckets
    pub time_label: String,
    pub model_list: String,
    pub key_name: String,
}

impl UsageRecord {
    /// Decimal places kept on derived unit prices
    pub const UNIT_PRICE_DP: u32 = 10;

    /// `cost / quantity`, or zero when nothing was consumed
    pub fn derive_unit_price(cost: Decimal, quantity: Decimal) -> Decimal {
        if quantity > Decimal::ZERO {
            (cost / quantity).round_dp(Self::UNIT_PRICE_DP).normalize()
        } else {
            Decimal::ZERO
        }
    }
}

impl SyncRecord for UsageRecord {
    fn dedup_key(&self) -> String {
        format!("{}|{}", self.model, self.time_label)
    }

    fn fields_equal(&self, other: &Self) -> bool {
        self == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_price_derivation() {
        let price = UsageRecord::derive_unit_price(Decimal::new(300, 2), Decimal::from(4));
        assert_eq!(price, Decimal::new(75, 2));
        assert_eq!(
            UsageRecord::derive_unit_price(Decimal::new(300, 2), Decimal::ZERO),
            Decimal::ZERO
        );
    }
}
