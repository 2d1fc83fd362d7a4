//! fal.ai Usage API integration
//!
//! This module provides:
//! - A paginating client for the usage and pricing endpoints
//! - Conversion of time-series results into [`UsageEvent`](crate::models::UsageEvent)s

mod client;
mod convert;

pub use client::FalClient;
pub use convert::{events_from_page, pricing_map};

/// fal.ai API response types
pub mod api {
    use rust_decimal::Decimal;
    use serde::Deserialize;

    /// One page of `GET /v1/models/usage`
    #[derive(Debug, Default, Deserialize)]
    pub struct UsagePage {
        #[serde(default)]
        pub time_series: Vec<TimeBucket>,
        #[serde(default)]
        pub has_more: Option<bool>,
        #[serde(default)]
        pub cursor: Option<String>,
    }

    /// Results for one bucket returned by the API
    #[derive(Debug, Deserialize)]
    pub struct TimeBucket {
        /// Bucket start, RFC 3339
        pub bucket: String,
        #[serde(default)]
        pub results: Vec<UsageResult>,
    }

    #[derive(Debug, Deserialize)]
    pub struct UsageResult {
        pub endpoint_id: String,
        #[serde(default)]
        pub quantity: Option<Decimal>,
        #[serde(default)]
        pub unit_price: Option<Decimal>,
        #[serde(default)]
        pub cost: Option<Decimal>,
        #[serde(default)]
        pub requests: Option<u64>,
        #[serde(default)]
        pub auth_method: Option<AuthMethod>,
    }

    /// Either a bare alias or an object carrying `key_alias`
    #[derive(Debug, Deserialize)]
    #[serde(untagged)]
    pub enum AuthMethod {
        Alias(String),
        Key { key_alias: Option<String> },
    }

    impl AuthMethod {
        pub fn key_alias(&self) -> Option<&str> {
            let alias = match self {
                Self::Alias(alias) => Some(alias.as_str()),
                Self::Key { key_alias } => key_alias.as_deref(),
            };
            alias.filter(|a| !a.trim().is_empty())
        }
    }

    /// Response of `GET /v1/models/pricing`
    #[derive(Debug, Default, Deserialize)]
    pub struct PricingResponse {
        #[serde(default, alias = "items", alias = "data")]
        pub prices: Vec<PriceEntry>,
    }

    #[derive(Debug, Deserialize)]
    pub struct PriceEntry {
        #[serde(default, alias = "model")]
        pub endpoint_id: Option<String>,
        #[serde(default, alias = "price")]
        pub unit_price: Option<Decimal>,
        #[serde(default)]
        pub unit: Option<String>,
    }
}
