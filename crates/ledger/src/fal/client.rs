//! fal.ai HTTP client
//!
//! Uses synchronous HTTP (ureq) so per-model fetches can run on a thread pool.

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use log::{debug, warn};
use rust_decimal::Decimal;
use std::collections::HashMap;

use super::api::{PricingResponse, UsagePage};
use super::convert::{events_from_page, needs_pricing, pricing_map};
use crate::error::upstream_from_ureq;
use crate::models::{DateRange, UsageEvent};
use crate::sync::UsageSource;

/// Client for the fal.ai platform API
pub struct FalClient {
    api_key: String,
    base_url: String,
}

impl FalClient {
    /// Platform API base URL
    const BASE_URL: &'static str = "https://api.fal.ai/v1/models";

    /// Upper bound on pages fetched for one query
    const MAX_PAGES: usize = 1000;

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: Self::BASE_URL.to_string(),
        }
    }

    /// Point the client at a different host
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Fetch one page of time-series usage
    ///
    /// # Arguments
    /// * `endpoint_ids` - Model ids, joined into one comma-separated parameter
    /// * `range` - Window, timezone and bucket settings
    /// * `cursor` - Cursor returned by the previous page
    pub fn get_usage_page(
        &self,
        endpoint_ids: &[&str],
        range: &DateRange,
        cursor: Option<&str>,
    ) -> Result<UsagePage> {
        let url = self.usage_url(endpoint_ids, range, cursor);
        debug!("GET {}", url);

        let mut response = ureq::get(&url)
            .header("Authorization", &format!("Key {}", self.api_key))
            .call()
            .map_err(|e| upstream_from_ureq(e, "usage"))?;

        response
            .body_mut()
            .read_json()
            .context("Failed to parse usage response")
    }

    /// Fetch every page of usage for the given models
    pub fn get_usage_all(
        &self,
        endpoint_ids: &[&str],
        range: &DateRange,
    ) -> Result<Vec<UsagePage>> {
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self.get_usage_page(endpoint_ids, range, cursor.as_deref())?;
            let next = match (page.has_more, &page.cursor) {
                (Some(true), Some(next)) if !next.is_empty() => Some(next.clone()),
                _ => None,
            };
            pages.push(page);

            match next {
                Some(next) if pages.len() < Self::MAX_PAGES => cursor = Some(next),
                Some(_) => anyhow::bail!("Usage pagination exceeded {} pages", Self::MAX_PAGES),
                None => break,
            }
        }

        debug!("Fetched {} usage pages for {}", pages.len(), endpoint_ids.join(","));
        Ok(pages)
    }

    /// Fetch catalogue unit prices, optionally restricted to some models
    pub fn get_pricing(&self, endpoint_ids: &[&str]) -> Result<HashMap<String, Decimal>> {
        let mut url = format!("{}/pricing", self.base_url);
        if !endpoint_ids.is_empty() {
            url.push_str(&format!(
                "?endpoint_id={}",
                urlencoding::encode(&endpoint_ids.join(","))
            ));
        }

        let mut response = ureq::get(&url)
            .header("Authorization", &format!("Key {}", self.api_key))
            .call()
            .map_err(|e| upstream_from_ureq(e, "pricing"))?;

        let pricing: PricingResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse pricing response")?;

        Ok(pricing_map(&pricing))
    }

    fn usage_url(&self, endpoint_ids: &[&str], range: &DateRange, cursor: Option<&str>) -> String {
        let mut params = vec![
            ("endpoint_id", endpoint_ids.join(",")),
            ("start", range.start().to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("end", range.end().to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("timezone", range.timezone().name().to_string()),
            ("timeframe", range.timeframe().as_str().to_string()),
            ("bound_to_timeframe", range.bound_to_timeframe().to_string()),
            ("expand", "time_series,auth_method".to_string()),
        ];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}/usage?{}", self.base_url, query)
    }
}

impl UsageSource for FalClient {
    fn fetch_usage_events(&self, model: &str, range: &DateRange) -> Result<Vec<UsageEvent>> {
        let pages = self.get_usage_all(&[model], range)?;

        let prices = if pages.iter().any(needs_pricing) {
            self.get_pricing(&[model]).unwrap_or_else(|e| {
                warn!("Pricing lookup for {} failed, costs default to 0: {:#}", model, e);
                HashMap::new()
            })
        } else {
            HashMap::new()
        };

        let mut events = Vec::new();
        for page in &pages {
            events.extend(events_from_page(page, model, &prices)?);
        }
        Ok(events)
    }
}
