//! Usage API responses to domain events

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;

use super::api::{PricingResponse, UsagePage};
use crate::models::UsageEvent;

/// Convert one usage page into events for `model`.
///
/// Each result becomes an event at its bucket start. A missing cost is
/// computed as `quantity * unit_price`, falling back to `prices` when the
/// result has no unit price. A missing request count falls back to the
/// quantity.
pub fn events_from_page(
    page: &UsagePage,
    model: &str,
    prices: &HashMap<String, Decimal>,
) -> Result<Vec<UsageEvent>> {
    let mut events = Vec::new();

    for bucket in &page.time_series {
        let timestamp = DateTime::parse_from_rfc3339(&bucket.bucket)
            .with_context(|| format!("Invalid bucket timestamp: {}", bucket.bucket))?
            .with_timezone(&Utc);

        for result in bucket.results.iter().filter(|r| r.endpoint_id == model) {
            let quantity = result.quantity.unwrap_or_default();
            let cost = match result.cost {
                Some(cost) => cost,
                None => {
                    let unit_price = result
                        .unit_price
                        .or_else(|| prices.get(&result.endpoint_id).copied())
                        .unwrap_or_default();
                    quantity * unit_price
                }
            };
            let requests = result
                .requests
                .unwrap_or_else(|| quantity.trunc().to_u64().unwrap_or(0));

            let mut event = UsageEvent::new(timestamp, requests, quantity, cost);
            event.key_alias = result
                .auth_method
                .as_ref()
                .and_then(|m| m.key_alias())
                .map(str::to_string);
            events.push(event);
        }
    }

    Ok(events)
}

/// Whether any result on the page needs a catalogue price to compute its cost
pub(crate) fn needs_pricing(page: &UsagePage) -> bool {
    page.time_series
        .iter()
        .flat_map(|b| &b.results)
        .any(|r| r.cost.is_none() && r.unit_price.is_none())
}

/// Map endpoint id to unit price
pub fn pricing_map(response: &PricingResponse) -> HashMap<String, Decimal> {
    response
        .prices
        .iter()
        .filter_map(|entry| Some((entry.endpoint_id.clone()?, entry.unit_price?)))
        .collect()
}
