//! Mapping between records and Notion page properties

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde_json::{Map, Value, json};
use std::str::FromStr;

use crate::models::{InvoiceRecord, PaidStatus, UsageRecord};
use crate::storage::SyncRecord;

/// Notion caps each rich text segment at 2000 characters
const RICH_TEXT_LIMIT: usize = 2000;

/// A record that can be stored as a Notion database page
pub trait NotionRecord: SyncRecord + Sized {
    /// Properties for a create or update request
    fn to_properties(&self) -> Map<String, Value>;

    /// Rebuild a record from a queried page; `None` if required columns are empty
    fn from_properties(properties: &Map<String, Value>) -> Option<Self>;

    /// The record as it reads back after being written.
    ///
    /// Numbers pass through `f64` and long text is cut at the rich text
    /// limit, so a record must be compared in this form against queried rows.
    fn stored_form(&self) -> Self {
        Self::from_properties(&as_queried(self.to_properties())).unwrap_or_else(|| self.clone())
    }
}

impl NotionRecord for UsageRecord {
    fn to_properties(&self) -> Map<String, Value> {
        let mut props = Map::new();
        props.insert("Date".into(), date(self.date));
        props.insert("Model".into(), title(&self.model));
        props.insert("Model List".into(), select(&self.model_list));
        props.insert("Requests".into(), json!({ "number": self.requests }));
        props.insert("Quantity".into(), number(self.quantity));
        props.insert("Cost ($)".into(), number(self.cost));
        props.insert("Unit Price ($)".into(), number(self.unit_price));
        props.insert("Key Name".into(), select(&self.key_name));
        props.insert("Time".into(), rich_text(&self.time_label));
        props
    }

    fn from_properties(properties: &Map<String, Value>) -> Option<Self> {
        let model = read_text(properties.get("Model")?)?;
        let date = read_date(properties.get("Date")?)?;
        // Rows written before the Time column existed are keyed by date
        let time_label = properties
            .get("Time")
            .and_then(read_text)
            .unwrap_or_else(|| date.format("%Y-%m-%d").to_string());

        Some(UsageRecord {
            date,
            model_list: properties
                .get("Model List")
                .and_then(read_text)
                .unwrap_or_else(|| model.clone()),
            model,
            requests: properties
                .get("Requests")
                .and_then(read_number)
                .and_then(|n| n.trunc().to_u64())
                .unwrap_or(0),
            quantity: properties.get("Quantity").and_then(read_number).unwrap_or_default(),
            cost: properties.get("Cost ($)").and_then(read_number).unwrap_or_default(),
            unit_price: properties
                .get("Unit Price ($)")
                .and_then(read_number)
                .unwrap_or_default(),
            time_label,
            key_name: properties
                .get("Key Name")
                .and_then(read_text)
                .unwrap_or_else(|| crate::models::UNKNOWN_KEY.to_string()),
        })
    }
}

impl NotionRecord for InvoiceRecord {
    fn to_properties(&self) -> Map<String, Value> {
        let mut props = Map::new();
        props.insert("Invoice Number".into(), title(&self.invoice_number));
        props.insert("Date Paid".into(), date(self.date_paid));
        props.insert("Amount ($)".into(), number(self.amount));
        props.insert("Service".into(), select(&self.service));
        props.insert("Description".into(), rich_text(&self.description));
        props.insert("Period".into(), rich_text(&self.period));
        props.insert("Email Subject".into(), rich_text(&self.email_subject));
        props.insert(
            "Paid Status".into(),
            json!({ "status": { "name": self.paid_status.as_str() } }),
        );
        props
    }

    fn from_properties(properties: &Map<String, Value>) -> Option<Self> {
        let text = |name: &str| properties.get(name).and_then(read_text).unwrap_or_default();

        Some(InvoiceRecord {
            invoice_number: read_text(properties.get("Invoice Number")?)?,
            date_paid: read_date(properties.get("Date Paid")?)?,
            service: text("Service"),
            amount: properties.get("Amount ($)").and_then(read_number).unwrap_or_default(),
            email_subject: text("Email Subject"),
            description: text("Description"),
            period: text("Period"),
            paid_status: PaidStatus::parse(&text("Paid Status")),
        })
    }
}

fn title(text: &str) -> Value {
    json!({ "title": [{ "text": { "content": truncate(text) } }] })
}

fn rich_text(text: &str) -> Value {
    json!({ "rich_text": [{ "text": { "content": truncate(text) } }] })
}

fn select(name: &str) -> Value {
    json!({ "select": { "name": name } })
}

fn date(date: NaiveDate) -> Value {
    json!({ "date": { "start": date.format("%Y-%m-%d").to_string() } })
}

fn number(value: Decimal) -> Value {
    let number = value
        .to_f64()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null);
    json!({ "number": number })
}

/// Shape written properties the way a database query returns them
fn as_queried(props: Map<String, Value>) -> Map<String, Value> {
    props
        .into_iter()
        .map(|(name, mut value)| {
            let kind = value
                .as_object()
                .and_then(|o| o.keys().next().cloned())
                .unwrap_or_default();
            if let Some(segments) = value.get_mut(&kind).and_then(Value::as_array_mut) {
                for segment in segments {
                    let text = segment["text"]["content"].clone();
                    segment["plain_text"] = text;
                }
            }
            value["type"] = Value::String(kind);
            (name, value)
        })
        .collect()
}

fn truncate(text: &str) -> String {
    text.chars().take(RICH_TEXT_LIMIT).collect()
}

/// Plain text of a title, rich_text, select or status property
fn read_text(property: &Value) -> Option<String> {
    let text = match property.get("type").and_then(Value::as_str)? {
        kind @ ("title" | "rich_text") => property
            .get(kind)?
            .as_array()?
            .iter()
            .filter_map(|segment| {
                segment
                    .get("plain_text")
                    .or_else(|| segment.get("text").and_then(|t| t.get("content")))
                    .and_then(Value::as_str)
            })
            .collect::<String>(),
        kind @ ("select" | "status") => property.get(kind)?.get("name")?.as_str()?.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn read_date(property: &Value) -> Option<NaiveDate> {
    let start = property.get("date")?.get("start")?.as_str()?;
    // Date-time values carry a time after the date
    NaiveDate::parse_from_str(start.get(..10)?, "%Y-%m-%d").ok()
}

fn read_number(property: &Value) -> Option<Decimal> {
    match property.get("number")? {
        Value::Number(n) => {
            let s = n.to_string();
            Decimal::from_str(&s)
                .or_else(|_| Decimal::from_scientific(&s))
                .ok()
                .or_else(|| n.as_f64().and_then(Decimal::from_f64))
        }
        _ => None,
    }
}
