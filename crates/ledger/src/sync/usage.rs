//! Usage aggregation
//!
//! Fetches raw usage events per model and reduces them into one
//! [`UsageRecord`] per (model, bucket) that saw at least one event.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDateTime, TimeZone, Timelike, Utc};
use log::{debug, info, warn};
use rayon::prelude::*;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

use super::sources::UsageSource;
use crate::dates::local_midnight;
use crate::error::failure_kind;
use crate::models::{DateRange, RecordError, Timeframe, UNKNOWN_KEY, UsageEvent, UsageRecord};

/// Aggregated records plus the models that could not be fetched
#[derive(Debug, Default)]
pub struct UsageBatch {
    pub records: Vec<UsageRecord>,
    pub failures: Vec<RecordError>,
}

#[derive(Default)]
struct BucketTotals {
    requests: u64,
    quantity: Decimal,
    cost: Decimal,
    keys: BTreeSet<String>,
}

/// Fetch and aggregate usage for every model over `range`.
///
/// Models are fetched in parallel; each writes only its own records. A model
/// whose fetch fails is reported in `failures` and the others still succeed.
pub fn aggregate_usage(
    source: &dyn UsageSource,
    range: &DateRange,
    models: &[String],
) -> UsageBatch {
    let fetched: Vec<(&String, anyhow::Result<Vec<UsageEvent>>)> = models
        .par_iter()
        .map(|model| (model, source.fetch_usage_events(model, range)))
        .collect();

    let mut batch = UsageBatch::default();
    for (model, result) in fetched {
        match result {
            Ok(events) => {
                let records = aggregate_events(model, &events, range);
                debug!("{}: {} events -> {} buckets", model, events.len(), records.len());
                batch.records.extend(records);
            }
            Err(e) => {
                warn!("Failed to fetch usage for {}: {:#}", model, e);
                batch.failures.push(RecordError {
                    key: model.clone(),
                    kind: failure_kind(&e),
                    message: format!("{:#}", e),
                });
            }
        }
    }

    info!(
        "Aggregated {} usage records ({} models failed)",
        batch.records.len(),
        batch.failures.len()
    );
    batch
}

/// Reduce one model's events into per-bucket records.
///
/// Events outside `[start, end)` are ignored. Empty buckets are omitted.
pub fn aggregate_events(model: &str, events: &[UsageEvent], range: &DateRange) -> Vec<UsageRecord> {
    let mut buckets: BTreeMap<DateTime<Utc>, BucketTotals> = BTreeMap::new();

    for event in events {
        if !range.contains(event.timestamp) {
            debug!("{}: dropping event at {} outside window", model, event.timestamp);
            continue;
        }
        let totals = buckets.entry(bucket_start(event.timestamp, range)).or_default();
        totals.requests += event.request_count;
        totals.quantity += event.quantity;
        totals.cost += event.cost;
        if let Some(alias) = &event.key_alias {
            totals.keys.insert(alias.clone());
        }
    }

    buckets
        .into_iter()
        .map(|(start, totals)| {
            let local = start.with_timezone(&range.timezone());
            let key_name = if totals.keys.is_empty() {
                UNKNOWN_KEY.to_string()
            } else {
                totals.keys.into_iter().collect::<Vec<_>>().join(" / ")
            };
            UsageRecord {
                date: local.date_naive(),
                model: model.to_string(),
                requests: totals.requests,
                quantity: totals.quantity,
                cost: totals.cost,
                unit_price: UsageRecord::derive_unit_price(totals.cost, totals.quantity),
                time_label: time_label(start, range),
                model_list: model.to_string(),
                key_name,
            }
        })
        .collect()
}

/// Start of the bucket containing `instant`.
///
/// Bound ranges snap to calendar boundaries in the range's timezone (top of
/// the hour, local midnight, Monday, first of the month). Unbound ranges use
/// sliding windows anchored at the range start.
pub fn bucket_start(instant: DateTime<Utc>, range: &DateRange) -> DateTime<Utc> {
    if range.bound_to_timeframe() {
        calendar_bucket_start(instant, range)
    } else {
        sliding_bucket_start(instant, range)
    }
}

fn calendar_bucket_start(instant: DateTime<Utc>, range: &DateRange) -> DateTime<Utc> {
    let tz = range.timezone();
    let local = instant.with_timezone(&tz);
    let into_minute = Duration::seconds(i64::from(local.second()))
        + Duration::nanoseconds(i64::from(local.nanosecond()));

    let date = match range.timeframe() {
        Timeframe::Minute => return instant - into_minute,
        Timeframe::Hour => {
            return instant - Duration::minutes(i64::from(local.minute())) - into_minute;
        }
        Timeframe::Day => local.date_naive(),
        Timeframe::Week => {
            local.date_naive() - Duration::days(i64::from(local.weekday().num_days_from_monday()))
        }
        Timeframe::Month => local.date_naive().with_day(1).unwrap_or(local.date_naive()),
    };

    local_midnight(tz, date).unwrap_or(instant)
}

fn sliding_bucket_start(instant: DateTime<Utc>, range: &DateRange) -> DateTime<Utc> {
    let start = range.start();
    let width = match range.timeframe() {
        Timeframe::Minute => Duration::minutes(1),
        Timeframe::Hour => Duration::hours(1),
        Timeframe::Day => Duration::days(1),
        Timeframe::Week => Duration::weeks(1),
        Timeframe::Month => return sliding_month_start(instant, range),
    };

    let elapsed = (instant - start).num_seconds().max(0);
    let steps = elapsed / width.num_seconds();
    start + width * steps as i32
}

fn sliding_month_start(instant: DateTime<Utc>, range: &DateRange) -> DateTime<Utc> {
    let tz = range.timezone();
    let anchor = range.start().with_timezone(&tz).naive_local();
    let target = instant.with_timezone(&tz).naive_local();

    let months_apart = (target.year() - anchor.year()) * 12 + target.month() as i32
        - anchor.month() as i32;
    let mut n = months_apart.max(0) as u32;

    // Day-of-month clamping can put the estimate one month too far
    loop {
        let candidate = add_months_local(range, anchor, n);
        if candidate <= instant || n == 0 {
            return candidate;
        }
        n -= 1;
    }
}

fn add_months_local(range: &DateRange, anchor: NaiveDateTime, months: u32) -> DateTime<Utc> {
    let tz = range.timezone();
    let Some(naive) = anchor.checked_add_months(Months::new(months)) else {
        return range.start();
    };
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}

/// Label identifying a bucket within a run.
///
/// Sub-daily buckets, and any bucket not starting at local midnight, carry a
/// time of day so labels stay unique.
fn time_label(bucket: DateTime<Utc>, range: &DateRange) -> String {
    let local = bucket.with_timezone(&range.timezone());
    let at_midnight = local.hour() == 0 && local.minute() == 0;
    if range.timeframe().is_sub_daily() || !at_midnight {
        local.format("%Y-%m-%d %H:%M").to_string()
    } else {
        local.format("%Y-%m-%d").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::parse_timezone;
    use chrono::NaiveDate;
    use chrono_tz::Tz;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn range(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        tz: Tz,
        tf: Timeframe,
        bound: bool,
    ) -> DateRange {
        DateRange::new(start, end, tz, tf, bound).unwrap()
    }

    fn utc_range(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        tf: Timeframe,
        bound: bool,
    ) -> DateRange {
        range(start, end, Tz::UTC, tf, bound)
    }

    fn event(at: DateTime<Utc>, requests: u64, quantity: i64, cost_cents: i64) -> UsageEvent {
        UsageEvent::new(at, requests, Decimal::from(quantity), Decimal::new(cost_cents, 2))
    }

    #[test]
    fn test_daily_buckets_skip_empty_days() {
        let r = range(utc(2025, 1, 1, 0, 0), utc(2025, 1, 4, 0, 0), Tz::UTC, Timeframe::Day, true);
        let events = vec![
            event(utc(2025, 1, 1, 3, 0), 1, 2, 50),
            event(utc(2025, 1, 1, 18, 0), 2, 2, 50),
            event(utc(2025, 1, 3, 9, 0), 1, 1, 25),
        ];

        let records = aggregate_events("fal-ai/flux/dev", &events, &r);
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.time_label, "2025-01-01");
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(first.requests, 3);
        assert_eq!(first.quantity, Decimal::from(4));
        assert_eq!(first.cost, Decimal::new(100, 2));
        assert_eq!(first.unit_price, Decimal::new(25, 2));
        assert_eq!(first.key_name, UNKNOWN_KEY);
        assert_eq!(records[1].time_label, "2025-01-03");
    }

    #[test]
    fn test_events_outside_window_are_dropped() {
        let r = range(utc(2025, 1, 1, 0, 0), utc(2025, 1, 2, 0, 0), Tz::UTC, Timeframe::Hour, true);
        let events = vec![
            event(utc(2024, 12, 31, 23, 59), 1, 1, 10),
            event(utc(2025, 1, 2, 0, 0), 1, 1, 10),
            event(utc(2025, 1, 1, 5, 45), 1, 1, 10),
        ];
        let records = aggregate_events("m", &events, &r);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].time_label, "2025-01-01 05:00");
    }

    #[test]
    fn test_zero_quantity_has_zero_unit_price() {
        let r = range(utc(2025, 1, 1, 0, 0), utc(2025, 1, 2, 0, 0), Tz::UTC, Timeframe::Day, true);
        let records = aggregate_events("m", &[event(utc(2025, 1, 1, 1, 0), 1, 0, 10)], &r);
        assert_eq!(records[0].unit_price, Decimal::ZERO);
    }

    #[test]
    fn test_calendar_buckets_follow_timezone() {
        let tz = parse_timezone("Asia/Seoul").unwrap();
        let r = range(utc(2025, 1, 1, 0, 0), utc(2025, 1, 10, 0, 0), tz, Timeframe::Day, true);
        // 2025-01-02 08:00 KST
        let start = bucket_start(utc(2025, 1, 1, 23, 0), &r);
        assert_eq!(start, utc(2025, 1, 1, 15, 0));
        assert_eq!(time_label(start, &r), "2025-01-02");
    }

    #[test]
    fn test_half_hour_offset_hour_buckets() {
        let tz = parse_timezone("Asia/Kolkata").unwrap();
        let r = range(utc(2025, 1, 1, 0, 0), utc(2025, 1, 2, 0, 0), tz, Timeframe::Hour, true);
        // 10:10 UTC is 15:40 IST, bucket starts 15:00 IST = 09:30 UTC
        assert_eq!(bucket_start(utc(2025, 1, 1, 10, 10), &r), utc(2025, 1, 1, 9, 30));
    }

    #[test]
    fn test_week_and_month_buckets() {
        let week = utc_range(utc(2025, 1, 1, 0, 0), utc(2025, 4, 1, 0, 0), Timeframe::Week, true);
        // 2025-01-09 is a Thursday; the week starts Monday 2025-01-06
        assert_eq!(bucket_start(utc(2025, 1, 9, 12, 0), &week), utc(2025, 1, 6, 0, 0));

        let month = utc_range(utc(2024, 1, 1, 0, 0), utc(2025, 1, 1, 0, 0), Timeframe::Month, true);
        assert_eq!(bucket_start(utc(2024, 7, 19, 12, 0), &month), utc(2024, 7, 1, 0, 0));
    }

    #[test]
    fn test_sliding_buckets_anchor_at_start() {
        let r = utc_range(utc(2025, 1, 1, 10, 30), utc(2025, 1, 1, 20, 0), Timeframe::Hour, false);
        assert_eq!(bucket_start(utc(2025, 1, 1, 12, 0), &r), utc(2025, 1, 1, 11, 30));

        let days = utc_range(utc(2025, 1, 1, 10, 30), utc(2025, 1, 5, 0, 0), Timeframe::Day, false);
        let start = bucket_start(utc(2025, 1, 2, 9, 0), &days);
        assert_eq!(start, utc(2025, 1, 1, 10, 30));
        assert_eq!(time_label(start, &days), "2025-01-01 10:30");
    }

    #[test]
    fn test_sliding_month_clamps_day() {
        let r = utc_range(utc(2025, 1, 31, 0, 0), utc(2025, 12, 31, 0, 0), Timeframe::Month, false);
        // Jan 31 + 1 month clamps to Feb 28
        assert_eq!(bucket_start(utc(2025, 3, 1, 0, 0), &r), utc(2025, 2, 28, 0, 0));
        assert_eq!(bucket_start(utc(2025, 2, 10, 0, 0), &r), utc(2025, 1, 31, 0, 0));
    }

    #[test]
    fn test_key_aliases_are_joined() {
        let r = range(utc(2025, 1, 1, 0, 0), utc(2025, 1, 2, 0, 0), Tz::UTC, Timeframe::Day, true);
        let events = vec![
            event(utc(2025, 1, 1, 1, 0), 1, 1, 10).with_key_alias("prod"),
            event(utc(2025, 1, 1, 2, 0), 1, 1, 10).with_key_alias("ci"),
            event(utc(2025, 1, 1, 3, 0), 1, 1, 10).with_key_alias("prod"),
        ];
        let records = aggregate_events("m", &events, &r);
        assert_eq!(records[0].key_name, "ci / prod");
    }
}
