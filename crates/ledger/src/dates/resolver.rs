//! Date range resolver

use chrono::{DateTime, Datelike, Days, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::SyncError;
use crate::models::{DateRange, DateSelector, Preset, Timeframe};

/// Parse an IANA timezone name such as `Asia/Seoul`
pub fn parse_timezone(name: &str) -> Result<Tz, SyncError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| SyncError::InvalidRange(format!("unknown timezone: {}", name)))
}

/// Infer a reporting granularity from a window's duration.
///
/// Thresholds are exclusive upper bounds checked in order, so a boundary
/// value lands in the next-coarser bucket.
pub fn infer_timeframe(duration: Duration) -> Timeframe {
    if duration < Duration::hours(2) {
        Timeframe::Minute
    } else if duration < Duration::days(2) {
        Timeframe::Hour
    } else if duration < Duration::days(64) {
        Timeframe::Day
    } else if duration < Duration::days(183) {
        Timeframe::Week
    } else {
        Timeframe::Month
    }
}

/// Start of `date` in `tz`, as a UTC instant.
///
/// When midnight falls in a DST gap the first valid instant after it is used.
pub fn local_midnight(tz: Tz, date: NaiveDate) -> Result<DateTime<Utc>, SyncError> {
    let naive = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| SyncError::InvalidRange(format!("invalid date: {}", date)))?;

    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => {
            // Skip forward through the gap minute by minute (gaps are at most a few hours)
            (1..=180)
                .filter_map(|m| tz.from_local_datetime(&(naive + Duration::minutes(m))).earliest())
                .next()
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or_else(|| {
                    SyncError::InvalidRange(format!("no local midnight for {} in {}", date, tz))
                })
        }
    }
}

/// Resolve a date selection into a concrete [`DateRange`].
///
/// # Arguments
/// * `selector` - Preset, explicit dates, or last-N-days
/// * `tz` - Target timezone for calendar-day boundaries
/// * `timeframe` - Explicit granularity; inferred from the duration when `None`
/// * `bound_to_timeframe` - Whether buckets snap to calendar boundaries
/// * `now` - The current instant (injected for determinism)
pub fn resolve_range(
    selector: &DateSelector,
    tz: Tz,
    timeframe: Option<Timeframe>,
    bound_to_timeframe: bool,
    now: DateTime<Utc>,
) -> Result<DateRange, SyncError> {
    let (start, end) = resolve_bounds(selector, tz, now)?;

    if end <= start {
        return Err(SyncError::InvalidRange(format!(
            "end ({}) must be after start ({})",
            end.with_timezone(&tz).format("%Y-%m-%d %H:%M"),
            start.with_timezone(&tz).format("%Y-%m-%d %H:%M"),
        )));
    }

    let timeframe = timeframe.unwrap_or_else(|| infer_timeframe(end - start));
    DateRange::new(start, end, tz, timeframe, bound_to_timeframe)
}

fn resolve_bounds(
    selector: &DateSelector,
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), SyncError> {
    let today = now.with_timezone(&tz).date_naive();

    match selector {
        DateSelector::Preset(preset) => match preset {
            Preset::Today => Ok((local_midnight(tz, today)?, now)),
            Preset::Yesterday => {
                let yesterday = days_before(today, 1)?;
                Ok((local_midnight(tz, yesterday)?, local_midnight(tz, today)?))
            }
            Preset::Last7Days => Ok((local_midnight(tz, days_before(today, 7)?)?, now)),
            Preset::Last30Days => Ok((local_midnight(tz, days_before(today, 30)?)?, now)),
            Preset::ThisMonth => {
                let first = today.with_day(1).ok_or_else(|| {
                    SyncError::InvalidRange(format!("no first day for month of {}", today))
                })?;
                Ok((local_midnight(tz, first)?, now))
            }
        },
        DateSelector::Between { start, end } => {
            let start_at = local_midnight(tz, *start)?;
            let end_at = match end {
                Some(end) => {
                    if end < start {
                        return Err(SyncError::InvalidRange(format!(
                            "end date {} is before start date {}",
                            end, start
                        )));
                    }
                    // Inclusive end date: run to the following midnight
                    let next = end.checked_add_days(Days::new(1)).ok_or_else(|| {
                        SyncError::InvalidRange(format!("end date out of range: {}", end))
                    })?;
                    local_midnight(tz, next)?
                }
                None => now,
            };
            Ok((start_at, end_at))
        }
        DateSelector::LastDays(days) => {
            if *days == 0 {
                return Err(SyncError::InvalidRange(
                    "day count must be at least 1".to_string(),
                ));
            }
            Ok((local_midnight(tz, days_before(today, *days)?)?, now))
        }
    }
}

fn days_before(date: NaiveDate, days: u32) -> Result<NaiveDate, SyncError> {
    date.checked_sub_days(Days::new(u64::from(days)))
        .ok_or_else(|| {
            SyncError::InvalidRange(format!("{} days before {} is out of range", days, date))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seoul() -> Tz {
        parse_timezone("Asia/Seoul").unwrap()
    }

    // 2025-03-15 10:30 in Seoul
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 15, 1, 30, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_infer_timeframe_thresholds() {
        assert_eq!(infer_timeframe(Duration::minutes(90)), Timeframe::Minute);
        assert_eq!(infer_timeframe(Duration::hours(2)), Timeframe::Hour);
        assert_eq!(infer_timeframe(Duration::days(2) - Duration::seconds(1)), Timeframe::Hour);
        assert_eq!(infer_timeframe(Duration::days(2)), Timeframe::Day);
        assert_eq!(infer_timeframe(Duration::days(63)), Timeframe::Day);
        assert_eq!(infer_timeframe(Duration::days(64)), Timeframe::Week);
        assert_eq!(infer_timeframe(Duration::days(182)), Timeframe::Week);
        assert_eq!(infer_timeframe(Duration::days(183)), Timeframe::Month);
        assert_eq!(infer_timeframe(Duration::days(800)), Timeframe::Month);
    }

    fn preset(preset: Preset) -> DateRange {
        resolve_range(&DateSelector::Preset(preset), seoul(), None, true, now()).unwrap()
    }

    #[test]
    fn test_today_uses_local_midnight() {
        let range = preset(Preset::Today);
        // Midnight in Seoul is 15:00 UTC the previous day
        assert_eq!(range.start(), Utc.with_ymd_and_hms(2025, 3, 14, 15, 0, 0).unwrap());
        assert_eq!(range.end(), now());
        assert_eq!(range.timeframe(), Timeframe::Hour);
    }

    #[test]
    fn test_yesterday_is_a_full_local_day() {
        let range = preset(Preset::Yesterday);
        assert_eq!(range.start(), Utc.with_ymd_and_hms(2025, 3, 13, 15, 0, 0).unwrap());
        assert_eq!(range.end(), Utc.with_ymd_and_hms(2025, 3, 14, 15, 0, 0).unwrap());
        assert_eq!(range.duration(), Duration::days(1));
        assert_eq!(range.timeframe(), Timeframe::Hour);
    }

    #[test]
    fn test_rolling_presets_end_now() {
        let week = preset(Preset::Last7Days);
        assert_eq!(week.start(), Utc.with_ymd_and_hms(2025, 3, 7, 15, 0, 0).unwrap());
        assert_eq!(week.end(), now());
        assert_eq!(week.timeframe(), Timeframe::Day);

        let month = preset(Preset::ThisMonth);
        assert_eq!(month.start(), Utc.with_ymd_and_hms(2025, 2, 28, 15, 0, 0).unwrap());
    }

    #[test]
    fn test_explicit_dates_cover_full_days() {
        let selector = DateSelector::Between {
            start: date(2025, 1, 1),
            end: Some(date(2025, 1, 3)),
        };
        let range = resolve_range(&selector, Tz::UTC, None, true, now()).unwrap();
        assert_eq!(range.start(), Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(range.end(), Utc.with_ymd_and_hms(2025, 1, 4, 0, 0, 0).unwrap());
        assert_eq!(range.timeframe(), Timeframe::Day);
    }

    #[test]
    fn test_explicit_timeframe_wins() {
        let selector = DateSelector::Between {
            start: date(2025, 1, 1),
            end: Some(date(2025, 1, 3)),
        };
        let range = resolve_range(&selector, Tz::UTC, Some(Timeframe::Hour), false, now()).unwrap();
        assert_eq!(range.timeframe(), Timeframe::Hour);
        assert!(!range.bound_to_timeframe());
    }

    #[test]
    fn test_inverted_dates_fail() {
        let selector = DateSelector::Between {
            start: date(2025, 1, 3),
            end: Some(date(2025, 1, 1)),
        };
        assert!(matches!(
            resolve_range(&selector, Tz::UTC, None, true, now()),
            Err(SyncError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_start_in_future_fails() {
        let selector = DateSelector::Between {
            start: date(2030, 1, 1),
            end: None,
        };
        assert!(resolve_range(&selector, Tz::UTC, None, true, now()).is_err());
    }

    #[test]
    fn test_last_days() {
        let range = resolve_range(&DateSelector::LastDays(90), Tz::UTC, None, true, now()).unwrap();
        assert_eq!(range.start(), Utc.with_ymd_and_hms(2024, 12, 15, 0, 0, 0).unwrap());
        assert_eq!(range.timeframe(), Timeframe::Week);

        assert!(resolve_range(&DateSelector::LastDays(0), Tz::UTC, None, true, now()).is_err());
    }

    #[test]
    fn test_unknown_timezone() {
        assert!(parse_timezone("Mars/Olympus").is_err());
    }

    #[test]
    fn test_local_midnight_in_dst_gap() {
        // Santiago skips from 00:00 to 01:00 when DST starts
        let tz = parse_timezone("America/Santiago").unwrap();
        let midnight = local_midnight(tz, date(2024, 9, 8)).unwrap();
        let local = midnight.with_timezone(&tz);
        assert_eq!(local.date_naive(), date(2024, 9, 8));
        assert_eq!(local.format("%H:%M").to_string(), "01:00");
    }
}
