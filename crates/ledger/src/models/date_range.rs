//! Resolved query windows and reporting granularity

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

/// Reporting bucket size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    /// Whether bucket labels need a time of day to be unique
    pub fn is_sub_daily(&self) -> bool {
        matches!(self, Self::Minute | Self::Hour)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minute" => Ok(Self::Minute),
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            other => Err(SyncError::InvalidRange(format!("unknown timeframe: {}", other))),
        }
    }
}

/// Named, timezone-aware shorthand for a date range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Today,
    Yesterday,
    Last7Days,
    Last30Days,
    ThisMonth,
}

impl Preset {
    pub const ALL: [Preset; 5] = [
        Self::Today,
        Self::Yesterday,
        Self::Last7Days,
        Self::Last30Days,
        Self::ThisMonth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Yesterday => "yesterday",
            Self::Last7Days => "last-7-days",
            Self::Last30Days => "last-30-days",
            Self::ThisMonth => "this-month",
        }
    }
}

impl FromStr for Preset {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == token)
            .ok_or_else(|| SyncError::InvalidRange(format!("unknown preset: {}", s)))
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unresolved date selection as supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateSelector {
    /// A named preset such as `today` or `last-7-days`
    Preset(Preset),
    /// Calendar dates, both inclusive. A missing end means "up to now".
    Between {
        start: NaiveDate,
        end: Option<NaiveDate>,
    },
    /// The last N calendar days up to now (invoice searches)
    LastDays(u32),
}

impl DateSelector {
    /// Parse a `YYYY-MM-DD` date
    pub fn parse_date(s: &str) -> Result<NaiveDate, SyncError> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map_err(|_| SyncError::InvalidRange(format!("invalid date (YYYY-MM-DD): {}", s)))
    }
}

/// Absolute `[start, end)` window in a target timezone
///
/// Created once per run by the resolver and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct DateRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    timezone: Tz,
    timeframe: Timeframe,
    bound_to_timeframe: bool,
}

impl DateRange {
    /// Build a range, rejecting empty or inverted windows
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timezone: Tz,
        timeframe: Timeframe,
        bound_to_timeframe: bool,
    ) -> Result<Self, SyncError> {
        if end <= start {
            return Err(SyncError::InvalidRange(format!(
                "end ({}) must be after start ({})",
                end.to_rfc3339(),
                start.to_rfc3339()
            )));
        }
        Ok(Self {
            start,
            end,
            timezone,
            timeframe,
            bound_to_timeframe,
        })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn bound_to_timeframe(&self) -> bool {
        self.bound_to_timeframe
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Half-open containment check
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }

    /// Window bounds rendered in the target timezone
    pub fn display(&self) -> String {
        format!(
            "{} ~ {} ({}, {})",
            self.start.with_timezone(&self.timezone).format("%Y-%m-%d %H:%M:%S"),
            self.end.with_timezone(&self.timezone).format("%Y-%m-%d %H:%M:%S"),
            self.timezone.name(),
            self.timeframe
        )
    }
}
