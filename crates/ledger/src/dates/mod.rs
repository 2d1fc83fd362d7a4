//! Date window resolution
//!
//! Turns presets, explicit calendar dates or "last N days" into absolute
//! `[start, end)` windows in a target timezone.

mod resolver;

pub use resolver::{infer_timeframe, local_midnight, parse_timezone, resolve_range};
