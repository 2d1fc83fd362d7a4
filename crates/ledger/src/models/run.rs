//! Run requests handed to the orchestrator

use std::str::FromStr;

use super::{DateSelector, Timeframe};
use crate::error::SyncError;

/// Which record types a run produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunMode {
    pub usage: bool,
    pub invoices: bool,
}

impl RunMode {
    pub fn usage() -> Self {
        Self {
            usage: true,
            invoices: false,
        }
    }

    pub fn invoices() -> Self {
        Self {
            usage: false,
            invoices: true,
        }
    }

    pub fn both() -> Self {
        Self {
            usage: true,
            invoices: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.usage && !self.invoices
    }
}

impl FromStr for RunMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "usage" => Ok(Self::usage()),
            "invoice" | "invoices" => Ok(Self::invoices()),
            "both" => Ok(Self::both()),
            other => Err(SyncError::InvalidRequest(format!("unknown mode: {}", other))),
        }
    }
}

/// A fully-built request for one sync run
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub mode: RunMode,
    pub models: Vec<String>,
    pub invoice_keywords: Vec<String>,
    pub date_selector: DateSelector,
    pub timeframe: Option<Timeframe>,
    /// IANA timezone name, e.g. `Asia/Seoul`
    pub timezone: String,
    pub bound_to_timeframe: bool,
    pub notion_enabled: bool,
    pub update_existing: bool,
    pub dry_run: bool,
    pub verbose: bool,
}

impl RunRequest {
    /// Maximum model ids accepted by one usage query
    pub const MAX_MODELS: usize = 50;

    /// Check that the selected mode has the inputs it needs
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.mode.is_empty() {
            return Err(SyncError::InvalidRequest(
                "select at least one of usage or invoice mode".to_string(),
            ));
        }
        if self.mode.usage {
            if self.models.iter().all(|m| m.trim().is_empty()) {
                return Err(SyncError::InvalidRequest(
                    "usage mode needs at least one model".to_string(),
                ));
            }
            if self.models.len() > Self::MAX_MODELS {
                return Err(SyncError::InvalidRequest(format!(
                    "at most {} models can be queried at once (got {})",
                    Self::MAX_MODELS,
                    self.models.len()
                )));
            }
        }
        if self.mode.invoices && self.invoice_keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(SyncError::InvalidRequest(
                "invoice mode needs at least one search keyword".to_string(),
            ));
        }
        Ok(())
    }
}
