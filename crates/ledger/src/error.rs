//! Error taxonomy for sync runs
//!
//! Only `InvalidRange` and `InvalidRequest` abort a run. Everything else is
//! caught per item and recorded in a [`SyncOutcome`](crate::models::SyncOutcome).

use crate::models::FailureKind;

/// Errors raised by the sync engine and its remote clients
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    /// Bad or contradictory date inputs
    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    /// The run request is missing something the selected mode needs
    #[error("Invalid run request: {0}")]
    InvalidRequest(String),

    /// A specific remote call failed
    #[error("Upstream request failed ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// The language model did not return every required invoice field
    #[error("Extraction incomplete, missing: {}", .missing.join(", "))]
    ExtractionIncomplete { missing: Vec<String> },

    /// The extracted amount was empty, negative or not a number
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// A create or update against the tabular store failed
    #[error("Remote write failed: {0}")]
    RemoteWrite(String),
}

impl SyncError {
    /// Whether this error must abort the run before any remote call
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidRange(_) | Self::InvalidRequest(_))
    }

    /// Failure category recorded in a sync outcome
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::ExtractionIncomplete { .. } => FailureKind::ExtractionIncomplete,
            Self::InvalidAmount(_) => FailureKind::InvalidAmount,
            Self::RemoteWrite(_) => FailureKind::RemoteWrite,
            Self::InvalidRange(_) | Self::InvalidRequest(_) | Self::Upstream { .. } => {
                FailureKind::Upstream
            }
        }
    }
}

/// Classify an error coming back from a remote client.
///
/// Errors that are not a [`SyncError`] are treated as upstream failures.
pub fn failure_kind(err: &anyhow::Error) -> FailureKind {
    err.downcast_ref::<SyncError>()
        .map(SyncError::kind)
        .unwrap_or(FailureKind::Upstream)
}

/// Convert a non-2xx `ureq` status error into an [`SyncError::Upstream`]
pub(crate) fn upstream_from_ureq(err: ureq::Error, what: &str) -> anyhow::Error {
    match err {
        ureq::Error::StatusCode(status) => SyncError::Upstream {
            status,
            message: format!("{} returned HTTP {}", what, status),
        }
        .into(),
        other => anyhow::Error::new(other).context(format!("Failed to send {} request", what)),
    }
}
