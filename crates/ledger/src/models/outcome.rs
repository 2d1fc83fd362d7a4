//! Per-batch sync results handed back to the caller

use serde::Serialize;
use std::fmt;

/// Failure category for one item in a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    Upstream,
    ExtractionIncomplete,
    InvalidAmount,
    RemoteWrite,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Upstream => "UpstreamError",
            Self::ExtractionIncomplete => "ExtractionIncomplete",
            Self::InvalidAmount => "InvalidAmount",
            Self::RemoteWrite => "RemoteWriteError",
        };
        f.write_str(name)
    }
}

/// One failed item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordError {
    /// Dedup key, model id or message id of the failed item
    pub key: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Kind of remote mutation a sync plan calls for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeKind {
    Create,
    Update,
}

/// A record that would change (or did change) in the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedChange {
    pub key: String,
    pub kind: ChangeKind,
}

/// Counts and failures for one record type in one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<RecordError>,
    /// Creates and updates decided by the plan, in batch order
    pub changes: Vec<PlannedChange>,
    /// True when no remote mutation was attempted
    pub dry_run: bool,
}

impl SyncOutcome {
    /// Record one failed item
    pub fn record_failure(
        &mut self,
        key: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
    ) {
        self.failed += 1;
        self.errors.push(RecordError {
            key: key.into(),
            kind,
            message: message.into(),
        });
    }

    /// Fold another outcome for the same record type into this one
    pub fn merge(&mut self, other: SyncOutcome) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.errors.extend(other.errors);
        self.changes.extend(other.changes);
        self.dry_run |= other.dry_run;
    }

    /// Number of items accounted for
    pub fn total(&self) -> usize {
        self.created + self.updated + self.skipped + self.failed
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_outcomes() {
        let mut outcome = SyncOutcome {
            created: 2,
            ..Default::default()
        };
        let mut other = SyncOutcome {
            skipped: 1,
            ..Default::default()
        };
        other.record_failure("fal-ai/flux", FailureKind::Upstream, "HTTP 500");

        outcome.merge(other);
        assert_eq!(outcome.created, 2);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.errors[0].key, "fal-ai/flux");
        assert_eq!(outcome.total(), 4);
        assert!(outcome.has_failures());
    }
}
