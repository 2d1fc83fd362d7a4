//! One end-to-end sync run

use chrono::{DateTime, Utc};
use log::info;

use super::invoice::extract_invoices;
use super::sources::{InvoiceFieldExtractor, Mailbox, UsageSource};
use super::syncer::{SyncOptions, sync_records};
use super::usage::aggregate_usage;
use crate::dates::{parse_timezone, resolve_range};
use crate::error::SyncError;
use crate::models::{DateRange, InvoiceRecord, RecordError, RunRequest, SyncOutcome, UsageRecord};
use crate::storage::{CollectionLocks, RecordStore};

/// Remote services wired into a run. Unused ones may be `None`.
pub struct SyncServices<'a> {
    pub usage_source: Option<&'a dyn UsageSource>,
    pub mailbox: Option<&'a dyn Mailbox>,
    pub extractor: Option<&'a dyn InvoiceFieldExtractor>,
    pub usage_store: Option<&'a dyn RecordStore<UsageRecord>>,
    pub invoice_store: Option<&'a dyn RecordStore<InvoiceRecord>>,
    pub locks: &'a CollectionLocks,
}

/// Records produced for one mode and what happened to them
#[derive(Debug, Clone)]
pub struct ModeSummary<R> {
    pub records: Vec<R>,
    pub outcome: SyncOutcome,
}

/// Result of [`run_sync`]
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub range: DateRange,
    pub usage: Option<ModeSummary<UsageRecord>>,
    pub invoices: Option<ModeSummary<InvoiceRecord>>,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.usage.as_ref().is_some_and(|s| s.outcome.has_failures())
            || self.invoices.as_ref().is_some_and(|s| s.outcome.has_failures())
    }
}

/// Execute a run.
///
/// The request is validated and the date range resolved before any remote
/// call; those are the only errors returned. Per-item failures are collected
/// in each mode's [`SyncOutcome`].
pub fn run_sync(
    request: &RunRequest,
    services: &SyncServices<'_>,
    now: DateTime<Utc>,
) -> Result<RunSummary, SyncError> {
    request.validate()?;
    check_services(request, services)?;

    let tz = parse_timezone(&request.timezone)?;
    let range = resolve_range(
        &request.date_selector,
        tz,
        request.timeframe,
        request.bound_to_timeframe,
        now,
    )?;
    info!("Syncing {} ({})", range.display(), range.timeframe());

    let options = SyncOptions {
        update_existing: request.update_existing,
        dry_run: request.dry_run,
    };

    let usage = match (request.mode.usage, services.usage_source) {
        (true, Some(source)) => {
            let batch = aggregate_usage(source, &range, &request.models);
            let store = services.usage_store.filter(|_| request.notion_enabled);
            Some(finish_mode(batch.records, batch.failures, store, services.locks, options))
        }
        _ => None,
    };

    let invoices = match (request.mode.invoices, services.mailbox, services.extractor) {
        (true, Some(mailbox), Some(extractor)) => {
            let batch = extract_invoices(mailbox, extractor, &range, &request.invoice_keywords);
            let store = services.invoice_store.filter(|_| request.notion_enabled);
            Some(finish_mode(batch.records, batch.failures, store, services.locks, options))
        }
        _ => None,
    };

    Ok(RunSummary {
        range,
        usage,
        invoices,
    })
}

fn finish_mode<R: crate::storage::SyncRecord>(
    records: Vec<R>,
    failures: Vec<RecordError>,
    store: Option<&dyn RecordStore<R>>,
    locks: &CollectionLocks,
    options: SyncOptions,
) -> ModeSummary<R> {
    // An empty batch needs no listing of the remote collection
    let mut outcome = match store {
        Some(store) if !records.is_empty() => sync_records(store, locks, records.clone(), options),
        _ => SyncOutcome {
            dry_run: options.dry_run,
            ..Default::default()
        },
    };

    for failure in failures {
        outcome.record_failure(failure.key, failure.kind, failure.message);
    }

    ModeSummary { records, outcome }
}

fn check_services(request: &RunRequest, services: &SyncServices<'_>) -> Result<(), SyncError> {
    let missing = |what: &str| SyncError::InvalidRequest(format!("{} is not configured", what));

    if request.mode.usage {
        if services.usage_source.is_none() {
            return Err(missing("usage API key"));
        }
        if request.notion_enabled && services.usage_store.is_none() {
            return Err(missing("usage database"));
        }
    }
    if request.mode.invoices {
        if services.mailbox.is_none() {
            return Err(missing("mailbox"));
        }
        if services.extractor.is_none() {
            return Err(missing("invoice extractor"));
        }
        if request.notion_enabled && services.invoice_store.is_none() {
            return Err(missing("invoice database"));
        }
    }
    Ok(())
}
