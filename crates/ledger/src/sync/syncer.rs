//! Idempotent, conflict-aware upserts into a remote collection
//!
//! A sync runs in three steps: list existing records and index them by dedup
//! key, decide create/update/skip per new record, then apply the decisions.
//! Deciding never touches the store, so a dry run reports exactly the plan a
//! real run would execute.

use log::{debug, info, warn};
use std::collections::HashMap;

use crate::models::{ChangeKind, FailureKind, PlannedChange, SyncOutcome};
use crate::storage::{CollectionLocks, RecordStore, StoredRecord, SyncRecord};

/// Options controlling how a batch is applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Overwrite existing records whose fields differ
    pub update_existing: bool,
    /// Compute the plan without mutating the store
    pub dry_run: bool,
}

/// Decision for one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncDecision {
    Create,
    Update { existing_id: String },
    Skip { existing_id: String },
}

/// A record together with its decision
#[derive(Debug, Clone)]
pub struct PlannedRecord<R> {
    pub key: String,
    pub record: R,
    pub decision: SyncDecision,
}

/// The full set of decisions for a batch
#[derive(Debug, Clone)]
pub struct SyncPlan<R> {
    pub records: Vec<PlannedRecord<R>>,
}

impl<R> SyncPlan<R> {
    pub fn creates(&self) -> usize {
        self.count(|d| matches!(d, SyncDecision::Create))
    }

    pub fn updates(&self) -> usize {
        self.count(|d| matches!(d, SyncDecision::Update { .. }))
    }

    pub fn skips(&self) -> usize {
        self.count(|d| matches!(d, SyncDecision::Skip { .. }))
    }

    /// Records that would change remotely, in batch order
    pub fn changes(&self) -> Vec<PlannedChange> {
        self.records
            .iter()
            .filter_map(|planned| {
                let kind = match planned.decision {
                    SyncDecision::Create => ChangeKind::Create,
                    SyncDecision::Update { .. } => ChangeKind::Update,
                    SyncDecision::Skip { .. } => return None,
                };
                Some(PlannedChange {
                    key: planned.key.clone(),
                    kind,
                })
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&SyncDecision) -> bool) -> usize {
        self.records.iter().filter(|p| pred(&p.decision)).count()
    }
}

/// Collapse records sharing a dedup key into one.
///
/// The surviving record keeps the position of the key's first occurrence;
/// which record survives is decided by [`SyncRecord::supersedes`].
pub fn dedup_batch<R: SyncRecord>(batch: Vec<R>) -> Vec<R> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<R> = Vec::with_capacity(batch.len());

    for record in batch {
        let key = record.dedup_key();
        match index.get(&key) {
            Some(&pos) => {
                if record.supersedes(&out[pos]) {
                    debug!("Duplicate key {} in batch, keeping newer record", key);
                    out[pos] = record;
                } else {
                    debug!("Duplicate key {} in batch, keeping earlier record", key);
                }
            }
            None => {
                index.insert(key, out.len());
                out.push(record);
            }
        }
    }

    out
}

/// Decide create/update/skip for every record in `batch`
pub fn plan_sync<R: SyncRecord>(
    batch: Vec<R>,
    existing: &[StoredRecord<R>],
    update_existing: bool,
) -> SyncPlan<R> {
    let mut by_key: HashMap<String, &StoredRecord<R>> = HashMap::new();
    for stored in existing {
        let key = stored.record.dedup_key();
        if by_key.contains_key(&key) {
            warn!("Remote collection already holds duplicates for {}; using the first", key);
            continue;
        }
        by_key.insert(key, stored);
    }

    let records = dedup_batch(batch)
        .into_iter()
        .map(|record| {
            let key = record.dedup_key();
            let decision = match by_key.get(&key) {
                None => SyncDecision::Create,
                Some(stored) if !update_existing => SyncDecision::Skip {
                    existing_id: stored.id.clone(),
                },
                Some(stored) if stored.record.fields_equal(&record) => SyncDecision::Skip {
                    existing_id: stored.id.clone(),
                },
                Some(stored) => SyncDecision::Update {
                    existing_id: stored.id.clone(),
                },
            };
            debug!("{} -> {:?}", key, decision);
            PlannedRecord {
                key,
                record,
                decision,
            }
        })
        .collect();

    SyncPlan { records }
}

/// Execute a plan against `store`.
///
/// A failed write is recorded and the rest of the batch continues. In dry-run
/// mode nothing is written and the counts mirror the plan.
pub fn apply_plan<R: SyncRecord>(
    store: &dyn RecordStore<R>,
    plan: SyncPlan<R>,
    dry_run: bool,
) -> SyncOutcome {
    let mut outcome = SyncOutcome {
        changes: plan.changes(),
        dry_run,
        ..Default::default()
    };

    for planned in plan.records {
        match planned.decision {
            SyncDecision::Skip { .. } => outcome.skipped += 1,
            SyncDecision::Create if dry_run => outcome.created += 1,
            SyncDecision::Update { .. } if dry_run => outcome.updated += 1,
            SyncDecision::Create => match store.create_record(&planned.record) {
                Ok(id) => {
                    debug!("Created {} as {}", planned.key, id);
                    outcome.created += 1;
                }
                Err(e) => {
                    warn!("Failed to create {}: {:#}", planned.key, e);
                    outcome.record_failure(
                        planned.key,
                        FailureKind::RemoteWrite,
                        format!("{:#}", e),
                    );
                }
            },
            SyncDecision::Update { existing_id } => {
                match store.update_record(&existing_id, &planned.record) {
                    Ok(()) => {
                        debug!("Updated {} ({})", planned.key, existing_id);
                        outcome.updated += 1;
                    }
                    Err(e) => {
                        warn!("Failed to update {}: {:#}", planned.key, e);
                        outcome.record_failure(
                            planned.key,
                            FailureKind::RemoteWrite,
                            format!("{:#}", e),
                        );
                    }
                }
            }
        }
    }

    outcome
}

/// Sync a batch into `store` under the collection's lock.
///
/// If the existing records cannot be listed, every record in the batch is
/// reported as failed: deciding without the snapshot could duplicate rows.
pub fn sync_records<R: SyncRecord>(
    store: &dyn RecordStore<R>,
    locks: &CollectionLocks,
    batch: Vec<R>,
    options: SyncOptions,
) -> SyncOutcome {
    let lock_key = format!("{}::{}", store.collection_id(), std::any::type_name::<R>());
    let _guard = locks.acquire(&lock_key);

    let existing = match store.list_records() {
        Ok(existing) => existing,
        Err(e) => {
            warn!("Failed to list {}: {:#}", store.collection_id(), e);
            let mut outcome = SyncOutcome {
                dry_run: options.dry_run,
                ..Default::default()
            };
            for record in dedup_batch(batch) {
                outcome.record_failure(
                    record.dedup_key(),
                    FailureKind::Upstream,
                    format!("Failed to list existing records: {:#}", e),
                );
            }
            return outcome;
        }
    };

    // Compare in stored form so lossy columns do not plan an update every run
    let batch: Vec<R> = batch.into_iter().map(|r| store.as_stored(r)).collect();
    let plan = plan_sync(batch, &existing, options.update_existing);
    info!(
        "{}: {} existing, plan create={} update={} skip={}{}",
        store.collection_id(),
        existing.len(),
        plan.creates(),
        plan.updates(),
        plan.skips(),
        if options.dry_run { " (dry run)" } else { "" }
    );

    apply_plan(store, plan, options.dry_run)
}
