//! Integration tests for the ledger crate
//!
//! These drive `run_sync` end to end with in-memory fakes for every remote
//! service.

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use ledger::models::ExtractedInvoice;
use ledger::{
    CollectionLocks, DateRange, DateSelector, FailureKind, InMemoryRecordStore,
    InvoiceFieldExtractor, InvoiceRecord, MailMessage, MailSearch, Mailbox, RunMode, RunRequest,
    SyncError, SyncServices, Timeframe, UsageEvent, UsageRecord, UsageSource, run_sync,
};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

const FLUX: &str = "fal-ai/flux/dev";
const VEO: &str = "fal-ai/veo3";

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, day, hour, 0, 0).unwrap()
}

fn now() -> DateTime<Utc> {
    at(4, 12)
}

/// Usage source serving canned events per model
#[derive(Default)]
struct FakeUsage {
    events: HashMap<String, Vec<UsageEvent>>,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl UsageSource for FakeUsage {
    fn fetch_usage_events(&self, model: &str, _range: &DateRange) -> Result<Vec<UsageEvent>> {
        self.calls.lock().unwrap().push(model.to_string());
        if self.failing.contains(model) {
            return Err(SyncError::Upstream {
                status: 503,
                message: "usage API unavailable".to_string(),
            }
            .into());
        }
        Ok(self.events.get(model).cloned().unwrap_or_default())
    }
}

struct FakeMailbox {
    messages: Vec<MailMessage>,
}

impl Mailbox for FakeMailbox {
    fn search_messages(
        &self,
        _keywords: &[String],
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<MailSearch> {
        Ok(MailSearch::from(self.messages.clone()))
    }
}

/// Message bodies are the JSON the model would return
struct FakeExtractor;

impl InvoiceFieldExtractor for FakeExtractor {
    fn extract_invoice_fields(&self, body: &str) -> Result<ExtractedInvoice> {
        serde_json::from_str(body).map_err(|e| anyhow!("unparseable reply: {}", e))
    }
}

fn event(day: u32, hour: u32, requests: u64, cost_cents: i64) -> UsageEvent {
    UsageEvent::new(
        at(day, hour),
        requests,
        Decimal::from(requests),
        Decimal::new(cost_cents, 2),
    )
}

fn two_model_usage() -> FakeUsage {
    FakeUsage {
        events: HashMap::from([
            (
                FLUX.to_string(),
                vec![event(1, 3, 2, 10), event(1, 20, 1, 5), event(3, 8, 4, 20)],
            ),
            (
                VEO.to_string(),
                vec![event(2, 9, 1, 50), event(3, 23, 2, 100).with_key_alias("prod")],
            ),
        ]),
        ..Default::default()
    }
}

fn receipt(id: &str, day: u32, number: &str, amount: &str) -> MailMessage {
    MailMessage {
        id: id.to_string(),
        subject: "Your Replit receipt".to_string(),
        sender: "billing@replit.com".to_string(),
        timestamp: at(day, 10),
        body: format!(
            r#"{{"invoice_number": "{}", "date_paid": "2025-01-{:02}", "service": "Replit, Inc.", "amount": "{}"}}"#,
            number, day, amount
        ),
    }
}

fn request(mode: RunMode) -> RunRequest {
    RunRequest {
        mode,
        models: vec![FLUX.to_string(), VEO.to_string()],
        invoice_keywords: vec!["Replit receipt".to_string()],
        date_selector: DateSelector::Between {
            start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 1, 3),
        },
        timeframe: None,
        timezone: "UTC".to_string(),
        bound_to_timeframe: true,
        notion_enabled: true,
        update_existing: false,
        dry_run: false,
        verbose: false,
    }
}

fn services<'a>(
    usage: &'a FakeUsage,
    mailbox: &'a FakeMailbox,
    usage_store: &'a InMemoryRecordStore<UsageRecord>,
    invoice_store: &'a InMemoryRecordStore<InvoiceRecord>,
    locks: &'a CollectionLocks,
) -> SyncServices<'a> {
    SyncServices {
        usage_source: Some(usage),
        mailbox: Some(mailbox),
        extractor: Some(&FakeExtractor),
        usage_store: Some(usage_store),
        invoice_store: Some(invoice_store),
        locks,
    }
}

#[test]
fn test_three_day_two_model_usage_sync() {
    let usage = two_model_usage();
    let mailbox = FakeMailbox { messages: vec![] };
    let usage_store = InMemoryRecordStore::new("usage-db");
    let invoice_store = InMemoryRecordStore::new("invoice-db");
    let locks = CollectionLocks::new();

    let summary = run_sync(
        &request(RunMode::usage()),
        &services(&usage, &mailbox, &usage_store, &invoice_store, &locks),
        now(),
    )
    .unwrap();

    assert_eq!(summary.range.timeframe(), Timeframe::Day);
    assert_eq!(summary.range.start(), at(1, 0));
    assert_eq!(summary.range.end(), at(4, 0));
    assert!(summary.invoices.is_none());

    let usage_summary = summary.usage.unwrap();
    assert_eq!(usage_summary.records.len(), 4);
    let outcome = &usage_summary.outcome;
    assert_eq!((outcome.created, outcome.updated, outcome.skipped, outcome.failed), (4, 0, 0, 0));

    let stored = usage_store.records();
    assert_eq!(stored.len(), 4);
    let flux_day_one = stored
        .iter()
        .find(|r| r.model == FLUX && r.time_label == "2025-01-01")
        .unwrap();
    assert_eq!(flux_day_one.requests, 3);
    assert_eq!(flux_day_one.cost, Decimal::new(15, 2));
    assert_eq!(flux_day_one.unit_price, Decimal::new(5, 2));
    let veo_day_three = stored
        .iter()
        .find(|r| r.model == VEO && r.time_label == "2025-01-03")
        .unwrap();
    assert_eq!(veo_day_three.key_name, "prod");
}

#[test]
fn test_usage_rerun_is_idempotent() {
    let usage = two_model_usage();
    let mailbox = FakeMailbox { messages: vec![] };
    let usage_store = InMemoryRecordStore::new("usage-db");
    let invoice_store = InMemoryRecordStore::new("invoice-db");
    let locks = CollectionLocks::new();
    let services = services(&usage, &mailbox, &usage_store, &invoice_store, &locks);

    let mut req = request(RunMode::usage());
    run_sync(&req, &services, now()).unwrap();

    req.update_existing = true;
    let outcome = run_sync(&req, &services, now()).unwrap().usage.unwrap().outcome;
    assert_eq!((outcome.created, outcome.updated, outcome.skipped), (0, 0, 4));
    assert_eq!(usage_store.write_count(), 4);
}

#[test]
fn test_invoice_rerun_skips_everything() {
    let usage = FakeUsage::default();
    let mailbox = FakeMailbox {
        messages: vec![
            receipt("m1", 1, "INV-001", "$20.00"),
            receipt("m2", 2, "INV-002", "25"),
            receipt("m3", 3, "INV-003", "1,200.50"),
        ],
    };
    let usage_store = InMemoryRecordStore::new("usage-db");
    let invoice_store = InMemoryRecordStore::new("invoice-db");
    let locks = CollectionLocks::new();
    let services = services(&usage, &mailbox, &usage_store, &invoice_store, &locks);

    let mut req = request(RunMode::invoices());
    let first = run_sync(&req, &services, now()).unwrap().invoices.unwrap();
    assert_eq!(first.outcome.created, 3);
    assert_eq!(first.records[0].service, "Replit - Inc.");
    assert_eq!(first.records[2].amount, Decimal::new(120050, 2));

    req.update_existing = true;
    let second = run_sync(&req, &services, now()).unwrap().invoices.unwrap();
    let outcome = second.outcome;
    assert_eq!((outcome.created, outcome.updated, outcome.skipped), (0, 0, 3));
    assert!(usage.calls.lock().unwrap().is_empty());
}

#[test]
fn test_changed_invoice_is_updated_only_when_asked() {
    let usage = FakeUsage::default();
    let usage_store = InMemoryRecordStore::new("usage-db");
    let invoice_store = InMemoryRecordStore::new("invoice-db");
    let locks = CollectionLocks::new();

    let original = FakeMailbox {
        messages: vec![receipt("m1", 1, "INV-001", "20")],
    };
    let req = request(RunMode::invoices());
    let first = services(&usage, &original, &usage_store, &invoice_store, &locks);
    run_sync(&req, &first, now()).unwrap();

    let corrected = FakeMailbox {
        messages: vec![receipt("m1", 1, "INV-001", "22")],
    };
    let services = services(&usage, &corrected, &usage_store, &invoice_store, &locks);

    let outcome = run_sync(&req, &services, now()).unwrap().invoices.unwrap().outcome;
    assert_eq!((outcome.created, outcome.updated, outcome.skipped), (0, 0, 1));
    assert_eq!(invoice_store.records()[0].amount, Decimal::from(20));

    let mut req = req;
    req.update_existing = true;
    let outcome = run_sync(&req, &services, now()).unwrap().invoices.unwrap().outcome;
    assert_eq!(outcome.updated, 1);
    assert_eq!(invoice_store.records()[0].amount, Decimal::from(22));
}

#[test]
fn test_partial_failures_are_isolated() {
    let mut usage = two_model_usage();
    usage.failing.insert(VEO.to_string());

    let mut bad_reply = receipt("m3", 3, "INV-003", "10");
    bad_reply.body = "not json".to_string();
    let mailbox = FakeMailbox {
        messages: vec![
            receipt("m1", 1, "INV-001", "20"),
            receipt("m2", 2, "INV-002", "-5"),
            bad_reply,
        ],
    };

    let usage_store = InMemoryRecordStore::new("usage-db");
    let invoice_store = InMemoryRecordStore::new("invoice-db");
    usage_store.fail_writes_for(format!("{}|2025-01-03", FLUX));
    let locks = CollectionLocks::new();

    let summary = run_sync(
        &request(RunMode::both()),
        &services(&usage, &mailbox, &usage_store, &invoice_store, &locks),
        now(),
    )
    .unwrap();
    assert!(summary.has_failures());

    let usage_outcome = summary.usage.unwrap().outcome;
    assert_eq!(usage_outcome.created, 1);
    assert_eq!(usage_outcome.failed, 2);
    let kinds: Vec<(String, FailureKind)> = usage_outcome
        .errors
        .iter()
        .map(|e| (e.key.clone(), e.kind))
        .collect();
    assert!(kinds.contains(&(format!("{}|2025-01-03", FLUX), FailureKind::RemoteWrite)));
    assert!(kinds.contains(&(VEO.to_string(), FailureKind::Upstream)));

    let invoice_outcome = summary.invoices.unwrap().outcome;
    assert_eq!(invoice_outcome.created, 1);
    assert_eq!(invoice_outcome.failed, 2);
    let invoice_kinds: Vec<FailureKind> = invoice_outcome.errors.iter().map(|e| e.kind).collect();
    assert!(invoice_kinds.contains(&FailureKind::InvalidAmount));
    assert!(invoice_kinds.contains(&FailureKind::Upstream));
}

#[test]
fn test_dry_run_reports_the_real_plan() {
    let usage = two_model_usage();
    let mailbox = FakeMailbox { messages: vec![] };
    let locks = CollectionLocks::new();
    let invoice_store = InMemoryRecordStore::new("invoice-db");

    let seeded = || {
        let store = InMemoryRecordStore::new("usage-db");
        let mut stale = request(RunMode::usage());
        stale.models = vec![FLUX.to_string()];
        let fake = FakeUsage {
            events: HashMap::from([(FLUX.to_string(), vec![event(1, 3, 1, 1)])]),
            ..Default::default()
        };
        let wiring = services(&fake, &mailbox, &store, &invoice_store, &locks);
        run_sync(&stale, &wiring, now()).unwrap();
        store
    };

    let mut req = request(RunMode::usage());
    req.update_existing = true;

    let dry_store = seeded();
    req.dry_run = true;
    let wiring = services(&usage, &mailbox, &dry_store, &invoice_store, &locks);
    let dry = run_sync(&req, &wiring, now()).unwrap().usage.unwrap().outcome;
    assert!(dry.dry_run);
    assert_eq!(dry_store.write_count(), 1);

    let real_store = seeded();
    req.dry_run = false;
    let wiring = services(&usage, &mailbox, &real_store, &invoice_store, &locks);
    let real = run_sync(&req, &wiring, now()).unwrap().usage.unwrap().outcome;

    assert_eq!((dry.created, dry.updated, dry.skipped), (3, 1, 0));
    assert_eq!(
        (dry.created, dry.updated, dry.skipped),
        (real.created, real.updated, real.skipped)
    );
    assert_eq!(dry.changes, real.changes);
    assert_eq!(real_store.write_count(), 1 + 4);
}

#[test]
fn test_notion_disabled_writes_nothing() {
    let usage = two_model_usage();
    let mailbox = FakeMailbox { messages: vec![] };
    let usage_store = InMemoryRecordStore::new("usage-db");
    let invoice_store = InMemoryRecordStore::new("invoice-db");
    let locks = CollectionLocks::new();

    let mut req = request(RunMode::usage());
    req.notion_enabled = false;
    let wiring = services(&usage, &mailbox, &usage_store, &invoice_store, &locks);
    let summary = run_sync(&req, &wiring, now()).unwrap();

    let usage_summary = summary.usage.unwrap();
    assert_eq!(usage_summary.records.len(), 4);
    assert_eq!(usage_summary.outcome.total(), 0);
    assert_eq!(usage_store.write_count(), 0);
}

#[test]
fn test_empty_batch_skips_listing() {
    let usage = FakeUsage::default();
    let mailbox = FakeMailbox { messages: vec![] };
    let usage_store = InMemoryRecordStore::new("usage-db");
    let invoice_store = InMemoryRecordStore::new("invoice-db");
    usage_store.fail_listing(true);
    invoice_store.fail_listing(true);
    let locks = CollectionLocks::new();

    let summary = run_sync(
        &request(RunMode::both()),
        &services(&usage, &mailbox, &usage_store, &invoice_store, &locks),
        now(),
    )
    .unwrap();

    assert!(!summary.has_failures());
    assert!(summary.usage.unwrap().records.is_empty());
    assert_eq!(summary.invoices.unwrap().outcome.total(), 0);
}

#[test]
fn test_fatal_errors_stop_before_remote_calls() {
    let usage = two_model_usage();
    let mailbox = FakeMailbox { messages: vec![] };
    let usage_store = InMemoryRecordStore::new("usage-db");
    let invoice_store = InMemoryRecordStore::new("invoice-db");
    let locks = CollectionLocks::new();
    let services = services(&usage, &mailbox, &usage_store, &invoice_store, &locks);

    let mut backwards = request(RunMode::usage());
    backwards.date_selector = DateSelector::Between {
        start: NaiveDate::from_ymd_opt(2025, 1, 3).unwrap(),
        end: NaiveDate::from_ymd_opt(2025, 1, 1),
    };
    let err = run_sync(&backwards, &services, now()).unwrap_err();
    assert!(matches!(err, SyncError::InvalidRange(_)));
    assert!(err.is_fatal());

    let mut bad_tz = request(RunMode::usage());
    bad_tz.timezone = "Mars/Olympus_Mons".to_string();
    assert!(matches!(run_sync(&bad_tz, &services, now()), Err(SyncError::InvalidRange(_))));

    let mut no_models = request(RunMode::usage());
    no_models.models.clear();
    assert!(matches!(run_sync(&no_models, &services, now()), Err(SyncError::InvalidRequest(_))));

    let mut too_many = request(RunMode::usage());
    too_many.models = (0..=RunRequest::MAX_MODELS).map(|i| format!("model-{}", i)).collect();
    assert!(matches!(run_sync(&too_many, &services, now()), Err(SyncError::InvalidRequest(_))));

    let missing_store = SyncServices {
        usage_store: None,
        ..services
    };
    assert!(matches!(
        run_sync(&request(RunMode::usage()), &missing_store, now()),
        Err(SyncError::InvalidRequest(_))
    ));

    assert!(usage.calls.lock().unwrap().is_empty());
}
