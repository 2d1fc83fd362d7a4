//! Terminal output for a finished run

use comfy_table::{Cell, Color, ContentArrangement, Table};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use ledger::{ChangeKind, InvoiceRecord, ModeSummary, RunSummary, SyncOutcome, UsageRecord};

pub fn print_summary(summary: &RunSummary, verbose: bool) {
    println!(
        "\nWindow: {} ({}, {})",
        summary.range.display(),
        summary.range.timeframe(),
        summary.range.timezone()
    );

    if let Some(usage) = &summary.usage {
        println!("\n== Usage ==");
        println!("{}", totals_table(&usage.records, "Model", by_model));
        println!("{}", totals_table(&usage.records, "API Key", by_key));
        if verbose {
            println!("{}", usage_records_table(&usage.records));
        }
        print_outcome(usage);
    }

    if let Some(invoices) = &summary.invoices {
        println!("\n== Invoices ==");
        println!("{}", invoices_table(&invoices.records));
        print_outcome(invoices);
    }
}

fn print_outcome<R>(summary: &ModeSummary<R>) {
    let outcome = &summary.outcome;
    println!("{}", outcome_line(outcome));

    if outcome.dry_run && !outcome.changes.is_empty() {
        println!("Planned changes:");
        for change in &outcome.changes {
            let verb = match change.kind {
                ChangeKind::Create => "create",
                ChangeKind::Update => "update",
            };
            println!("  {} {}", verb, change.key);
        }
    }

    if !outcome.errors.is_empty() {
        let mut table = new_table(&["Item", "Failure", "Message"]);
        for error in &outcome.errors {
            table.add_row(vec![
                Cell::new(&error.key),
                Cell::new(error.kind.to_string()).fg(Color::Red),
                Cell::new(&error.message),
            ]);
        }
        println!("{}", table);
    }
}

fn outcome_line(outcome: &SyncOutcome) -> String {
    format!(
        "{}created {}, updated {}, skipped {}, failed {}",
        if outcome.dry_run { "[dry run] would have " } else { "" },
        outcome.created,
        outcome.updated,
        outcome.skipped,
        outcome.failed
    )
}

fn by_model(record: &UsageRecord) -> &str {
    &record.model
}

fn by_key(record: &UsageRecord) -> &str {
    &record.key_name
}

/// Requests, quantity and cost summed per `group`, with a total row
fn totals_table(records: &[UsageRecord], label: &str, group: fn(&UsageRecord) -> &str) -> Table {
    let mut totals: BTreeMap<&str, (u64, Decimal, Decimal)> = BTreeMap::new();
    for record in records {
        let entry = totals.entry(group(record)).or_default();
        entry.0 += record.requests;
        entry.1 += record.quantity;
        entry.2 += record.cost;
    }

    let mut table = new_table(&[label, "Requests", "Quantity", "Cost ($)"]);
    let mut grand = (0u64, Decimal::ZERO, Decimal::ZERO);
    for (name, (requests, quantity, cost)) in &totals {
        grand.0 += requests;
        grand.1 += quantity;
        grand.2 += cost;
        table.add_row(vec![
            Cell::new(name),
            Cell::new(requests),
            Cell::new(quantity.normalize()),
            Cell::new(cost.round_dp(4)),
        ]);
    }
    if totals.len() > 1 {
        table.add_row(vec![
            Cell::new("Total").fg(Color::Yellow),
            Cell::new(grand.0),
            Cell::new(grand.1.normalize()),
            Cell::new(grand.2.round_dp(4)),
        ]);
    }
    table
}

fn usage_records_table(records: &[UsageRecord]) -> Table {
    let mut table = new_table(&[
        "Time",
        "Model",
        "Requests",
        "Quantity",
        "Cost ($)",
        "Unit Price ($)",
        "Key",
    ]);
    for record in records {
        table.add_row(vec![
            Cell::new(&record.time_label),
            Cell::new(&record.model),
            Cell::new(record.requests),
            Cell::new(record.quantity.normalize()),
            Cell::new(record.cost.round_dp(4)),
            Cell::new(record.unit_price),
            Cell::new(&record.key_name),
        ]);
    }
    table
}

fn invoices_table(records: &[InvoiceRecord]) -> Table {
    let mut table =
        new_table(&["Invoice", "Date Paid", "Service", "Amount ($)", "Status", "Period"]);
    for record in records {
        table.add_row(vec![
            Cell::new(&record.invoice_number),
            Cell::new(record.date_paid),
            Cell::new(&record.service),
            Cell::new(record.amount),
            Cell::new(&record.paid_status),
            Cell::new(&record.period),
        ]);
    }
    table
}

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(headers.iter().map(|h| Cell::new(h).fg(Color::Cyan)).collect::<Vec<_>>());
    table
}
