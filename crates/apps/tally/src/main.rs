//! Tally - sync fal.ai usage and emailed invoices into Notion
//!
//! This is the entry point for the `tally` command-line tool.

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::sync::Arc;

use ledger::{
    ApiKeys, CollectionLocks, FalClient, GmailAuth, GmailClient, GmailCredentials, InvoiceRecord,
    KeyFlags, NotionClient, NotionCollection, OpenAiExtractor, RunRequest, Settings, SyncServices,
    UsageRecord, run_sync,
};

mod args;
mod render;

use args::Args;

fn main() {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();

    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    match run(&args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(2);
        }
    }
}

/// Execute one run; `Ok(false)` means some items failed
fn run(args: &Args) -> Result<bool> {
    let mut settings = Settings::load();
    remember_choices(args, &mut settings);

    let keys = ApiKeys::resolve(
        &KeyFlags {
            fal: args.api_key.clone(),
            notion: args.notion_api_key.clone(),
            openai: args.openai_api_key.clone(),
        },
        &settings,
    );
    let request = args.to_request(&settings)?;
    request.validate()?;

    let fal = keys.fal.as_deref().map(FalClient::new);
    let gmail = if request.mode.invoices {
        Some(gmail_client()?)
    } else {
        None
    };
    let openai_model = args
        .openai_model
        .clone()
        .unwrap_or_else(|| settings.openai_model.clone());
    let extractor = keys
        .openai
        .as_deref()
        .map(|key| OpenAiExtractor::new(key).with_model(openai_model));

    let stores = if request.notion_enabled {
        Some(notion_stores(&request, &settings, keys.notion.as_deref())?)
    } else {
        None
    };

    let locks = CollectionLocks::new();
    let services = SyncServices {
        usage_source: fal.as_ref().map(|c| c as _),
        mailbox: gmail.as_ref().map(|c| c as _),
        extractor: extractor.as_ref().map(|c| c as _),
        usage_store: stores.as_ref().and_then(|s| s.usage.as_ref()).map(|s| s as _),
        invoice_store: stores.as_ref().and_then(|s| s.invoices.as_ref()).map(|s| s as _),
        locks: &locks,
    };

    let summary = run_sync(&request, &services, chrono::Utc::now())?;
    render::print_summary(&summary, args.verbose);

    Ok(!summary.has_failures())
}

/// Persist models and database ids given on the command line
fn remember_choices(args: &Args, settings: &mut Settings) {
    let models: Vec<String> = args
        .models
        .iter()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect();

    let mut changed = false;
    if !models.is_empty() && models != settings.models {
        settings.models = models;
        changed = true;
    }
    if let Some(id) = &args.usage_database_id {
        settings.usage_database_id = Some(id.clone());
        changed = true;
    }
    if let Some(id) = &args.invoice_database_id {
        settings.invoice_database_id = Some(id.clone());
        changed = true;
    }

    if changed {
        match settings.save() {
            Ok(()) => info!("Saved settings"),
            Err(e) => warn!("{:#}", e),
        }
    }
}

fn gmail_client() -> Result<GmailClient> {
    let creds = GmailCredentials::load().with_context(|| {
        let path = GmailCredentials::default_credentials_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "google-credentials.json".to_string());
        format!(
            "Gmail credentials not found; place OAuth credentials at {} or set GMAIL_CLIENT_ID and GMAIL_CLIENT_SECRET",
            path
        )
    })?;
    let auth = GmailAuth::new(creds.client_id, creds.client_secret)?;
    Ok(GmailClient::new(auth))
}

struct NotionStores {
    usage: Option<NotionCollection<UsageRecord>>,
    invoices: Option<NotionCollection<InvoiceRecord>>,
}

/// Open the configured databases, checking each is reachable
fn notion_stores(
    request: &RunRequest,
    settings: &Settings,
    api_key: Option<&str>,
) -> Result<NotionStores> {
    let api_key =
        api_key.context("Notion API key missing; pass --notion-api-key or set NOTION_API_KEY")?;
    let client = Arc::new(NotionClient::new(api_key));

    let open = |id: Option<&String>, what: &str| -> Result<Option<String>> {
        let Some(id) = id else {
            anyhow::bail!("No Notion {} database configured; pass --{}-database-id", what, what);
        };
        let info = client.check_database(id).with_context(|| {
            format!(
                "Cannot access Notion {} database {}; is it shared with the integration?",
                what, id
            )
        })?;
        info!("Using Notion database \"{}\" for {}", info.title, what);
        Ok(Some(info.id))
    };

    let usage = if request.mode.usage {
        open(settings.usage_database_id.as_ref(), "usage")?
            .map(|id| NotionCollection::new(client.clone(), &id))
    } else {
        None
    };
    let invoices = if request.mode.invoices {
        open(settings.invoice_database_id.as_ref(), "invoice")?
            .map(|id| NotionCollection::new(client.clone(), &id))
    } else {
        None
    };

    Ok(NotionStores { usage, invoices })
}
