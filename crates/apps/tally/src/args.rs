//! Command-line arguments

use clap::{ArgAction, ArgGroup, Parser};

use ledger::{DateSelector, Preset, RunMode, RunRequest, SyncError, Timeframe};

#[derive(Debug, Parser)]
#[command(
    name = "tally",
    version,
    about = "Sync fal.ai usage and emailed invoices into Notion databases",
    group(ArgGroup::new("window").args(["preset", "start_date", "last_days"]))
)]
pub struct Args {
    /// What to sync: usage, invoice or both
    #[arg(long, default_value = "usage")]
    pub mode: RunMode,

    /// Model ids, comma separated; saved for later runs
    #[arg(long, value_delimiter = ',')]
    pub models: Vec<String>,

    /// Invoice search keywords, comma separated
    #[arg(long, value_delimiter = ',')]
    pub keywords: Vec<String>,

    /// today, yesterday, last-7-days, last-30-days or this-month
    #[arg(long)]
    pub preset: Option<Preset>,

    /// First day of the window (YYYY-MM-DD)
    #[arg(long, value_parser = DateSelector::parse_date)]
    pub start_date: Option<chrono::NaiveDate>,

    /// Last day of the window, inclusive (YYYY-MM-DD)
    #[arg(long, value_parser = DateSelector::parse_date, requires = "start_date")]
    pub end_date: Option<chrono::NaiveDate>,

    /// Window covering the last N days
    #[arg(long)]
    pub last_days: Option<u32>,

    /// minute, hour, day, week or month; inferred from the window when omitted
    #[arg(long)]
    pub timeframe: Option<Timeframe>,

    /// IANA timezone for day boundaries
    #[arg(long)]
    pub timezone: Option<String>,

    /// Snap buckets to calendar boundaries
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub bound_to_timeframe: bool,

    /// Write records to Notion
    #[arg(long)]
    pub notion: bool,

    /// Notion database for usage rows; saved for later runs
    #[arg(long)]
    pub usage_database_id: Option<String>,

    /// Notion database for invoices; saved for later runs
    #[arg(long)]
    pub invoice_database_id: Option<String>,

    /// Overwrite existing rows whose values changed
    #[arg(long)]
    pub update_existing: bool,

    /// Plan the sync without writing anything
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long, short)]
    pub verbose: bool,

    /// fal.ai admin API key
    #[arg(long)]
    pub api_key: Option<String>,

    #[arg(long)]
    pub notion_api_key: Option<String>,

    #[arg(long)]
    pub openai_api_key: Option<String>,

    /// Chat model used for invoice extraction
    #[arg(long)]
    pub openai_model: Option<String>,
}

impl Args {
    /// Date selector from flags, falling back to a mode-dependent default
    pub fn date_selector(&self, invoice_days: u32) -> DateSelector {
        if let Some(preset) = self.preset {
            DateSelector::Preset(preset)
        } else if let Some(start) = self.start_date {
            DateSelector::Between {
                start,
                end: self.end_date,
            }
        } else if let Some(days) = self.last_days {
            DateSelector::LastDays(days)
        } else if self.mode.invoices && !self.mode.usage {
            DateSelector::LastDays(invoice_days)
        } else {
            DateSelector::Preset(Preset::Last7Days)
        }
    }

    /// Build the run request, taking unset values from saved settings
    pub fn to_request(&self, settings: &ledger::Settings) -> Result<RunRequest, SyncError> {
        Ok(RunRequest {
            mode: self.mode,
            models: pick(&self.models, &settings.models),
            invoice_keywords: pick(&self.keywords, &settings.invoice_search_keywords),
            date_selector: self.date_selector(settings.invoice_days),
            timeframe: self.timeframe,
            timezone: self
                .timezone
                .clone()
                .unwrap_or_else(|| settings.timezone.clone()),
            bound_to_timeframe: self.bound_to_timeframe,
            notion_enabled: self.notion,
            update_existing: self.update_existing,
            dry_run: self.dry_run,
            verbose: self.verbose,
        })
    }
}

/// Trimmed non-empty values from the command line, or the saved list
fn pick(given: &[String], saved: &[String]) -> Vec<String> {
    let given: Vec<String> = given
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if given.is_empty() { saved.to_vec() } else { given }
}
