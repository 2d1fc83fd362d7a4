//! Persisted settings and credential resolution
//!
//! Settings live in `~/.config/tally/settings.json`. API keys are resolved
//! from (in order of priority):
//! 1. An explicit command-line value
//! 2. The settings file
//! 3. An environment variable
//!
//! The OpenAI key is the exception: the environment wins over the file.
//!
//! Gmail OAuth client credentials come from compile-time environment
//! variables, then `google-credentials.json`, then runtime environment
//! variables.

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::openai::DEFAULT_MODEL;

/// Settings filename in the config directory
pub const SETTINGS_FILE: &str = "settings.json";

/// Credentials filename in the config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

pub const FAL_KEY_ENV: &str = "FAL_ADMIN_API_KEY";
pub const NOTION_KEY_ENV: &str = "NOTION_API_KEY";
pub const OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";

/// User settings persisted between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// IANA timezone used for calendar boundaries
    pub timezone: String,
    /// Models queried when none are given on the command line
    pub models: Vec<String>,
    pub invoice_search_keywords: Vec<String>,
    /// Look-back window for invoice-only runs without explicit dates
    pub invoice_days: u32,
    pub usage_database_id: Option<String>,
    pub invoice_database_id: Option<String>,
    pub openai_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fal_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notion_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timezone: "Asia/Seoul".to_string(),
            models: Vec::new(),
            invoice_search_keywords: vec!["Your Replit receipt".to_string()],
            invoice_days: 90,
            usage_database_id: None,
            invoice_database_id: None,
            openai_model: DEFAULT_MODEL.to_string(),
            fal_api_key: None,
            notion_api_key: None,
            openai_api_key: None,
        }
    }
}

impl Settings {
    /// Load settings from the config directory, falling back to defaults
    /// when the file is missing or unreadable
    pub fn load() -> Self {
        match config::config_path(SETTINGS_FILE) {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("Could not determine config directory, using default settings");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match config::load_json_file::<Settings>(path) {
            Ok(settings) => settings.normalized(),
            Err(e) => {
                warn!("Ignoring unreadable settings at {}: {:#}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        config::save_json(SETTINGS_FILE, self).context("Failed to save settings")
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        config::save_json_file(path, self)
            .with_context(|| format!("Failed to save settings to {}", path.display()))
    }

    /// Empty keyword lists fall back to the default keyword
    fn normalized(mut self) -> Self {
        self.invoice_search_keywords.retain(|k| !k.trim().is_empty());
        if self.invoice_search_keywords.is_empty() {
            self.invoice_search_keywords = Self::default().invoice_search_keywords;
        }
        if self.openai_model.trim().is_empty() {
            self.openai_model = DEFAULT_MODEL.to_string();
        }
        self
    }
}

/// API keys after applying command-line, settings and environment priority
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiKeys {
    pub fal: Option<String>,
    pub notion: Option<String>,
    pub openai: Option<String>,
}

/// Keys passed explicitly on the command line
#[derive(Debug, Clone, Default)]
pub struct KeyFlags {
    pub fal: Option<String>,
    pub notion: Option<String>,
    pub openai: Option<String>,
}

impl ApiKeys {
    /// Resolve keys against the process environment
    pub fn resolve(flags: &KeyFlags, settings: &Settings) -> Self {
        Self::resolve_with(flags, settings, |name| std::env::var(name).ok())
    }

    /// Resolve keys with an injected environment lookup
    pub fn resolve_with(
        flags: &KeyFlags,
        settings: &Settings,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        Self {
            fal: first_present([
                flags.fal.clone(),
                settings.fal_api_key.clone(),
                env(FAL_KEY_ENV),
            ]),
            notion: first_present([
                flags.notion.clone(),
                settings.notion_api_key.clone(),
                env(NOTION_KEY_ENV),
            ]),
            openai: first_present([
                flags.openai.clone(),
                env(OPENAI_KEY_ENV),
                settings.openai_api_key.clone(),
            ]),
        }
    }
}

fn first_present<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

/// OAuth client credentials for Gmail API access
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

impl GmailCredentials {
    /// Load credentials from compile-time env, the config file, then runtime env
    pub fn load() -> Result<Self> {
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        if config::config_exists(CREDENTIALS_FILE) {
            let creds: GoogleCredentialFile = config::load_json(CREDENTIALS_FILE)?;
            return Self::from_credential_file(creds);
        }

        Self::from_env()
    }

    /// Build with `GOOGLE_CLIENT_ID=.. GOOGLE_CLIENT_SECRET=.. cargo build --release`
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("GOOGLE_CLIENT_ID")?;
        let client_secret = option_env!("GOOGLE_CLIENT_SECRET")?;

        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: GoogleCredentialFile = config::load_json_file(path)?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        let installed = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Ok(Self {
            client_id: installed.client_id,
            client_secret: installed.client_secret,
        })
    }

    /// Parse credentials from JSON (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GMAIL_CLIENT_ID")
            .context("GMAIL_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET")
            .context("GMAIL_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }

    /// `~/.config/tally/google-credentials.json`
    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }
}
