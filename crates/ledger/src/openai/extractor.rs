//! Chat Completions client that turns a receipt email into invoice fields
//!
//! The email body is wrapped in tags to keep it separate from instructions,
//! and the model is asked for a single JSON object. Rate-limited calls are
//! retried with exponential backoff.

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::SyncError;
use crate::models::ExtractedInvoice;
use crate::sync::InvoiceFieldExtractor;

/// Model used when none is configured
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

const MAX_RETRIES: u32 = 3;

const BASE_DELAY_MS: u64 = 1000;

/// Bodies longer than this are truncated before sending
const MAX_BODY_CHARS: usize = 20_000;

const SYSTEM_PROMPT: &str = r#"You extract invoice data from a single receipt or invoice email.

Return ONLY a JSON object with these fields:
{
  "invoice_number": "string (the invoice number, NOT the receipt number; look for 'Invoice Number:', 'Invoice #:')",
  "date_paid": "YYYY-MM-DD (date paid from the invoice; if missing use the email date)",
  "amount": number (total amount in USD, numeric only, no currency symbol),
  "service": "string (service or company name, e.g. 'Replit', 'AWS'; no commas)",
  "description": "string (brief description of the charges)",
  "period": "string (billing period if mentioned, otherwise 'N/A')",
  "paid_status": "string ('Paid' for receipts and confirmations; 'Unpaid', 'Pending' or 'Overdue' if the email says so)"
}

Use null for any field you cannot find. Do not guess invoice numbers.

The email will be provided in <email> tags."#;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

/// Extracts invoice fields from email bodies
pub struct OpenAiExtractor {
    api_key: String,
    model: String,
    api_url: String,
}

impl OpenAiExtractor {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            api_url: OPENAI_API_URL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at a compatible endpoint
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    fn build_request(&self, body: &str) -> ChatRequest<'_> {
        let body: String = body.chars().take(MAX_BODY_CHARS).collect();
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format!("<email>\n{}\n</email>", body),
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        }
    }

    fn complete(&self, request: &ChatRequest<'_>) -> Result<String> {
        let mut attempt = 0;

        loop {
            let result = ureq::post(&self.api_url)
                .header("Authorization", &format!("Bearer {}", self.api_key))
                .send_json(request);

            match result {
                Ok(mut response) => {
                    let chat: ChatResponse = response
                        .body_mut()
                        .read_json()
                        .context("Failed to parse chat completion response")?;
                    return chat
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.message.content)
                        .context("Empty response from chat completion");
                }
                Err(ureq::Error::StatusCode(429)) if attempt < MAX_RETRIES => {
                    let delay = BASE_DELAY_MS * 2u64.pow(attempt);
                    warn!("Rate limited by OpenAI, retrying in {}ms", delay);
                    std::thread::sleep(Duration::from_millis(delay));
                    attempt += 1;
                }
                Err(e) => return Err(crate::error::upstream_from_ureq(e, "OpenAI chat completion")),
            }
        }
    }
}

impl InvoiceFieldExtractor for OpenAiExtractor {
    fn extract_invoice_fields(&self, body: &str) -> Result<ExtractedInvoice> {
        let request = self.build_request(body);
        let content = self.complete(&request)?;
        debug!("Extraction response: {} chars", content.len());
        Ok(parse_extraction(&content)?)
    }
}

/// Parse the model's reply into raw invoice fields.
///
/// Markdown code fences are stripped. A reply holding an array uses its first
/// element; an empty array means nothing was found.
pub fn parse_extraction(content: &str) -> Result<ExtractedInvoice, SyncError> {
    let cleaned = strip_code_fence(content);

    let value: serde_json::Value = serde_json::from_str(cleaned).map_err(|e| {
        SyncError::ExtractionIncomplete {
            missing: vec![format!("valid JSON ({})", e)],
        }
    })?;

    let object = match value {
        serde_json::Value::Array(items) => items.into_iter().next().unwrap_or_default(),
        other => other,
    };
    if !object.is_object() {
        return Err(SyncError::ExtractionIncomplete {
            missing: vec!["invoice object".to_string()],
        });
    }

    serde_json::from_value(object).map_err(|e| SyncError::ExtractionIncomplete {
        missing: vec![format!("well-formed fields ({})", e)],
    })
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}
