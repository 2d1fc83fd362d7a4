//! Gmail API HTTP client
//!
//! Searches for receipt emails and fetches their full content. Uses
//! synchronous HTTP (ureq).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::time::Duration;

use super::GmailAuth;
use super::api::{GmailMessage, ListMessagesResponse, MessageRef};
use super::normalize::normalize_message;
use crate::error::{failure_kind, upstream_from_ureq};
use crate::models::RecordError;
use crate::sync::{MailSearch, Mailbox};

/// Gmail API client
pub struct GmailClient {
    auth: GmailAuth,
}

impl GmailClient {
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Page size for message listing (Gmail caps this at 500)
    const PAGE_SIZE: usize = 100;

    const MAX_RETRIES: u32 = 3;

    pub fn new(auth: GmailAuth) -> Self {
        Self { auth }
    }

    /// List one page of message ids matching a Gmail search query
    pub fn list_messages(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<ListMessagesResponse> {
        let access_token = self.auth.get_access_token()?;

        let mut url = format!(
            "{}/users/me/messages?maxResults={}&q={}",
            Self::BASE_URL,
            Self::PAGE_SIZE,
            urlencoding::encode(query)
        );
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        let mut response = ureq::get(&url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .call()
            .map_err(|e| upstream_from_ureq(e, "Gmail list messages"))?;

        response
            .body_mut()
            .read_json()
            .context("Failed to parse list messages response")
    }

    /// List every message id matching a query, following page tokens
    pub fn list_messages_all(&self, query: &str) -> Result<Vec<MessageRef>> {
        let mut all = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let response = self.list_messages(query, page_token.as_deref())?;
            if let Some(messages) = response.messages {
                all.extend(messages);
            }
            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(all)
    }

    /// Get full message details by id
    pub fn get_message(&self, id: &str) -> Result<GmailMessage> {
        let access_token = self.auth.get_access_token()?;

        let url = format!(
            "{}/users/me/messages/{}?format=full",
            Self::BASE_URL,
            urlencoding::encode(id)
        );

        let mut response = ureq::get(&url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .call()
            .map_err(|e| upstream_from_ureq(e, "Gmail get message"))?;

        response
            .body_mut()
            .read_json()
            .context("Failed to parse message response")
    }

    /// Get a message with exponential backoff
    fn get_message_with_retry(&self, id: &str) -> Result<GmailMessage> {
        let mut delay = Duration::from_millis(100);
        let mut attempt = 1;

        loop {
            match self.get_message(id) {
                Ok(msg) => return Ok(msg),
                Err(e) if attempt < Self::MAX_RETRIES => {
                    debug!("Fetching message {} failed (attempt {}): {:#}", id, attempt, e);
                    std::thread::sleep(delay);
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    /// Trigger the authentication flow if needed
    pub fn authenticate(&self) -> Result<()> {
        self.auth.get_access_token()?;
        Ok(())
    }
}

impl Mailbox for GmailClient {
    fn search_messages(
        &self,
        keywords: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MailSearch> {
        let query = search_query(keywords, start, end);
        debug!("Gmail query: {}", query);

        let refs = self.list_messages_all(&query)?;
        Ok(fetch_each(&refs, |id| self.get_message_with_retry(id)))
    }
}

/// Fetch and normalize every listed message, recording fetch failures per id
fn fetch_each<F>(refs: &[MessageRef], fetch: F) -> MailSearch
where
    F: Fn(&str) -> Result<GmailMessage>,
{
    let mut search = MailSearch::default();

    for message_ref in refs {
        let full = match fetch(&message_ref.id) {
            Ok(full) => full,
            Err(e) => {
                warn!("Failed to fetch message {}: {:#}", message_ref.id, e);
                search.failures.push(RecordError {
                    key: message_ref.id.clone(),
                    kind: failure_kind(&e),
                    message: format!("{:#}", e),
                });
                continue;
            }
        };
        match normalize_message(full) {
            Ok(message) => search.messages.push(message),
            Err(e) => warn!("Skipping unreadable message {}: {:#}", message_ref.id, e),
        }
    }

    search
}

/// Build a Gmail search query.
///
/// Keywords are quoted and OR'd together; the window is expressed in epoch
/// seconds, which Gmail treats as exact instants rather than calendar days.
pub fn search_query(keywords: &[String], start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let terms: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| format!("\"{}\"", k.replace('"', "")))
        .collect();

    let keywords = match terms.len() {
        0 => String::new(),
        1 => format!("{} ", terms[0]),
        _ => format!("({}) ", terms.join(" OR ")),
    };

    format!(
        "{}after:{} before:{}",
        keywords,
        start.timestamp(),
        end.timestamp()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::models::FailureKind;
    use chrono::TimeZone;
    use serde_json::json;

    fn listed(id: &str) -> MessageRef {
        MessageRef {
            id: id.to_string(),
            thread_id: format!("t-{}", id),
        }
    }

    fn fetched(id: &str) -> GmailMessage {
        serde_json::from_value(json!({
            "id": id,
            "snippet": "Invoice INV-1",
            "internalDate": "1736935200000",
            "payload": {
                "headers": [{ "name": "Subject", "value": "Your Replit receipt" }],
                "mimeType": "text/plain"
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_fetch_failure_is_recorded_per_message() {
        let refs = vec![listed("a"), listed("b"), listed("c")];
        let search = fetch_each(&refs, |id| {
            if id == "b" {
                Err(SyncError::Upstream {
                    status: 500,
                    message: "Gmail get message returned HTTP 500".to_string(),
                }
                .into())
            } else {
                Ok(fetched(id))
            }
        });

        let ids: Vec<&str> = search.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(search.messages[0].subject, "Your Replit receipt");
        assert_eq!(search.failures.len(), 1);
        assert_eq!(search.failures[0].key, "b");
        assert_eq!(search.failures[0].kind, FailureKind::Upstream);
    }

    #[test]
    fn test_search_query() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();

        let single = search_query(&["Your Replit receipt".to_string()], start, end);
        assert_eq!(single, "\"Your Replit receipt\" after:1735689600 before:1735776000");

        let multi = search_query(
            &["receipt".to_string(), " ".to_string(), "AWS \"bill\"".to_string()],
            start,
            end,
        );
        assert_eq!(
            multi,
            "(\"receipt\" OR \"AWS bill\") after:1735689600 before:1735776000"
        );
    }
}
