//! Notion HTTP client
//!
//! Uses synchronous HTTP (ureq). Non-2xx responses become
//! [`SyncError::Upstream`](crate::error::SyncError::Upstream) with their status code.

use anyhow::{Context, Result};
use log::debug;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use super::api::{CreatedPage, Database, Page, QueryResponse};
use crate::error::upstream_from_ureq;

/// Summary of a database returned by [`NotionClient::check_database`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub id: String,
    pub title: String,
    pub property_names: Vec<String>,
}

/// Client for the Notion REST API
pub struct NotionClient {
    api_key: String,
    base_url: String,
}

impl NotionClient {
    const BASE_URL: &'static str = "https://api.notion.com/v1";
    const NOTION_VERSION: &'static str = "2022-06-28";

    /// Maximum page size accepted by database queries
    const PAGE_SIZE: u32 = 100;

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: Self::BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Retrieve a database, confirming it exists and is shared with the integration
    pub fn check_database(&self, database_id: &str) -> Result<DatabaseInfo> {
        let id = format_notion_id(database_id);
        let url = format!("{}/databases/{}", self.base_url, id);
        let result = ureq::get(&url)
            .header("Authorization", &self.auth_header())
            .header("Notion-Version", Self::NOTION_VERSION)
            .call();
        let database: Database = self.read(result, "retrieve database")?;

        Ok(DatabaseInfo {
            id: database.id,
            title: database
                .title
                .iter()
                .map(|t| t.plain_text.as_str())
                .collect::<String>(),
            property_names: database.properties.keys().cloned().collect(),
        })
    }

    /// Query one page of a database
    pub fn query_database(
        &self,
        database_id: &str,
        filter: Option<&Value>,
        start_cursor: Option<&str>,
    ) -> Result<QueryResponse> {
        let url = format!(
            "{}/databases/{}/query",
            self.base_url,
            format_notion_id(database_id)
        );

        let mut body = json!({ "page_size": Self::PAGE_SIZE });
        if let Some(filter) = filter {
            body["filter"] = filter.clone();
        }
        if let Some(cursor) = start_cursor {
            body["start_cursor"] = Value::String(cursor.to_string());
        }

        let result = ureq::post(&url)
            .header("Authorization", &self.auth_header())
            .header("Notion-Version", Self::NOTION_VERSION)
            .send_json(&body);
        self.read(result, "query database")
    }

    /// Query every page of a database, following `next_cursor`
    pub fn query_database_all(
        &self,
        database_id: &str,
        filter: Option<&Value>,
    ) -> Result<Vec<Page>> {
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let response = self.query_database(database_id, filter, cursor.as_deref())?;
            pages.extend(response.results);

            match response.next_cursor {
                Some(next) if response.has_more => cursor = Some(next),
                _ => break,
            }
        }

        debug!("Queried {} pages from {}", pages.len(), database_id);
        Ok(pages)
    }

    /// Create a page in a database and return its id
    pub fn create_page(&self, database_id: &str, properties: Map<String, Value>) -> Result<String> {
        let url = format!("{}/pages", self.base_url);
        let body = json!({
            "parent": { "database_id": format_notion_id(database_id) },
            "properties": properties,
        });

        let result = ureq::post(&url)
            .header("Authorization", &self.auth_header())
            .header("Notion-Version", Self::NOTION_VERSION)
            .send_json(&body);
        let created: CreatedPage = self.read(result, "create page")?;
        Ok(created.id)
    }

    /// Overwrite properties of an existing page
    pub fn update_page(&self, page_id: &str, properties: Map<String, Value>) -> Result<()> {
        let url = format!("{}/pages/{}", self.base_url, page_id);
        let body = json!({ "properties": properties });

        let result = ureq::patch(&url)
            .header("Authorization", &self.auth_header())
            .header("Notion-Version", Self::NOTION_VERSION)
            .send_json(&body);
        let _: Page = self.read(result, "update page")?;
        Ok(())
    }

    fn read<T: DeserializeOwned>(
        &self,
        result: Result<ureq::http::Response<ureq::Body>, ureq::Error>,
        what: &str,
    ) -> Result<T> {
        let mut response = result.map_err(|e| upstream_from_ureq(e, &format!("Notion {}", what)))?;
        response
            .body_mut()
            .read_json()
            .with_context(|| format!("Failed to parse Notion {} response", what))
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

/// Normalize a 32-character id into the hyphenated 8-4-4-4-12 form.
///
/// Ids that already contain hyphens or are not 32 characters are returned
/// trimmed but otherwise unchanged.
pub fn format_notion_id(id: &str) -> String {
    let id = id.trim();
    if id.contains('-') || id.len() != 32 || !id.is_ascii() {
        return id.to_string();
    }
    format!(
        "{}-{}-{}-{}-{}",
        &id[..8],
        &id[8..12],
        &id[12..16],
        &id[16..20],
        &id[20..]
    )
}
