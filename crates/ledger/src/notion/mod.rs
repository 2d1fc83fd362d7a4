//! Notion database integration
//!
//! This module provides:
//! - A blocking client for database queries and page writes
//! - Property mappings for usage and invoice records
//! - [`NotionCollection`], a [`RecordStore`](crate::storage::RecordStore) over one database

mod client;
mod collection;
mod properties;

pub use client::{DatabaseInfo, NotionClient, format_notion_id};
pub use collection::NotionCollection;
pub use properties::NotionRecord;

/// Notion API response types
pub mod api {
    use serde::Deserialize;
    use serde_json::{Map, Value};

    /// One page of `POST /databases/{id}/query`
    #[derive(Debug, Deserialize)]
    pub struct QueryResponse {
        #[serde(default)]
        pub results: Vec<Page>,
        #[serde(default)]
        pub has_more: bool,
        pub next_cursor: Option<String>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct Page {
        pub id: String,
        #[serde(default)]
        pub archived: bool,
        #[serde(default)]
        pub properties: Map<String, Value>,
    }

    #[derive(Debug, Deserialize)]
    pub struct CreatedPage {
        pub id: String,
    }

    /// `GET /databases/{id}`
    #[derive(Debug, Deserialize)]
    pub struct Database {
        pub id: String,
        #[serde(default)]
        pub title: Vec<RichText>,
        #[serde(default)]
        pub properties: Map<String, Value>,
    }

    #[derive(Debug, Deserialize)]
    pub struct RichText {
        #[serde(default)]
        pub plain_text: String,
    }
}
