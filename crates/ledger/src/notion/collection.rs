//! A Notion database viewed as a record store

use anyhow::Result;
use log::debug;
use std::marker::PhantomData;
use std::sync::Arc;

use super::client::{NotionClient, format_notion_id};
use super::properties::NotionRecord;
use crate::error::SyncError;
use crate::storage::{RecordStore, StoredRecord};

/// Records of type `R` kept as pages in one Notion database
pub struct NotionCollection<R> {
    client: Arc<NotionClient>,
    database_id: String,
    _record: PhantomData<fn() -> R>,
}

impl<R: NotionRecord> NotionCollection<R> {
    pub fn new(client: Arc<NotionClient>, database_id: &str) -> Self {
        Self {
            client,
            database_id: format_notion_id(database_id),
            _record: PhantomData,
        }
    }
}

impl<R: NotionRecord> RecordStore<R> for NotionCollection<R> {
    fn collection_id(&self) -> &str {
        &self.database_id
    }

    fn list_records(&self) -> Result<Vec<StoredRecord<R>>> {
        let pages = self
            .client
            .query_database_all(&self.database_id, None)?;

        let mut records = Vec::with_capacity(pages.len());
        for page in pages.into_iter().filter(|p| !p.archived) {
            match R::from_properties(&page.properties) {
                Some(record) => records.push(StoredRecord::new(page.id, record)),
                None => debug!("Ignoring page {} with empty key columns", page.id),
            }
        }
        Ok(records)
    }

    fn create_record(&self, record: &R) -> Result<String> {
        self.client
            .create_page(&self.database_id, record.to_properties())
            .map_err(|e| SyncError::RemoteWrite(format!("{:#}", e)).into())
    }

    fn update_record(&self, id: &str, record: &R) -> Result<()> {
        self.client
            .update_page(id, record.to_properties())
            .map_err(|e| SyncError::RemoteWrite(format!("{:#}", e)).into())
    }

    fn as_stored(&self, record: R) -> R {
        record.stored_form()
    }
}
