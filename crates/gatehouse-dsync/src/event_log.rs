//! Webhook delivery audit log
//!
//! Every delivery attempt for a directory that has logging enabled gets a
//! row here. There is no automatic retry engine; the log is the durability
//! mechanism for later inspection and replay.

use chrono::Utc;
use tracing::instrument;

use gatehouse_core::{index, DirectorySyncEvent, GatehouseError, Result, WebhookEventLog};
use gatehouse_store::{Index, Store};

pub const NAMESPACE: &str = "dsync:logs";

#[derive(Clone)]
pub struct WebhookEventsLogger {
    store: Store,
}

impl WebhookEventsLogger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    #[instrument(skip(self, event), fields(directory_id = %event.directory_id))]
    pub async fn log(
        &self,
        event: &DirectorySyncEvent,
        webhook_endpoint: &str,
    ) -> Result<WebhookEventLog> {
        let entry = WebhookEventLog {
            id: uuid::Uuid::new_v4().to_string(),
            payload: serde_json::to_value(event)
                .map_err(|e| GatehouseError::internal(format!("Event encode failed: {e}")))?,
            webhook_endpoint: webhook_endpoint.to_string(),
            created_at: Utc::now(),
            status_code: None,
            delivered: false,
        };
        self.store
            .put(
                &entry.id,
                &entry,
                &[Index::new(index::DIRECTORY_ID, &event.directory_id)],
            )
            .await?;
        Ok(entry)
    }

    /// Record the outcome of a delivery attempt.
    pub async fn update_status(
        &self,
        entry: &WebhookEventLog,
        directory_id: &str,
        status_code: Option<u16>,
        delivered: bool,
    ) -> Result<WebhookEventLog> {
        let updated = WebhookEventLog {
            status_code,
            delivered,
            ..entry.clone()
        };
        self.store
            .put(
                &updated.id,
                &updated,
                &[Index::new(index::DIRECTORY_ID, directory_id)],
            )
            .await?;
        Ok(updated)
    }

    pub async fn get(&self, id: &str) -> Result<Option<WebhookEventLog>> {
        self.store.get(id).await
    }

    pub async fn get_all(
        &self,
        directory_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<WebhookEventLog>, usize)> {
        let page = self
            .store
            .get_by_index(
                &Index::new(index::DIRECTORY_ID, directory_id),
                offset,
                limit,
            )
            .await?;
        Ok((page.data, page.total))
    }

    /// Operator-triggered clear; there is no automatic expiry.
    #[instrument(skip(self))]
    pub async fn delete_all(&self, directory_id: &str) -> Result<()> {
        let (entries, _) = self.get_all(directory_id, 0, 0).await?;
        let keys: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();
        self.store.delete_many(&keys).await
    }
}
