//! # Change Recorder
//!
//! Entry points the host calls when catalog data changes. Each hook turns
//! an event into change queue rows.
//!
//! ```text
//! product saved (new)      ──► enqueue_with_children(id, create)
//! product saved (existing) ──► enqueue_with_children(id, update)
//! product deleted          ──► record_delete(id, sku)  (one transaction)
//! full reindex finished    ──► enqueue_with_children(ids, update)
//! ```
//!
//! Hooks never fail the host's operation: errors are logged and the hook
//! reports zero rows queued.

use shopfeed_core::ChangeMethod;
use shopfeed_db::{ChangeQueueRepository, Database, DbResult};
use tracing::{debug, error};

/// Records catalog events into the change queue.
#[derive(Debug, Clone)]
pub struct ChangeRecorder {
    queue: ChangeQueueRepository,
}

impl ChangeRecorder {
    pub fn new(db: &Database) -> Self {
        ChangeRecorder {
            queue: db.change_queue(),
        }
    }

    /// A product was created or edited.
    pub async fn on_product_saved(&self, product_id: i64, is_new: bool) -> u64 {
        let method = if is_new {
            ChangeMethod::Create
        } else {
            ChangeMethod::Update
        };
        let result = self.queue.enqueue_with_children(&[product_id], method).await;
        Self::settle("product_saved", result)
    }

    /// Several products were edited at once (mass attribute update).
    pub async fn on_products_updated(&self, product_ids: &[i64]) -> u64 {
        let result = self
            .queue
            .enqueue_with_children(product_ids, ChangeMethod::Update)
            .await;
        Self::settle("products_updated", result)
    }

    /// A product was removed from the catalog.
    ///
    /// Pending updates for the SKU are dropped and the delete queued together;
    /// if either fails, neither happens.
    pub async fn on_product_deleted(&self, product_id: i64, sku: Option<&str>) -> u64 {
        let result = self.queue.record_delete(product_id, sku).await;
        Self::settle("product_deleted", result)
    }

    /// The catalog indexer finished a full pass over `product_ids`.
    pub async fn on_reindex_completed(&self, product_ids: &[i64]) -> u64 {
        let result = self
            .queue
            .enqueue_with_children(product_ids, ChangeMethod::Update)
            .await;
        Self::settle("reindex_completed", result)
    }

    fn settle(event: &str, result: DbResult<u64>) -> u64 {
        match result {
            Ok(queued) => {
                debug!(event, queued, "Catalog change recorded");
                queued
            }
            Err(e) => {
                error!(?e, event, "Failed to record catalog change");
                0
            }
        }
    }
}
