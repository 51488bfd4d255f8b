//! # Change Queue Repository
//!
//! The outbox table that records pending product mutations and hands
//! consistent snapshots of them to the uploader.
//!
//! ## Reservation Protocol
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Change Queue Lifecycle                               │
//! │                                                                         │
//! │  PRODUCT HOOK (save / delete / reindex)                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  enqueue(ids, method)                                                  │
//! │  ├── read unbatched rows for ids+method                                │
//! │  └── insert only the missing ones (batch_id = NULL)                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  reserve_batch(method)                                                 │
//! │  │  UPDATE ... SET batch_id = :token                                   │
//! │  │  WHERE row_id IN (SELECT row_id ... WHERE batch_id IS NULL          │
//! │  │                   AND method = :m ORDER BY row_id LIMIT :page)      │
//! │  │                                                                     │
//! │  │  One statement: a second reservation cannot claim stamped rows,     │
//! │  │  and a row enqueued later has no token until the next reservation.  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  entries_for_batch(token) ──► uploader builds + submits                │
//! │       │                                                                 │
//! │       ├── success ──► release_batch(token, true)  → DELETE rows        │
//! │       └── failure ──► release_batch(token, false) → batch_id = NULL    │
//! │                                                                         │
//! │  prune(7 days): DELETE reserved rows whose releaser never came back    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use shopfeed_core::composite::expand_composites;
use shopfeed_core::{ChangeEntry, ChangeMethod, DEFAULT_BATCH_PAGE_SIZE};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DbResult;
use crate::repository::product::ProductRepository;
use crate::repository::IN_LIST_CHUNK;

/// Outcome of [`ChangeQueueRepository::reserve_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReservation {
    /// Random token stamped on every reserved row.
    pub token: String,
    /// Rows stamped; zero is a valid outcome.
    pub reserved: u64,
}

impl BatchReservation {
    pub fn is_empty(&self) -> bool {
        self.reserved == 0
    }
}

/// Repository for the catalog change queue.
#[derive(Debug, Clone)]
pub struct ChangeQueueRepository {
    pool: SqlitePool,
    page_size: u32,
}

impl ChangeQueueRepository {
    /// Creates a repository reserving up to [`DEFAULT_BATCH_PAGE_SIZE`] rows per batch.
    pub fn new(pool: SqlitePool) -> Self {
        ChangeQueueRepository {
            pool,
            page_size: DEFAULT_BATCH_PAGE_SIZE,
        }
    }

    /// Overrides the reservation page size.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    // =========================================================================
    // Enqueue
    // =========================================================================

    /// Queues `ids` for `method`, skipping ids that already have an unbatched
    /// row for the same method.
    ///
    /// The SKU is copied from the catalog at insert time when the product exists.
    ///
    /// ## Returns
    /// Number of rows inserted.
    pub async fn enqueue(&self, ids: &[i64], method: ChangeMethod) -> DbResult<u64> {
        let mut seen = HashSet::with_capacity(ids.len());
        let ids: Vec<i64> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut inserted = 0u64;
        let mut tx = self.pool.begin().await?;

        for chunk in ids.chunks(IN_LIST_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT product_id FROM catalog_change_queue WHERE batch_id IS NULL AND method = ",
            );
            builder.push_bind(method);
            builder.push(" AND product_id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            let pending: HashSet<i64> = builder
                .build_query_scalar::<i64>()
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .collect();

            let missing: Vec<i64> = chunk.iter().copied().filter(|id| !pending.contains(id)).collect();
            if missing.is_empty() {
                continue;
            }

            let mut insert: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO catalog_change_queue (product_id, sku, method, batch_id, created_at) ",
            );
            insert.push_values(&missing, |mut row, id| {
                row.push_bind(*id)
                    .push("(SELECT sku FROM catalog_products WHERE entity_id = ")
                    .push_bind_unseparated(*id)
                    .push_unseparated(")")
                    .push_bind(method)
                    .push("NULL")
                    .push_bind(now);
            });
            inserted += insert.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;

        debug!(method = %method, requested = ids.len(), inserted, "Enqueued catalog changes");
        Ok(inserted)
    }

    /// Queues a deletion, carrying the SKU since the catalog row may already be gone.
    pub async fn enqueue_deleted(&self, product_id: i64, sku: Option<&str>) -> DbResult<u64> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_delete(&mut conn, product_id, sku).await
    }

    /// Replaces pending updates for a removed product with one delete row.
    ///
    /// Runs in one transaction: either the updates are dropped and the delete
    /// is queued, or nothing changes.
    pub async fn record_delete(&self, product_id: i64, sku: Option<&str>) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;

        let superseded = match sku.filter(|s| !s.is_empty()) {
            Some(sku) => Self::drop_updates_for_sku(&mut tx, sku).await?,
            None => 0,
        };
        let queued = Self::insert_delete(&mut tx, product_id, sku).await?;

        tx.commit().await?;

        debug!(product_id, superseded, queued, "Recorded product delete");
        Ok(queued)
    }

    async fn insert_delete(
        conn: &mut SqliteConnection,
        product_id: i64,
        sku: Option<&str>,
    ) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO catalog_change_queue (product_id, sku, method, batch_id, created_at)
            SELECT ?1, ?2, ?3, NULL, ?4
            WHERE NOT EXISTS (
                SELECT 1 FROM catalog_change_queue
                WHERE product_id = ?1 AND method = ?3 AND batch_id IS NULL
            )
            "#,
        )
        .bind(product_id)
        .bind(sku)
        .bind(ChangeMethod::Delete)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Queues `ids`, replacing composite parents with their children.
    ///
    /// Parents never enter the queue; only sellable leaves do.
    pub async fn enqueue_with_children(&self, ids: &[i64], method: ChangeMethod) -> DbResult<u64> {
        let links = ProductRepository::new(self.pool.clone())
            .links_for_parents(ids)
            .await?;
        let expansion = expand_composites(ids, &links);

        let leaves = self.enqueue(&expansion.leaf_ids, method).await?;
        let children = self.enqueue(&expansion.child_ids, method).await?;

        debug!(
            method = %method,
            leaves,
            children,
            parents = ids.len() - expansion.leaf_ids.len(),
            "Enqueued with composite expansion"
        );
        Ok(leaves + children)
    }

    // =========================================================================
    // Reservation
    // =========================================================================

    /// Stamps up to `page_size` pending rows of `method` with a fresh token.
    pub async fn reserve_batch(&self, method: ChangeMethod) -> DbResult<BatchReservation> {
        let token = Uuid::new_v4().simple().to_string();

        let result = sqlx::query(
            r#"
            UPDATE catalog_change_queue
            SET batch_id = ?1
            WHERE row_id IN (
                SELECT row_id FROM catalog_change_queue
                WHERE batch_id IS NULL AND method = ?2
                ORDER BY row_id
                LIMIT ?3
            )
            "#,
        )
        .bind(&token)
        .bind(method)
        .bind(self.page_size)
        .execute(&self.pool)
        .await?;

        let reserved = result.rows_affected();
        if reserved > 0 {
            info!(method = %method, batch_id = %token, reserved, "Reserved change batch");
        }

        Ok(BatchReservation { token, reserved })
    }

    /// Returns the rows stamped with `token`, oldest first.
    pub async fn entries_for_batch(&self, token: &str) -> DbResult<Vec<ChangeEntry>> {
        let entries = sqlx::query_as::<_, ChangeEntry>(
            r#"
            SELECT row_id, product_id, sku, method, batch_id, created_at
            FROM catalog_change_queue
            WHERE batch_id = ?1
            ORDER BY row_id
            "#,
        )
        .bind(token)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Finishes a batch: deletes its rows on success, returns them to the
    /// pending pool on failure.
    ///
    /// ## Returns
    /// Number of rows deleted or released.
    pub async fn release_batch(&self, token: &str, success: bool) -> DbResult<u64> {
        let sql = if success {
            "DELETE FROM catalog_change_queue WHERE batch_id = ?1"
        } else {
            "UPDATE catalog_change_queue SET batch_id = NULL WHERE batch_id = ?1"
        };

        let affected = sqlx::query(sql)
            .bind(token)
            .execute(&self.pool)
            .await?
            .rows_affected();

        info!(batch_id = %token, success, affected, "Released change batch");
        Ok(affected)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Deletes reserved rows older than `older_than`.
    ///
    /// Pending rows are never pruned, whatever their age.
    pub async fn prune(&self, older_than: Duration) -> DbResult<u64> {
        self.prune_older_than(Utc::now() - older_than).await
    }

    /// Deletes reserved rows created before `cutoff`.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let pruned = sqlx::query(
            "DELETE FROM catalog_change_queue WHERE batch_id IS NOT NULL AND created_at < ?1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if pruned > 0 {
            info!(pruned, cutoff = %cutoff, "Pruned abandoned change batches");
        }
        Ok(pruned)
    }

    /// Drops every update row for `sku`; a delete supersedes them.
    pub async fn delete_for_sku(&self, sku: &str) -> DbResult<u64> {
        let mut conn = self.pool.acquire().await?;
        Self::drop_updates_for_sku(&mut conn, sku).await
    }

    async fn drop_updates_for_sku(conn: &mut SqliteConnection, sku: &str) -> DbResult<u64> {
        let deleted = sqlx::query("DELETE FROM catalog_change_queue WHERE sku = ?1 AND method = ?2")
            .bind(sku)
            .bind(ChangeMethod::Update)
            .execute(&mut *conn)
            .await?
            .rows_affected();

        debug!(sku = %sku, deleted, "Dropped superseded updates");
        Ok(deleted)
    }

    /// Counts unbatched rows for `method`.
    pub async fn count_pending(&self, method: ChangeMethod) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM catalog_change_queue WHERE batch_id IS NULL AND method = ?1",
        )
        .bind(method)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::product::tests::product;
    use shopfeed_core::ProductType;

    async fn setup() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn row_ids(entries: &[ChangeEntry]) -> Vec<i64> {
        entries.iter().map(|e| e.row_id).collect()
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent_until_reserved() {
        let db = setup().await;
        let queue = db.change_queue();

        assert_eq!(queue.enqueue(&[10, 10], ChangeMethod::Update).await.unwrap(), 1);
        assert_eq!(queue.enqueue(&[10], ChangeMethod::Update).await.unwrap(), 0);
        // Different method is a separate row
        assert_eq!(queue.enqueue(&[10], ChangeMethod::Create).await.unwrap(), 1);
        assert_eq!(queue.count_pending(ChangeMethod::Update).await.unwrap(), 1);

        // Once reserved, a new mutation gets its own pending row
        queue.reserve_batch(ChangeMethod::Update).await.unwrap();
        assert_eq!(queue.enqueue(&[10], ChangeMethod::Update).await.unwrap(), 1);
        assert_eq!(queue.count_pending(ChangeMethod::Update).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_copies_sku() {
        let db = setup().await;
        db.products()
            .upsert(&product(10, "TEE", ProductType::Simple))
            .await
            .unwrap();
        let queue = db.change_queue();
        queue.enqueue(&[10, 11], ChangeMethod::Create).await.unwrap();

        let batch = queue.reserve_batch(ChangeMethod::Create).await.unwrap();
        let entries = queue.entries_for_batch(&batch.token).await.unwrap();
        assert_eq!(entries[0].sku.as_deref(), Some("TEE"));
        assert_eq!(entries[1].sku, None);
        assert!(entries.iter().all(|e| e.is_reserved() && e.method == ChangeMethod::Create));
    }

    #[tokio::test]
    async fn test_reserve_caps_at_page_size() {
        let db = setup().await;
        let queue = db.change_queue();
        assert_eq!(queue.page_size(), 5000);

        let ids: Vec<i64> = (1..=5001).collect();
        assert_eq!(queue.enqueue(&ids, ChangeMethod::Update).await.unwrap(), 5001);

        let first = queue.reserve_batch(ChangeMethod::Update).await.unwrap();
        assert_eq!(first.reserved, 5000);
        let second = queue.reserve_batch(ChangeMethod::Update).await.unwrap();
        assert_eq!(second.reserved, 1);
        let third = queue.reserve_batch(ChangeMethod::Update).await.unwrap();
        assert!(third.is_empty());
    }

    #[tokio::test]
    async fn test_reservations_never_overlap() {
        let db = setup().await;
        let queue = db.change_queue().with_page_size(2);
        queue.enqueue(&[1, 2, 3], ChangeMethod::Update).await.unwrap();
        queue.enqueue(&[4], ChangeMethod::Delete).await.unwrap();

        let a = queue.reserve_batch(ChangeMethod::Update).await.unwrap();
        let b = queue.reserve_batch(ChangeMethod::Update).await.unwrap();
        assert_ne!(a.token, b.token);

        let a_rows = row_ids(&queue.entries_for_batch(&a.token).await.unwrap());
        let b_rows = row_ids(&queue.entries_for_batch(&b.token).await.unwrap());
        assert_eq!(a_rows.len(), 2);
        assert_eq!(b_rows.len(), 1);
        assert!(a_rows.iter().all(|r| !b_rows.contains(r)));

        // Delete rows were not touched by update reservations
        assert_eq!(queue.count_pending(ChangeMethod::Delete).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_release_restores_same_rows() {
        let db = setup().await;
        let queue = db.change_queue();
        queue.enqueue(&[10, 11, 12], ChangeMethod::Update).await.unwrap();

        let first = queue.reserve_batch(ChangeMethod::Update).await.unwrap();
        assert_eq!(first.reserved, 3);
        let first_rows = row_ids(&queue.entries_for_batch(&first.token).await.unwrap());

        // Transport failure
        assert_eq!(queue.release_batch(&first.token, false).await.unwrap(), 3);
        assert_eq!(queue.count_pending(ChangeMethod::Update).await.unwrap(), 3);
        assert!(queue.entries_for_batch(&first.token).await.unwrap().is_empty());

        let second = queue.reserve_batch(ChangeMethod::Update).await.unwrap();
        assert_ne!(first.token, second.token);
        let second_rows = row_ids(&queue.entries_for_batch(&second.token).await.unwrap());
        assert_eq!(first_rows, second_rows);

        assert_eq!(queue.release_batch(&second.token, true).await.unwrap(), 3);
        assert_eq!(queue.count_pending(ChangeMethod::Update).await.unwrap(), 0);
        assert!(queue.entries_for_batch(&second.token).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prune_only_touches_reserved_rows() {
        let db = setup().await;
        let queue = db.change_queue().with_page_size(1);
        queue.enqueue(&[1, 2], ChangeMethod::Update).await.unwrap();
        queue.reserve_batch(ChangeMethod::Update).await.unwrap();

        // Fresh rows survive the normal sweep
        assert_eq!(queue.prune(Duration::days(7)).await.unwrap(), 0);

        // Everything counts as old; only the reserved row goes
        let pruned = queue
            .prune_older_than(Utc::now() + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(queue.count_pending(ChangeMethod::Update).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_prune_old_reserved_row() {
        let db = setup().await;
        sqlx::query(
            "INSERT INTO catalog_change_queue (product_id, sku, method, batch_id, created_at) VALUES (1, NULL, 'update', 'stale', ?1), (2, NULL, 'update', NULL, ?1)",
        )
        .bind(Utc::now() - Duration::days(8))
        .execute(db.pool())
        .await
        .unwrap();

        let queue = db.change_queue();
        assert_eq!(queue.prune(Duration::days(7)).await.unwrap(), 1);
        assert!(queue.entries_for_batch("stale").await.unwrap().is_empty());
        assert_eq!(queue.count_pending(ChangeMethod::Update).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_for_sku_and_enqueue_deleted() {
        let db = setup().await;
        db.products()
            .upsert(&product(10, "TEE", ProductType::Simple))
            .await
            .unwrap();
        let queue = db.change_queue();
        queue.enqueue(&[10], ChangeMethod::Update).await.unwrap();
        queue.enqueue(&[10], ChangeMethod::Create).await.unwrap();

        assert_eq!(queue.delete_for_sku("TEE").await.unwrap(), 1);
        assert_eq!(queue.count_pending(ChangeMethod::Update).await.unwrap(), 0);
        assert_eq!(queue.count_pending(ChangeMethod::Create).await.unwrap(), 1);

        assert_eq!(queue.enqueue_deleted(10, Some("TEE")).await.unwrap(), 1);
        assert_eq!(queue.enqueue_deleted(10, Some("TEE")).await.unwrap(), 0);

        let batch = queue.reserve_batch(ChangeMethod::Delete).await.unwrap();
        let entries = queue.entries_for_batch(&batch.token).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sku.as_deref(), Some("TEE"));
    }

    #[tokio::test]
    async fn test_enqueue_with_children_excludes_parents() {
        let db = setup().await;
        let products = db.products();
        products
            .upsert(&product(10, "TEE", ProductType::Configurable))
            .await
            .unwrap();
        products.upsert(&product(11, "TEE-S", ProductType::Simple)).await.unwrap();
        products.upsert(&product(12, "TEE-M", ProductType::Simple)).await.unwrap();
        products.upsert(&product(20, "MUG", ProductType::Simple)).await.unwrap();
        products.add_link(10, 11).await.unwrap();
        products.add_link(10, 12).await.unwrap();

        let queue = db.change_queue();
        let inserted = queue
            .enqueue_with_children(&[10, 20], ChangeMethod::Update)
            .await
            .unwrap();
        assert_eq!(inserted, 3);

        let batch = queue.reserve_batch(ChangeMethod::Update).await.unwrap();
        let mut ids: Vec<i64> = queue
            .entries_for_batch(&batch.token)
            .await
            .unwrap()
            .iter()
            .map(|e| e.product_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec![11, 12, 20]);
    }

    #[tokio::test]
    async fn test_record_delete_rolls_back_when_insert_fails() {
        let db = setup().await;
        db.products()
            .upsert(&product(10, "TEE", ProductType::Simple))
            .await
            .unwrap();
        let queue = db.change_queue();
        queue.enqueue(&[10], ChangeMethod::Update).await.unwrap();

        sqlx::query(
            "CREATE TRIGGER reject_deletes BEFORE INSERT ON catalog_change_queue \
             WHEN NEW.method = 'delete' BEGIN SELECT RAISE(ABORT, 'delete rejected'); END",
        )
        .execute(db.pool())
        .await
        .unwrap();

        assert!(queue.record_delete(10, Some("TEE")).await.is_err());
        // The pending update survives the failed delete
        assert_eq!(queue.count_pending(ChangeMethod::Update).await.unwrap(), 1);
        assert_eq!(queue.count_pending(ChangeMethod::Delete).await.unwrap(), 0);

        sqlx::query("DROP TRIGGER reject_deletes")
            .execute(db.pool())
            .await
            .unwrap();
        assert_eq!(queue.record_delete(10, Some("TEE")).await.unwrap(), 1);
        assert_eq!(queue.count_pending(ChangeMethod::Update).await.unwrap(), 0);
        assert_eq!(queue.count_pending(ChangeMethod::Delete).await.unwrap(), 1);
    }
}
