//! # Stock Repository
//!
//! Loads the raw inputs for the two inventory strategies.
//!
//! ```text
//! single_source ──► catalog_stock_items          ──► Vec<StockRecord>
//!                                                      └─► SingleSourceInventory
//! multi_source  ──► inventory_salable_quantities ──► SalableIndex
//!                   (one stock_id)                     └─► MultiSourceInventory
//! ```
//!
//! Both are loaded once per batch so record assembly stays synchronous.

use shopfeed_core::inventory::{SalableQuantityLookup, StockRecord};
use shopfeed_core::{CoreError, CoreResult};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;
use tracing::debug;

use crate::error::DbResult;
use crate::repository::IN_LIST_CHUNK;

// =============================================================================
// Salable Index
// =============================================================================

/// Salable quantities for one stock channel, keyed by SKU.
///
/// A SKU missing from the index is a lookup failure, which the multi-source
/// strategy treats as out of stock.
#[derive(Debug, Clone, Default)]
pub struct SalableIndex {
    stock_id: i64,
    entries: HashMap<String, (bool, i64)>,
}

impl SalableIndex {
    pub fn stock_id(&self) -> i64 {
        self.stock_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, sku: &str, stock_id: i64) -> CoreResult<(bool, i64)> {
        if stock_id != self.stock_id {
            return Err(CoreError::StockLookup {
                sku: sku.to_string(),
                stock_id,
                reason: format!("index holds stock {}", self.stock_id),
            });
        }
        self.entries
            .get(sku)
            .copied()
            .ok_or_else(|| CoreError::StockLookup {
                sku: sku.to_string(),
                stock_id,
                reason: "no salable quantity recorded".to_string(),
            })
    }
}

impl SalableQuantityLookup for SalableIndex {
    fn is_salable(&self, sku: &str, stock_id: i64) -> CoreResult<bool> {
        self.entry(sku, stock_id).map(|(salable, _)| salable)
    }

    fn salable_qty(&self, sku: &str, stock_id: i64) -> CoreResult<i64> {
        self.entry(sku, stock_id).map(|(_, qty)| qty)
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for stock reads.
#[derive(Debug, Clone)]
pub struct StockRepository {
    pool: SqlitePool,
}

impl StockRepository {
    /// Creates a new StockRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StockRepository { pool }
    }

    /// Loads single-source stock rows for the given products.
    pub async fn stock_for_products(&self, product_ids: &[i64]) -> DbResult<Vec<StockRecord>> {
        let mut records = Vec::with_capacity(product_ids.len());

        for chunk in product_ids.chunks(IN_LIST_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT product_id, qty, is_in_stock FROM catalog_stock_items WHERE product_id IN (",
            );
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            let rows: Vec<(i64, i64, bool)> = builder.build_query_as().fetch_all(&self.pool).await?;
            records.extend(rows.into_iter().map(|(product_id, qty, is_in_stock)| StockRecord {
                product_id,
                qty,
                is_in_stock,
            }));
        }

        debug!(requested = product_ids.len(), found = records.len(), "Loaded stock records");
        Ok(records)
    }

    /// Loads salable quantities for the given SKUs in one stock channel.
    pub async fn salable_index<S: AsRef<str>>(&self, stock_id: i64, skus: &[S]) -> DbResult<SalableIndex> {
        let mut entries = HashMap::with_capacity(skus.len());

        for chunk in skus.chunks(IN_LIST_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT sku, is_salable, qty FROM inventory_salable_quantities WHERE stock_id = ",
            );
            builder.push_bind(stock_id);
            builder.push(" AND sku IN (");
            let mut separated = builder.separated(", ");
            for sku in chunk {
                separated.push_bind(sku.as_ref().to_string());
            }
            separated.push_unseparated(")");

            let rows: Vec<(String, bool, i64)> = builder.build_query_as().fetch_all(&self.pool).await?;
            entries.extend(rows.into_iter().map(|(sku, salable, qty)| (sku, (salable, qty))));
        }

        debug!(stock_id, found = entries.len(), "Loaded salable quantities");
        Ok(SalableIndex { stock_id, entries })
    }

    /// Inserts or replaces a single-source stock row.
    pub async fn upsert_stock_item(&self, record: StockRecord) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO catalog_stock_items (product_id, qty, is_in_stock)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (product_id) DO UPDATE SET
                qty = excluded.qty,
                is_in_stock = excluded.is_in_stock
            "#,
        )
        .bind(record.product_id)
        .bind(record.qty)
        .bind(record.is_in_stock)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts or replaces a multi-source salable quantity.
    pub async fn set_salable(&self, stock_id: i64, sku: &str, qty: i64, is_salable: bool) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory_salable_quantities (stock_id, sku, qty, is_salable)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (stock_id, sku) DO UPDATE SET
                qty = excluded.qty,
                is_salable = excluded.is_salable
            "#,
        )
        .bind(stock_id)
        .bind(sku)
        .bind(qty)
        .bind(is_salable)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_stock_for_products() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.stock();

        repo.upsert_stock_item(StockRecord { product_id: 1, qty: 5, is_in_stock: true })
            .await
            .unwrap();
        repo.upsert_stock_item(StockRecord { product_id: 1, qty: 3, is_in_stock: false })
            .await
            .unwrap();

        let records = repo.stock_for_products(&[1, 2]).await.unwrap();
        assert_eq!(
            records,
            vec![StockRecord { product_id: 1, qty: 3, is_in_stock: false }]
        );
    }

    #[tokio::test]
    async fn test_salable_index_lookup() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.stock();

        repo.set_salable(2, "A", 7, true).await.unwrap();
        repo.set_salable(3, "A", 99, true).await.unwrap();

        let index = repo.salable_index(2, &["A", "B"]).await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.salable_qty("A", 2).unwrap(), 7);
        assert!(index.is_salable("A", 2).unwrap());
        assert!(index.is_salable("B", 2).is_err());
        // Different channel than the one loaded
        assert!(index.salable_qty("A", 3).is_err());
    }
}
