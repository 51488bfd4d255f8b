//! # Catalog Product Repository
//!
//! Read side of the host catalog mirror.
//!
//! ## Key Operations
//! - Fetch products for a reserved batch (`get_by_ids`)
//! - Keyset paging through the whole catalog for a full feed
//! - Parent → child links for composite expansion
//!
//! The upsert helpers exist for seeding and tests; the host platform owns
//! these rows in production.

use shopfeed_core::composite::ProductLink;
use shopfeed_core::{CatalogProduct, Money, ProductType};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::{decode_each, IN_LIST_CHUNK};

const PRODUCT_COLUMNS: &str = r#"
    c.entity_id,
    c.sku,
    c.type_id,
    c.name,
    c.description,
    c.price,
    c.url,
    c.image_url,
    c.brand,
    c.category,
    c.enabled,
    c.unit_value,
    c.unit_type,
    c.attributes,
    (
        SELECT p.sku
        FROM catalog_product_links l
        INNER JOIN catalog_products p ON p.entity_id = l.parent_id
        WHERE l.child_id = c.entity_id
        ORDER BY l.parent_id
        LIMIT 1
    ) AS parent_sku
"#;

/// Raw `catalog_products` row before decimal and JSON decoding.
#[derive(Debug, FromRow)]
struct ProductRow {
    entity_id: i64,
    sku: String,
    type_id: String,
    name: String,
    description: Option<String>,
    price: String,
    url: Option<String>,
    image_url: Option<String>,
    brand: Option<String>,
    category: Option<String>,
    enabled: bool,
    unit_value: Option<String>,
    unit_type: Option<String>,
    attributes: String,
    parent_sku: Option<String>,
}

impl TryFrom<ProductRow> for CatalogProduct {
    type Error = DbError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let price = Money::parse(&row.price)
            .map_err(|e| DbError::invalid_data("price", row.entity_id, e.to_string()))?;
        let attributes: BTreeMap<String, String> = serde_json::from_str(&row.attributes)
            .map_err(|e| DbError::invalid_data("attributes", row.entity_id, e.to_string()))?;

        Ok(CatalogProduct {
            entity_id: row.entity_id,
            sku: row.sku,
            type_id: ProductType::from_type_id(&row.type_id),
            name: row.name,
            description: row.description,
            price,
            url: row.url,
            image_url: row.image_url,
            brand: row.brand,
            category: row.category,
            enabled: row.enabled,
            unit_value: row.unit_value,
            unit_type: row.unit_type,
            parent_sku: row.parent_sku,
            attributes,
        })
    }
}

fn type_code(product_type: &ProductType) -> &str {
    match product_type {
        ProductType::Simple => "simple",
        ProductType::Virtual => "virtual",
        ProductType::Downloadable => "downloadable",
        ProductType::Configurable => "configurable",
        ProductType::Bundle => "bundle",
        ProductType::Grouped => "grouped",
        ProductType::Other(code) => code,
    }
}

/// One keyset page of the catalog.
#[derive(Debug, Clone, Default)]
pub struct ProductPage {
    /// Products that decoded cleanly.
    pub products: Vec<CatalogProduct>,
    /// Highest entity id read, decodable or not. `None` once the catalog is exhausted.
    pub last_id: Option<i64>,
}

/// Repository for catalog product reads.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Fetches products by entity id, ascending.
    ///
    /// Unknown ids are absent from the result, and so are rows whose price
    /// or attributes cannot be decoded (logged).
    pub async fn get_by_ids(&self, ids: &[i64]) -> DbResult<Vec<CatalogProduct>> {
        let mut products = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(IN_LIST_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT ");
            builder.push(PRODUCT_COLUMNS);
            builder.push(" FROM catalog_products c WHERE c.entity_id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            let rows: Vec<ProductRow> = builder.build_query_as().fetch_all(&self.pool).await?;
            products.extend(decode_each::<_, CatalogProduct>(rows, "catalog_product"));
        }

        products.sort_by_key(|p| p.entity_id);
        debug!(requested = ids.len(), found = products.len(), "Loaded catalog products");
        Ok(products)
    }

    /// Reads up to `limit` rows with `entity_id > after_id`, ascending.
    ///
    /// Undecodable rows are dropped from `products` but still advance
    /// `last_id`, so paging never stalls on a bad row.
    ///
    /// ## Usage
    /// ```rust,ignore
    /// let mut cursor = 0;
    /// loop {
    ///     let page = repo.page_after(cursor, 500).await?;
    ///     let Some(last_id) = page.last_id else { break };
    ///     cursor = last_id;
    /// }
    /// ```
    pub async fn page_after(&self, after_id: i64, limit: u32) -> DbResult<ProductPage> {
        let sql = format!(
            "SELECT {} FROM catalog_products c WHERE c.entity_id > ?1 ORDER BY c.entity_id LIMIT ?2",
            PRODUCT_COLUMNS
        );
        let rows: Vec<ProductRow> = sqlx::query_as(&sql)
            .bind(after_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let last_id = rows.last().map(|row| row.entity_id);
        Ok(ProductPage {
            products: decode_each(rows, "catalog_product"),
            last_id,
        })
    }

    /// Returns every link whose parent is in `parent_ids`.
    pub async fn links_for_parents(&self, parent_ids: &[i64]) -> DbResult<Vec<ProductLink>> {
        let mut links = Vec::new();

        for chunk in parent_ids.chunks(IN_LIST_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT parent_id, child_id FROM catalog_product_links WHERE parent_id IN (",
            );
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(") ORDER BY parent_id, child_id");

            let rows: Vec<(i64, i64)> = builder.build_query_as().fetch_all(&self.pool).await?;
            links.extend(
                rows.into_iter()
                    .map(|(parent_id, child_id)| ProductLink { parent_id, child_id }),
            );
        }

        Ok(links)
    }

    /// Counts catalog products.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM catalog_products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Inserts or replaces a product row.
    pub async fn upsert(&self, product: &CatalogProduct) -> DbResult<()> {
        let attributes = serde_json::to_string(&product.attributes)
            .map_err(|e| DbError::invalid_data("attributes", product.entity_id, e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO catalog_products (
                entity_id, sku, type_id, name, description, price,
                url, image_url, brand, category, enabled,
                unit_value, unit_type, attributes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT (entity_id) DO UPDATE SET
                sku = excluded.sku,
                type_id = excluded.type_id,
                name = excluded.name,
                description = excluded.description,
                price = excluded.price,
                url = excluded.url,
                image_url = excluded.image_url,
                brand = excluded.brand,
                category = excluded.category,
                enabled = excluded.enabled,
                unit_value = excluded.unit_value,
                unit_type = excluded.unit_type,
                attributes = excluded.attributes,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            "#,
        )
        .bind(product.entity_id)
        .bind(&product.sku)
        .bind(type_code(&product.type_id))
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price.to_string())
        .bind(&product.url)
        .bind(&product.image_url)
        .bind(&product.brand)
        .bind(&product.category)
        .bind(product.enabled)
        .bind(&product.unit_value)
        .bind(&product.unit_type)
        .bind(attributes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records a parent → child link. Existing links are left alone.
    pub async fn add_link(&self, parent_id: i64, child_id: i64) -> DbResult<()> {
        sqlx::query("INSERT OR IGNORE INTO catalog_product_links (parent_id, child_id) VALUES (?1, ?2)")
            .bind(parent_id)
            .bind(child_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Removes a product and its links.
    pub async fn delete(&self, entity_id: i64) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM catalog_product_links WHERE parent_id = ?1 OR child_id = ?1")
            .bind(entity_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM catalog_products WHERE entity_id = ?1")
            .bind(entity_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    pub(crate) fn product(entity_id: i64, sku: &str, type_id: ProductType) -> CatalogProduct {
        CatalogProduct {
            entity_id,
            sku: sku.to_string(),
            type_id,
            name: format!("Product {}", sku),
            description: None,
            price: Money::from_cents(1999),
            url: None,
            image_url: None,
            brand: None,
            category: None,
            enabled: true,
            unit_value: None,
            unit_type: None,
            parent_sku: None,
            attributes: BTreeMap::new(),
        }
    }

    async fn setup() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_get_by_ids() {
        let db = setup().await;
        let repo = db.products();

        let mut tee = product(2, "TEE", ProductType::Simple);
        tee.attributes.insert("color".to_string(), "Red".to_string());
        repo.upsert(&tee).await.unwrap();
        repo.upsert(&product(1, "MUG", ProductType::Simple)).await.unwrap();

        let found = repo.get_by_ids(&[2, 1, 99]).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].sku, "MUG");
        assert_eq!(found[1].price, Money::from_cents(1999));
        assert_eq!(found[1].attributes.get("color").map(String::as_str), Some("Red"));

        // Upsert replaces
        tee.name = "Renamed".to_string();
        repo.upsert(&tee).await.unwrap();
        assert_eq!(repo.get_by_ids(&[2]).await.unwrap()[0].name, "Renamed");
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_parent_sku_and_links() {
        let db = setup().await;
        let repo = db.products();

        repo.upsert(&product(10, "TEE", ProductType::Configurable)).await.unwrap();
        repo.upsert(&product(11, "TEE-S", ProductType::Simple)).await.unwrap();
        repo.upsert(&product(12, "TEE-M", ProductType::Simple)).await.unwrap();
        repo.add_link(10, 11).await.unwrap();
        repo.add_link(10, 12).await.unwrap();
        repo.add_link(10, 12).await.unwrap();

        let links = repo.links_for_parents(&[10, 11]).await.unwrap();
        assert_eq!(
            links,
            vec![
                ProductLink { parent_id: 10, child_id: 11 },
                ProductLink { parent_id: 10, child_id: 12 },
            ]
        );

        let children = repo.get_by_ids(&[11, 10]).await.unwrap();
        assert_eq!(children[0].parent_sku, None);
        assert_eq!(children[1].parent_sku.as_deref(), Some("TEE"));
        assert!(children[0].type_id.is_composite());
    }

    #[tokio::test]
    async fn test_page_after() {
        let db = setup().await;
        let repo = db.products();
        for id in 1..=5 {
            repo.upsert(&product(id, &format!("SKU-{}", id), ProductType::Simple))
                .await
                .unwrap();
        }

        let first = repo.page_after(0, 2).await.unwrap();
        assert_eq!(first.products.iter().map(|p| p.entity_id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(first.last_id, Some(2));
        let rest = repo.page_after(2, 10).await.unwrap();
        assert_eq!(rest.products.len(), 3);
        let end = repo.page_after(5, 10).await.unwrap();
        assert!(end.products.is_empty());
        assert_eq!(end.last_id, None);
    }

    async fn insert_bad_price(db: &Database, entity_id: i64) {
        sqlx::query("INSERT INTO catalog_products (entity_id, sku, name, price) VALUES (?1, ?2, 'Broken', 'N/A')")
            .bind(entity_id)
            .bind(format!("BAD-{}", entity_id))
            .execute(db.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_bad_row_is_skipped_by_get_by_ids() {
        let db = setup().await;
        let repo = db.products();
        repo.upsert(&product(1, "A", ProductType::Simple)).await.unwrap();
        insert_bad_price(&db, 2).await;
        sqlx::query("INSERT INTO catalog_products (entity_id, sku, name, attributes) VALUES (3, 'C', 'C', 'not json')")
            .execute(db.pool())
            .await
            .unwrap();
        repo.upsert(&product(4, "D", ProductType::Simple)).await.unwrap();

        let found = repo.get_by_ids(&[1, 2, 3, 4]).await.unwrap();
        assert_eq!(found.iter().map(|p| p.entity_id).collect::<Vec<_>>(), vec![1, 4]);
    }

    #[tokio::test]
    async fn test_bad_row_still_advances_page_cursor() {
        let db = setup().await;
        let repo = db.products();
        repo.upsert(&product(1, "A", ProductType::Simple)).await.unwrap();
        insert_bad_price(&db, 2).await;
        insert_bad_price(&db, 3).await;
        repo.upsert(&product(4, "D", ProductType::Simple)).await.unwrap();

        // A page made only of bad rows is empty but not the end
        let page = repo.page_after(1, 2).await.unwrap();
        assert!(page.products.is_empty());
        assert_eq!(page.last_id, Some(3));

        let next = repo.page_after(3, 2).await.unwrap();
        assert_eq!(next.products[0].entity_id, 4);
    }

    #[test]
    fn test_bad_price_is_invalid_data() {
        let row = ProductRow {
            entity_id: 9,
            sku: "X".to_string(),
            type_id: "simple".to_string(),
            name: "X".to_string(),
            description: None,
            price: "n/a".to_string(),
            url: None,
            image_url: None,
            brand: None,
            category: None,
            enabled: true,
            unit_value: None,
            unit_type: None,
            attributes: "{}".to_string(),
            parent_sku: None,
        };
        let err = CatalogProduct::try_from(row).unwrap_err();
        assert!(matches!(err, DbError::InvalidData { .. }));
    }

    #[tokio::test]
    async fn test_delete_removes_links() {
        let db = setup().await;
        let repo = db.products();
        repo.upsert(&product(1, "P", ProductType::Bundle)).await.unwrap();
        repo.upsert(&product(2, "C", ProductType::Simple)).await.unwrap();
        repo.add_link(1, 2).await.unwrap();

        assert!(repo.delete(1).await.unwrap());
        assert!(!repo.delete(1).await.unwrap());
        assert!(repo.links_for_parents(&[1]).await.unwrap().is_empty());
    }
}
