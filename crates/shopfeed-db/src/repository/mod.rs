//! # Repository Module
//!
//! Database repository implementations for Shopfeed.
//!
//! ## Repository Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Who Owns Which Table                                 │
//! │                                                                         │
//! │  OWNED (read + write)                                                  │
//! │  └── ChangeQueueRepository   catalog_change_queue                       │
//! │                                                                         │
//! │  MIRRORED (read; writes only for seeding/tests)                        │
//! │  ├── ProductRepository       catalog_products, catalog_product_links   │
//! │  ├── StockRepository         catalog_stock_items,                       │
//! │  │                           inventory_salable_quantities               │
//! │  └── RuleRepository          sales_rules                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`change_queue::ChangeQueueRepository`] - Enqueue, reserve, release, prune
//! - [`product::ProductRepository`] - Catalog products and composite links
//! - [`stock::StockRepository`] - Single- and multi-source stock
//! - [`rule::RuleRepository`] - Active discount rules

pub mod change_queue;
pub mod product;
pub mod rule;
pub mod stock;

use tracing::warn;

use crate::error::DbError;

/// Maximum ids bound into one `IN (...)` list.
///
/// Keeps every statement well under SQLite's bind parameter limit.
pub const IN_LIST_CHUNK: usize = 500;

/// Decodes rows one at a time. A row that fails to decode is logged and
/// dropped; its neighbours are still returned.
pub(crate) fn decode_each<R, T>(rows: Vec<R>, entity: &'static str) -> Vec<T>
where
    T: TryFrom<R, Error = DbError>,
{
    rows.into_iter()
        .filter_map(|row| match T::try_from(row) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(entity, error = %e, "Skipping undecodable row");
                None
            }
        })
        .collect()
}
