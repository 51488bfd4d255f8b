//! # Inventory Strategies
//!
//! Availability and sellable quantity for a product, from either a single
//! stock record or a per-channel salable-quantity service.
//!
//! ## Shared Algorithm
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  quantity     = max(raw_salable_qty - out_of_stock_threshold, 0)        │
//! │  availability = in stock  iff  quantity > 0 AND raw_stock_flag          │
//! │                                                                         │
//! │  SingleSource: raw values come from one stock record per product        │
//! │  MultiSource:  raw values come from the salable-quantity lookup for    │
//! │                the configured stock channel. A failed lookup counts    │
//! │                as "not salable, qty 0", never as in stock.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The strategy is chosen once per store cycle; callers hold a
//! `&dyn InventoryStrategy` and bind it to each product with
//! [`InventoryStrategy::init_for`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::CoreResult;
use crate::types::CatalogProduct;

// =============================================================================
// Availability
// =============================================================================

/// Remote catalog availability value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    #[serde(rename = "in stock")]
    InStock,
    #[serde(rename = "out of stock")]
    OutOfStock,
}

impl Availability {
    /// Wire value ("in stock" / "out of stock").
    pub const fn as_str(&self) -> &'static str {
        match self {
            Availability::InStock => "in stock",
            Availability::OutOfStock => "out of stock",
        }
    }
}

// =============================================================================
// Product Stock
// =============================================================================

/// Stock figures bound to one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductStock {
    raw_qty: i64,
    in_stock_flag: bool,
    threshold: i64,
}

impl ProductStock {
    pub const fn new(raw_qty: i64, in_stock_flag: bool, threshold: i64) -> Self {
        ProductStock {
            raw_qty,
            in_stock_flag,
            threshold,
        }
    }

    /// An out-of-stock binding with zero quantity.
    pub const fn unavailable(threshold: i64) -> Self {
        ProductStock::new(0, false, threshold)
    }

    /// Sellable quantity after the store's out-of-stock threshold. Never negative.
    pub fn quantity(&self) -> i64 {
        self.raw_qty.saturating_sub(self.threshold).max(0)
    }

    pub fn availability(&self) -> Availability {
        if self.quantity() > 0 && self.in_stock_flag {
            Availability::InStock
        } else {
            Availability::OutOfStock
        }
    }
}

// =============================================================================
// Strategy Trait
// =============================================================================

/// Computes stock for a product under one store's inventory setup.
pub trait InventoryStrategy {
    /// Binds the strategy to a product.
    fn init_for(&self, product: &CatalogProduct) -> ProductStock;
}

// =============================================================================
// Single Source
// =============================================================================

/// One stock row per product (legacy single-warehouse setup).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockRecord {
    pub product_id: i64,
    pub qty: i64,
    pub is_in_stock: bool,
}

/// Reads availability from per-product [`StockRecord`]s.
#[derive(Debug, Clone, Default)]
pub struct SingleSourceInventory {
    records: HashMap<i64, StockRecord>,
    threshold: i64,
}

impl SingleSourceInventory {
    pub fn new(records: impl IntoIterator<Item = StockRecord>, threshold: i64) -> Self {
        SingleSourceInventory {
            records: records.into_iter().map(|r| (r.product_id, r)).collect(),
            threshold,
        }
    }
}

impl InventoryStrategy for SingleSourceInventory {
    fn init_for(&self, product: &CatalogProduct) -> ProductStock {
        match self.records.get(&product.entity_id) {
            Some(record) => ProductStock::new(record.qty, record.is_in_stock, self.threshold),
            None => ProductStock::unavailable(self.threshold),
        }
    }
}

// =============================================================================
// Multi Source
// =============================================================================

/// Salable-quantity service for multi-source inventory.
pub trait SalableQuantityLookup {
    fn is_salable(&self, sku: &str, stock_id: i64) -> CoreResult<bool>;
    fn salable_qty(&self, sku: &str, stock_id: i64) -> CoreResult<i64>;
}

/// Reads availability from a salable-quantity service for one stock channel.
pub struct MultiSourceInventory<'a> {
    lookup: &'a dyn SalableQuantityLookup,
    stock_id: i64,
    threshold: i64,
}

impl<'a> MultiSourceInventory<'a> {
    pub fn new(lookup: &'a dyn SalableQuantityLookup, stock_id: i64, threshold: i64) -> Self {
        MultiSourceInventory {
            lookup,
            stock_id,
            threshold,
        }
    }
}

impl InventoryStrategy for MultiSourceInventory<'_> {
    fn init_for(&self, product: &CatalogProduct) -> ProductStock {
        let salable = self.lookup.is_salable(&product.sku, self.stock_id);
        let qty = self.lookup.salable_qty(&product.sku, self.stock_id);
        match (salable, qty) {
            (Ok(salable), Ok(qty)) => ProductStock::new(qty, salable, self.threshold),
            // Any lookup failure degrades to out of stock with nothing to sell.
            _ => ProductStock::unavailable(self.threshold),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
