//! # Domain Types
//!
//! Types shared by the queue, the builders and the uploader.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  ChangeEntry    │   │ CatalogProduct  │   │  StoreContext   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  row_id         │   │  entity_id      │   │  store_id       │       │
//! │  │  product_id     │   │  sku            │   │  currency       │       │
//! │  │  method         │   │  type_id        │   │  identifier_mode│       │
//! │  │  batch_id?      │   │  price          │   │  oos threshold  │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐                             │
//! │  │  ChangeMethod   │   │ IdentifierMode  │                             │
//! │  │  Create         │   │  Sku            │                             │
//! │  │  Update         │   │  EntityId       │                             │
//! │  │  Delete         │   └─────────────────┘                             │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CoreError, CoreResult};
use crate::money::{CurrencyCode, ExchangeRate, Money};

// =============================================================================
// Change Method
// =============================================================================

/// The kind of mutation a queue row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum ChangeMethod {
    Create,
    Update,
    Delete,
}

impl ChangeMethod {
    /// All methods, in the order an incremental cycle drains them.
    pub const ALL: [ChangeMethod; 3] = [ChangeMethod::Delete, ChangeMethod::Create, ChangeMethod::Update];

    /// Lower-case name as stored in the queue table.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ChangeMethod::Create => "create",
            ChangeMethod::Update => "update",
            ChangeMethod::Delete => "delete",
        }
    }

    /// Upper-case name used in the batch submission envelope.
    pub const fn envelope_name(&self) -> &'static str {
        match self {
            ChangeMethod::Create => "CREATE",
            ChangeMethod::Update => "UPDATE",
            ChangeMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Change Entry
// =============================================================================

/// A pending product mutation in the change queue.
///
/// ## Lifecycle
/// ```text
/// enqueue ──► batch_id = NULL ──reserve──► batch_id = token
///                   ▲                            │
///                   │ release(false)             │ release(true)
///                   └────────────────────────────┤
///                                                ▼
///                                             deleted
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ChangeEntry {
    pub row_id: i64,
    pub product_id: i64,
    pub sku: Option<String>,
    pub method: ChangeMethod,
    /// Batch token; `None` while the row is pending.
    pub batch_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChangeEntry {
    /// Returns true if the row has been claimed by a reservation.
    #[inline]
    pub fn is_reserved(&self) -> bool {
        self.batch_id.is_some()
    }
}

// =============================================================================
// Catalog Product
// =============================================================================

/// Host catalog product type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Simple,
    Virtual,
    Downloadable,
    Configurable,
    Bundle,
    Grouped,
    Other(String),
}

impl ProductType {
    /// Maps the host's `type_id` column.
    pub fn from_type_id(type_id: &str) -> Self {
        match type_id {
            "simple" => ProductType::Simple,
            "virtual" => ProductType::Virtual,
            "downloadable" => ProductType::Downloadable,
            "configurable" => ProductType::Configurable,
            "bundle" => ProductType::Bundle,
            "grouped" => ProductType::Grouped,
            other => ProductType::Other(other.to_string()),
        }
    }

    /// Composite products are containers; only their children are sellable.
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            ProductType::Configurable | ProductType::Bundle | ProductType::Grouped
        )
    }
}

/// A product row read from the host catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub entity_id: i64,
    pub sku: String,
    pub type_id: ProductType,
    pub name: String,
    pub description: Option<String>,
    /// Price in the store's base currency.
    pub price: Money,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub enabled: bool,
    /// Unit pricing measure as decimal text ("0.5").
    pub unit_value: Option<String>,
    /// Unit pricing unit ("kg", "ml").
    pub unit_type: Option<String>,
    /// SKU of the composite parent, when this is a child item.
    pub parent_sku: Option<String>,
    /// All other attribute values, keyed by attribute code.
    pub attributes: BTreeMap<String, String>,
}

// =============================================================================
// Store Context
// =============================================================================

/// Which product field becomes the remote content id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierMode {
    #[default]
    Sku,
    EntityId,
}

impl fmt::Display for IdentifierMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierMode::Sku => write!(f, "sku"),
            IdentifierMode::EntityId => write!(f, "entity_id"),
        }
    }
}

/// Per-store settings the builders need, resolved once per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreContext {
    pub store_id: String,
    pub store_name: String,
    /// Store currency as configured. Validated lazily so a bad code only
    /// blanks prices instead of failing the whole store.
    pub currency: String,
    pub exchange_rate: ExchangeRate,
    pub identifier_mode: IdentifierMode,
    pub out_of_stock_threshold: i64,
    /// `remote attribute → local attribute` overrides.
    pub custom_attributes: BTreeMap<String, String>,
}

impl StoreContext {
    /// Creates a context with defaults for everything but id and currency.
    pub fn new(store_id: impl Into<String>, currency: impl Into<String>) -> Self {
        StoreContext {
            store_id: store_id.into(),
            store_name: String::new(),
            currency: currency.into(),
            exchange_rate: ExchangeRate::identity(),
            identifier_mode: IdentifierMode::default(),
            out_of_stock_threshold: 0,
            custom_attributes: BTreeMap::new(),
        }
    }

    /// Converts a base-currency amount to store currency and formats it as
    /// `"<amount> <CODE>"`.
    ///
    /// Fails on an unusable exchange rate or a malformed currency code.
    pub fn format_price(&self, amount: Money) -> CoreResult<String> {
        let currency = CurrencyCode::parse(&self.currency)?;
        if !self.exchange_rate.is_usable() {
            return Err(CoreError::PriceFormat(format!(
                "no usable exchange rate for {}",
                currency
            )));
        }
        Ok(amount.convert(self.exchange_rate)?.to_feed_string(&currency))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
