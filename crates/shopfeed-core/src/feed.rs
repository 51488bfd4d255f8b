//! # Feed Records
//!
//! Builds the outbound record for one catalog product.
//!
//! ## Assembly Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    AttributeAssembler::build                            │
//! │                                                                         │
//! │  CatalogProduct                                                         │
//! │       │                                                                 │
//! │       ├── content id ─────── sku | entity_id   (missing → hard error)  │
//! │       ├── price ──────────── convert + "9.99 USD" (error → "")         │
//! │       ├── unit price ─────── only with value AND unit (error → "")     │
//! │       ├── title/description ─ clean_text + truncate                    │
//! │       ├── link/image_link ─── sanitize_url (localhost rewrite)         │
//! │       ├── stock ──────────── InventoryStrategy::init_for               │
//! │       └── custom attributes ─ remote ← local, unknown local skipped    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  FeedRecord (ephemeral, owned by the caller)                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{CoreError, CoreResult};
use crate::inventory::{Availability, InventoryStrategy};
use crate::money::parse_scaled;
use crate::sanitize::{clean_text, sanitize_url, truncate_chars};
use crate::types::{CatalogProduct, IdentifierMode, StoreContext};

// =============================================================================
// Constants
// =============================================================================

/// Remote limit on title length.
pub const MAX_TITLE_CHARS: usize = 150;

/// Remote limit on description length.
pub const MAX_DESCRIPTION_CHARS: usize = 5000;

/// Fixed column order of the full-catalog feed file.
///
/// Mapped custom attributes are appended after these, in key order.
pub const FEED_FIELDS: &[&str] = &[
    "id",
    "title",
    "description",
    "availability",
    "inventory",
    "condition",
    "price",
    "unit_price",
    "link",
    "image_link",
    "brand",
    "google_product_category",
    "item_group_id",
    "status",
];

/// Fields computed by the assembler that custom mappings may not replace.
const PROTECTED_FIELDS: &[&str] = &["id", "price", "availability", "inventory", "unit_price"];

// =============================================================================
// Feed Record
// =============================================================================

/// One product as the remote catalog sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub availability: Availability,
    pub inventory: i64,
    pub condition: String,
    /// Empty when the price could not be formatted.
    pub price: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub unit_price: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub link: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image_link: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub brand: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub google_product_category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_group_id: Option<String>,
    pub status: String,
    #[serde(flatten)]
    pub custom: BTreeMap<String, String>,
}

impl FeedRecord {
    /// Returns a column value by name; unknown names resolve to custom attributes.
    pub fn field(&self, name: &str) -> String {
        match name {
            "id" => self.id.clone(),
            "title" => self.title.clone(),
            "description" => self.description.clone(),
            "availability" => self.availability.as_str().to_string(),
            "inventory" => self.inventory.to_string(),
            "condition" => self.condition.clone(),
            "price" => self.price.clone(),
            "unit_price" => self.unit_price.clone(),
            "link" => self.link.clone(),
            "image_link" => self.image_link.clone(),
            "brand" => self.brand.clone(),
            "google_product_category" => self.google_product_category.clone(),
            "item_group_id" => self.item_group_id.clone().unwrap_or_default(),
            "status" => self.status.clone(),
            other => self.custom.get(other).cloned().unwrap_or_default(),
        }
    }

    /// Renders the record as a row for the given header.
    pub fn to_row<S: AsRef<str>>(&self, header: &[S]) -> Vec<String> {
        header.iter().map(|h| self.field(h.as_ref())).collect()
    }

    /// Applies a mapped attribute on top of the defaults.
    fn apply_override(&mut self, remote: &str, value: String) {
        match remote {
            "title" => self.title = truncate_chars(&value, MAX_TITLE_CHARS),
            "description" => self.description = truncate_chars(&value, MAX_DESCRIPTION_CHARS),
            "condition" => self.condition = value,
            "brand" => self.brand = value,
            "google_product_category" => self.google_product_category = value,
            "link" => self.link = sanitize_url(&value),
            "image_link" => self.image_link = sanitize_url(&value),
            "item_group_id" => self.item_group_id = Some(value),
            "status" => self.status = value,
            other => {
                self.custom.insert(other.to_string(), value);
            }
        }
    }
}

/// Resolves the remote content id for a product.
///
/// ## Example
/// ```rust
/// use shopfeed_core::feed::content_id;
/// use shopfeed_core::IdentifierMode;
///
/// assert_eq!(content_id(7, Some("TEE-1"), IdentifierMode::Sku).unwrap(), "TEE-1");
/// assert_eq!(content_id(7, Some("TEE-1"), IdentifierMode::EntityId).unwrap(), "7");
/// assert!(content_id(7, None, IdentifierMode::Sku).is_err());
/// ```
pub fn content_id(product_id: i64, sku: Option<&str>, mode: IdentifierMode) -> CoreResult<String> {
    let id = match mode {
        IdentifierMode::Sku => sku.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string),
        IdentifierMode::EntityId => (product_id > 0).then(|| product_id.to_string()),
    };
    id.ok_or_else(|| CoreError::MissingIdentifier {
        product_id,
        mode: mode.to_string(),
    })
}

// =============================================================================
// Attribute Assembler
// =============================================================================

/// Builds [`FeedRecord`]s for one store.
pub struct AttributeAssembler<'a> {
    store: &'a StoreContext,
    inventory: &'a dyn InventoryStrategy,
}

impl<'a> AttributeAssembler<'a> {
    pub fn new(store: &'a StoreContext, inventory: &'a dyn InventoryStrategy) -> Self {
        AttributeAssembler { store, inventory }
    }

    /// Returns the feed file header for this store.
    pub fn header(&self) -> Vec<String> {
        let mut header: Vec<String> = FEED_FIELDS.iter().map(|f| f.to_string()).collect();
        for remote in self.store.custom_attributes.keys() {
            if !header.iter().any(|h| h == remote) && !PROTECTED_FIELDS.contains(&remote.as_str()) {
                header.push(remote.clone());
            }
        }
        header
    }

    /// Builds the record for one product.
    ///
    /// Only a missing identifier fails; price problems blank the price.
    pub fn build(&self, product: &CatalogProduct) -> CoreResult<FeedRecord> {
        let id = content_id(
            product.entity_id,
            Some(product.sku.as_str()),
            self.store.identifier_mode,
        )?;

        let stock = self.inventory.init_for(product);

        let title = truncate_chars(&clean_text(&product.name), MAX_TITLE_CHARS);
        let description = product
            .description
            .as_deref()
            .map(clean_text)
            .filter(|d| !d.is_empty())
            .map(|d| truncate_chars(&d, MAX_DESCRIPTION_CHARS))
            .unwrap_or_else(|| title.clone());

        let brand = product
            .brand
            .as_deref()
            .map(clean_text)
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| self.store.store_name.clone());

        let mut record = FeedRecord {
            id,
            title,
            description,
            availability: stock.availability(),
            inventory: stock.quantity(),
            condition: "new".to_string(),
            price: self.store.format_price(product.price).unwrap_or_default(),
            unit_price: self.unit_price(product).unwrap_or_default(),
            link: product.url.as_deref().map(sanitize_url).unwrap_or_default(),
            image_link: product.image_url.as_deref().map(sanitize_url).unwrap_or_default(),
            brand,
            google_product_category: product
                .category
                .as_deref()
                .map(clean_text)
                .unwrap_or_default(),
            item_group_id: product.parent_sku.clone().filter(|s| !s.is_empty()),
            status: if product.enabled { "active" } else { "archived" }.to_string(),
            custom: BTreeMap::new(),
        };

        self.apply_custom_attributes(product, &mut record);

        Ok(record)
    }

    /// Formats `{"value", "currency", "unit"}` for unit pricing.
    ///
    /// Empty when either the measure or the unit is missing.
    fn unit_price(&self, product: &CatalogProduct) -> CoreResult<String> {
        let (Some(value), Some(unit)) = (
            product.unit_value.as_deref().filter(|v| !v.trim().is_empty()),
            product.unit_type.as_deref().filter(|u| !u.trim().is_empty()),
        ) else {
            return Ok(String::new());
        };

        let measure_milli = parse_scaled(value, 3)?;
        let per_unit = product.price.per_unit(measure_milli).ok_or_else(|| {
            CoreError::PriceFormat(format!("unit measure '{}' must be positive", value))
        })?;

        let formatted = self.store.format_price(per_unit)?;
        let (amount, currency) = formatted
            .split_once(' ')
            .ok_or_else(|| CoreError::PriceFormat(formatted.clone()))?;

        Ok(serde_json::json!({
            "value": amount,
            "currency": currency,
            "unit": unit.trim(),
        })
        .to_string())
    }

    fn apply_custom_attributes(&self, product: &CatalogProduct, record: &mut FeedRecord) {
        for (remote, local) in &self.store.custom_attributes {
            if PROTECTED_FIELDS.contains(&remote.as_str()) {
                continue;
            }
            // A mapping whose local attribute is absent is skipped silently.
            let Some(raw) = local_attribute(product, local) else {
                continue;
            };
            let value = clean_text(&raw);
            if !value.is_empty() {
                record.apply_override(remote, value);
            }
        }
    }
}

fn local_attribute(product: &CatalogProduct, code: &str) -> Option<String> {
    match code {
        "name" => Some(product.name.clone()),
        "sku" => Some(product.sku.clone()),
        "description" => product.description.clone(),
        "brand" => product.brand.clone(),
        _ => product.attributes.get(code).cloned(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
