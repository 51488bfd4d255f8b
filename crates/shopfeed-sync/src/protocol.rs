//! # Catalog Batch Protocol
//!
//! Wire types for the remote catalog's batch and feed endpoints.
//!
//! ## Batch Envelope
//! ```text
//! POST /{version}/{catalog_id}/items_batch
//! {
//!   "item_type": "PRODUCT_ITEM",
//!   "requests": [
//!     { "method": "UPDATE", "data": { "id": "TEE-1", "price": "9.99 USD", ... } },
//!     { "method": "DELETE", "data": { "id": "MUG-2" } }
//!   ]
//! }
//! ```
//!
//! The response carries one handle per accepted call and, when items fail
//! validation, a `validation_status` list keyed by the item id.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};
use shopfeed_core::feed::FeedRecord;
use shopfeed_core::ChangeMethod;

use crate::error::SyncResult;

/// Item type sent with every product batch.
pub const PRODUCT_ITEM_TYPE: &str = "PRODUCT_ITEM";

// =============================================================================
// Requests
// =============================================================================

/// One `{method, data}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRequest {
    #[serde(serialize_with = "serialize_method")]
    pub method: ChangeMethod,
    pub data: Value,
}

fn serialize_method<S: Serializer>(method: &ChangeMethod, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(method.envelope_name())
}

impl BatchRequest {
    /// Wraps a built record for a create or update.
    pub fn upsert(method: ChangeMethod, record: &FeedRecord) -> SyncResult<Self> {
        Ok(BatchRequest {
            method,
            data: serde_json::to_value(record)?,
        })
    }

    /// A delete only needs the content id.
    pub fn delete(content_id: impl Into<String>) -> Self {
        BatchRequest {
            method: ChangeMethod::Delete,
            data: json!({ "id": content_id.into() }),
        }
    }

    /// Returns the content id carried in `data`.
    pub fn content_id(&self) -> Option<&str> {
        self.data.get("id").and_then(Value::as_str)
    }
}

/// Body of an `items_batch` call.
#[derive(Debug, Clone, Serialize)]
pub struct ItemsBatch<'a> {
    pub item_type: &'static str,
    pub requests: &'a [BatchRequest],
}

impl<'a> ItemsBatch<'a> {
    pub fn products(requests: &'a [BatchRequest]) -> Self {
        ItemsBatch {
            item_type: PRODUCT_ITEM_TYPE,
            requests,
        }
    }
}

/// What a feed file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Products,
    Offers,
}

impl FeedKind {
    /// Value of the `feed_type` parameter when creating the feed.
    pub const fn feed_type(&self) -> &'static str {
        match self {
            FeedKind::Products => "PRODUCTS",
            FeedKind::Offers => "OFFER",
        }
    }
}

/// The remote feed an upload goes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedTarget {
    pub kind: FeedKind,
    /// Feed name, used to find an existing feed when `feed_id` is unset.
    pub name: String,
    /// Pinned feed id from the store config.
    pub feed_id: Option<String>,
}

// =============================================================================
// Responses
// =============================================================================

/// Response of an `items_batch` call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemsBatchResponse {
    #[serde(default)]
    pub handles: Vec<String>,
    #[serde(default)]
    pub validation_status: Vec<ValidationStatus>,
}

impl ItemsBatchResponse {
    /// Items the remote side refused, with their first error message.
    pub fn rejected_items(&self) -> Vec<(&str, &str)> {
        self.validation_status
            .iter()
            .filter_map(|s| {
                s.errors
                    .first()
                    .map(|e| (s.retailer_id.as_str(), e.message.as_str()))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ValidationStatus {
    #[serde(default)]
    pub retailer_id: String,
    #[serde(default)]
    pub errors: Vec<ValidationMessage>,
    #[serde(default)]
    pub warnings: Vec<ValidationMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ValidationMessage {
    #[serde(default)]
    pub message: String,
}

/// Response carrying a created object id (feeds, upload sessions).
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedObject {
    pub id: String,
}

/// One page of `GET /{catalog_id}/product_feeds`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedList {
    #[serde(default)]
    pub data: Vec<FeedSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl FeedList {
    /// Id of the feed called `name`, if the catalog has one.
    pub fn find(&self, name: &str) -> Option<&str> {
        self.data.iter().find(|f| f.name == name).map(|f| f.id.as_str())
    }
}

/// Error envelope returned with non-2xx answers.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphErrorBody {
    pub error: GraphErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphErrorDetail {
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
}

impl GraphErrorBody {
    /// Extracts a readable message from a raw error body.
    pub fn message_from(body: &str) -> String {
        match serde_json::from_str::<GraphErrorBody>(body) {
            Ok(parsed) => match parsed.error.code {
                Some(code) => format!("{} (code {})", parsed.error.message, code),
                None => parsed.error.message,
            },
            Err(_) => body.chars().take(200).collect(),
        }
    }
}
