//! # Error Types
//!
//! Domain-specific error types for shopfeed-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  shopfeed-core errors (this file)                                      │
//! │  ├── CoreError        - Per-item build failures                        │
//! │  └── ValidationError  - Malformed input values                         │
//! │                                                                         │
//! │  shopfeed-db errors (separate crate)                                   │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  shopfeed-sync errors (separate crate)                                 │
//! │  └── SyncError        - Config, transport, feed file failures          │
//! │                                                                         │
//! │  Flow: CoreError → logged, item skipped → batch continues              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A `CoreError` never aborts a batch. The uploader logs it against the
//! product or rule that produced it and moves on.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Errors raised while building a single feed record or offer.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The product has no usable content id under the configured mode.
    ///
    /// ## When This Occurs
    /// - Identifier mode is `sku` and the SKU is empty
    /// - Identifier mode is `entity_id` and the id is not positive
    #[error("Product {product_id} has no valid {mode} identifier")]
    MissingIdentifier { product_id: i64, mode: String },

    /// The discount rule uses a feature the remote offer model cannot express.
    #[error("Rule {rule_id} is not supported: {reason}")]
    UnsupportedPromotion { rule_id: i64, reason: String },

    /// The discount rule carries conditions other than a single minimum subtotal.
    #[error("Rule {rule_id} has unsupported conditions: {reason}")]
    UnsupportedCondition { rule_id: i64, reason: String },

    /// A price could not be converted or formatted.
    #[error("Cannot format price: {0}")]
    PriceFormat(String),

    /// Salable quantity lookup failed for a SKU.
    #[error("Stock lookup failed for {sku} in stock {stock_id}: {reason}")]
    StockLookup {
        sku: String,
        stock_id: i64,
        reason: String,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates an UnsupportedPromotion error.
    pub fn unsupported(rule_id: i64, reason: impl Into<String>) -> Self {
        CoreError::UnsupportedPromotion {
            rule_id,
            reason: reason.into(),
        }
    }

    /// Creates an UnsupportedCondition error.
    pub fn unsupported_condition(rule_id: i64, reason: impl Into<String>) -> Self {
        CoreError::UnsupportedCondition {
            rule_id,
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Invalid format (e.g., bad currency code, bad decimal).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

impl ValidationError {
    /// Creates an InvalidFormat error.
    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::MissingIdentifier {
            product_id: 42,
            mode: "sku".to_string(),
        };
        assert_eq!(err.to_string(), "Product 42 has no valid sku identifier");

        let err = CoreError::unsupported(7, "auto-generated coupons");
        assert_eq!(
            err.to_string(),
            "Rule 7 is not supported: auto-generated coupons"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::invalid_format("currency", "expected 3 letters");
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
