//! # Sync Error Types
//!
//! Error types for feed building and remote submission.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Payload             │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Transport      │  │  SerializationFailed    │ │
//! │  │  SyncDisabled   │  │  Timeout        │  │  FeedFile               │ │
//! │  │  MissingToken   │  │  RemoteRejected │  │  Build                  │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Configuration errors short-circuit before the queue is touched.       │
//! │  Transport errors release the reserved batch for the next cycle.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use shopfeed_core::CoreError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid feed configuration.
    #[error("Invalid feed configuration: {0}")]
    InvalidConfig(String),

    /// Invalid Graph API URL.
    #[error("Invalid Graph URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    /// Store has catalog sync switched off.
    #[error("Catalog sync is disabled for store {store_id}")]
    SyncDisabled { store_id: String },

    /// No access token configured.
    #[error("No Graph access token configured")]
    MissingAccessToken,

    /// Store id not present in the configuration.
    #[error("Unknown store: {0}")]
    UnknownStore(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Request could not be sent or the response could not be read.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request timed out.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Remote side answered with an error.
    #[error("Remote rejected request ({status}): {message}")]
    RemoteRejected { status: u16, message: String },

    // =========================================================================
    // Payload Errors
    // =========================================================================
    /// Failed to serialize or parse a payload.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Failed to write a feed file.
    #[error("Feed file error: {0}")]
    FeedFile(String),

    /// A record or offer could not be built.
    #[error(transparent)]
    Build(#[from] CoreError),

    // =========================================================================
    // Database Errors
    // =========================================================================
    /// Database query failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<shopfeed_db::DbError> for SyncError {
    fn from(err: shopfeed_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl From<csv::Error> for SyncError {
    fn from(err: csv::Error) -> Self {
        SyncError::FeedFile(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            SyncError::RemoteRejected {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            SyncError::SerializationFailed(err.to_string())
        } else {
            SyncError::Transport(err.to_string())
        }
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if a retry of the same request may succeed.
    ///
    /// 5xx and 429 answers count as transient; other 4xx answers do not.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(_) | SyncError::Timeout(_) => true,
            SyncError::RemoteRejected { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns true if the error came from the remote call itself.
    ///
    /// The uploader releases the reserved batch for these.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_) | SyncError::Timeout(_) | SyncError::RemoteRejected { .. }
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
                | SyncError::SyncDisabled { .. }
                | SyncError::MissingAccessToken
                | SyncError::UnknownStore(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Transport("connection reset".into()).is_retryable());
        assert!(SyncError::Timeout("30s".into()).is_retryable());
        assert!(SyncError::RemoteRejected { status: 503, message: "busy".into() }.is_retryable());
        assert!(SyncError::RemoteRejected { status: 429, message: "slow down".into() }.is_retryable());

        assert!(!SyncError::RemoteRejected { status: 400, message: "bad".into() }.is_retryable());
        assert!(!SyncError::MissingAccessToken.is_retryable());
        assert!(!SyncError::FeedFile("disk full".into()).is_retryable());
    }

    #[test]
    fn test_transport_vs_config() {
        let rejected = SyncError::RemoteRejected { status: 400, message: "bad".into() };
        assert!(rejected.is_transport_error());
        assert!(!rejected.is_config_error());

        let disabled = SyncError::SyncDisabled { store_id: "default".into() };
        assert!(disabled.is_config_error());
        assert!(!disabled.is_transport_error());
    }

    #[test]
    fn test_build_error_is_transparent() {
        let err: SyncError = CoreError::PriceFormat("no rate".into()).into();
        assert!(err.to_string().contains("no rate"));
        assert!(!err.is_transport_error());
    }
}
