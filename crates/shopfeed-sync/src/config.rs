//! # Feed Configuration
//!
//! Configuration management for the feed worker.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     SHOPFEED_ACCESS_TOKEN=EAAB...                                      │
//! │     SHOPFEED_GRAPH_URL=https://graph.facebook.com                      │
//! │     SHOPFEED_DATABASE=/var/lib/shopfeed/shopfeed.db                    │
//! │     SHOPFEED_FEED_DIR=/var/lib/shopfeed/feeds                          │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/shopfeed/feed.toml (Linux)                               │
//! │     ~/Library/Application Support/com.shopfeed.feed/feed.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [graph]
//! api_version = "v21.0"
//! request_chunk_size = 1000
//!
//! [queue]
//! page_size = 5000
//! prune_after_days = 7
//!
//! [[stores]]
//! id = "default"
//! name = "Northwind Outfitters"
//! catalog_id = "1234567890"
//! currency = "EUR"
//! base_currency = "USD"
//! exchange_rate = "0.92"
//! upload_method = "direct_batch"
//! inventory_source = "multi_source"
//! stock_id = 2
//!
//! [stores.custom_attributes]
//! color = "color"
//! ```

use serde::{Deserialize, Serialize};
use shopfeed_core::{CurrencyCode, ExchangeRate, IdentifierMode, StoreContext};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Per-Store Choices
// =============================================================================

/// How a full catalog sync reaches the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadMethod {
    /// Write a TSV feed file and upload it.
    #[default]
    FeedFile,

    /// Submit `UPDATE` envelopes through the batch endpoint.
    DirectBatch,
}

impl std::fmt::Display for UploadMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadMethod::FeedFile => write!(f, "feed_file"),
            UploadMethod::DirectBatch => write!(f, "direct_batch"),
        }
    }
}

impl std::str::FromStr for UploadMethod {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "feed_file" | "feed" | "file" => Ok(UploadMethod::FeedFile),
            "direct_batch" | "batch" | "api" => Ok(UploadMethod::DirectBatch),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown upload method: '{}'. Valid options: feed_file, direct_batch",
                other
            ))),
        }
    }
}

/// Where stock quantities come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventorySource {
    /// One stock row per product.
    #[default]
    SingleSource,

    /// Salable quantities per stock channel; needs `stock_id`.
    MultiSource,
}

impl std::fmt::Display for InventorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InventorySource::SingleSource => write!(f, "single_source"),
            InventorySource::MultiSource => write!(f, "multi_source"),
        }
    }
}

// =============================================================================
// Store Settings
// =============================================================================

/// Feed settings for one store scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Store identifier, unique across the config.
    pub id: String,

    /// Display name; used as the brand fallback.
    #[serde(default)]
    pub name: String,

    /// Master switch for catalog sync.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Process the change queue between full syncs.
    #[serde(default = "default_true")]
    pub incremental_updates: bool,

    /// Units held back from the advertised quantity.
    #[serde(default)]
    pub out_of_stock_threshold: i64,

    #[serde(default)]
    pub identifier_mode: IdentifierMode,

    #[serde(default)]
    pub upload_method: UploadMethod,

    #[serde(default)]
    pub inventory_source: InventorySource,

    /// Stock channel for multi-source inventory.
    #[serde(default)]
    pub stock_id: Option<i64>,

    /// Remote catalog receiving this store's products.
    #[serde(default)]
    pub catalog_id: String,

    /// Store currency (ISO 4217).
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Currency catalog prices are kept in. Defaults to `currency`.
    #[serde(default)]
    pub base_currency: Option<String>,

    /// Base to store currency rate, as decimal text.
    #[serde(default = "default_exchange_rate")]
    pub exchange_rate: String,

    /// `remote attribute → local attribute` overrides.
    #[serde(default)]
    pub custom_attributes: BTreeMap<String, String>,

    /// Upload a promotions feed alongside the full sync.
    #[serde(default)]
    pub promotions_enabled: bool,

    /// Derive offer ids from the rule id instead of generating random ones.
    #[serde(default)]
    pub stable_offer_ids: bool,

    /// Remote product feed to upload into. Looked up by name, or created,
    /// when unset.
    #[serde(default)]
    pub products_feed_id: Option<String>,

    /// Remote offer feed to upload into; same fallback as `products_feed_id`.
    #[serde(default)]
    pub promotions_feed_id: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_exchange_rate() -> String {
    "1".to_string()
}

impl StoreSettings {
    /// Creates settings for a store with every flag at its default.
    pub fn new(id: impl Into<String>, catalog_id: impl Into<String>) -> Self {
        StoreSettings {
            id: id.into(),
            name: String::new(),
            enabled: true,
            incremental_updates: true,
            out_of_stock_threshold: 0,
            identifier_mode: IdentifierMode::default(),
            upload_method: UploadMethod::default(),
            inventory_source: InventorySource::default(),
            stock_id: None,
            catalog_id: catalog_id.into(),
            currency: default_currency(),
            base_currency: None,
            exchange_rate: default_exchange_rate(),
            custom_attributes: BTreeMap::new(),
            promotions_enabled: false,
            stable_offer_ids: false,
            products_feed_id: None,
            promotions_feed_id: None,
        }
    }

    /// Resolves the context the record and offer builders need.
    ///
    /// The currency code is carried as text; a malformed code blanks prices
    /// rather than failing the store.
    pub fn to_store_context(&self) -> SyncResult<StoreContext> {
        let exchange_rate = if self.has_currency_conversion() {
            ExchangeRate::parse(&self.exchange_rate).map_err(|e| {
                SyncError::InvalidConfig(format!("store {}: {}", self.id, e))
            })?
        } else {
            ExchangeRate::identity()
        };

        let mut context = StoreContext::new(self.id.clone(), self.currency.clone());
        context.store_name = self.name.clone();
        context.exchange_rate = exchange_rate;
        context.identifier_mode = self.identifier_mode;
        context.out_of_stock_threshold = self.out_of_stock_threshold;
        context.custom_attributes = self.custom_attributes.clone();
        Ok(context)
    }

    /// Returns true if catalog prices need converting to the store currency.
    pub fn has_currency_conversion(&self) -> bool {
        match &self.base_currency {
            Some(base) => !base.trim().eq_ignore_ascii_case(self.currency.trim()),
            None => false,
        }
    }

    fn validate(&self) -> SyncResult<()> {
        if self.id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("store id must not be empty".into()));
        }

        for code in std::iter::once(&self.currency).chain(self.base_currency.iter()) {
            CurrencyCode::parse(code)
                .map_err(|e| SyncError::InvalidConfig(format!("store {}: {}", self.id, e)))?;
        }

        if self.has_currency_conversion() {
            let rate = ExchangeRate::parse(&self.exchange_rate)
                .map_err(|e| SyncError::InvalidConfig(format!("store {}: {}", self.id, e)))?;
            if !rate.is_usable() {
                return Err(SyncError::InvalidConfig(format!(
                    "store {}: exchange_rate must be greater than 0",
                    self.id
                )));
            }
        }

        if self.inventory_source == InventorySource::MultiSource && self.stock_id.is_none() {
            return Err(SyncError::InvalidConfig(format!(
                "store {}: multi_source inventory requires stock_id",
                self.id
            )));
        }

        if self.out_of_stock_threshold < 0 {
            return Err(SyncError::InvalidConfig(format!(
                "store {}: out_of_stock_threshold must not be negative",
                self.id
            )));
        }

        Ok(())
    }
}

// =============================================================================
// Graph Settings
// =============================================================================

/// Remote catalog API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSettings {
    #[serde(default = "default_graph_url")]
    pub base_url: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Usually supplied through `SHOPFEED_ACCESS_TOKEN`.
    #[serde(default)]
    pub access_token: Option<String>,

    /// Per-request timeout (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Envelopes per `items_batch` call.
    #[serde(default = "default_request_chunk_size")]
    pub request_chunk_size: usize,

    /// First retry delay (milliseconds) for transient failures.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Give up retrying after this long (seconds).
    #[serde(default = "default_max_elapsed")]
    pub max_elapsed_secs: u64,
}

fn default_graph_url() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_api_version() -> String {
    "v21.0".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_request_chunk_size() -> usize {
    1000
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_elapsed() -> u64 {
    60
}

impl Default for GraphSettings {
    fn default() -> Self {
        GraphSettings {
            base_url: default_graph_url(),
            api_version: default_api_version(),
            access_token: None,
            timeout_secs: default_timeout(),
            request_chunk_size: default_request_chunk_size(),
            initial_backoff_ms: default_initial_backoff(),
            max_elapsed_secs: default_max_elapsed(),
        }
    }
}

impl GraphSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_elapsed(&self) -> Duration {
        Duration::from_secs(self.max_elapsed_secs)
    }

    /// Returns the configured token, treating an empty string as missing.
    pub fn token(&self) -> Option<&str> {
        self.access_token.as_deref().filter(|t| !t.trim().is_empty())
    }
}

// =============================================================================
// Queue, Schedule, Storage
// =============================================================================

/// Change queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Maximum entries stamped by one reservation.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Finished batches older than this are pruned.
    #[serde(default = "default_prune_after_days")]
    pub prune_after_days: i64,
}

fn default_page_size() -> u32 {
    shopfeed_core::DEFAULT_BATCH_PAGE_SIZE
}

fn default_prune_after_days() -> i64 {
    shopfeed_core::STALE_BATCH_DAYS
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            page_size: default_page_size(),
            prune_after_days: default_prune_after_days(),
        }
    }
}

/// Job intervals for the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    #[serde(default = "default_incremental_interval")]
    pub incremental_interval_secs: u64,

    #[serde(default = "default_full_interval")]
    pub full_interval_secs: u64,

    #[serde(default = "default_prune_interval")]
    pub prune_interval_secs: u64,
}

fn default_incremental_interval() -> u64 {
    300
}

fn default_full_interval() -> u64 {
    86_400
}

fn default_prune_interval() -> u64 {
    3_600
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        ScheduleSettings {
            incremental_interval_secs: default_incremental_interval(),
            full_interval_secs: default_full_interval(),
            prune_interval_secs: default_prune_interval(),
        }
    }
}

/// SQLite location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("shopfeed.db")
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
        }
    }
}

/// Where generated feed files go.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    #[serde(default = "default_feed_dir")]
    pub feed_dir: PathBuf,
}

fn default_feed_dir() -> PathBuf {
    PathBuf::from("feeds")
}

impl Default for OutputSettings {
    fn default() -> Self {
        OutputSettings {
            feed_dir: default_feed_dir(),
        }
    }
}

// =============================================================================
// Main Feed Configuration
// =============================================================================

/// Complete feed worker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub graph: GraphSettings,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub schedule: ScheduleSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub output: OutputSettings,

    #[serde(default)]
    pub stores: Vec<StoreSettings>,
}

impl FeedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (feed.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading feed config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Feed config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        url::Url::parse(&self.graph.base_url)?;

        if self.graph.request_chunk_size == 0 {
            return Err(SyncError::InvalidConfig(
                "request_chunk_size must be greater than 0".into(),
            ));
        }

        if self.queue.page_size == 0 {
            return Err(SyncError::InvalidConfig(
                "page_size must be greater than 0".into(),
            ));
        }

        if self.queue.prune_after_days <= 0 {
            return Err(SyncError::InvalidConfig(
                "prune_after_days must be greater than 0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for store in &self.stores {
            if !seen.insert(store.id.as_str()) {
                return Err(SyncError::InvalidConfig(format!(
                    "duplicate store id: {}",
                    store.id
                )));
            }
            store.validate()?;
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("SHOPFEED_ACCESS_TOKEN") {
            debug!("Overriding access token from environment");
            self.graph.access_token = Some(token);
        }

        if let Ok(url) = std::env::var("SHOPFEED_GRAPH_URL") {
            debug!(url = %url, "Overriding Graph URL from environment");
            self.graph.base_url = url;
        }

        if let Ok(path) = std::env::var("SHOPFEED_DATABASE") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(dir) = std::env::var("SHOPFEED_FEED_DIR") {
            self.output.feed_dir = PathBuf::from(dir);
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "shopfeed", "feed")
            .map(|dirs| dirs.config_dir().join("feed.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Looks up a store by id.
    pub fn store(&self, store_id: &str) -> SyncResult<&StoreSettings> {
        self.stores
            .iter()
            .find(|s| s.id == store_id)
            .ok_or_else(|| SyncError::UnknownStore(store_id.to_string()))
    }

    /// Checks that a store may sync at all.
    ///
    /// Runs before any queue access so a misconfigured store never
    /// reserves or releases entries.
    pub fn ensure_ready(&self, store: &StoreSettings) -> SyncResult<()> {
        if !store.enabled {
            return Err(SyncError::SyncDisabled {
                store_id: store.id.clone(),
            });
        }
        if self.graph.token().is_none() {
            return Err(SyncError::MissingAccessToken);
        }
        if store.catalog_id.trim().is_empty() {
            return Err(SyncError::InvalidConfig(format!(
                "store {} has no catalog_id",
                store.id
            )));
        }
        Ok(())
    }

    /// Returns the prune age as a duration.
    pub fn prune_after(&self) -> chrono::Duration {
        chrono::Duration::days(self.queue.prune_after_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_store() -> FeedConfig {
        let mut config = FeedConfig::default();
        config.graph.access_token = Some("token".into());
        config.stores.push(StoreSettings::new("default", "cat-1"));
        config
    }

    #[test]
    fn test_upload_method_parsing() {
        assert_eq!("feed_file".parse::<UploadMethod>().unwrap(), UploadMethod::FeedFile);
        assert_eq!("batch".parse::<UploadMethod>().unwrap(), UploadMethod::DirectBatch);
        assert!("ftp".parse::<UploadMethod>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = FeedConfig::default();
        assert_eq!(config.queue.page_size, 5000);
        assert_eq!(config.queue.prune_after_days, 7);
        assert_eq!(config.graph.base_url, "https://graph.facebook.com");
        assert!(config.stores.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = config_with_store();
        assert!(config.validate().is_ok());

        config.queue.page_size = 0;
        assert!(config.validate().is_err());
        config.queue.page_size = 10;

        config.graph.base_url = "not a url".into();
        assert!(config.validate().unwrap_err().is_config_error());
        config.graph.base_url = "http://localhost:9000".into();

        config.stores.push(StoreSettings::new("default", "cat-2"));
        assert!(config.validate().is_err());
        config.stores.pop();

        config.stores[0].currency = "EURO".into();
        assert!(config.validate().is_err());
        config.stores[0].currency = "eur".into();
        assert!(config.validate().is_ok());

        config.stores[0].inventory_source = InventorySource::MultiSource;
        assert!(config.validate().is_err());
        config.stores[0].stock_id = Some(2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ensure_ready() {
        let mut config = config_with_store();
        let store = config.stores[0].clone();
        assert!(config.ensure_ready(&store).is_ok());

        let mut disabled = store.clone();
        disabled.enabled = false;
        assert!(matches!(
            config.ensure_ready(&disabled),
            Err(SyncError::SyncDisabled { .. })
        ));

        config.graph.access_token = Some("  ".into());
        assert!(matches!(
            config.ensure_ready(&store),
            Err(SyncError::MissingAccessToken)
        ));
    }

    #[test]
    fn test_store_context_conversion() {
        let mut store = StoreSettings::new("eu", "cat-eu");
        store.name = "Northwind EU".into();
        store.currency = "EUR".into();
        store.base_currency = Some("USD".into());
        store.exchange_rate = "0.5".into();
        store.out_of_stock_threshold = 2;

        let context = store.to_store_context().unwrap();
        assert_eq!(context.store_name, "Northwind EU");
        assert_eq!(context.exchange_rate.micros(), 500_000);
        assert_eq!(context.out_of_stock_threshold, 2);

        // Same currency ignores the configured rate
        store.base_currency = Some("eur".into());
        store.exchange_rate = "garbage".into();
        let context = store.to_store_context().unwrap();
        assert_eq!(context.exchange_rate, ExchangeRate::identity());
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.toml");

        std::fs::write(
            &path,
            r#"
[graph]
api_version = "v20.0"

[queue]
page_size = 100

[[stores]]
id = "default"
catalog_id = "42"
upload_method = "direct_batch"
inventory_source = "multi_source"
stock_id = 3

[stores.custom_attributes]
color = "color"
"#,
        )
        .unwrap();

        let config = FeedConfig::load(Some(path.clone())).unwrap();
        assert_eq!(config.graph.api_version, "v20.0");
        assert_eq!(config.queue.page_size, 100);
        let store = config.store("default").unwrap();
        assert_eq!(store.upload_method, UploadMethod::DirectBatch);
        assert_eq!(store.stock_id, Some(3));
        assert!(store.enabled);
        assert_eq!(store.custom_attributes.get("color").map(String::as_str), Some("color"));
        assert!(config.store("missing").is_err());

        let saved = dir.path().join("nested").join("saved.toml");
        config.save(Some(saved.clone())).unwrap();
        let reloaded = FeedConfig::load(Some(saved)).unwrap();
        assert_eq!(reloaded.stores.len(), 1);
        assert_eq!(reloaded.queue.page_size, 100);
    }
}
