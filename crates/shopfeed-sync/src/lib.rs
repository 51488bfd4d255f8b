//! # shopfeed-sync: Remote Catalog Sync
//!
//! Turns queued catalog changes and the full catalog into remote catalog
//! mutations, and carries the configuration and scheduling around that.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  host events ──► ChangeRecorder ──► catalog_change_queue                │
//! │                                          │                              │
//! │  FeedJobs (ticks) ──► FeedUploader ◄─────┘                              │
//! │                          │                                              │
//! │            ┌─────────────┼──────────────┐                               │
//! │            ▼             ▼              ▼                               │
//! │     AttributeAssembler  PromotionTranslator  feed_file (TSV)            │
//! │            │             │              │                               │
//! │            └─────────────┴──────┬───────┘                               │
//! │                                 ▼                                       │
//! │                      CatalogSink (GraphClient)                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - `FeedConfig` (TOML + environment)
//! - [`error`] - Sync error types
//! - [`feed_file`] - Tab-delimited feed writer
//! - [`graph`] - HTTP sink with retry
//! - [`jobs`] - Scheduled ticks over all stores
//! - [`protocol`] - Batch envelopes and API responses
//! - [`recorder`] - Host event hooks
//! - [`sink`] - `CatalogSink` trait
//! - [`uploader`] - Sync cycles and their reports
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shopfeed_sync::{FeedConfig, FeedJobs, FeedUploader, GraphClient};
//! use shopfeed_db::{Database, DbConfig};
//! use std::sync::Arc;
//!
//! let config = Arc::new(FeedConfig::load(None)?);
//! let db = Database::new(DbConfig::new(&config.database.path)).await?;
//! let sink = Arc::new(GraphClient::new(&config.graph)?);
//!
//! let jobs = FeedJobs::new(FeedUploader::new(db, sink, config));
//! for report in jobs.incremental_tick().await {
//!     println!("{}: {:?}", report.store_id, report.state);
//! }
//! ```

pub mod config;
pub mod error;
pub mod feed_file;
pub mod graph;
pub mod jobs;
pub mod protocol;
pub mod recorder;
pub mod sink;
pub mod uploader;

pub use config::{FeedConfig, InventorySource, StoreSettings, UploadMethod};
pub use error::{SyncError, SyncResult};
pub use graph::GraphClient;
pub use jobs::FeedJobs;
pub use protocol::{BatchRequest, FeedKind, FeedTarget};
pub use recorder::ChangeRecorder;
pub use sink::CatalogSink;
pub use uploader::{CycleKind, CycleReport, FeedUploader, IncrementalOutcome, UploadState};
