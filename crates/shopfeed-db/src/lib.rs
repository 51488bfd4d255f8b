//! # shopfeed-db: Database Layer for Shopfeed
//!
//! SQLite storage for the catalog change queue plus read access to the host
//! catalog mirror (products, links, stock, discount rules).
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Shopfeed Data Flow                               │
//! │                                                                         │
//! │  ChangeRecorder hook / FeedJobs tick (shopfeed-sync)                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   shopfeed-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────────┐  ┌─────────────┐ │   │
//! │  │   │   Database    │    │    Repositories    │  │ Migrations  │ │   │
//! │  │   │   (pool.rs)   │    │                    │  │ (embedded)  │ │   │
//! │  │   │               │    │ ChangeQueueRepo    │  │             │ │   │
//! │  │   │ SqlitePool    │◄───│ ProductRepo        │  │ 001_initial │ │   │
//! │  │   │ WAL mode      │    │ StockRepo          │  │ _schema.sql │ │   │
//! │  │   │               │    │ RuleRepo           │  │             │ │   │
//! │  │   └───────────────┘    └────────────────────┘  └─────────────┘ │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file (path from FeedConfig [database])                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Change queue and catalog repositories
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shopfeed_core::ChangeMethod;
//! use shopfeed_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("shopfeed.db")).await?;
//!
//! db.change_queue().enqueue(&[10, 11, 12], ChangeMethod::Update).await?;
//! let batch = db.change_queue().reserve_batch(ChangeMethod::Update).await?;
//! let entries = db.change_queue().entries_for_batch(&batch.token).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::change_queue::{BatchReservation, ChangeQueueRepository};
pub use repository::product::{ProductPage, ProductRepository};
pub use repository::rule::RuleRepository;
pub use repository::stock::{SalableIndex, StockRepository};
