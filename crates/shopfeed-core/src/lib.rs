//! # shopfeed-core: Pure Feed Logic
//!
//! Turns catalog rows and discount rules into the records the remote catalog
//! accepts. Nothing in here touches a database, a socket or a file.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Shopfeed Data Flow                               │
//! │                                                                         │
//! │  product save/delete/reindex                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  shopfeed-db: ChangeQueue.enqueue ──► reserve_batch (cron)              │
//! │                                            │                            │
//! │  ┌─────────────────────────────────────────▼───────────────────────┐   │
//! │  │               ★ shopfeed-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌──────────┐ │   │
//! │  │   │ inventory  │  │    feed    │  │ promotion  │  │ composite│ │   │
//! │  │   │ Single/    │─►│ Attribute  │  │ Promotion  │  │ parent → │ │   │
//! │  │   │ MultiSource│  │ Assembler  │  │ Translator │  │ children │ │   │
//! │  │   └────────────┘  └────────────┘  └────────────┘  └──────────┘ │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                            │                            │
//! │  shopfeed-sync: FeedUploader ──► remote sink ──► release_batch          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Queue entries, catalog products, store context
//! - [`money`] - Integer money, currency codes, exchange rates
//! - [`inventory`] - Availability and sellable quantity strategies
//! - [`sanitize`] - Text and URL cleanup for outbound fields
//! - [`feed`] - Feed record assembly
//! - [`promotion`] - Discount rule to offer translation
//! - [`composite`] - Composite parent exclusion / child expansion
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use shopfeed_core::money::{CurrencyCode, Money};
//!
//! let usd = CurrencyCode::parse("USD").unwrap();
//! let price = Money::from_cents(999);
//! assert_eq!(price.to_feed_string(&usd), "9.99 USD");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod composite;
pub mod error;
pub mod feed;
pub mod inventory;
pub mod money;
pub mod promotion;
pub mod sanitize;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::{CurrencyCode, ExchangeRate, Money};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum number of queue rows a single reservation may claim.
///
/// ## Business Reason
/// Matches the largest request list the remote batch endpoint accepts in
/// one cycle, and bounds the memory a single cycle holds.
pub const DEFAULT_BATCH_PAGE_SIZE: u32 = 5000;

/// Age after which a reserved-but-never-released queue row is discarded.
pub const STALE_BATCH_DAYS: i64 = 7;
