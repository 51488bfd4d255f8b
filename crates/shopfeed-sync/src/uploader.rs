//! # Feed Uploader
//!
//! Runs sync cycles: incremental across all stores, full and promotions
//! per store.
//!
//! ## Cycle State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   IDLE ──► BUILDING ──► SUBMITTING ──┬──► DONE                          │
//! │                                      └──► FAILED                        │
//! │                                                                         │
//! │  Incremental (per method: delete, create, update)                      │
//! │  ─────────────────────────────────────────────────                     │
//! │  1. reserve_batch(method) → token                                      │
//! │  2. load entries and products once (bad rows: warn + skip)             │
//! │  3. per store: load stock, build envelopes, submit in request chunks   │
//! │     (per-item build errors: warn + skip)                               │
//! │  4. release_batch(token, true)   when every store accepted it          │
//! │     release_batch(token, false)  on any transport error → FAILED       │
//! │                                                                         │
//! │  Full                                                                  │
//! │  ────                                                                  │
//! │  Page through the catalog (composite parents excluded), then either    │
//! │  write a TSV and upload it, or submit UPDATE envelopes directly.       │
//! │                                                                         │
//! │  Configuration errors (sync disabled, no token) return before the      │
//! │  queue is touched.                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde::Serialize;
use shopfeed_core::feed::{content_id, AttributeAssembler, FeedRecord};
use shopfeed_core::inventory::{
    InventoryStrategy, MultiSourceInventory, ProductStock, SingleSourceInventory,
};
use shopfeed_core::promotion::{OfferIdPolicy, PromotionTranslator};
use shopfeed_core::{CatalogProduct, ChangeEntry, ChangeMethod, StoreContext};
use shopfeed_db::{Database, SalableIndex};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{FeedConfig, InventorySource, StoreSettings, UploadMethod};
use crate::error::{SyncError, SyncResult};
use crate::feed_file::{feed_path, write_promotions, FeedFileWriter};
use crate::protocol::{BatchRequest, FeedKind, FeedTarget};
use crate::sink::CatalogSink;

// =============================================================================
// Cycle Report
// =============================================================================

/// Where a store cycle is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    #[default]
    Idle,
    Building,
    Submitting,
    Done,
    Failed,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Done | UploadState::Failed)
    }
}

/// Which kind of cycle produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    Incremental,
    Full,
    Promotions,
}

/// Outcome of one store cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub store_id: String,
    pub kind: CycleKind,
    pub state: UploadState,
    /// Records or offers built successfully.
    pub built: usize,
    /// Items dropped by per-item build errors or missing catalog rows.
    pub skipped: usize,
    /// Items accepted by the sink.
    pub submitted: usize,
    /// Queue batches reserved during the cycle.
    pub batch_tokens: Vec<String>,
    /// Transport failure that ended the cycle.
    pub error: Option<String>,
}

/// Outcome of one incremental cycle across all stores.
#[derive(Debug, Default)]
pub struct IncrementalOutcome {
    /// One report per ready store, in configuration order.
    pub reports: Vec<CycleReport>,
    /// Stores skipped by readiness checks, with the reason.
    pub rejected: Vec<(String, SyncError)>,
}

impl CycleReport {
    fn new(store_id: &str, kind: CycleKind) -> Self {
        CycleReport {
            store_id: store_id.to_string(),
            kind,
            state: UploadState::Idle,
            built: 0,
            skipped: 0,
            submitted: 0,
            batch_tokens: Vec::new(),
            error: None,
        }
    }

    fn transition(&mut self, next: UploadState) {
        debug!(store_id = %self.store_id, from = ?self.state, to = ?next, "Cycle state");
        self.state = next;
    }

    fn fail(&mut self, err: &SyncError) {
        self.error = Some(err.to_string());
        self.transition(UploadState::Failed);
    }
}

// =============================================================================
// Inventory Binding
// =============================================================================

/// Stock data loaded for one page of products, shaped by the store's
/// inventory source.
enum LoadedInventory {
    Single(SingleSourceInventory),
    Multi { index: SalableIndex, threshold: i64 },
}

impl InventoryStrategy for LoadedInventory {
    fn init_for(&self, product: &CatalogProduct) -> ProductStock {
        match self {
            LoadedInventory::Single(single) => single.init_for(product),
            LoadedInventory::Multi { index, threshold } => {
                MultiSourceInventory::new(index, index.stock_id(), *threshold).init_for(product)
            }
        }
    }
}

/// A reserved queue batch with its catalog rows, shared by every store.
struct LoadedBatch {
    entries: Vec<ChangeEntry>,
    products: Vec<CatalogProduct>,
    /// Queued ids with no usable catalog row.
    missing: usize,
}

/// A store taking part in an incremental cycle.
struct Participant<'a> {
    store: &'a StoreSettings,
    context: StoreContext,
    /// Index of the store's report in the outcome.
    slot: usize,
}

/// Records built from one page, plus how many products were dropped.
struct BuiltPage {
    records: Vec<FeedRecord>,
    skipped: usize,
}

/// Builds feed records; per-item failures are logged and skipped.
fn build_records(
    context: &StoreContext,
    inventory: &LoadedInventory,
    products: &[CatalogProduct],
) -> BuiltPage {
    let assembler = AttributeAssembler::new(context, inventory);
    let mut records = Vec::with_capacity(products.len());
    let mut skipped = 0;

    for product in products {
        match assembler.build(product) {
            Ok(record) => {
                if record.price.is_empty() {
                    warn!(
                        store_id = %context.store_id,
                        product_id = product.entity_id,
                        "Price could not be formatted, sending without price"
                    );
                }
                records.push(record);
            }
            Err(e) => {
                warn!(
                    store_id = %context.store_id,
                    product_id = product.entity_id,
                    error = %e,
                    "Skipping product"
                );
                skipped += 1;
            }
        }
    }

    BuiltPage { records, skipped }
}

fn header_for(context: &StoreContext) -> Vec<String> {
    let none = SingleSourceInventory::default();
    AttributeAssembler::new(context, &none).header()
}

// =============================================================================
// Uploader
// =============================================================================

/// Drives sync cycles against a [`CatalogSink`].
#[derive(Clone)]
pub struct FeedUploader {
    db: Database,
    sink: Arc<dyn CatalogSink>,
    config: Arc<FeedConfig>,
}

impl FeedUploader {
    pub fn new(db: Database, sink: Arc<dyn CatalogSink>, config: Arc<FeedConfig>) -> Self {
        FeedUploader { db, sink, config }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Change queue repository with the configured page size.
    pub fn queue(&self) -> shopfeed_db::ChangeQueueRepository {
        self.db.change_queue().with_page_size(self.config.queue.page_size)
    }

    // =========================================================================
    // Incremental
    // =========================================================================

    /// Drains the change queue once for every configured store.
    ///
    /// Each method's batch is reserved and loaded once, then submitted to
    /// every ready store. The batch is consumed only when all of them
    /// accepted it; a transport failure on any store releases it and ends
    /// the cycle. Stores that fail their readiness checks are returned in
    /// `rejected` and never touch the queue. Database failures return `Err`.
    pub async fn run_incremental(&self) -> SyncResult<IncrementalOutcome> {
        let mut outcome = IncrementalOutcome::default();
        let mut active = Vec::new();

        for store in &self.config.stores {
            let context = match self
                .config
                .ensure_ready(store)
                .and_then(|()| store.to_store_context())
            {
                Ok(context) => context,
                Err(e) => {
                    outcome.rejected.push((store.id.clone(), e));
                    continue;
                }
            };

            let mut report = CycleReport::new(&store.id, CycleKind::Incremental);
            if !store.incremental_updates {
                debug!(store_id = %store.id, "Incremental updates disabled");
                report.transition(UploadState::Done);
            } else {
                active.push(Participant {
                    store,
                    context,
                    slot: outcome.reports.len(),
                });
            }
            outcome.reports.push(report);
        }

        if active.is_empty() {
            return Ok(outcome);
        }

        let queue = self.queue();
        for method in ChangeMethod::ALL {
            let reservation = queue.reserve_batch(method).await?;
            if reservation.is_empty() {
                continue;
            }
            let token = reservation.token;

            let batch = match self.load_batch(method, &token).await {
                Ok(batch) => batch,
                Err(e) => {
                    // Leave the entries for the next cycle
                    queue.release_batch(&token, false).await?;
                    return Err(e);
                }
            };

            let mut any_failed = false;
            for participant in &active {
                let store = participant.store;
                let report = &mut outcome.reports[participant.slot];
                report.batch_tokens.push(token.clone());
                report.transition(UploadState::Building);

                let requests = match self
                    .requests_for_store(store, &participant.context, method, &batch)
                    .await
                {
                    Ok((requests, skipped)) => {
                        report.skipped += skipped;
                        report.built += requests.len();
                        requests
                    }
                    Err(e) => {
                        queue.release_batch(&token, false).await?;
                        return Err(e);
                    }
                };

                report.transition(UploadState::Submitting);
                match self.submit_chunks(store, &requests).await {
                    Ok(()) => {
                        report.submitted += requests.len();
                        info!(
                            store_id = %store.id,
                            method = %method,
                            batch_id = %token,
                            count = requests.len(),
                            "Change batch synced"
                        );
                    }
                    Err(e) if e.is_transport_error() => {
                        warn!(
                            store_id = %store.id,
                            method = %method,
                            batch_id = %token,
                            error = %e,
                            "Batch submission failed"
                        );
                        report.fail(&e);
                        any_failed = true;
                    }
                    Err(e) => {
                        queue.release_batch(&token, false).await?;
                        return Err(e);
                    }
                }
            }

            if any_failed {
                queue.release_batch(&token, false).await?;
                break;
            }
            queue.release_batch(&token, true).await?;
        }

        for report in &mut outcome.reports {
            if !report.state.is_terminal() {
                report.transition(UploadState::Done);
            }
        }
        Ok(outcome)
    }

    /// Loads a reserved batch and the catalog rows it refers to.
    async fn load_batch(&self, method: ChangeMethod, token: &str) -> SyncResult<LoadedBatch> {
        let entries = self.queue().entries_for_batch(token).await?;
        if method == ChangeMethod::Delete {
            return Ok(LoadedBatch {
                entries,
                products: Vec::new(),
                missing: 0,
            });
        }

        let mut seen = HashSet::new();
        let ids: Vec<i64> = entries
            .iter()
            .map(|e| e.product_id)
            .filter(|id| seen.insert(*id))
            .collect();

        // Deleted or undecodable rows are simply absent here
        let products: Vec<CatalogProduct> = self
            .db
            .products()
            .get_by_ids(&ids)
            .await?
            .into_iter()
            .filter(|p| !p.type_id.is_composite())
            .collect();
        let missing = ids.len() - products.len();
        if missing > 0 {
            debug!(batch_id = token, missing, "Queued products no longer sellable");
        }

        Ok(LoadedBatch {
            entries,
            products,
            missing,
        })
    }

    /// Turns a loaded batch into envelopes for one store.
    async fn requests_for_store(
        &self,
        store: &StoreSettings,
        context: &StoreContext,
        method: ChangeMethod,
        batch: &LoadedBatch,
    ) -> SyncResult<(Vec<BatchRequest>, usize)> {
        if method == ChangeMethod::Delete {
            return Ok(delete_requests(context, &batch.entries));
        }

        let inventory = self.load_inventory(store, &batch.products).await?;
        let page = build_records(context, &inventory, &batch.products);

        let mut skipped = batch.missing + page.skipped;
        let mut requests = Vec::with_capacity(page.records.len());
        for record in &page.records {
            match BatchRequest::upsert(method, record) {
                Ok(request) => requests.push(request),
                Err(e) => {
                    warn!(store_id = %store.id, id = %record.id, error = %e, "Skipping product");
                    skipped += 1;
                }
            }
        }

        Ok((requests, skipped))
    }

    // =========================================================================
    // Full
    // =========================================================================

    /// Pushes the whole catalog for one store using its upload method.
    pub async fn run_full(&self, store_id: &str) -> SyncResult<CycleReport> {
        let store = self.config.store(store_id)?;
        self.config.ensure_ready(store)?;

        let context = store.to_store_context()?;
        let mut report = CycleReport::new(store_id, CycleKind::Full);
        report.transition(UploadState::Building);

        let header = header_for(&context);
        let mut writer = match store.upload_method {
            UploadMethod::FeedFile => {
                let path = feed_path(&self.config.output.feed_dir, &store.id, "products");
                Some(FeedFileWriter::create(path, &header)?)
            }
            UploadMethod::DirectBatch => None,
        };

        let page_size = self.config.queue.page_size;
        let mut cursor = 0i64;
        loop {
            let page = self.db.products().page_after(cursor, page_size).await?;
            let Some(last_id) = page.last_id else { break };
            cursor = last_id;

            let leaves: Vec<CatalogProduct> = page
                .products
                .into_iter()
                .filter(|p| !p.type_id.is_composite())
                .collect();
            let inventory = self.load_inventory(store, &leaves).await?;
            let built = build_records(&context, &inventory, &leaves);
            report.skipped += built.skipped;
            report.built += built.records.len();

            match writer.as_mut() {
                Some(writer) => {
                    for record in &built.records {
                        writer.write_row(&record.to_row(&header))?;
                    }
                }
                None => {
                    let requests: Vec<BatchRequest> = built
                        .records
                        .iter()
                        .map(|r| BatchRequest::upsert(ChangeMethod::Update, r))
                        .collect::<SyncResult<_>>()?;

                    report.transition(UploadState::Submitting);
                    if let Err(e) = self.submit_chunks(store, &requests).await {
                        return self.finish_failed(report, e);
                    }
                    report.submitted += requests.len();
                    report.transition(UploadState::Building);
                }
            }
        }

        if let Some(writer) = writer {
            let (path, rows) = writer.finish()?;
            report.transition(UploadState::Submitting);
            let target = FeedTarget {
                kind: FeedKind::Products,
                name: format!("shopfeed-{}-products", store.id),
                feed_id: store.products_feed_id.clone(),
            };
            if let Err(e) = self
                .sink
                .upload_feed_file(&store.catalog_id, &target, &path)
                .await
            {
                return self.finish_failed(report, e);
            }
            report.submitted = rows;
        }

        info!(
            store_id,
            method = %store.upload_method,
            built = report.built,
            skipped = report.skipped,
            "Full catalog sync finished"
        );
        report.transition(UploadState::Done);
        Ok(report)
    }

    // =========================================================================
    // Promotions
    // =========================================================================

    /// Builds offers for the store's active rules and uploads them as a feed.
    pub async fn upload_promotions(&self, store_id: &str) -> SyncResult<CycleReport> {
        let store = self.config.store(store_id)?;
        self.config.ensure_ready(store)?;

        let context = store.to_store_context()?;
        let mut report = CycleReport::new(store_id, CycleKind::Promotions);
        report.transition(UploadState::Building);

        let rules = self
            .db
            .rules()
            .active_for_store(store_id, Utc::now().date_naive())
            .await?;

        let policy = if store.stable_offer_ids {
            OfferIdPolicy::StableFromRule
        } else {
            OfferIdPolicy::Random
        };
        let translator = PromotionTranslator::new(&context, policy);

        let mut offers = Vec::with_capacity(rules.len());
        for rule in &rules {
            match translator.build(rule) {
                Ok(offer) => offers.push(offer),
                Err(e) => {
                    warn!(store_id, rule_id = rule.rule_id, error = %e, "Skipping promotion");
                    report.skipped += 1;
                }
            }
        }
        report.built = offers.len();

        let path = feed_path(&self.config.output.feed_dir, &store.id, "promotions");
        let rows = write_promotions(&path, &offers)?;

        report.transition(UploadState::Submitting);
        let target = FeedTarget {
            kind: FeedKind::Offers,
            name: format!("shopfeed-{}-promotions", store.id),
            feed_id: store.promotions_feed_id.clone(),
        };
        if let Err(e) = self
            .sink
            .upload_feed_file(&store.catalog_id, &target, &path)
            .await
        {
            return self.finish_failed(report, e);
        }

        report.submitted = rows;
        info!(store_id, offers = rows, skipped = report.skipped, "Promotions uploaded");
        report.transition(UploadState::Done);
        Ok(report)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Loads stock for `products` from the store's configured source.
    async fn load_inventory(
        &self,
        store: &StoreSettings,
        products: &[CatalogProduct],
    ) -> SyncResult<LoadedInventory> {
        let threshold = store.out_of_stock_threshold;
        match store.inventory_source {
            InventorySource::SingleSource => {
                let ids: Vec<i64> = products.iter().map(|p| p.entity_id).collect();
                let records = self.db.stock().stock_for_products(&ids).await?;
                Ok(LoadedInventory::Single(SingleSourceInventory::new(records, threshold)))
            }
            InventorySource::MultiSource => {
                let stock_id = store.stock_id.ok_or_else(|| {
                    SyncError::InvalidConfig(format!("store {} has no stock_id", store.id))
                })?;
                let skus: Vec<&str> = products.iter().map(|p| p.sku.as_str()).collect();
                let index = self.db.stock().salable_index(stock_id, &skus).await?;
                Ok(LoadedInventory::Multi { index, threshold })
            }
        }
    }

    async fn submit_chunks(&self, store: &StoreSettings, requests: &[BatchRequest]) -> SyncResult<()> {
        for chunk in requests.chunks(self.config.graph.request_chunk_size.max(1)) {
            self.sink.submit_batch(&store.catalog_id, chunk).await?;
        }
        Ok(())
    }

    /// Ends a cycle on a transport error; anything else propagates.
    fn finish_failed(&self, mut report: CycleReport, err: SyncError) -> SyncResult<CycleReport> {
        if err.is_transport_error() {
            warn!(store_id = %report.store_id, kind = ?report.kind, error = %err, "Upload failed");
            report.fail(&err);
            Ok(report)
        } else {
            Err(err)
        }
    }
}

/// Builds delete envelopes from queue rows; the catalog row may be gone.
fn delete_requests(context: &StoreContext, entries: &[ChangeEntry]) -> (Vec<BatchRequest>, usize) {
    let mut requests = Vec::with_capacity(entries.len());
    let mut seen = HashSet::new();
    let mut skipped = 0;

    for entry in entries {
        match content_id(entry.product_id, entry.sku.as_deref(), context.identifier_mode) {
            Ok(id) => {
                if seen.insert(id.clone()) {
                    requests.push(BatchRequest::delete(id));
                }
            }
            Err(e) => {
                warn!(
                    store_id = %context.store_id,
                    product_id = entry.product_id,
                    error = %e,
                    "Skipping delete"
                );
                skipped += 1;
            }
        }
    }

    (requests, skipped)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use shopfeed_core::inventory::StockRecord;
    use shopfeed_core::promotion::{CouponType, DiscountRule, FreeShipping, SimpleAction};
    use shopfeed_core::{Money, ProductType};
    use shopfeed_db::DbConfig;
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::Mutex;

    /// Records every call; optionally fails them all or one catalog's.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) batches: Mutex<Vec<Vec<BatchRequest>>>,
        pub(crate) batch_catalogs: Mutex<Vec<String>>,
        pub(crate) uploads: Mutex<Vec<(FeedKind, String)>>,
        pub(crate) upload_targets: Mutex<Vec<FeedTarget>>,
        pub(crate) fail: bool,
        pub(crate) fail_catalog: Option<&'static str>,
    }

    impl RecordingSink {
        pub(crate) fn failing() -> Self {
            RecordingSink {
                fail: true,
                ..Default::default()
            }
        }

        pub(crate) fn failing_for(catalog_id: &'static str) -> Self {
            RecordingSink {
                fail_catalog: Some(catalog_id),
                ..Default::default()
            }
        }

        fn fails_for(&self, catalog_id: &str) -> bool {
            self.fail || self.fail_catalog == Some(catalog_id)
        }

        fn batches(&self) -> Vec<Vec<BatchRequest>> {
            self.batches.lock().unwrap().clone()
        }

        fn uploads(&self) -> Vec<(FeedKind, String)> {
            self.uploads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CatalogSink for RecordingSink {
        async fn submit_batch(&self, catalog_id: &str, requests: &[BatchRequest]) -> SyncResult<()> {
            if self.fails_for(catalog_id) {
                return Err(SyncError::Transport("connection refused".into()));
            }
            self.batches.lock().unwrap().push(requests.to_vec());
            self.batch_catalogs.lock().unwrap().push(catalog_id.to_string());
            Ok(())
        }

        async fn upload_feed_file(&self, catalog_id: &str, target: &FeedTarget, path: &Path) -> SyncResult<()> {
            if self.fails_for(catalog_id) {
                return Err(SyncError::Transport("connection refused".into()));
            }
            let contents = std::fs::read_to_string(path).unwrap();
            self.uploads.lock().unwrap().push((target.kind, contents));
            self.upload_targets.lock().unwrap().push(target.clone());
            Ok(())
        }
    }

    pub(crate) fn product(entity_id: i64, sku: &str, type_id: ProductType) -> CatalogProduct {
        CatalogProduct {
            entity_id,
            sku: sku.to_string(),
            type_id,
            name: format!("Product {}", sku),
            description: None,
            price: Money::from_cents(1999),
            url: None,
            image_url: None,
            brand: Some("Northwind".to_string()),
            category: None,
            enabled: true,
            unit_value: None,
            unit_type: None,
            parent_sku: None,
            attributes: BTreeMap::new(),
        }
    }

    pub(crate) fn test_config(feed_dir: &Path) -> FeedConfig {
        let mut config = FeedConfig::default();
        config.graph.access_token = Some("token".into());
        config.output.feed_dir = feed_dir.to_path_buf();
        config.stores.push(StoreSettings::new("default", "cat-1"));
        config
    }

    pub(crate) async fn seeded_db() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        for (id, sku) in [(10, "TEE-S"), (11, "TEE-M"), (12, "TEE-L")] {
            db.products().upsert(&product(id, sku, ProductType::Simple)).await.unwrap();
            db.stock()
                .upsert_stock_item(StockRecord {
                    product_id: id,
                    qty: 5,
                    is_in_stock: true,
                })
                .await
                .unwrap();
        }
        db
    }

    fn uploader(db: &Database, sink: Arc<RecordingSink>, config: FeedConfig) -> FeedUploader {
        FeedUploader::new(db.clone(), sink, Arc::new(config))
    }

    /// Runs one incremental cycle and returns the first store's report.
    async fn incremental(uploader: FeedUploader) -> CycleReport {
        let mut outcome = uploader.run_incremental().await.unwrap();
        assert!(outcome.rejected.is_empty());
        outcome.reports.remove(0)
    }

    fn two_stores(feed_dir: &Path) -> FeedConfig {
        let mut config = test_config(feed_dir);
        config.stores.push(StoreSettings::new("second", "cat-2"));
        config
    }

    #[tokio::test]
    async fn test_incremental_success_consumes_batch() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db().await;
        db.change_queue().enqueue(&[10, 11, 12], ChangeMethod::Update).await.unwrap();

        let sink = Arc::new(RecordingSink::default());
        let report = incremental(uploader(&db, sink.clone(), test_config(dir.path()))).await;

        assert_eq!(report.state, UploadState::Done);
        assert_eq!(report.submitted, 3);
        assert_eq!(report.batch_tokens.len(), 1);

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
        assert!(batches[0].iter().all(|r| r.method == ChangeMethod::Update));
        assert_eq!(batches[0][0].data["inventory"], 5);
        assert_eq!(batches[0][0].data["price"], "19.99 USD");

        let queue = db.change_queue();
        assert_eq!(queue.count_pending(ChangeMethod::Update).await.unwrap(), 0);
        assert!(queue.reserve_batch(ChangeMethod::Update).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_releases_batch() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db().await;
        db.change_queue().enqueue(&[10, 11, 12], ChangeMethod::Update).await.unwrap();

        let sink = Arc::new(RecordingSink::failing());
        let report = incremental(uploader(&db, sink, test_config(dir.path()))).await;

        assert_eq!(report.state, UploadState::Failed);
        assert_eq!(report.submitted, 0);
        assert!(report.error.is_some());

        // Same three rows come back under a new token
        let queue = db.change_queue();
        assert_eq!(queue.count_pending(ChangeMethod::Update).await.unwrap(), 3);
        let again = queue.reserve_batch(ChangeMethod::Update).await.unwrap();
        assert_eq!(again.reserved, 3);
        assert_ne!(again.token, report.batch_tokens[0]);
        let ids: Vec<i64> = queue
            .entries_for_batch(&again.token)
            .await
            .unwrap()
            .iter()
            .map(|e| e.product_id)
            .collect();
        assert_eq!(ids, vec![10, 11, 12]);
    }

    #[tokio::test]
    async fn test_config_errors_leave_queue_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db().await;
        db.change_queue().enqueue(&[10], ChangeMethod::Update).await.unwrap();
        let sink = Arc::new(RecordingSink::default());

        let mut disabled = test_config(dir.path());
        disabled.stores[0].enabled = false;
        let outcome = uploader(&db, sink.clone(), disabled)
            .run_incremental()
            .await
            .unwrap();
        assert!(outcome.reports.is_empty());
        assert_eq!(outcome.rejected[0].0, "default");
        assert!(outcome.rejected[0].1.is_config_error());

        let mut no_token = two_stores(dir.path());
        no_token.graph.access_token = None;
        let outcome = uploader(&db, sink.clone(), no_token)
            .run_incremental()
            .await
            .unwrap();
        assert_eq!(outcome.rejected.len(), 2);
        assert!(outcome
            .rejected
            .iter()
            .all(|(_, e)| matches!(e, SyncError::MissingAccessToken)));

        let queue = db.change_queue();
        assert_eq!(queue.count_pending(ChangeMethod::Update).await.unwrap(), 1);
        assert!(sink.batches().is_empty());
    }

    #[tokio::test]
    async fn test_incremental_disabled_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db().await;
        db.change_queue().enqueue(&[10], ChangeMethod::Update).await.unwrap();

        let mut config = test_config(dir.path());
        config.stores[0].incremental_updates = false;
        let report = incremental(uploader(&db, Arc::new(RecordingSink::default()), config)).await;

        assert_eq!(report.state, UploadState::Done);
        assert!(report.batch_tokens.is_empty());
        assert_eq!(db.change_queue().count_pending(ChangeMethod::Update).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_deletes_use_queued_sku_and_missing_products_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db().await;
        let queue = db.change_queue();
        queue.enqueue_deleted(5, Some("GONE-1")).await.unwrap();
        queue.enqueue(&[10, 99], ChangeMethod::Update).await.unwrap();

        let sink = Arc::new(RecordingSink::default());
        let report = incremental(uploader(&db, sink.clone(), test_config(dir.path()))).await;

        assert_eq!(report.state, UploadState::Done);
        assert_eq!(report.batch_tokens.len(), 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.submitted, 2);

        let batches = sink.batches();
        // Deletes drain first
        assert_eq!(batches[0], vec![BatchRequest::delete("GONE-1")]);
        assert_eq!(batches[1].len(), 1);
        assert_eq!(batches[1][0].content_id(), Some("TEE-S"));

        assert_eq!(queue.count_pending(ChangeMethod::Update).await.unwrap(), 0);
        assert_eq!(queue.count_pending(ChangeMethod::Delete).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_incremental_batch_reaches_every_store() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db().await;
        db.change_queue().enqueue(&[10], ChangeMethod::Update).await.unwrap();

        let sink = Arc::new(RecordingSink::default());
        let outcome = uploader(&db, sink.clone(), two_stores(dir.path()))
            .run_incremental()
            .await
            .unwrap();

        assert_eq!(outcome.reports.len(), 2);
        assert_eq!(outcome.reports[0].store_id, "default");
        assert_eq!(outcome.reports[1].store_id, "second");
        assert!(outcome
            .reports
            .iter()
            .all(|r| r.state == UploadState::Done && r.submitted == 1));
        // Both stores saw the same reservation
        assert_eq!(outcome.reports[0].batch_tokens, outcome.reports[1].batch_tokens);

        assert_eq!(sink.batches().len(), 2);
        assert_eq!(*sink.batch_catalogs.lock().unwrap(), vec!["cat-1", "cat-2"]);
        assert_eq!(db.change_queue().count_pending(ChangeMethod::Update).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_one_failing_store_keeps_batch_for_all() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db().await;
        db.change_queue().enqueue(&[10], ChangeMethod::Update).await.unwrap();

        let outcome = uploader(&db, Arc::new(RecordingSink::failing_for("cat-2")), two_stores(dir.path()))
            .run_incremental()
            .await
            .unwrap();
        assert_eq!(outcome.reports[0].state, UploadState::Done);
        assert_eq!(outcome.reports[0].submitted, 1);
        assert_eq!(outcome.reports[1].state, UploadState::Failed);
        assert_eq!(db.change_queue().count_pending(ChangeMethod::Update).await.unwrap(), 1);

        // The next healthy cycle delivers the row to both stores
        let sink = Arc::new(RecordingSink::default());
        let outcome = uploader(&db, sink.clone(), two_stores(dir.path()))
            .run_incremental()
            .await
            .unwrap();
        assert!(outcome.reports.iter().all(|r| r.submitted == 1));
        assert_eq!(*sink.batch_catalogs.lock().unwrap(), vec!["cat-1", "cat-2"]);
        assert_eq!(db.change_queue().count_pending(ChangeMethod::Update).await.unwrap(), 0);
    }

    async fn insert_bad_price(db: &Database, entity_id: i64) {
        sqlx::query("INSERT INTO catalog_products (entity_id, sku, name, price) VALUES (?1, ?2, 'Broken', 'N/A')")
            .bind(entity_id)
            .bind(format!("BAD-{}", entity_id))
            .execute(db.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_bad_catalog_row_is_dropped_from_batch() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db().await;
        insert_bad_price(&db, 13).await;
        db.change_queue().enqueue(&[10, 11, 13], ChangeMethod::Update).await.unwrap();

        let sink = Arc::new(RecordingSink::default());
        let report = incremental(uploader(&db, sink.clone(), test_config(dir.path()))).await;

        assert_eq!(report.state, UploadState::Done);
        assert_eq!(report.submitted, 2);
        assert_eq!(report.skipped, 1);
        let batches = sink.batches();
        let mut ids: Vec<&str> = batches[0].iter().filter_map(|r| r.content_id()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["TEE-M", "TEE-S"]);
        assert_eq!(db.change_queue().count_pending(ChangeMethod::Update).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_full_sync_skips_bad_catalog_row() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db().await;
        insert_bad_price(&db, 13).await;

        let mut config = test_config(dir.path());
        config.queue.page_size = 2;
        let sink = Arc::new(RecordingSink::default());
        let report = uploader(&db, sink.clone(), config)
            .run_full("default")
            .await
            .unwrap();

        assert_eq!(report.state, UploadState::Done);
        assert_eq!(report.built, 3);
        let (_, contents) = &sink.uploads()[0];
        assert!(!contents.contains("BAD-13"));
    }

    #[tokio::test]
    async fn test_multi_source_inventory_applies_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db().await;
        db.stock().set_salable(2, "TEE-S", 8, true).await.unwrap();
        db.change_queue().enqueue(&[10, 11], ChangeMethod::Create).await.unwrap();

        let mut config = test_config(dir.path());
        config.stores[0].inventory_source = InventorySource::MultiSource;
        config.stores[0].stock_id = Some(2);
        config.stores[0].out_of_stock_threshold = 3;

        let sink = Arc::new(RecordingSink::default());
        incremental(uploader(&db, sink.clone(), config)).await;

        let batch = &sink.batches()[0];
        assert_eq!(batch[0].method, ChangeMethod::Create);
        assert_eq!(batch[0].data["inventory"], 5);
        assert_eq!(batch[0].data["availability"], "in stock");
        // No salable row for TEE-M in stock 2
        assert_eq!(batch[1].data["inventory"], 0);
        assert_eq!(batch[1].data["availability"], "out of stock");
    }

    #[tokio::test]
    async fn test_full_sync_feed_file_excludes_parents() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db().await;
        db.products()
            .upsert(&product(1, "TEE", ProductType::Configurable))
            .await
            .unwrap();
        for child in [10, 11, 12] {
            db.products().add_link(1, child).await.unwrap();
        }

        let sink = Arc::new(RecordingSink::default());
        let report = uploader(&db, sink.clone(), test_config(dir.path()))
            .run_full("default")
            .await
            .unwrap();

        assert_eq!(report.state, UploadState::Done);
        assert_eq!(report.built, 3);
        assert_eq!(report.submitted, 3);

        let uploads = sink.uploads();
        assert_eq!(uploads.len(), 1);
        let (kind, contents) = &uploads[0];
        assert_eq!(*kind, FeedKind::Products);

        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("id\ttitle\t"));
        assert!(lines[1].starts_with("TEE-S\t"));
        // Children carry the parent as their group
        assert!(lines[1].contains("\tTEE\t"));
        assert!(lines.iter().skip(1).all(|l| !l.starts_with("TEE\t")));
    }

    #[tokio::test]
    async fn test_feed_uploads_carry_configured_feed_ids() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db().await;

        let mut config = test_config(dir.path());
        config.stores[0].products_feed_id = Some("feed-77".into());
        let sink = Arc::new(RecordingSink::default());
        let up = uploader(&db, sink.clone(), config);
        up.run_full("default").await.unwrap();
        up.upload_promotions("default").await.unwrap();

        let targets = sink.upload_targets.lock().unwrap().clone();
        assert_eq!(targets[0].name, "shopfeed-default-products");
        assert_eq!(targets[0].feed_id.as_deref(), Some("feed-77"));
        assert_eq!(targets[1].kind, FeedKind::Offers);
        assert_eq!(targets[1].name, "shopfeed-default-promotions");
        assert_eq!(targets[1].feed_id, None);
    }

    #[tokio::test]
    async fn test_full_sync_direct_batch_chunks_requests() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db().await;

        let mut config = test_config(dir.path());
        config.stores[0].upload_method = UploadMethod::DirectBatch;
        config.graph.request_chunk_size = 2;

        let sink = Arc::new(RecordingSink::default());
        let report = uploader(&db, sink.clone(), config)
            .run_full("default")
            .await
            .unwrap();

        assert_eq!(report.submitted, 3);
        let sizes: Vec<usize> = sink.batches().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 1]);
        assert!(sink.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_full_sync_upload_failure_reports_failed() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db().await;

        let report = uploader(&db, Arc::new(RecordingSink::failing()), test_config(dir.path()))
            .run_full("default")
            .await
            .unwrap();

        assert_eq!(report.state, UploadState::Failed);
        assert_eq!(report.built, 3);
        assert_eq!(report.submitted, 0);
    }

    #[tokio::test]
    async fn test_promotions_skip_unsupported_rules() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db().await;

        let percent = DiscountRule {
            rule_id: 1,
            name: "Spring Sale".to_string(),
            from_date: NaiveDate::from_ymd_opt(2026, 3, 1),
            to_date: None,
            uses_per_customer: 1,
            coupon_type: CouponType::SpecificCoupon,
            coupon_code: Some("SPRING15".to_string()),
            simple_action: SimpleAction::ByPercent,
            discount_amount: 1500,
            free_shipping: FreeShipping::None,
            conditions: vec![],
        };
        let mut bogo = percent.clone();
        bogo.rule_id = 2;
        bogo.simple_action = SimpleAction::BuyXGetY;

        db.rules().upsert("default", &percent, true).await.unwrap();
        db.rules().upsert("default", &bogo, true).await.unwrap();

        let mut config = test_config(dir.path());
        config.stores[0].stable_offer_ids = true;

        let sink = Arc::new(RecordingSink::default());
        let report = uploader(&db, sink.clone(), config)
            .upload_promotions("default")
            .await
            .unwrap();

        assert_eq!(report.state, UploadState::Done);
        assert_eq!(report.built, 1);
        assert_eq!(report.skipped, 1);

        let (kind, contents) = &sink.uploads()[0];
        assert_eq!(*kind, FeedKind::Offers);
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("SPRING15"));
    }

    #[test]
    fn test_delete_requests_dedupe_and_skip() {
        let context = StoreContext::new("default", "USD");
        let entry = |row_id, product_id, sku: Option<&str>| ChangeEntry {
            row_id,
            product_id,
            sku: sku.map(str::to_string),
            method: ChangeMethod::Delete,
            batch_id: Some("t".to_string()),
            created_at: Utc::now(),
        };

        let (requests, skipped) = delete_requests(
            &context,
            &[entry(1, 5, Some("A")), entry(2, 6, None), entry(3, 5, Some("A"))],
        );
        assert_eq!(requests, vec![BatchRequest::delete("A")]);
        assert_eq!(skipped, 1);
    }
}
