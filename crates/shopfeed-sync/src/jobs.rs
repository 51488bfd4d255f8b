//! # Scheduled Jobs
//!
//! Cron-style entry points. Each tick walks the configured stores in order;
//! a failing store is logged and the next one still runs. The incremental
//! tick shares one queue drain between all stores.

use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::uploader::{CycleReport, FeedUploader};

/// The three scheduled jobs of the feed worker.
#[derive(Clone)]
pub struct FeedJobs {
    uploader: FeedUploader,
}

impl FeedJobs {
    pub fn new(uploader: FeedUploader) -> Self {
        FeedJobs { uploader }
    }

    pub fn uploader(&self) -> &FeedUploader {
        &self.uploader
    }

    /// Drains the change queue once, delivering each batch to every ready store.
    pub async fn incremental_tick(&self) -> Vec<CycleReport> {
        match self.uploader.run_incremental().await {
            Ok(outcome) => {
                for (store_id, e) in &outcome.rejected {
                    log_store_error("incremental", store_id, e);
                }
                outcome.reports
            }
            Err(e) => {
                error!(?e, "Incremental cycle failed");
                Vec::new()
            }
        }
    }

    /// Pushes the full catalog, then promotions where enabled, for every store.
    pub async fn full_tick(&self) -> Vec<CycleReport> {
        let mut reports = Vec::new();
        for store in &self.uploader.config().stores {
            match self.uploader.run_full(&store.id).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    log_store_error("full", &store.id, &e);
                    continue;
                }
            }

            if store.promotions_enabled {
                match self.uploader.upload_promotions(&store.id).await {
                    Ok(report) => reports.push(report),
                    Err(e) => log_store_error("promotions", &store.id, &e),
                }
            }
        }
        reports
    }

    /// Removes finished batches older than the configured age.
    ///
    /// Pending entries are never touched.
    pub async fn prune_tick(&self) -> u64 {
        let config = self.uploader.config();
        match self
            .uploader
            .queue()
            .prune(config.prune_after())
            .await
        {
            Ok(pruned) => {
                if pruned > 0 {
                    info!(pruned, "Pruned stale change batches");
                }
                pruned
            }
            Err(e) => {
                error!(?e, "Failed to prune change queue");
                0
            }
        }
    }
}

fn log_store_error(job: &str, store_id: &str, err: &SyncError) {
    match err {
        SyncError::SyncDisabled { .. } => debug!(job, store_id, "Store sync disabled, skipping"),
        e if e.is_config_error() => warn!(job, store_id, error = %e, "Store misconfigured, skipping"),
        e => error!(job, store_id, ?e, "Store cycle failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreSettings;
    use crate::uploader::tests::{seeded_db, test_config, RecordingSink};
    use crate::uploader::UploadState;
    use chrono::{Duration, Utc};
    use shopfeed_core::ChangeMethod;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_failing_store_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db().await;
        db.change_queue().enqueue(&[10], ChangeMethod::Update).await.unwrap();

        let mut config = test_config(dir.path());
        // First store cannot build its context
        let mut broken = StoreSettings::new("broken", "cat-0");
        broken.base_currency = Some("EUR".into());
        broken.exchange_rate = "abc".into();
        config.stores.insert(0, broken);

        let sink = Arc::new(RecordingSink::default());
        let jobs = FeedJobs::new(FeedUploader::new(db.clone(), sink.clone(), Arc::new(config)));

        let reports = jobs.incremental_tick().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].store_id, "default");
        assert_eq!(reports[0].state, UploadState::Done);
        assert_eq!(reports[0].submitted, 1);
    }

    #[tokio::test]
    async fn test_full_tick_includes_promotions_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db().await;

        let mut config = test_config(dir.path());
        config.stores[0].promotions_enabled = true;

        let sink = Arc::new(RecordingSink::default());
        let jobs = FeedJobs::new(FeedUploader::new(db, sink.clone(), Arc::new(config)));

        let reports = jobs.full_tick().await;
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.state == UploadState::Done));
        assert_eq!(sink.uploads.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_incremental_tick_serves_every_store() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db().await;
        db.change_queue().enqueue(&[10, 11], ChangeMethod::Update).await.unwrap();

        let mut config = test_config(dir.path());
        config.stores.push(StoreSettings::new("second", "cat-2"));

        let sink = Arc::new(RecordingSink::default());
        let jobs = FeedJobs::new(FeedUploader::new(db.clone(), sink.clone(), Arc::new(config)));

        let reports = jobs.incremental_tick().await;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].store_id, "default");
        assert_eq!(reports[1].store_id, "second");
        assert!(reports.iter().all(|r| r.state == UploadState::Done && r.submitted == 2));
        assert_eq!(*sink.batch_catalogs.lock().unwrap(), vec!["cat-1", "cat-2"]);
        assert_eq!(db.change_queue().count_pending(ChangeMethod::Update).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_prune_tick_removes_only_old_finished_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db().await;
        let queue = db.change_queue();
        queue.enqueue(&[12], ChangeMethod::Update).await.unwrap();
        let fresh = queue.reserve_batch(ChangeMethod::Update).await.unwrap();

        sqlx::query(
            "INSERT INTO catalog_change_queue (product_id, sku, method, batch_id, created_at) VALUES (10, NULL, 'update', 'old-batch', ?1), (11, NULL, 'update', NULL, ?1)",
        )
        .bind(Utc::now() - Duration::days(8))
        .execute(db.pool())
        .await
        .unwrap();

        let mut config = test_config(dir.path());
        config.queue.prune_after_days = 7;
        let jobs = FeedJobs::new(FeedUploader::new(
            db.clone(),
            Arc::new(RecordingSink::default()),
            Arc::new(config),
        ));

        assert_eq!(jobs.prune_tick().await, 1);
        assert!(queue.entries_for_batch("old-batch").await.unwrap().is_empty());
        assert_eq!(queue.entries_for_batch(&fresh.token).await.unwrap().len(), 1);
        assert_eq!(queue.count_pending(ChangeMethod::Update).await.unwrap(), 1);
        // Second tick has nothing left to remove
        assert_eq!(jobs.prune_tick().await, 0);
    }
}
