//! Remote catalog seam used by the uploader.

use async_trait::async_trait;
use std::path::Path;

use crate::error::SyncResult;
use crate::protocol::{BatchRequest, FeedTarget};

/// Destination for catalog mutations.
///
/// [`GraphClient`](crate::graph::GraphClient) is the production sink; tests
/// substitute recording fakes.
#[async_trait]
pub trait CatalogSink: Send + Sync {
    /// Submits one chunk of envelopes. Fails as a whole; partial item
    /// rejections are logged by the implementation.
    async fn submit_batch(&self, catalog_id: &str, requests: &[BatchRequest]) -> SyncResult<()>;

    /// Uploads a finished feed file into `target`, reusing the remote feed
    /// across runs.
    async fn upload_feed_file(&self, catalog_id: &str, target: &FeedTarget, path: &Path) -> SyncResult<()>;
}
