//! # Graph Catalog Client
//!
//! HTTP sink for the remote commerce catalog.
//!
//! ## Endpoints
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Incremental:  POST /{version}/{catalog_id}/items_batch                 │
//! │                JSON { item_type, requests: [{method, data}] }           │
//! │                                                                         │
//! │  Full feed:    feed id = pinned id                                      │
//! │                       or GET  /{catalog_id}/product_feeds (by name)    │
//! │                       or POST /{catalog_id}/product_feeds  → {id}       │
//! │                POST /{version}/{feed_id}/uploads  (multipart file)      │
//! │                                                                         │
//! │  Retries:      connect errors, timeouts, 429 and 5xx, with exponential  │
//! │                backoff until max_elapsed; other 4xx fail immediately    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::GraphSettings;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{
    BatchRequest, CreatedObject, FeedKind, FeedList, FeedTarget, GraphErrorBody, ItemsBatch,
    ItemsBatchResponse,
};
use crate::sink::CatalogSink;

/// Client for the Graph-style catalog API.
#[derive(Debug, Clone)]
pub struct GraphClient {
    http: Client,
    base_url: Url,
    api_version: String,
    access_token: String,
    initial_backoff: Duration,
    max_elapsed: Duration,
    /// Feed ids resolved by name, keyed `{catalog_id}/{name}`.
    feed_ids: Arc<Mutex<HashMap<String, String>>>,
}

impl GraphClient {
    /// Creates a client from the `[graph]` settings.
    ///
    /// Fails without an access token.
    pub fn new(settings: &GraphSettings) -> SyncResult<Self> {
        let access_token = settings
            .token()
            .ok_or(SyncError::MissingAccessToken)?
            .to_string();

        let http = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| SyncError::Internal(format!("HTTP client: {}", e)))?;

        Ok(GraphClient {
            http,
            base_url: Url::parse(&settings.base_url)?,
            api_version: settings.api_version.trim_matches('/').to_string(),
            access_token,
            initial_backoff: settings.initial_backoff(),
            max_elapsed: settings.max_elapsed(),
            feed_ids: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Builds `{base}/{version}/{path}`.
    fn endpoint(&self, path: &str) -> SyncResult<Url> {
        let relative = format!("{}/{}", self.api_version, path.trim_start_matches('/'));
        Ok(self.base_url.join(&relative)?)
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_elapsed.max(self.initial_backoff),
            multiplier: 2.0,
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        }
    }

    /// Sends a request with retry and decodes the JSON answer.
    ///
    /// `build` is called once per attempt since multipart bodies cannot be
    /// replayed.
    async fn send_with_retry<T, F>(&self, label: &str, build: F) -> SyncResult<T>
    where
        T: DeserializeOwned,
        F: Fn() -> SyncResult<RequestBuilder>,
    {
        backoff::future::retry(self.create_backoff(), || async {
            let request = build().map_err(backoff::Error::permanent)?;
            let result = match request.send().await {
                Ok(response) => Self::decode::<T>(response).await,
                Err(e) => Err(SyncError::from(e)),
            };
            result.map_err(|e| {
                if e.is_retryable() {
                    warn!(request = label, error = %e, "Transient Graph error, retrying");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> SyncResult<T> {
        let status = response.status();
        debug!(status = status.as_u16(), "Graph response");

        let body = response.text().await?;
        if !status.is_success() {
            return Err(SyncError::RemoteRejected {
                status: status.as_u16(),
                message: GraphErrorBody::message_from(&body),
            });
        }

        Ok(serde_json::from_str(&body)?)
    }

    /// Returns the feed to upload into: the pinned id, a cached or existing
    /// feed with the same name, or a newly created one.
    async fn resolve_feed(&self, catalog_id: &str, target: &FeedTarget) -> SyncResult<String> {
        if let Some(id) = target.feed_id.as_deref().filter(|id| !id.is_empty()) {
            return Ok(id.to_string());
        }

        let key = format!("{}/{}", catalog_id, target.name);
        if let Some(id) = self.feed_ids.lock().await.get(&key) {
            return Ok(id.clone());
        }

        let id = match self.find_feed(catalog_id, &target.name).await? {
            Some(id) => {
                debug!(catalog_id, feed = %target.name, feed_id = %id, "Reusing existing feed");
                id
            }
            None => self.create_feed(catalog_id, target.kind, &target.name).await?,
        };

        self.feed_ids.lock().await.insert(key, id.clone());
        Ok(id)
    }

    async fn find_feed(&self, catalog_id: &str, feed_name: &str) -> SyncResult<Option<String>> {
        let url = self.endpoint(&format!("{}/product_feeds", catalog_id))?;
        let feeds: FeedList = self
            .send_with_retry("product_feeds", || {
                Ok(self.http.get(url.clone()).query(&[
                    ("access_token", self.access_token.as_str()),
                    ("fields", "id,name"),
                    ("limit", "100"),
                ]))
            })
            .await?;
        Ok(feeds.find(feed_name).map(str::to_string))
    }

    /// Creates a feed object under the catalog and returns its id.
    async fn create_feed(&self, catalog_id: &str, kind: FeedKind, feed_name: &str) -> SyncResult<String> {
        let url = self.endpoint(&format!("{}/product_feeds", catalog_id))?;
        let created: CreatedObject = self
            .send_with_retry("product_feeds", || {
                Ok(self.http.post(url.clone()).form(&[
                    ("access_token", self.access_token.as_str()),
                    ("name", feed_name),
                    ("feed_type", kind.feed_type()),
                ]))
            })
            .await?;
        info!(catalog_id, feed = feed_name, feed_id = %created.id, "Created remote feed");
        Ok(created.id)
    }
}

#[async_trait]
impl CatalogSink for GraphClient {
    async fn submit_batch(&self, catalog_id: &str, requests: &[BatchRequest]) -> SyncResult<()> {
        if requests.is_empty() {
            return Ok(());
        }

        let url = self.endpoint(&format!("{}/items_batch", catalog_id))?;
        let body = ItemsBatch::products(requests);

        let response: ItemsBatchResponse = self
            .send_with_retry("items_batch", || {
                Ok(self
                    .http
                    .post(url.clone())
                    .query(&[("access_token", self.access_token.as_str())])
                    .json(&body))
            })
            .await?;

        for (item, message) in response.rejected_items() {
            warn!(catalog_id, item, message, "Catalog item rejected");
        }

        info!(
            catalog_id,
            count = requests.len(),
            handles = response.handles.len(),
            "Batch submitted"
        );
        Ok(())
    }

    async fn upload_feed_file(&self, catalog_id: &str, target: &FeedTarget, path: &Path) -> SyncResult<()> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| SyncError::FeedFile(format!("{}: {}", path.display(), e)))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.tsv", target.name));

        let feed_id = self.resolve_feed(catalog_id, target).await?;
        let url = self.endpoint(&format!("{}/uploads", feed_id))?;

        let session: CreatedObject = self
            .send_with_retry("uploads", || {
                let part = Part::bytes(bytes.clone())
                    .file_name(file_name.clone())
                    .mime_str("text/tab-separated-values")?;
                let form = Form::new()
                    .text("access_token", self.access_token.clone())
                    .part("file", part);
                Ok(self.http.post(url.clone()).multipart(form))
            })
            .await?;

        info!(
            catalog_id,
            feed_id = %feed_id,
            upload_session = %session.id,
            bytes = bytes.len(),
            "Feed file uploaded"
        );
        Ok(())
    }
}
