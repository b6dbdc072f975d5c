//! HTTP-backed asset accessor.
//!
//! Wraps a `reqwest::Client` behind [`AssetAccessor`], with an optional
//! [`Cache`] consulted before the network. On native builds reqwest uses
//! rustls; on wasm it rides the browser's fetch.

use std::sync::Arc;

use crate::cache::{Cache, NoCache};
use crate::error::Error;
use crate::externals::{AssetAccessor, AssetResponse, RequestFuture};

/// Fetches tile data over HTTP.
pub struct WebAssetAccessor<C: Cache = NoCache> {
    http: reqwest::Client,
    cache: Arc<C>,
}

impl WebAssetAccessor<NoCache> {
    /// Create an accessor with no caching.
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            cache: Arc::new(NoCache),
        }
    }
}

impl Default for WebAssetAccessor<NoCache> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Cache> WebAssetAccessor<C> {
    /// Create an accessor that checks `cache` before the network.
    #[must_use]
    pub fn with_cache(cache: C) -> Self {
        Self {
            http: reqwest::Client::new(),
            cache: Arc::new(cache),
        }
    }

    /// Create an accessor with a custom HTTP client and cache.
    #[must_use]
    pub fn with_http_and_cache(http: reqwest::Client, cache: C) -> Self {
        Self {
            http,
            cache: Arc::new(cache),
        }
    }
}

impl<C: Cache> AssetAccessor for WebAssetAccessor<C> {
    fn request(&self, url: &str, headers: &[(String, String)]) -> RequestFuture<'_> {
        let url = url.to_string();
        let mut request = self.http.get(&url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        Box::pin(async move {
            // Check cache first.
            if let Some(bytes) = self.cache.get(&url).await? {
                tracing::debug!(url, "cache hit");
                return Ok(AssetResponse { status: 200, bytes });
            }

            tracing::debug!(url, "fetching");

            let response = request.send().await.map_err(|e| Error::Http {
                url: url.clone(),
                message: e.to_string(),
            })?;

            let status = response.status().as_u16();
            let bytes = response
                .bytes()
                .await
                .map_err(|e| Error::Http {
                    url: url.clone(),
                    message: e.to_string(),
                })?
                .to_vec();

            // Only successful responses are worth keeping.
            if (200..300).contains(&status) {
                self.cache.put(&url, bytes.clone()).await?;
            }

            Ok(AssetResponse { status, bytes })
        })
    }
}
