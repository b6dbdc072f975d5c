//! Response caching for asset requests.
//!
//! A [`Cache`] stores fetched bytes keyed by URL so repeated visits to the
//! same tiles skip the network. [`NoCache`] disables caching and
//! [`MemoryCache`] keeps responses in memory under an optional byte
//! budget.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use crate::error::Result;

/// Future type for cache lookups.
pub type GetFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>>> + Send + 'a>>;

/// Future type for cache stores.
pub type PutFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Byte storage keyed by URL.
///
/// Implementations may store data in memory, on disk, or anywhere else;
/// a miss is `Ok(None)`, not an error.
pub trait Cache: Send + Sync {
    fn get(&self, url: &str) -> GetFuture<'_>;

    fn put(&self, url: &str, data: Vec<u8>) -> PutFuture<'_>;
}

/// A cache that stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl NoCache {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Cache for NoCache {
    fn get(&self, _url: &str) -> GetFuture<'_> {
        Box::pin(async { Ok(None) })
    }

    fn put(&self, _url: &str, _data: Vec<u8>) -> PutFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}

/// An in-memory cache with insertion-order eviction.
///
/// When a byte budget is set, inserting past it evicts the oldest entries
/// until the new one fits.
#[derive(Debug)]
pub struct MemoryCache {
    inner: Arc<RwLock<MemoryCacheInner>>,
    max_bytes: Option<usize>,
}

#[derive(Debug, Default)]
struct MemoryCacheInner {
    entries: HashMap<String, Vec<u8>>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
    current_bytes: usize,
}

impl MemoryCache {
    /// Create a cache with no byte budget.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryCacheInner::default())),
            max_bytes: None,
        }
    }

    /// Create a cache that holds at most `max_bytes` of response data.
    #[must_use]
    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryCacheInner::default())),
            max_bytes: Some(max_bytes),
        }
    }

    /// Bytes currently held.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.read().unwrap().current_bytes
    }

    /// Number of cached responses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryCache {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            max_bytes: self.max_bytes,
        }
    }
}

impl Cache for MemoryCache {
    fn get(&self, url: &str) -> GetFuture<'_> {
        let result = self.inner.read().unwrap().entries.get(url).cloned();
        Box::pin(async move { Ok(result) })
    }

    fn put(&self, url: &str, data: Vec<u8>) -> PutFuture<'_> {
        let url = url.to_string();
        let mut inner = self.inner.write().unwrap();

        if let Some(old) = inner.entries.remove(&url) {
            inner.current_bytes -= old.len();
            inner.order.retain(|k| k != &url);
        }

        let incoming = data.len();
        if let Some(max_bytes) = self.max_bytes {
            while inner.current_bytes + incoming > max_bytes {
                let Some(oldest) = inner.order.pop_front() else {
                    break;
                };
                if let Some(old) = inner.entries.remove(&oldest) {
                    inner.current_bytes -= old.len();
                }
            }
        }

        inner.entries.insert(url.clone(), data);
        inner.order.push_back(url);
        inner.current_bytes += incoming;

        Box::pin(async { Ok(()) })
    }
}
