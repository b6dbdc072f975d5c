//! Integration points between a tileset and its host application.
//!
//! The library never talks to the network, a runtime, or a renderer
//! directly. The host supplies implementations of the traits in this
//! module through [`TilesetExternals`], and the tileset calls back into
//! them: [`AssetAccessor`] to fetch bytes, [`TaskRunner`] to run work off
//! the traversal thread, and [`PrepareRendererResources`] to turn parsed
//! content into something drawable.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::content::TileContent;
use crate::error::Result;
use crate::tile::TileId;

/// Future type for asset requests.
pub type RequestFuture<'a> = Pin<Box<dyn Future<Output = Result<AssetResponse>> + Send + 'a>>;

/// Future type for work handed to a [`TaskRunner`].
pub type BackgroundFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A completed asset request.
///
/// Transport-level failures (connection refused, TLS, etc.) surface as an
/// `Err` from [`AssetAccessor::request`]; an HTTP error status is a
/// successful request and is reported here for the caller to interpret.
#[derive(Debug, Clone)]
pub struct AssetResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub bytes: Vec<u8>,
}

/// Fetches bytes by URL.
///
/// Implementations must not block; the returned future is awaited on a
/// background task. `headers` carries name/value pairs to attach to the
/// request (the tileset uses this for `Authorization`).
pub trait AssetAccessor: Send + Sync {
    fn request(&self, url: &str, headers: &[(String, String)]) -> RequestFuture<'_>;
}

/// Runs futures to completion somewhere off the traversal thread.
///
/// No ordering is guaranteed between tasks. Results come back to the
/// tileset over a channel, never through this trait.
pub trait TaskRunner: Send + Sync {
    fn run_in_background(&self, task: BackgroundFuture);
}

/// Opaque handle to renderer resources created for one tile.
///
/// The tileset stores the handle and passes it back to
/// [`PrepareRendererResources::free`] when the content is evicted; it
/// never interprets the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle(pub u64);

/// Outcome of [`PrepareRendererResources::prepare`].
#[derive(Debug)]
pub enum Prepared {
    /// Resources were created synchronously.
    Ready(ResourceHandle),
    /// Preparation continues elsewhere; the preparer reports back through
    /// the [`PrepareHandle`] it was given.
    Pending,
}

/// Callback handle for asynchronous resource preparation.
///
/// A preparer that returns [`Prepared::Pending`] keeps the handle and
/// calls [`finish`](Self::finish) exactly once when its work completes.
/// If the tileset has been dropped in the meantime the call is a no-op.
pub struct PrepareHandle {
    sender: async_channel::Sender<Completion>,
    tile: TileId,
    generation: u64,
}

impl PrepareHandle {
    pub(crate) fn new(
        sender: async_channel::Sender<Completion>,
        tile: TileId,
        generation: u64,
    ) -> Self {
        Self {
            sender,
            tile,
            generation,
        }
    }

    /// Report the prepared resources, or the error that prevented them.
    pub fn finish(self, result: Result<ResourceHandle>) {
        let completion = Completion::ResourcesPrepared {
            tile: self.tile,
            generation: self.generation,
            result,
        };
        if let Err(async_channel::TrySendError::Full(_)) = self.sender.try_send(completion) {
            tracing::warn!(
                tile = self.tile.index(),
                "completion channel full, dropping prepare result"
            );
        }
    }
}

/// Turns parsed tile content into renderer resources.
///
/// `prepare` is called on the traversal thread once content arrives; a
/// cheap implementation builds everything there and returns
/// [`Prepared::Ready`], while an expensive one hands the work off and
/// returns [`Prepared::Pending`]. Partially built resources belong to the
/// preparer: after [`cancel`](Self::cancel) returns, the tile may be
/// destroyed at any time.
pub trait PrepareRendererResources: Send + Sync {
    fn prepare(
        &self,
        tile: TileId,
        content: &dyn TileContent,
        handle: PrepareHandle,
    ) -> Result<Prepared>;

    /// Abandon an in-flight preparation for `tile`.
    fn cancel(&self, tile: TileId);

    /// Release resources previously handed out for `tile`.
    fn free(&self, tile: TileId, resources: ResourceHandle);
}

/// The host-supplied integration bundle a [`Tileset`](crate::Tileset)
/// calls back into.
#[derive(Clone)]
pub struct TilesetExternals {
    pub asset_accessor: Arc<dyn AssetAccessor>,
    pub task_runner: Arc<dyn TaskRunner>,
    pub prepare_renderer_resources: Arc<dyn PrepareRendererResources>,
}

/// A finished background operation, delivered to the tileset over its
/// completion channel and applied at the start of the next update.
pub(crate) enum Completion {
    /// A fetch-and-parse task finished.
    ContentParsed {
        tile: TileId,
        generation: u64,
        result: Result<Box<dyn TileContent>>,
    },
    /// An asynchronous resource preparation finished.
    ResourcesPrepared {
        tile: TileId,
        generation: u64,
        result: Result<ResourceHandle>,
    },
}
