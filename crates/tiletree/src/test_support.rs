//! Shared test doubles for the host-integration seams.
//!
//! The mocks here stand in for the three externals: an asset accessor
//! serving canned responses, a task runner that queues work until a test
//! drives it, and a resource preparer that records everything it is
//! asked to do. Queued tasks give tests full control over when fetches
//! "complete" relative to update calls.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::content::TileContent;
use crate::error::{Error, Result};
use crate::externals::{
    AssetAccessor, AssetResponse, BackgroundFuture, PrepareHandle, PrepareRendererResources,
    Prepared, RequestFuture, ResourceHandle, TaskRunner, TilesetExternals,
};
use crate::tile::TileId;

/// Install a subscriber so `tracing` output from the streaming paths shows
/// up under `--nocapture`. Only the first call per process takes effect.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub(crate) fn block_on<F: Future>(f: F) -> F::Output {
    // Simple polling executor; mock-backed futures resolve on the first
    // poll.
    use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

    fn dummy_raw_waker() -> RawWaker {
        fn no_op(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            dummy_raw_waker()
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
        RawWaker::new(std::ptr::null(), &VTABLE)
    }

    #[allow(unsafe_code)]
    let waker = unsafe { Waker::from_raw(dummy_raw_waker()) };
    let mut cx = Context::from_waker(&waker);
    let mut f = std::pin::pin!(f);

    match f.as_mut().poll(&mut cx) {
        Poll::Ready(result) => result,
        Poll::Pending => panic!("future unexpectedly pending"),
    }
}

/// Serves canned responses by URL and records every request made.
#[derive(Default)]
pub(crate) struct MockAssetAccessor {
    responses: Mutex<HashMap<String, (u16, Vec<u8>)>>,
    pub(crate) requests: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl MockAssetAccessor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, url: &str, status: u16, bytes: Vec<u8>) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, bytes));
    }

    pub(crate) fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(requested, _)| requested == url)
            .count()
    }
}

impl AssetAccessor for MockAssetAccessor {
    fn request(&self, url: &str, headers: &[(String, String)]) -> RequestFuture<'_> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), headers.to_vec()));
        let response = self.responses.lock().unwrap().get(url).cloned();
        let url = url.to_string();
        Box::pin(async move {
            match response {
                Some((status, bytes)) => Ok(AssetResponse { status, bytes }),
                None => Err(Error::Http {
                    url,
                    message: "no canned response".to_string(),
                }),
            }
        })
    }
}

/// Holds spawned tasks until a test decides to run them.
#[derive(Default)]
pub(crate) struct QueuedTaskRunner {
    tasks: Mutex<Vec<BackgroundFuture>>,
}

impl QueuedTaskRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    pub(crate) fn pending(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Drive every queued task to completion, in spawn order.
    pub(crate) fn run_all(&self) {
        loop {
            let tasks: Vec<BackgroundFuture> = self.tasks.lock().unwrap().drain(..).collect();
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                block_on(task);
            }
        }
    }
}

impl TaskRunner for QueuedTaskRunner {
    fn run_in_background(&self, task: BackgroundFuture) {
        self.tasks.lock().unwrap().push(task);
    }
}

/// How [`RecordingPreparer`] answers `prepare` calls.
#[derive(Debug, Clone, Copy)]
pub(crate) enum PrepareMode {
    /// Resources are ready synchronously.
    Immediate,
    /// `prepare` returns `Pending` and the handle is parked until the
    /// test calls [`RecordingPreparer::finish_pending`].
    Deferred,
    /// Every `prepare` call fails.
    Fail,
}

/// Records prepare, cancel, and free calls; hands out sequential handles.
pub(crate) struct RecordingPreparer {
    mode: PrepareMode,
    next_handle: Mutex<u64>,
    pub(crate) prepared: Mutex<Vec<TileId>>,
    pub(crate) cancelled: Mutex<Vec<TileId>>,
    pub(crate) freed: Mutex<Vec<(TileId, ResourceHandle)>>,
    pending: Mutex<Vec<(TileId, PrepareHandle)>>,
}

impl RecordingPreparer {
    pub(crate) fn new(mode: PrepareMode) -> Self {
        Self {
            mode,
            next_handle: Mutex::new(0),
            prepared: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            freed: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Complete every parked prepare successfully.
    pub(crate) fn finish_pending(&self) {
        let parked: Vec<(TileId, PrepareHandle)> =
            self.pending.lock().unwrap().drain(..).collect();
        for (_tile, handle) in parked {
            let resources = self.next_resource();
            handle.finish(Ok(resources));
        }
    }

    fn next_resource(&self) -> ResourceHandle {
        let mut next = self.next_handle.lock().unwrap();
        *next += 1;
        ResourceHandle(*next)
    }
}

impl PrepareRendererResources for RecordingPreparer {
    fn prepare(
        &self,
        tile: TileId,
        _content: &dyn TileContent,
        handle: PrepareHandle,
    ) -> Result<Prepared> {
        self.prepared.lock().unwrap().push(tile);
        match self.mode {
            PrepareMode::Immediate => Ok(Prepared::Ready(self.next_resource())),
            PrepareMode::Deferred => {
                self.pending.lock().unwrap().push((tile, handle));
                Ok(Prepared::Pending)
            }
            PrepareMode::Fail => Err(Error::PrepareFailed {
                message: "mock preparer configured to fail".to_string(),
            }),
        }
    }

    fn cancel(&self, tile: TileId) {
        self.cancelled.lock().unwrap().push(tile);
    }

    fn free(&self, tile: TileId, resources: ResourceHandle) {
        self.freed.lock().unwrap().push((tile, resources));
    }
}

/// The three mocks bundled, with the concrete types kept reachable for
/// assertions.
pub(crate) struct TestHarness {
    pub(crate) accessor: Arc<MockAssetAccessor>,
    pub(crate) runner: Arc<QueuedTaskRunner>,
    pub(crate) preparer: Arc<RecordingPreparer>,
}

impl TestHarness {
    pub(crate) fn new(mode: PrepareMode) -> Self {
        init_tracing();
        Self {
            accessor: Arc::new(MockAssetAccessor::new()),
            runner: Arc::new(QueuedTaskRunner::new()),
            preparer: Arc::new(RecordingPreparer::new(mode)),
        }
    }

    pub(crate) fn externals(&self) -> TilesetExternals {
        TilesetExternals {
            asset_accessor: self.accessor.clone(),
            task_runner: self.runner.clone(),
            prepare_renderer_resources: self.preparer.clone(),
        }
    }
}

/// A manifest with a single root tile bounded by a sphere at the origin.
pub(crate) fn sphere_manifest_json(
    geometric_error: f64,
    uri: Option<&str>,
) -> serde_json::Value {
    let mut root = serde_json::json!({
        "boundingVolume": { "sphere": [0.0, 0.0, 0.0, 100.0] },
        "geometricError": geometric_error,
    });
    if let Some(uri) = uri {
        root["content"] = serde_json::json!({ "uri": uri });
    }
    serde_json::json!({
        "asset": { "version": "1.0" },
        "root": root,
    })
}

/// A minimal but valid batched-model payload wrapping `glb`.
pub(crate) fn b3dm_bytes(glb: &[u8]) -> Vec<u8> {
    let byte_length = u32::try_from(28 + glb.len()).unwrap();
    let mut bytes = Vec::with_capacity(28 + glb.len());
    bytes.extend_from_slice(b"b3dm");
    bytes.extend_from_slice(&1_u32.to_le_bytes());
    bytes.extend_from_slice(&byte_length.to_le_bytes());
    bytes.extend_from_slice(&0_u32.to_le_bytes());
    bytes.extend_from_slice(&0_u32.to_le_bytes());
    bytes.extend_from_slice(&0_u32.to_le_bytes());
    bytes.extend_from_slice(&0_u32.to_le_bytes());
    bytes.extend_from_slice(glb);
    bytes
}
