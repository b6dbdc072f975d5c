//! The tileset: tile arena, manifest ingestion, and the content load
//! pipeline.
//!
//! Tiles live in an append-only arena indexed by [`TileId`], so ids stay
//! valid for the tileset's whole lifetime. Loading is fire-and-poll:
//! fetch-and-parse work runs on background tasks through the host's
//! [`TaskRunner`](crate::TaskRunner), results come home over a bounded
//! channel, and [`process_completions`](Tileset::process_completions)
//! applies them on the traversal thread at the start of each update.

use std::collections::HashSet;
use std::sync::Arc;

use glam::DMat4;
use serde::Deserialize;

use crate::content::{
    ContentInput, TileContent, create_content, register_builtin_content_types,
};
use crate::error::{Error, Result};
use crate::externals::{
    AssetAccessor, Completion, PrepareHandle, Prepared, TilesetExternals,
};
use crate::manifest::{ManifestContent, ManifestTile, TilesetManifest, resolve_url};
use crate::tile::{LoadState, Tile, TileId, TileRefine};

/// Capacity of the completion channel. Completions outstanding at once
/// are bounded by the load cap plus pending resource preparations.
const COMPLETION_CHANNEL_CAPACITY: usize = 100;

/// What happens to a `Replace` parent's loaded content once the parent
/// refines into its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Keep the content resident until the parent's subtree is culled.
    /// Costs memory, avoids re-fetching when the camera pulls back.
    #[default]
    KeepWarm,
    /// Drop the content as soon as the parent refines.
    EvictRefined,
}

/// Tileset-wide tuning knobs.
#[derive(Debug, Clone)]
pub struct TilesetOptions {
    /// Maximum number of content loads in flight at once. Tiles wanting
    /// content beyond the cap stay queued and retry next frame.
    pub maximum_simultaneous_tile_loads: usize,
    pub eviction_policy: EvictionPolicy,
    /// Extra headers attached to every request this tileset makes, on
    /// top of whatever the source's auth flow adds.
    pub request_headers: Vec<(String, String)>,
}

impl Default for TilesetOptions {
    fn default() -> Self {
        Self {
            maximum_simultaneous_tile_loads: 20,
            eviction_policy: EvictionPolicy::default(),
            request_headers: Vec::new(),
        }
    }
}

/// Where a tileset comes from.
#[derive(Debug, Clone)]
pub enum TilesetSource {
    /// A directly reachable manifest URL.
    Url(String),
    /// An asset served through an ion-style asset API. The endpoint is
    /// resolved first and every subsequent request carries the bearer
    /// token it returns.
    Asset {
        server: String,
        asset_id: u64,
        access_token: String,
    },
}

/// The asset API's endpoint document.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetEndpoint {
    url: String,
    access_token: String,
}

/// A streamed tile hierarchy.
pub struct Tileset {
    pub(crate) tiles: Vec<Tile>,
    pub(crate) externals: TilesetExternals,
    pub(crate) options: TilesetOptions,
    /// Headers attached to every asset request (bearer token for asset
    /// sources).
    request_headers: Vec<(String, String)>,
    completion_tx: async_channel::Sender<Completion>,
    completion_rx: async_channel::Receiver<Completion>,
    loads_in_flight: usize,
    /// Tiles with loaded or in-flight content, the only ones eviction
    /// ever needs to look at.
    pub(crate) loaded_tiles: HashSet<TileId>,
}

impl Tileset {
    /// Fetch and ingest the manifest at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error when the manifest cannot be fetched or parsed;
    /// a root failure is fatal, unlike per-tile content failures.
    pub async fn from_url(
        url: impl Into<String>,
        externals: TilesetExternals,
        options: TilesetOptions,
    ) -> Result<Self> {
        Self::from_source(TilesetSource::Url(url.into()), externals, options).await
    }

    /// Fetch and ingest a tileset from `source`.
    ///
    /// # Errors
    ///
    /// Returns an error when endpoint resolution fails or the root
    /// manifest cannot be fetched or parsed.
    pub async fn from_source(
        source: TilesetSource,
        externals: TilesetExternals,
        options: TilesetOptions,
    ) -> Result<Self> {
        let (url, endpoint_headers) = match source {
            TilesetSource::Url(url) => (url, Vec::new()),
            TilesetSource::Asset {
                server,
                asset_id,
                access_token,
            } => {
                resolve_asset_endpoint(
                    externals.asset_accessor.as_ref(),
                    &server,
                    asset_id,
                    &access_token,
                    &options.request_headers,
                )
                .await?
            }
        };

        let mut request_headers = options.request_headers.clone();
        request_headers.extend(endpoint_headers);
        let response = externals.asset_accessor.request(&url, &request_headers).await?;
        if !(200..300).contains(&response.status) {
            return Err(Error::HttpStatus {
                url,
                status: response.status,
            });
        }

        Self::build(&response.bytes, &url, request_headers, externals, options)
    }

    /// Ingest a manifest already held in memory. Content URIs resolve
    /// against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ManifestParse`] when the bytes are not a valid
    /// manifest.
    pub fn from_manifest_bytes(
        bytes: &[u8],
        base_url: &str,
        externals: TilesetExternals,
        options: TilesetOptions,
    ) -> Result<Self> {
        let request_headers = options.request_headers.clone();
        Self::build(bytes, base_url, request_headers, externals, options)
    }

    fn build(
        bytes: &[u8],
        base_url: &str,
        request_headers: Vec<(String, String)>,
        externals: TilesetExternals,
        options: TilesetOptions,
    ) -> Result<Self> {
        register_builtin_content_types();

        let manifest: TilesetManifest =
            serde_json::from_slice(bytes).map_err(|e| Error::ManifestParse {
                url: base_url.to_string(),
                message: e.to_string(),
            })?;

        let (completion_tx, completion_rx) = async_channel::bounded(COMPLETION_CHANNEL_CAPACITY);
        let mut tileset = Self {
            tiles: Vec::new(),
            externals,
            options,
            request_headers,
            completion_tx,
            completion_rx,
            loads_in_flight: 0,
            loaded_tiles: HashSet::new(),
        };

        let root = tileset.add_manifest_tile(
            &manifest.root,
            base_url,
            None,
            DMat4::IDENTITY,
            TileRefine::Replace,
        );
        debug_assert_eq!(root, TileId(0));

        tracing::info!(
            url = base_url,
            tiles = tileset.tiles.len(),
            "tileset manifest ingested"
        );
        Ok(tileset)
    }

    /// Recursively append a manifest tile and its descendants to the
    /// arena. Transforms compose parent-first and the bounding volume is
    /// moved to world space right away; refine mode is inherited when the
    /// manifest leaves it out.
    fn add_manifest_tile(
        &mut self,
        manifest_tile: &ManifestTile,
        base_url: &str,
        parent: Option<TileId>,
        parent_transform: DMat4,
        inherited_refine: TileRefine,
    ) -> TileId {
        let local_transform = manifest_tile
            .transform
            .map_or(DMat4::IDENTITY, |m| DMat4::from_cols_array(&m));
        let transform = parent_transform * local_transform;
        let refine = manifest_tile.refine.map_or(inherited_refine, TileRefine::from);
        let bounding_volume = manifest_tile
            .bounding_volume
            .to_bounding_volume()
            .transform(&transform);
        let content_url = manifest_tile
            .content
            .as_ref()
            .and_then(ManifestContent::uri)
            .map(|uri| resolve_url(base_url, uri));

        let id = self.next_tile_id();
        self.tiles.push(Tile::new(
            id,
            parent,
            bounding_volume,
            manifest_tile.geometric_error,
            refine,
            transform,
            content_url,
        ));

        for child in &manifest_tile.children {
            let child_id =
                self.add_manifest_tile(child, base_url, Some(id), transform, refine);
            self.tiles[id.index()].children.push(child_id);
        }
        id
    }

    fn next_tile_id(&self) -> TileId {
        // The arena is append-only, so ids stay valid for the tileset's
        // lifetime.
        #[allow(clippy::cast_possible_truncation)]
        let id = self.tiles.len() as u32;
        TileId(id)
    }

    /// Graft an external tileset's tiles under `tile`, which refines into
    /// them from then on. The spliced root inherits `tile`'s accumulated
    /// transform and refine mode.
    pub(crate) fn splice_external(
        &mut self,
        tile: TileId,
        manifest: &TilesetManifest,
        base_url: &str,
    ) {
        let parent_transform = self.tiles[tile.index()].transform;
        let inherited_refine = self.tiles[tile.index()].refine;
        let root = self.add_manifest_tile(
            &manifest.root,
            base_url,
            Some(tile),
            parent_transform,
            inherited_refine,
        );
        self.tiles[tile.index()].children.push(root);
        tracing::debug!(
            tile = tile.index(),
            url = base_url,
            "external tileset spliced"
        );
    }

    /// The root tile. The arena is never empty.
    #[must_use]
    pub const fn root(&self) -> TileId {
        TileId(0)
    }

    /// Look up a tile. Ids from this tileset are always valid.
    #[must_use]
    pub fn tile(&self, id: TileId) -> &Tile {
        &self.tiles[id.index()]
    }

    #[must_use]
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    #[must_use]
    pub const fn options(&self) -> &TilesetOptions {
        &self.options
    }

    /// Apply every completion that has arrived since the last update.
    /// Results stamped with an out-of-date load generation belong to
    /// cancelled operations and are discarded.
    pub(crate) fn process_completions(&mut self) {
        while let Ok(completion) = self.completion_rx.try_recv() {
            match completion {
                Completion::ContentParsed {
                    tile,
                    generation,
                    result,
                } => {
                    self.loads_in_flight = self.loads_in_flight.saturating_sub(1);
                    if self.tiles[tile.index()].load_generation != generation {
                        tracing::debug!(tile = tile.index(), "discarding stale content result");
                        continue;
                    }
                    match result {
                        Ok(content) => self.attach_content(tile, content),
                        Err(e) => {
                            tracing::warn!(
                                tile = tile.index(),
                                error = %e,
                                "tile content failed to load"
                            );
                            self.tiles[tile.index()].load_state = LoadState::Failed;
                            self.loaded_tiles.remove(&tile);
                        }
                    }
                }
                Completion::ResourcesPrepared {
                    tile,
                    generation,
                    result,
                } => {
                    if self.tiles[tile.index()].load_generation != generation {
                        // The tile moved on; hand back whatever got built.
                        if let Ok(resources) = result {
                            self.externals.prepare_renderer_resources.free(tile, resources);
                        }
                        continue;
                    }
                    match result {
                        Ok(resources) => {
                            self.tiles[tile.index()].resource_handle = Some(resources);
                            self.tiles[tile.index()].load_state =
                                LoadState::RendererResourcesPrepared;
                            self.finalize_tile(tile);
                        }
                        Err(e) => {
                            tracing::warn!(
                                tile = tile.index(),
                                error = %e,
                                "renderer resource preparation failed"
                            );
                            self.tiles[tile.index()].load_state = LoadState::Failed;
                            self.tiles[tile.index()].content = None;
                            self.loaded_tiles.remove(&tile);
                        }
                    }
                }
            }
        }
    }

    /// Attach parsed content and kick off resource preparation.
    fn attach_content(&mut self, id: TileId, content: Box<dyn TileContent>) {
        let generation = self.tiles[id.index()].load_generation;
        let handle = PrepareHandle::new(self.completion_tx.clone(), id, generation);
        let prepared = self
            .externals
            .prepare_renderer_resources
            .prepare(id, content.as_ref(), handle);

        let tile = &mut self.tiles[id.index()];
        tile.content = Some(content);
        tile.load_state = LoadState::ContentLoaded;

        match prepared {
            Ok(Prepared::Ready(resources)) => {
                tile.resource_handle = Some(resources);
                tile.load_state = LoadState::RendererResourcesPrepared;
                self.finalize_tile(id);
            }
            Ok(Prepared::Pending) => {}
            Err(e) => {
                tracing::warn!(
                    tile = id.index(),
                    error = %e,
                    "renderer resource preparation failed"
                );
                tile.load_state = LoadState::Failed;
                tile.content = None;
                self.loaded_tiles.remove(&id);
            }
        }
    }

    /// Run the content's finalize hook and settle the tile in `Done`.
    /// This is the one place content may mutate the tree (external
    /// tilesets splice their tiles in here).
    fn finalize_tile(&mut self, id: TileId) {
        let Some(mut content) = self.tiles[id.index()].content.take() else {
            return;
        };
        let mut context = crate::content::FinalizeContext {
            tileset: self,
            tile: id,
        };
        content.finalize_load(&mut context);

        let tile = &mut self.tiles[id.index()];
        tile.content = Some(content);
        tile.load_state = LoadState::Done;
        if !tile.content.as_deref().is_some_and(TileContent::is_renderable) {
            // Nothing will ever need evicting for this tile.
            self.loaded_tiles.remove(&id);
        }
    }

    /// Start loading a tile's content, if it has any, wants loading, and
    /// the in-flight cap allows. Tiles deferred by the cap simply remain
    /// `Unloaded` and get another chance next frame.
    pub(crate) fn request_content(&mut self, id: TileId) {
        if self.tiles[id.index()].load_state != LoadState::Unloaded {
            return;
        }
        let Some(url) = self.tiles[id.index()].content_url.clone() else {
            return;
        };
        if self.loads_in_flight >= self.options.maximum_simultaneous_tile_loads {
            return;
        }

        self.loads_in_flight += 1;
        self.loaded_tiles.insert(id);
        let generation = self.tiles[id.index()].load_generation;
        self.tiles[id.index()].load_state = LoadState::ContentLoading;

        let accessor = Arc::clone(&self.externals.asset_accessor);
        let headers = self.request_headers.clone();
        let sender = self.completion_tx.clone();
        self.externals
            .task_runner
            .run_in_background(Box::pin(async move {
                let result = fetch_and_parse(accessor.as_ref(), id, &url, &headers).await;
                let _ = sender
                    .send(Completion::ContentParsed {
                        tile: id,
                        generation,
                        result,
                    })
                    .await;
            }));
    }

    /// Abandon an in-flight load. The running task is detached; its
    /// result is discarded when it eventually arrives, and the tile can
    /// be re-requested immediately.
    pub fn cancel_load(&mut self, id: TileId) {
        match self.tiles[id.index()].load_state {
            LoadState::ContentLoading => {
                let tile = &mut self.tiles[id.index()];
                tile.load_generation += 1;
                tile.load_state = LoadState::Unloaded;
                self.loaded_tiles.remove(&id);
                tracing::debug!(tile = id.index(), "content load cancelled");
            }
            LoadState::ContentLoaded => {
                self.externals.prepare_renderer_resources.cancel(id);
                let tile = &mut self.tiles[id.index()];
                tile.load_generation += 1;
                tile.content = None;
                tile.load_state = LoadState::Unloaded;
                self.loaded_tiles.remove(&id);
                tracing::debug!(tile = id.index(), "resource preparation cancelled");
            }
            _ => {}
        }
    }

    /// Evict a tile's content: cancel anything in flight, release
    /// prepared resources, and return the tile to `Unloaded`.
    ///
    /// External-tileset content stays resident; the tiles it grafted are
    /// part of the arena and there is nothing to release.
    pub(crate) fn unload_content(&mut self, id: TileId) {
        self.cancel_load(id);

        if !matches!(
            self.tiles[id.index()].load_state,
            LoadState::RendererResourcesPrepared | LoadState::Done
        ) {
            return;
        }
        if self.tiles[id.index()]
            .content
            .as_deref()
            .is_some_and(|c| !c.is_renderable())
        {
            self.loaded_tiles.remove(&id);
            return;
        }

        if let Some(resources) = self.tiles[id.index()].resource_handle.take() {
            self.externals.prepare_renderer_resources.free(id, resources);
        }
        let tile = &mut self.tiles[id.index()];
        tile.content = None;
        tile.load_state = LoadState::Unloaded;
        self.loaded_tiles.remove(&id);
        tracing::debug!(tile = id.index(), "content evicted");
    }
}

impl Drop for Tileset {
    fn drop(&mut self) {
        // Dropping the receiver closes the channel, so in-flight task
        // sends become no-ops. Resources already handed out still need
        // returning to the preparer.
        for index in 0..self.tiles.len() {
            let id = self.tiles[index].id;
            match self.tiles[index].load_state {
                LoadState::ContentLoaded => {
                    self.externals.prepare_renderer_resources.cancel(id);
                }
                LoadState::RendererResourcesPrepared | LoadState::Done => {
                    if let Some(resources) = self.tiles[index].resource_handle.take() {
                        self.externals.prepare_renderer_resources.free(id, resources);
                    }
                }
                _ => {}
            }
        }
    }
}

/// Fetch a tile's bytes and build its content, on a background task.
async fn fetch_and_parse(
    accessor: &dyn AssetAccessor,
    tile: TileId,
    url: &str,
    headers: &[(String, String)],
) -> Result<Box<dyn TileContent>> {
    let response = accessor.request(url, headers).await?;
    if !(200..300).contains(&response.status) {
        return Err(Error::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }
    create_content(ContentInput {
        tile,
        url: url.to_string(),
        bytes: response.bytes,
    })
}

/// Ask the asset API where the tileset actually lives and which token to
/// present for it.
async fn resolve_asset_endpoint(
    accessor: &dyn AssetAccessor,
    server: &str,
    asset_id: u64,
    access_token: &str,
    headers: &[(String, String)],
) -> Result<(String, Vec<(String, String)>)> {
    let url = format!(
        "{}/v1/assets/{asset_id}/endpoint?access_token={access_token}",
        server.trim_end_matches('/')
    );
    tracing::debug!(url, asset_id, "resolving asset endpoint");

    let response = accessor.request(&url, headers).await?;
    if !(200..300).contains(&response.status) {
        return Err(Error::HttpStatus {
            url,
            status: response.status,
        });
    }

    let endpoint: AssetEndpoint =
        serde_json::from_slice(&response.bytes).map_err(|e| Error::AssetEndpoint {
            url: url.clone(),
            detail: e.to_string(),
        })?;
    let headers = vec![(
        "Authorization".to_string(),
        format!("Bearer {}", endpoint.access_token),
    )];
    Ok((endpoint.url, headers))
}

#[cfg(test)]
mod tests {
    use glam::DVec3;

    use super::*;
    use crate::test_support::{PrepareMode, TestHarness, b3dm_bytes, sphere_manifest_json};
    use crate::volume::BoundingVolume;

    fn make_tileset(
        manifest: &serde_json::Value,
        harness: &TestHarness,
        options: TilesetOptions,
    ) -> Tileset {
        Tileset::from_manifest_bytes(
            &serde_json::to_vec(manifest).unwrap(),
            "https://example.com/tileset.json",
            harness.externals(),
            options,
        )
        .unwrap()
    }

    #[test]
    fn test_ingestion_links_children_and_inherits_refine() {
        let harness = TestHarness::new(PrepareMode::Immediate);
        let manifest = serde_json::json!({
            "asset": { "version": "1.0" },
            "root": {
                "boundingVolume": { "sphere": [0.0, 0.0, 0.0, 100.0] },
                "geometricError": 64.0,
                "refine": "ADD",
                "children": [
                    {
                        "boundingVolume": { "sphere": [10.0, 0.0, 0.0, 50.0] },
                        "geometricError": 16.0,
                        "content": { "uri": "tiles/a.b3dm" }
                    },
                    {
                        "boundingVolume": { "sphere": [-10.0, 0.0, 0.0, 50.0] },
                        "geometricError": 16.0,
                        "refine": "REPLACE"
                    }
                ]
            }
        });
        let tileset = make_tileset(&manifest, &harness, TilesetOptions::default());

        assert_eq!(tileset.tile_count(), 3);
        let root = tileset.tile(tileset.root());
        assert_eq!(root.children().len(), 2);
        assert_eq!(root.refine(), TileRefine::Add);

        let first = tileset.tile(root.children()[0]);
        assert_eq!(first.refine(), TileRefine::Add);
        assert_eq!(first.parent(), Some(tileset.root()));
        assert_eq!(
            first.content_url(),
            Some("https://example.com/tiles/a.b3dm")
        );

        let second = tileset.tile(root.children()[1]);
        assert_eq!(second.refine(), TileRefine::Replace);
        assert!(second.is_structural());
    }

    #[test]
    fn test_ingestion_composes_transforms_into_world_volumes() {
        let harness = TestHarness::new(PrepareMode::Immediate);
        let manifest = serde_json::json!({
            "asset": { "version": "1.0" },
            "root": {
                "boundingVolume": { "sphere": [0.0, 0.0, 0.0, 10.0] },
                "geometricError": 64.0,
                "transform": [
                    1.0, 0.0, 0.0, 0.0,
                    0.0, 1.0, 0.0, 0.0,
                    0.0, 0.0, 1.0, 0.0,
                    100.0, 0.0, 0.0, 1.0
                ],
                "children": [
                    {
                        "boundingVolume": { "sphere": [0.0, 0.0, 0.0, 5.0] },
                        "geometricError": 0.0,
                        "transform": [
                            1.0, 0.0, 0.0, 0.0,
                            0.0, 1.0, 0.0, 0.0,
                            0.0, 0.0, 1.0, 0.0,
                            0.0, 50.0, 0.0, 1.0
                        ]
                    }
                ]
            }
        });
        let tileset = make_tileset(&manifest, &harness, TilesetOptions::default());

        let BoundingVolume::Sphere(root_sphere) =
            tileset.tile(tileset.root()).bounding_volume()
        else {
            panic!("expected a sphere");
        };
        assert_eq!(root_sphere.center, DVec3::new(100.0, 0.0, 0.0));

        let child_id = tileset.tile(tileset.root()).children()[0];
        let BoundingVolume::Sphere(child_sphere) = tileset.tile(child_id).bounding_volume()
        else {
            panic!("expected a sphere");
        };
        assert_eq!(child_sphere.center, DVec3::new(100.0, 50.0, 0.0));
    }

    #[test]
    fn test_invalid_manifest_is_fatal() {
        let harness = TestHarness::new(PrepareMode::Immediate);
        let result = Tileset::from_manifest_bytes(
            br#"{ "asset": { "version": "1.0" } }"#,
            "https://example.com/tileset.json",
            harness.externals(),
            TilesetOptions::default(),
        );
        assert!(matches!(result, Err(Error::ManifestParse { .. })));
    }

    #[test]
    fn test_load_reaches_done_with_immediate_prepare() {
        let harness = TestHarness::new(PrepareMode::Immediate);
        harness.accessor.insert(
            "https://example.com/leaf.b3dm",
            200,
            b3dm_bytes(b"glTF model"),
        );
        let manifest = sphere_manifest_json(16.0, Some("leaf.b3dm"));
        let mut tileset = make_tileset(&manifest, &harness, TilesetOptions::default());
        let root = tileset.root();

        tileset.request_content(root);
        assert_eq!(tileset.tile(root).load_state(), LoadState::ContentLoading);

        harness.runner.run_all();
        tileset.process_completions();

        assert_eq!(tileset.tile(root).load_state(), LoadState::Done);
        assert!(tileset.tile(root).is_renderable());
        assert!(tileset.tile(root).resource_handle().is_some());
        assert_eq!(harness.preparer.prepared.lock().unwrap().as_slice(), &[root]);
    }

    #[test]
    fn test_load_waits_in_content_loaded_for_deferred_prepare() {
        let harness = TestHarness::new(PrepareMode::Deferred);
        harness.accessor.insert(
            "https://example.com/leaf.b3dm",
            200,
            b3dm_bytes(b"glTF model"),
        );
        let manifest = sphere_manifest_json(16.0, Some("leaf.b3dm"));
        let mut tileset = make_tileset(&manifest, &harness, TilesetOptions::default());
        let root = tileset.root();

        tileset.request_content(root);
        harness.runner.run_all();
        tileset.process_completions();
        assert_eq!(tileset.tile(root).load_state(), LoadState::ContentLoaded);
        assert!(!tileset.tile(root).is_renderable());

        harness.preparer.finish_pending();
        tileset.process_completions();
        assert_eq!(tileset.tile(root).load_state(), LoadState::Done);
        assert!(tileset.tile(root).is_renderable());
    }

    #[test]
    fn test_http_error_status_fails_tile() {
        let harness = TestHarness::new(PrepareMode::Immediate);
        harness
            .accessor
            .insert("https://example.com/leaf.b3dm", 404, Vec::new());
        let manifest = sphere_manifest_json(16.0, Some("leaf.b3dm"));
        let mut tileset = make_tileset(&manifest, &harness, TilesetOptions::default());
        let root = tileset.root();

        tileset.request_content(root);
        harness.runner.run_all();
        tileset.process_completions();

        assert_eq!(tileset.tile(root).load_state(), LoadState::Failed);
        assert!(!tileset.tile(root).is_renderable());
        assert!(tileset.loaded_tiles.is_empty());
    }

    #[test]
    fn test_prepare_failure_fails_tile() {
        let harness = TestHarness::new(PrepareMode::Fail);
        harness.accessor.insert(
            "https://example.com/leaf.b3dm",
            200,
            b3dm_bytes(b"glTF model"),
        );
        let manifest = sphere_manifest_json(16.0, Some("leaf.b3dm"));
        let mut tileset = make_tileset(&manifest, &harness, TilesetOptions::default());
        let root = tileset.root();

        tileset.request_content(root);
        harness.runner.run_all();
        tileset.process_completions();

        assert_eq!(tileset.tile(root).load_state(), LoadState::Failed);
        assert!(tileset.tile(root).content().is_none());
    }

    #[test]
    fn test_load_cap_defers_requests() {
        let harness = TestHarness::new(PrepareMode::Immediate);
        let manifest = serde_json::json!({
            "asset": { "version": "1.0" },
            "root": {
                "boundingVolume": { "sphere": [0.0, 0.0, 0.0, 100.0] },
                "geometricError": 64.0,
                "children": [
                    {
                        "boundingVolume": { "sphere": [10.0, 0.0, 0.0, 50.0] },
                        "geometricError": 0.0,
                        "content": { "uri": "a.b3dm" }
                    },
                    {
                        "boundingVolume": { "sphere": [-10.0, 0.0, 0.0, 50.0] },
                        "geometricError": 0.0,
                        "content": { "uri": "b.b3dm" }
                    }
                ]
            }
        });
        let options = TilesetOptions {
            maximum_simultaneous_tile_loads: 1,
            ..TilesetOptions::default()
        };
        let mut tileset = make_tileset(&manifest, &harness, options);
        let children: Vec<TileId> = tileset.tile(tileset.root()).children().to_vec();

        tileset.request_content(children[0]);
        tileset.request_content(children[1]);

        assert_eq!(
            tileset.tile(children[0]).load_state(),
            LoadState::ContentLoading
        );
        assert_eq!(tileset.tile(children[1]).load_state(), LoadState::Unloaded);
        assert_eq!(harness.runner.pending(), 1);
    }

    #[test]
    fn test_cancel_discards_stale_result_and_allows_rerequest() {
        let harness = TestHarness::new(PrepareMode::Immediate);
        harness.accessor.insert(
            "https://example.com/leaf.b3dm",
            200,
            b3dm_bytes(b"glTF model"),
        );
        let manifest = sphere_manifest_json(16.0, Some("leaf.b3dm"));
        let mut tileset = make_tileset(&manifest, &harness, TilesetOptions::default());
        let root = tileset.root();

        tileset.request_content(root);
        tileset.cancel_load(root);
        assert_eq!(tileset.tile(root).load_state(), LoadState::Unloaded);

        // The detached task still runs; its result must be dropped.
        harness.runner.run_all();
        tileset.process_completions();
        assert_eq!(tileset.tile(root).load_state(), LoadState::Unloaded);
        assert!(tileset.tile(root).content().is_none());

        // A fresh request is stamped with the new generation and lands.
        tileset.request_content(root);
        harness.runner.run_all();
        tileset.process_completions();
        assert_eq!(tileset.tile(root).load_state(), LoadState::Done);
        assert_eq!(
            harness
                .accessor
                .request_count("https://example.com/leaf.b3dm"),
            2
        );
    }

    #[test]
    fn test_cancel_then_immediate_rerequest_leaves_one_live_request() {
        let harness = TestHarness::new(PrepareMode::Immediate);
        harness.accessor.insert(
            "https://example.com/leaf.b3dm",
            200,
            b3dm_bytes(b"glTF model"),
        );
        let manifest = sphere_manifest_json(16.0, Some("leaf.b3dm"));
        let mut tileset = make_tileset(&manifest, &harness, TilesetOptions::default());
        let root = tileset.root();

        tileset.request_content(root);
        tileset.cancel_load(root);
        tileset.request_content(root);
        assert_eq!(tileset.tile(root).load_state(), LoadState::ContentLoading);

        // Both tasks run; only the second generation's result lands, and
        // both release their in-flight slot.
        harness.runner.run_all();
        tileset.process_completions();
        assert_eq!(tileset.tile(root).load_state(), LoadState::Done);
        assert_eq!(tileset.loads_in_flight, 0);
        assert_eq!(harness.preparer.prepared.lock().unwrap().as_slice(), &[root]);
    }

    #[test]
    fn test_done_tile_is_never_rerequested() {
        let harness = TestHarness::new(PrepareMode::Immediate);
        harness.accessor.insert(
            "https://example.com/leaf.b3dm",
            200,
            b3dm_bytes(b"glTF model"),
        );
        let manifest = sphere_manifest_json(16.0, Some("leaf.b3dm"));
        let mut tileset = make_tileset(&manifest, &harness, TilesetOptions::default());
        let root = tileset.root();

        tileset.request_content(root);
        harness.runner.run_all();
        tileset.process_completions();
        assert_eq!(tileset.tile(root).load_state(), LoadState::Done);

        // Loading again only makes sense from Unloaded.
        tileset.request_content(root);
        assert_eq!(tileset.tile(root).load_state(), LoadState::Done);
        assert_eq!(harness.runner.pending(), 0);

        tileset.unload_content(root);
        assert_eq!(tileset.tile(root).load_state(), LoadState::Unloaded);
        tileset.request_content(root);
        assert_eq!(tileset.tile(root).load_state(), LoadState::ContentLoading);
    }

    #[test]
    fn test_cancel_during_deferred_prepare_notifies_preparer() {
        let harness = TestHarness::new(PrepareMode::Deferred);
        harness.accessor.insert(
            "https://example.com/leaf.b3dm",
            200,
            b3dm_bytes(b"glTF model"),
        );
        let manifest = sphere_manifest_json(16.0, Some("leaf.b3dm"));
        let mut tileset = make_tileset(&manifest, &harness, TilesetOptions::default());
        let root = tileset.root();

        tileset.request_content(root);
        harness.runner.run_all();
        tileset.process_completions();
        assert_eq!(tileset.tile(root).load_state(), LoadState::ContentLoaded);

        tileset.cancel_load(root);
        assert_eq!(tileset.tile(root).load_state(), LoadState::Unloaded);
        assert_eq!(harness.preparer.cancelled.lock().unwrap().as_slice(), &[root]);

        // If the preparer finishes anyway, the handle is returned to it.
        harness.preparer.finish_pending();
        tileset.process_completions();
        assert_eq!(tileset.tile(root).load_state(), LoadState::Unloaded);
        assert_eq!(harness.preparer.freed.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unload_frees_resources() {
        let harness = TestHarness::new(PrepareMode::Immediate);
        harness.accessor.insert(
            "https://example.com/leaf.b3dm",
            200,
            b3dm_bytes(b"glTF model"),
        );
        let manifest = sphere_manifest_json(16.0, Some("leaf.b3dm"));
        let mut tileset = make_tileset(&manifest, &harness, TilesetOptions::default());
        let root = tileset.root();

        tileset.request_content(root);
        harness.runner.run_all();
        tileset.process_completions();
        let handle = tileset.tile(root).resource_handle().unwrap();

        tileset.unload_content(root);
        assert_eq!(tileset.tile(root).load_state(), LoadState::Unloaded);
        assert!(tileset.tile(root).content().is_none());
        assert_eq!(
            harness.preparer.freed.lock().unwrap().as_slice(),
            &[(root, handle)]
        );
        assert!(tileset.loaded_tiles.is_empty());
    }

    #[test]
    fn test_option_headers_attach_to_content_requests() {
        let harness = TestHarness::new(PrepareMode::Immediate);
        harness.accessor.insert(
            "https://example.com/leaf.b3dm",
            200,
            b3dm_bytes(b"glTF model"),
        );
        let manifest = sphere_manifest_json(16.0, Some("leaf.b3dm"));
        let options = TilesetOptions {
            request_headers: vec![("x-api-key".to_string(), "secret".to_string())],
            ..TilesetOptions::default()
        };
        let mut tileset = make_tileset(&manifest, &harness, options);

        tileset.request_content(tileset.root());
        harness.runner.run_all();

        let requests = harness.accessor.requests.lock().unwrap();
        assert_eq!(
            requests[0].1,
            vec![("x-api-key".to_string(), "secret".to_string())]
        );
    }

    #[test]
    fn test_external_tileset_splices_children_at_finalize() {
        let harness = TestHarness::new(PrepareMode::Immediate);
        let external = serde_json::json!({
            "asset": { "version": "1.0" },
            "root": {
                "boundingVolume": { "sphere": [5.0, 0.0, 0.0, 40.0] },
                "geometricError": 8.0,
                "content": { "uri": "deep/leaf.b3dm" }
            }
        });
        harness.accessor.insert(
            "https://example.com/sub/tileset.json",
            200,
            serde_json::to_vec(&external).unwrap(),
        );
        let manifest = sphere_manifest_json(16.0, Some("sub/tileset.json"));
        let mut tileset = make_tileset(&manifest, &harness, TilesetOptions::default());
        let root = tileset.root();

        tileset.request_content(root);
        harness.runner.run_all();
        tileset.process_completions();

        assert_eq!(tileset.tile(root).load_state(), LoadState::Done);
        // The tile finished loading but draws nothing itself.
        assert!(!tileset.tile(root).is_renderable());
        assert_eq!(tileset.tile(root).children().len(), 1);

        let spliced = tileset.tile(tileset.tile(root).children()[0]);
        assert_eq!(spliced.parent(), Some(root));
        assert_eq!(
            spliced.content_url(),
            Some("https://example.com/sub/deep/leaf.b3dm")
        );
        // Nothing about the external tile itself needs eviction.
        assert!(tileset.loaded_tiles.is_empty());
    }

    #[test]
    fn test_drop_returns_outstanding_resources() {
        let harness = TestHarness::new(PrepareMode::Immediate);
        harness.accessor.insert(
            "https://example.com/leaf.b3dm",
            200,
            b3dm_bytes(b"glTF model"),
        );
        let manifest = sphere_manifest_json(16.0, Some("leaf.b3dm"));
        {
            let mut tileset = make_tileset(&manifest, &harness, TilesetOptions::default());
            let root = tileset.root();
            tileset.request_content(root);
            harness.runner.run_all();
            tileset.process_completions();
            assert!(tileset.tile(root).resource_handle().is_some());
        }
        assert_eq!(harness.preparer.freed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_asset_source_resolves_endpoint_and_carries_bearer_token() {
        let harness = TestHarness::new(PrepareMode::Immediate);
        harness.accessor.insert(
            "https://api.example.com/v1/assets/1387142/endpoint?access_token=master-key",
            200,
            serde_json::to_vec(&serde_json::json!({
                "url": "https://assets.example.com/1387142/tileset.json",
                "accessToken": "scoped-token"
            }))
            .unwrap(),
        );
        harness.accessor.insert(
            "https://assets.example.com/1387142/tileset.json",
            200,
            serde_json::to_vec(&sphere_manifest_json(16.0, Some("leaf.b3dm"))).unwrap(),
        );
        harness.accessor.insert(
            "https://assets.example.com/1387142/leaf.b3dm",
            200,
            b3dm_bytes(b"glTF model"),
        );

        let mut tileset = Tileset::from_source(
            TilesetSource::Asset {
                server: "https://api.example.com".to_string(),
                asset_id: 1_387_142,
                access_token: "master-key".to_string(),
            },
            harness.externals(),
            TilesetOptions::default(),
        )
        .await
        .unwrap();

        let root = tileset.root();
        assert_eq!(
            tileset.tile(root).content_url(),
            Some("https://assets.example.com/1387142/leaf.b3dm")
        );

        tileset.request_content(root);
        harness.runner.run_all();
        tileset.process_completions();
        assert_eq!(tileset.tile(root).load_state(), LoadState::Done);

        let requests = harness.accessor.requests.lock().unwrap();
        let bearer = ("Authorization".to_string(), "Bearer scoped-token".to_string());
        let manifest_request = requests
            .iter()
            .find(|(url, _)| url.ends_with("tileset.json"))
            .unwrap();
        assert_eq!(manifest_request.1, vec![bearer.clone()]);
        let content_request = requests
            .iter()
            .find(|(url, _)| url.ends_with("leaf.b3dm"))
            .unwrap();
        assert_eq!(content_request.1, vec![bearer]);
    }
}
