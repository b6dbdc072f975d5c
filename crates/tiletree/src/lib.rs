//! Streaming loader and level-of-detail selector for tiled 3D content.
//!
//! This crate walks a bounding-volume hierarchy described by JSON
//! manifests, picks the tiles worth drawing for a camera based on
//! screen-space error, and streams tile content in and out as the camera
//! moves. It renders nothing itself: the host supplies asset fetching,
//! task spawning, and renderer resource preparation through three small
//! traits and gets back per-frame render lists.
//!
//! # Design principles
//!
//! - **Renderer-agnostic**: content parsing is separated from resource
//!   preparation; the host decides what a "prepared" tile means
//! - **Runtime-agnostic**: background work is boxed futures handed to the
//!   host's task runner, with no executor of its own
//! - **Single-threaded core**: selection and tree mutation happen on the
//!   caller's thread; async results are applied at frame boundaries
//!
//! # Example
//!
//! ```ignore
//! use tiletree::{Camera, Tileset, TilesetOptions, TilesetView};
//!
//! let mut tileset = Tileset::from_url(
//!     "https://example.com/tileset.json",
//!     externals,
//!     TilesetOptions::default(),
//! )
//! .await?;
//! let mut view = TilesetView::new();
//!
//! // Each frame:
//! let result = view.update(&mut tileset, &camera);
//! for tile in &result.new_tiles_to_render_this_frame {
//!     show(tileset.tile(*tile));
//! }
//! for tile in &result.tiles_to_no_longer_render_this_frame {
//!     hide(*tile);
//! }
//! ```

pub mod cache;
mod camera;
pub mod content;
mod error;
mod externals;
mod geodetic;
mod manifest;
mod region;
mod tile;
mod tileset;
mod view;
mod volume;
mod web;

#[cfg(test)]
mod test_support;

pub use cache::{Cache, MemoryCache, NoCache};
pub use camera::Camera;
pub use content::{
    ContentConstructor, ContentInput, FinalizeContext, TileContent, create_content,
    register_content_type,
};
pub use error::{Error, Result};
pub use externals::{
    AssetAccessor, AssetResponse, BackgroundFuture, PrepareHandle, PrepareRendererResources,
    Prepared, RequestFuture, ResourceHandle, TaskRunner, TilesetExternals,
};
pub use geodetic::{Cartographic, Ellipsoid, GlobeRectangle};
pub use manifest::{
    AssetMetadata, ManifestBoundingVolume, ManifestContent, ManifestRefine, ManifestTile,
    TilesetManifest,
};
pub use region::BoundingRegion;
pub use tile::{LoadState, SelectionResult, Tile, TileId, TileRefine, TileSelectionState};
pub use tileset::{EvictionPolicy, Tileset, TilesetOptions, TilesetSource};
pub use view::{TilesetView, ViewUpdateResult};
pub use volume::{BoundingSphere, BoundingVolume, OrientedBox, Plane, PlaneSide};
pub use web::WebAssetAccessor;
