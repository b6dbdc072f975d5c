//! Per-view tile selection.
//!
//! A [`TilesetView`] runs the level-of-detail traversal for one camera:
//! every frame it walks the tree from the root, culls against the view
//! frustum, compares each tile's screen-space error against the view's
//! tolerance, and either selects the tile for rendering or descends into
//! its children. Selection also drives loading (render candidates without
//! content get requested) and eviction (loaded tiles the traversal no
//! longer reaches get unloaded).
//!
//! Several views can share one tileset; each carries its own error
//! tolerance and render-list history.

use std::collections::HashSet;

use crate::camera::Camera;
use crate::tile::{LoadState, SelectionResult, TileId, TileRefine};
use crate::tileset::{EvictionPolicy, Tileset};

/// Default screen-space-error tolerance in pixels.
const DEFAULT_MAXIMUM_SCREEN_SPACE_ERROR: f64 = 16.0;

/// One camera's view of a tileset across frames.
pub struct TilesetView {
    /// Largest screen-space error, in pixels, tolerated before a tile is
    /// refined into its children. Lower means more detail and more tiles.
    pub maximum_screen_space_error: f64,
    last_frame_number: u32,
    /// Last frame's render list, kept to compute the delta lists.
    previously_rendered: Vec<TileId>,
}

/// What one call to [`TilesetView::update`] decided.
#[derive(Debug, Clone, Default)]
pub struct ViewUpdateResult {
    /// Every tile the view wants drawn this frame, in traversal order.
    pub tiles_to_render_this_frame: Vec<TileId>,
    /// Tiles rendered this frame that were not rendered last frame.
    pub new_tiles_to_render_this_frame: Vec<TileId>,
    /// Tiles rendered last frame that are not rendered this frame.
    pub tiles_to_no_longer_render_this_frame: Vec<TileId>,
    /// Render candidates still waiting on content or renderer resources.
    pub tiles_loading: u32,
}

impl TilesetView {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            maximum_screen_space_error: DEFAULT_MAXIMUM_SCREEN_SPACE_ERROR,
            last_frame_number: 0,
            previously_rendered: Vec::new(),
        }
    }

    /// Run one frame of selection against `camera`.
    ///
    /// Applies completed load work first, then traverses, then evicts
    /// content the traversal no longer reached. The returned lists are
    /// consistent with each other for this frame.
    pub fn update(&mut self, tileset: &mut Tileset, camera: &Camera) -> ViewUpdateResult {
        let frame_number = self.last_frame_number.wrapping_add(1);

        tileset.process_completions();

        let mut result = ViewUpdateResult::default();
        self.visit_tile(tileset, camera, tileset.root(), frame_number, &mut result);

        let current: HashSet<TileId> =
            result.tiles_to_render_this_frame.iter().copied().collect();
        let previous: HashSet<TileId> = self.previously_rendered.iter().copied().collect();
        result.new_tiles_to_render_this_frame = result
            .tiles_to_render_this_frame
            .iter()
            .copied()
            .filter(|id| !previous.contains(id))
            .collect();
        result.tiles_to_no_longer_render_this_frame = self
            .previously_rendered
            .iter()
            .copied()
            .filter(|id| !current.contains(id))
            .collect();

        Self::apply_eviction(tileset, frame_number);

        self.previously_rendered
            .clone_from(&result.tiles_to_render_this_frame);
        self.last_frame_number = frame_number;
        result
    }

    fn visit_tile(
        &self,
        tileset: &mut Tileset,
        camera: &Camera,
        id: TileId,
        frame_number: u32,
        result: &mut ViewUpdateResult,
    ) {
        if !camera.is_bounding_volume_visible(&tileset.tiles[id.index()].bounding_volume) {
            tileset.tiles[id.index()]
                .selection
                .mark(frame_number, SelectionResult::Culled);
            return;
        }

        // A leaf is always the most detailed option available.
        if tileset.tiles[id.index()].children.is_empty() {
            tileset.tiles[id.index()]
                .selection
                .mark(frame_number, SelectionResult::Rendered);
            Self::select_tile_for_rendering(tileset, id, result);
            return;
        }

        // Tiles with nothing of their own to draw always refine: structural
        // tiles subdivide space, external tileset tiles stand in for the
        // children they grafted into the tree, and failed tiles must not
        // block descendants that can still stream.
        let must_refine = {
            let tile = &tileset.tiles[id.index()];
            tile.content_url.is_none()
                || tile.load_state == LoadState::Failed
                || tile.content.as_deref().is_some_and(|c| !c.is_renderable())
        };

        let tile = &tileset.tiles[id.index()];
        let geometric_error = tile.geometric_error;
        let refine = tile.refine;
        let distance = camera
            .compute_distance_squared_to_bounding_volume(&tile.bounding_volume)
            .sqrt();
        let sse = camera.compute_screen_space_error(geometric_error, distance);

        // Zero geometric error cannot be improved by refining, even with
        // the camera inside the volume where the error reads as infinite.
        let detailed_enough = !must_refine
            && (sse <= self.maximum_screen_space_error || geometric_error <= 0.0);

        if detailed_enough {
            tileset.tiles[id.index()]
                .selection
                .mark(frame_number, SelectionResult::Rendered);
            Self::select_tile_for_rendering(tileset, id, result);
            return;
        }

        tileset.tiles[id.index()]
            .selection
            .mark(frame_number, SelectionResult::Refined);
        if refine == TileRefine::Add {
            Self::select_tile_for_rendering(tileset, id, result);
        }
        // Completions never arrive mid-traversal, so the child list is
        // stable for the rest of this visit.
        let children = tileset.tiles[id.index()].children.clone();
        for child in children {
            self.visit_tile(tileset, camera, child, frame_number, result);
        }
    }

    /// Turn a selected tile into render-list or load work, depending on
    /// how far its content has come.
    fn select_tile_for_rendering(
        tileset: &mut Tileset,
        id: TileId,
        result: &mut ViewUpdateResult,
    ) {
        match tileset.tiles[id.index()].load_state {
            LoadState::Failed => {}
            LoadState::RendererResourcesPrepared | LoadState::Done => {
                if tileset.tiles[id.index()].is_renderable() {
                    result.tiles_to_render_this_frame.push(id);
                }
            }
            LoadState::Unloaded => {
                // Counted as loading even when the in-flight cap defers
                // the actual request to a later frame.
                if tileset.tiles[id.index()].content_url.is_some() {
                    result.tiles_loading += 1;
                    tileset.request_content(id);
                }
            }
            LoadState::ContentLoading | LoadState::ContentLoaded => {
                result.tiles_loading += 1;
            }
        }
    }

    /// Unload content the traversal no longer wants resident.
    ///
    /// Only tiles holding or fetching content are candidates. A tile the
    /// traversal did not reach this frame (culled or left behind by a
    /// rendered ancestor) is always evicted; a `Replace` parent that
    /// refined keeps or drops its content per the tileset's policy.
    fn apply_eviction(tileset: &mut Tileset, frame_number: u32) {
        let loaded: Vec<TileId> = tileset.loaded_tiles.iter().copied().collect();
        for id in loaded {
            let outcome = tileset.tiles[id.index()].selection.result(frame_number);
            match outcome {
                SelectionResult::Rendered => {}
                SelectionResult::Refined => {
                    let refine = tileset.tiles[id.index()].refine;
                    if refine == TileRefine::Replace
                        && tileset.options.eviction_policy == EvictionPolicy::EvictRefined
                    {
                        tileset.unload_content(id);
                    }
                }
                SelectionResult::Culled | SelectionResult::None => {
                    tileset.unload_content(id);
                }
            }
        }
    }
}

impl Default for TilesetView {
    fn default() -> Self {
        Self::new()
    }
}
