//! Tiles and their per-frame selection state.
//!
//! Tiles live in an arena owned by [`Tileset`](crate::Tileset) and refer to
//! each other by [`TileId`]. A tile records where it sits in the tree, its
//! world-space bounding volume and geometric error, and the progress of its
//! content through the load state machine.

use glam::DMat4;

use crate::content::TileContent;
use crate::externals::ResourceHandle;
use crate::volume::BoundingVolume;

/// Identifies a tile within its tileset's arena.
///
/// Ids are only meaningful for the tileset that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(pub(crate) u32);

impl TileId {
    /// The tile's index in the arena.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// How a tile's own content relates to its children's content when the
/// tile is refined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileRefine {
    /// Children render in addition to the parent.
    Add,
    /// Children render instead of the parent.
    #[default]
    Replace,
}

/// Progress of a tile's content through loading.
///
/// States only ever advance (or reset to `Unloaded` via cancellation and
/// eviction); a tile never skips from loading straight to `Done` without
/// passing through the renderer-resource preparation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    /// Nothing is loaded and nothing is in flight.
    #[default]
    Unloaded,
    /// A fetch-and-parse task is in flight.
    ContentLoading,
    /// Content is parsed; renderer resources are not ready yet.
    ContentLoaded,
    /// Renderer resources are ready; the load is not finalized yet.
    RendererResourcesPrepared,
    /// Fully loaded, finalized, and (if renderable) ready to draw.
    Done,
    /// The load failed; the tile stays in the tree but never renders.
    Failed,
}

/// Outcome of visiting a tile during traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionResult {
    /// Not visited this frame.
    #[default]
    None,
    /// Outside the culling volume.
    Culled,
    /// Selected as a render candidate.
    Rendered,
    /// Not detailed enough; traversal descended into the children.
    Refined,
}

/// Frame-stamped selection memo.
///
/// The memo stores the frame it was written in; reading it with any other
/// frame number yields [`SelectionResult::None`]. This makes last frame's
/// results readable during the current frame without a sweep over the
/// whole arena to reset them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TileSelectionState {
    frame_number: u32,
    result: SelectionResult,
}

impl TileSelectionState {
    /// The result recorded for `frame_number`, or `None` if the memo was
    /// written during a different frame.
    #[must_use]
    pub fn result(&self, frame_number: u32) -> SelectionResult {
        if self.frame_number == frame_number {
            self.result
        } else {
            SelectionResult::None
        }
    }

    /// Record `result` for `frame_number`.
    pub fn mark(&mut self, frame_number: u32, result: SelectionResult) {
        self.frame_number = frame_number;
        self.result = result;
    }
}

/// A single tile in the bounding-volume hierarchy.
pub struct Tile {
    pub(crate) id: TileId,
    pub(crate) parent: Option<TileId>,
    pub(crate) children: Vec<TileId>,
    /// World-space bounding volume, with the accumulated transform already
    /// applied at ingestion time.
    pub(crate) bounding_volume: BoundingVolume,
    pub(crate) geometric_error: f64,
    pub(crate) refine: TileRefine,
    /// Accumulated tile-to-world transform (parent transform times this
    /// tile's own transform).
    pub(crate) transform: DMat4,
    /// Absolute content URL, or `None` for a structural tile.
    pub(crate) content_url: Option<String>,
    pub(crate) content: Option<Box<dyn TileContent>>,
    pub(crate) resource_handle: Option<ResourceHandle>,
    pub(crate) load_state: LoadState,
    /// Bumped on cancellation; completions stamped with an older
    /// generation are discarded on arrival.
    pub(crate) load_generation: u64,
    pub(crate) selection: TileSelectionState,
}

impl Tile {
    pub(crate) fn new(
        id: TileId,
        parent: Option<TileId>,
        bounding_volume: BoundingVolume,
        geometric_error: f64,
        refine: TileRefine,
        transform: DMat4,
        content_url: Option<String>,
    ) -> Self {
        Self {
            id,
            parent,
            children: Vec::new(),
            bounding_volume,
            geometric_error,
            refine,
            transform,
            content_url,
            content: None,
            resource_handle: None,
            load_state: LoadState::Unloaded,
            load_generation: 0,
            selection: TileSelectionState::default(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> TileId {
        self.id
    }

    #[must_use]
    pub const fn parent(&self) -> Option<TileId> {
        self.parent
    }

    #[must_use]
    pub fn children(&self) -> &[TileId] {
        &self.children
    }

    #[must_use]
    pub const fn bounding_volume(&self) -> &BoundingVolume {
        &self.bounding_volume
    }

    #[must_use]
    pub const fn geometric_error(&self) -> f64 {
        self.geometric_error
    }

    #[must_use]
    pub const fn refine(&self) -> TileRefine {
        self.refine
    }

    #[must_use]
    pub const fn transform(&self) -> DMat4 {
        self.transform
    }

    #[must_use]
    pub fn content_url(&self) -> Option<&str> {
        self.content_url.as_deref()
    }

    /// The tile's parsed content, once loading has progressed far enough
    /// to attach it.
    #[must_use]
    pub fn content(&self) -> Option<&dyn TileContent> {
        self.content.as_deref()
    }

    #[must_use]
    pub const fn resource_handle(&self) -> Option<ResourceHandle> {
        self.resource_handle
    }

    #[must_use]
    pub const fn load_state(&self) -> LoadState {
        self.load_state
    }

    /// Whether the tile has nothing to load at all. Structural tiles exist
    /// purely to subdivide space.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        self.content_url.is_none()
    }

    /// Whether the tile can be drawn this frame: content is present,
    /// renderable, and its resources are prepared.
    #[must_use]
    pub fn is_renderable(&self) -> bool {
        matches!(
            self.load_state,
            LoadState::RendererResourcesPrepared | LoadState::Done
        ) && self.content.as_deref().is_some_and(TileContent::is_renderable)
    }
}
