//! Tile content representations and the content factory.
//!
//! Content arrives as raw bytes; the factory sniffs a magic string from
//! the payload and dispatches to a registered constructor. Hosts can
//! register their own content types with [`register_content_type`]; the
//! tileset registers the built-in batched-model and external-tileset
//! types itself.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{LazyLock, RwLock};

use crate::error::{Error, Result};
use crate::manifest::TilesetManifest;
use crate::tile::TileId;
use crate::tileset::Tileset;

/// Parsed content attached to a tile.
///
/// Implementations are created on a background task by a registered
/// [`ContentConstructor`] and must therefore be `Send`.
pub trait TileContent: Send {
    /// Whether this content produces something to draw. Content that
    /// exists only to extend the tree (external tilesets) returns false.
    fn is_renderable(&self) -> bool;

    /// Called once on the traversal thread when the tile reaches its
    /// final load state. This is the only place content may mutate the
    /// tree it belongs to.
    fn finalize_load(&mut self, context: &mut FinalizeContext<'_>) {
        let _ = context;
    }

    /// Access to the concrete type, for hosts that know what they
    /// registered.
    fn as_any(&self) -> &dyn Any;
}

/// Everything a [`ContentConstructor`] gets to work with.
pub struct ContentInput {
    /// The tile the content belongs to.
    pub tile: TileId,
    /// The URL the bytes were fetched from.
    pub url: String,
    /// The raw payload.
    pub bytes: Vec<u8>,
}

/// Builds a [`TileContent`] from a fetched payload.
pub type ContentConstructor = fn(ContentInput) -> Result<Box<dyn TileContent>>;

static CONTENT_REGISTRY: LazyLock<RwLock<HashMap<String, ContentConstructor>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Register a constructor for a content magic string.
///
/// Registering the same magic again replaces the previous constructor, so
/// repeated registration is harmless.
pub fn register_content_type(magic: &str, constructor: ContentConstructor) {
    CONTENT_REGISTRY
        .write()
        .unwrap()
        .insert(magic.to_string(), constructor);
}

pub(crate) fn register_builtin_content_types() {
    register_content_type("b3dm", |input| {
        Ok(Box::new(B3dmContent::parse(&input.url, input.bytes)?))
    });
    register_content_type("json", |input| {
        Ok(Box::new(ExternalTilesetContent::parse(&input.url, &input.bytes)?))
    });
}

/// The registry key for a payload: the first four bytes, or `"json"` when
/// the first non-whitespace byte opens a JSON object.
fn content_magic(bytes: &[u8]) -> Option<&str> {
    let first = bytes.iter().copied().find(|b| !b.is_ascii_whitespace())?;
    if first == b'{' {
        return Some("json");
    }
    std::str::from_utf8(bytes.get(..4)?).ok()
}

/// Sniff the payload's magic string and dispatch to the registered
/// constructor.
pub fn create_content(input: ContentInput) -> Result<Box<dyn TileContent>> {
    let Some(magic) = content_magic(&input.bytes).map(str::to_owned) else {
        return Err(Error::UnknownContentType {
            url: input.url,
            magic: String::from_utf8_lossy(&input.bytes[..input.bytes.len().min(4)]).into_owned(),
        });
    };
    let constructor = CONTENT_REGISTRY.read().unwrap().get(&magic).copied();
    match constructor {
        Some(constructor) => constructor(input),
        None => Err(Error::UnknownContentType {
            url: input.url,
            magic,
        }),
    }
}

/// Handed to [`TileContent::finalize_load`]; the only channel through
/// which content may alter the tree.
pub struct FinalizeContext<'a> {
    pub(crate) tileset: &'a mut Tileset,
    pub(crate) tile: TileId,
}

impl FinalizeContext<'_> {
    /// The tile being finalized.
    #[must_use]
    pub fn tile(&self) -> TileId {
        self.tile
    }

    /// Graft the tiles described by `manifest` under the finalizing tile.
    /// Content URIs are resolved against `base_url`.
    pub fn splice_external_tileset(&mut self, manifest: &TilesetManifest, base_url: &str) {
        self.tileset.splice_external(self.tile, manifest, base_url);
    }
}

const B3DM_HEADER_LENGTH: usize = 28;
const B3DM_LEGACY_1_HEADER_LENGTH: usize = 20;
const B3DM_LEGACY_2_HEADER_LENGTH: usize = 24;

// A current-format header stores four table lengths after the byte length.
// In the two legacy layouts the payload begins earlier, so reading the
// modern field offsets lands inside JSON text or the glTF magic, both of
// which decode to at least 0x2200_0000.
const B3DM_LEGACY_SENTINEL: u32 = 570_425_344;

fn read_u32_le(bytes: &[u8], offset: usize) -> Option<u32> {
    let slice = bytes.get(offset..offset.checked_add(4)?)?;
    slice.try_into().ok().map(u32::from_le_bytes)
}

/// A batched 3D model payload.
///
/// The header is parsed and validated eagerly; the feature table, batch
/// table, and embedded glTF model are exposed as byte spans for the
/// renderer to consume.
pub struct B3dmContent {
    bytes: Vec<u8>,
    version: u32,
    byte_length: usize,
    header_length: usize,
    feature_table_json_length: usize,
    feature_table_binary_length: usize,
    batch_table_json_length: usize,
    batch_table_binary_length: usize,
}

impl B3dmContent {
    /// Parse and validate a b3dm payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ContentParse`] when the payload is truncated or
    /// its header describes spans outside the payload.
    pub fn parse(url: &str, bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < B3DM_HEADER_LENGTH {
            return Err(Error::ContentParse {
                url: url.to_string(),
                message: "payload too small to hold a b3dm header".to_string(),
            });
        }

        // The header is at least 28 bytes, so these reads cannot fail.
        let version = read_u32_le(&bytes, 4).unwrap_or(0);
        let byte_length = read_u32_le(&bytes, 8).unwrap_or(0);
        let mut feature_table_json_length = read_u32_le(&bytes, 12).unwrap_or(0);
        let mut feature_table_binary_length = read_u32_le(&bytes, 16).unwrap_or(0);
        let mut batch_table_json_length = read_u32_le(&bytes, 20).unwrap_or(0);
        let mut batch_table_binary_length = read_u32_le(&bytes, 24).unwrap_or(0);

        let header_length;
        if batch_table_json_length >= B3DM_LEGACY_SENTINEL {
            // Legacy layout: [batchLength] [batchTableByteLength].
            header_length = B3DM_LEGACY_1_HEADER_LENGTH;
            batch_table_json_length = feature_table_binary_length;
            batch_table_binary_length = 0;
            feature_table_json_length = 0;
            feature_table_binary_length = 0;
            tracing::warn!(
                url,
                "b3dm uses the legacy [batchLength] [batchTableByteLength] header layout"
            );
        } else if batch_table_binary_length >= B3DM_LEGACY_SENTINEL {
            // Legacy layout: [batchTableJsonByteLength]
            // [batchTableBinaryByteLength] [batchLength].
            header_length = B3DM_LEGACY_2_HEADER_LENGTH;
            batch_table_json_length = feature_table_json_length;
            batch_table_binary_length = feature_table_binary_length;
            feature_table_json_length = 0;
            feature_table_binary_length = 0;
            tracing::warn!(
                url,
                "b3dm uses the legacy [batchTableJsonByteLength] [batchTableBinaryByteLength] [batchLength] header layout"
            );
        } else {
            header_length = B3DM_HEADER_LENGTH;
        }

        let byte_length = byte_length as usize;
        if bytes.len() < byte_length {
            return Err(Error::ContentParse {
                url: url.to_string(),
                message: "payload shorter than the byte length declared in its header".to_string(),
            });
        }

        let gltf_start = header_length
            + feature_table_json_length as usize
            + feature_table_binary_length as usize
            + batch_table_json_length as usize
            + batch_table_binary_length as usize;
        if byte_length <= gltf_start {
            return Err(Error::ContentParse {
                url: url.to_string(),
                message: "glTF model starts at or after the end of the payload".to_string(),
            });
        }

        Ok(Self {
            bytes,
            version,
            byte_length,
            header_length,
            feature_table_json_length: feature_table_json_length as usize,
            feature_table_binary_length: feature_table_binary_length as usize,
            batch_table_json_length: batch_table_json_length as usize,
            batch_table_binary_length: batch_table_binary_length as usize,
        })
    }

    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// The feature table's JSON chunk, possibly empty.
    #[must_use]
    pub fn feature_table_json(&self) -> &[u8] {
        let start = self.header_length;
        &self.bytes[start..start + self.feature_table_json_length]
    }

    /// The batch table's JSON chunk, possibly empty.
    #[must_use]
    pub fn batch_table_json(&self) -> &[u8] {
        let start = self.header_length
            + self.feature_table_json_length
            + self.feature_table_binary_length;
        &self.bytes[start..start + self.batch_table_json_length]
    }

    /// The embedded binary glTF model.
    #[must_use]
    pub fn gltf_data(&self) -> &[u8] {
        let start = self.header_length
            + self.feature_table_json_length
            + self.feature_table_binary_length
            + self.batch_table_json_length
            + self.batch_table_binary_length;
        &self.bytes[start..self.byte_length]
    }
}

impl TileContent for B3dmContent {
    fn is_renderable(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A tileset manifest fetched as tile content.
///
/// Renders nothing itself; at finalize time it grafts the tiles it
/// describes under the owning tile, which from then on refines into them.
pub struct ExternalTilesetContent {
    manifest: Option<TilesetManifest>,
    base_url: String,
}

impl ExternalTilesetContent {
    /// Parse a tileset manifest payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ManifestParse`] when the payload is not a valid
    /// tileset manifest.
    pub fn parse(url: &str, bytes: &[u8]) -> Result<Self> {
        let manifest: TilesetManifest =
            serde_json::from_slice(bytes).map_err(|e| Error::ManifestParse {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            manifest: Some(manifest),
            base_url: url.to_string(),
        })
    }
}

impl TileContent for ExternalTilesetContent {
    fn is_renderable(&self) -> bool {
        false
    }

    fn finalize_load(&mut self, context: &mut FinalizeContext<'_>) {
        if let Some(manifest) = self.manifest.take() {
            context.splice_external_tileset(&manifest, &self.base_url);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
