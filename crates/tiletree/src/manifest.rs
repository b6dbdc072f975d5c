//! Tileset manifest document model.
//!
//! Manifests are JSON documents describing a tree of tiles. This module
//! holds the serde types they deserialize into plus the conversions to
//! the crate's own volume and refine types; arena construction from a
//! manifest lives with [`Tileset`](crate::Tileset).

use glam::{DMat3, DVec3};
use serde::Deserialize;

use crate::geodetic::{Ellipsoid, GlobeRectangle};
use crate::region::BoundingRegion;
use crate::tile::TileRefine;
use crate::volume::{BoundingSphere, BoundingVolume, OrientedBox};

/// A deserialized tileset manifest.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TilesetManifest {
    pub asset: AssetMetadata,
    /// Tileset-level error used by some viewers before the root loads.
    #[serde(default)]
    pub geometric_error: Option<f64>,
    pub root: ManifestTile,
}

/// The manifest's `asset` object.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMetadata {
    pub version: String,
    #[serde(default)]
    pub tileset_version: Option<String>,
}

/// One tile entry in a manifest.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestTile {
    pub bounding_volume: ManifestBoundingVolume,
    pub geometric_error: f64,
    /// Inherited from the parent when absent; the root defaults to
    /// `REPLACE`.
    #[serde(default)]
    pub refine: Option<ManifestRefine>,
    /// Column-major 4x4 matrix, composed onto the parent's transform.
    #[serde(default)]
    pub transform: Option<[f64; 16]>,
    #[serde(default)]
    pub content: Option<ManifestContent>,
    #[serde(default)]
    pub children: Vec<ManifestTile>,
}

/// A tile's `content` object.
#[derive(Debug, Deserialize)]
pub struct ManifestContent {
    #[serde(default)]
    pub uri: Option<String>,
    /// Pre-1.0 manifests used `url` for the same field.
    #[serde(default)]
    pub url: Option<String>,
}

impl ManifestContent {
    /// The content URI, whichever key spelled it.
    #[must_use]
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref().or(self.url.as_deref())
    }
}

/// A tile's bounding volume, one of the three encodings the format
/// defines.
#[derive(Debug, Clone, Copy, Deserialize)]
pub enum ManifestBoundingVolume {
    /// Center then three half-axis columns.
    #[serde(rename = "box")]
    Box([f64; 12]),
    /// West, south, east, north (radians), minimum and maximum height
    /// (meters).
    #[serde(rename = "region")]
    Region([f64; 6]),
    /// Center then radius.
    #[serde(rename = "sphere")]
    Sphere([f64; 4]),
}

impl ManifestBoundingVolume {
    /// Convert to a bounding volume in the tileset's own frame. Regions
    /// are already geodetic and ignore tile transforms downstream.
    #[must_use]
    pub fn to_bounding_volume(self) -> BoundingVolume {
        match self {
            Self::Box(v) => BoundingVolume::Box(OrientedBox::new(
                DVec3::new(v[0], v[1], v[2]),
                DMat3::from_cols(
                    DVec3::new(v[3], v[4], v[5]),
                    DVec3::new(v[6], v[7], v[8]),
                    DVec3::new(v[9], v[10], v[11]),
                ),
            )),
            Self::Region(v) => BoundingVolume::Region(BoundingRegion::new(
                GlobeRectangle::new(v[0], v[1], v[2], v[3]),
                v[4],
                v[5],
                &Ellipsoid::WGS84,
            )),
            Self::Sphere(v) => BoundingVolume::Sphere(BoundingSphere::new(
                DVec3::new(v[0], v[1], v[2]),
                v[3],
            )),
        }
    }
}

/// A tile's `refine` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ManifestRefine {
    #[serde(rename = "ADD")]
    Add,
    #[serde(rename = "REPLACE")]
    Replace,
}

impl From<ManifestRefine> for TileRefine {
    fn from(refine: ManifestRefine) -> Self {
        match refine {
            ManifestRefine::Add => Self::Add,
            ManifestRefine::Replace => Self::Replace,
        }
    }
}

/// Resolve a manifest-relative reference against the URL the manifest was
/// fetched from. Absolute references pass through untouched.
#[must_use]
pub(crate) fn resolve_url(base: &str, reference: &str) -> String {
    if reference.contains("://") {
        return reference.to_string();
    }

    // Authority boundary: everything before the first '/' after the
    // scheme separator.
    let authority_end = base
        .find("://")
        .map(|scheme| scheme + 3)
        .map_or(0, |origin_start| {
            base[origin_start..]
                .find('/')
                .map_or(base.len(), |slash| origin_start + slash)
        });

    if let Some(stripped) = reference.strip_prefix('/') {
        return format!("{}/{}", &base[..authority_end], stripped);
    }

    // Relative reference: replace everything after the last '/' of the
    // base path, dropping any query string first.
    let path_end = base.find(['?', '#']).unwrap_or(base.len());
    let directory_end = base[authority_end..path_end]
        .rfind('/')
        .map_or(path_end, |slash| authority_end + slash);
    format!("{}/{}", &base[..directory_end], reference)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_parses_minimal() {
        let manifest: TilesetManifest = serde_json::from_str(
            r#"{
                "asset": { "version": "1.0" },
                "geometricError": 500.0,
                "root": {
                    "boundingVolume": { "sphere": [1.0, 2.0, 3.0, 10.0] },
                    "geometricError": 100.0,
                    "refine": "ADD",
                    "content": { "uri": "root.b3dm" }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.asset.version, "1.0");
        assert_eq!(manifest.root.refine, Some(ManifestRefine::Add));
        assert_eq!(manifest.root.content.unwrap().uri(), Some("root.b3dm"));
        assert!(manifest.root.children.is_empty());
    }

    #[test]
    fn test_manifest_accepts_legacy_content_url_key() {
        let manifest: TilesetManifest = serde_json::from_str(
            r#"{
                "asset": { "version": "0.0" },
                "root": {
                    "boundingVolume": { "sphere": [0, 0, 0, 1] },
                    "geometricError": 1.0,
                    "content": { "url": "old.b3dm" }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.root.content.unwrap().uri(), Some("old.b3dm"));
    }

    #[test]
    fn test_manifest_rejects_unknown_refine() {
        let result: Result<TilesetManifest, _> = serde_json::from_str(
            r#"{
                "asset": { "version": "1.0" },
                "root": {
                    "boundingVolume": { "sphere": [0, 0, 0, 1] },
                    "geometricError": 1.0,
                    "refine": "add"
                }
            }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_manifest_requires_geometric_error() {
        let result: Result<TilesetManifest, _> = serde_json::from_str(
            r#"{
                "asset": { "version": "1.0" },
                "root": {
                    "boundingVolume": { "sphere": [0, 0, 0, 1] }
                }
            }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_box_volume_conversion() {
        let volume = ManifestBoundingVolume::Box([
            1.0, 2.0, 3.0, 10.0, 0.0, 0.0, 0.0, 20.0, 0.0, 0.0, 0.0, 30.0,
        ])
        .to_bounding_volume();

        let BoundingVolume::Box(oriented) = volume else {
            panic!("expected a box volume");
        };
        assert_eq!(oriented.center, DVec3::new(1.0, 2.0, 3.0));
        assert_eq!(oriented.half_axes.x_axis, DVec3::new(10.0, 0.0, 0.0));
        assert_eq!(oriented.half_axes.y_axis, DVec3::new(0.0, 20.0, 0.0));
        assert_eq!(oriented.half_axes.z_axis, DVec3::new(0.0, 0.0, 30.0));
    }

    #[test]
    fn test_resolve_url_relative() {
        assert_eq!(
            resolve_url("https://example.com/data/tileset.json", "tiles/0.b3dm"),
            "https://example.com/data/tiles/0.b3dm"
        );
    }

    #[test]
    fn test_resolve_url_drops_base_query() {
        assert_eq!(
            resolve_url("https://example.com/data/tileset.json?v=3", "0.b3dm"),
            "https://example.com/data/0.b3dm"
        );
    }

    #[test]
    fn test_resolve_url_absolute_reference() {
        assert_eq!(
            resolve_url(
                "https://example.com/data/tileset.json",
                "https://cdn.example.com/0.b3dm"
            ),
            "https://cdn.example.com/0.b3dm"
        );
    }

    #[test]
    fn test_resolve_url_root_relative() {
        assert_eq!(
            resolve_url("https://example.com/data/deep/tileset.json", "/top.b3dm"),
            "https://example.com/top.b3dm"
        );
    }
}
