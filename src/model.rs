//! The MosaicJSON document model: canonical representation, invariants,
//! bounds/center derivation, version bumping, and serialization.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224};

use crate::error::{MosaicError, Result};
use crate::tms::is_valid_quadkey;

/// `[west, south, east, north]`.
pub type Bounds = [f64; 4];
/// `[lng, lat, zoom]`.
pub type Center = [f64; 3];

pub const WORLD_BOUNDS: Bounds = [-180.0, -90.0, 180.0, 90.0];

/// Recognized `mosaicjson` spec versions.
pub const SPEC_VERSION_0_0_2: &str = "0.0.2";
pub const SPEC_VERSION_0_0_3: &str = "0.0.3";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColorMapEntry(pub u8, pub u8, pub u8, pub u8);

/// Embedded tile-matrix-set descriptor (0.0.3 extended field). The
/// document stores only the identifier; the actual TMS math is resolved
/// through [`crate::tms::resolve_tms`] against the global registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TileMatrixSetRef {
    pub id: String,
}

/// Named asset sub-selection (0.0.3 extended field). Opaque to this
/// core beyond round-tripping it through serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerDef {
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The canonical MosaicJSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MosaicJson {
    pub mosaicjson: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
    pub version: String,
    pub minzoom: u8,
    pub maxzoom: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quadkey_zoom: Option<u8>,
    pub bounds: Bounds,
    pub center: Center,
    pub tiles: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tilematrixset: Option<TileMatrixSetRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colormap: Option<BTreeMap<i64, ColorMapEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layers: Option<BTreeMap<String, LayerDef>>,
}

impl MosaicJson {
    /// The indexing level at which `tiles` is keyed: `quadkey_zoom` if
    /// set, otherwise `minzoom`.
    pub fn quadkey_zoom(&self) -> u8 {
        self.quadkey_zoom.unwrap_or(self.minzoom)
    }

    pub fn tms_id(&self) -> &str {
        self.tilematrixset
            .as_ref()
            .map(|t| t.id.as_str())
            .unwrap_or(crate::tms::DEFAULT_TMS_ID)
    }

    /// Look up the asset list for a quadkey, prepending `asset_prefix`
    /// if the document declares one.
    pub fn assets_at_quadkey(&self, quadkey: &str) -> Vec<String> {
        let assets = self.tiles.get(quadkey).cloned().unwrap_or_default();
        match &self.asset_prefix {
            Some(prefix) => assets.into_iter().map(|a| format!("{prefix}{a}")).collect(),
            None => assets,
        }
    }

    /// Bump `version`'s PATCH digit (`MAJOR.MINOR.PATCH`), initializing
    /// to `1.0.0` if the field is absent or unparsable.
    pub fn increase_version(&mut self) {
        let parts: Vec<&str> = self.version.split('.').collect();
        self.version = match parts.as_slice() {
            [major, minor, patch] => {
                let (major, minor, patch) = (
                    major.parse::<u64>().unwrap_or(1),
                    minor.parse::<u64>().unwrap_or(0),
                    patch.parse::<u64>().unwrap_or(0),
                );
                format!("{major}.{minor}.{}", patch + 1)
            }
            _ => "1.0.0".to_string(),
        };
    }

    /// Deterministic SHA-224 hex digest of the canonical JSON encoding
    /// (sorted keys, no whitespace) of the document with `tiles`
    /// excluded.
    pub fn mosaicid(&self) -> Result<String> {
        let mut without_tiles = serde_json::to_value(self)?;
        if let serde_json::Value::Object(ref mut map) = without_tiles {
            map.remove("tiles");
        }
        let canonical = canonical_json(&without_tiles);
        let mut hasher = Sha224::new();
        hasher.update(canonical.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// A GeoJSON `FeatureCollection` with one feature per indexed
    /// quadkey: geometry is the cell polygon, `properties.files` the
    /// asset list. For visualization/debugging only.
    pub fn to_geojson(&self) -> Result<geojson::FeatureCollection> {
        let tms = crate::tms::resolve_tms(self.tms_id())?;
        let zoom = self.quadkey_zoom();
        let mut features = Vec::with_capacity(self.tiles.len());
        for (quadkey, assets) in &self.tiles {
            let (x, y, z) = crate::tms::quadkey_to_tile(quadkey)?;
            debug_assert_eq!(z, zoom);
            let tile = tile_grid::Tile::new(x as i64, y as i64, zoom);
            let bounds = tms
                .bounds(&tile)
                .map_err(|e| MosaicError::Validation(format!("bounds() failed: {e}")))?;
            let polygon = geojson::Geometry::new(geojson::Value::Polygon(vec![vec![
                vec![bounds.left, bounds.bottom],
                vec![bounds.right, bounds.bottom],
                vec![bounds.right, bounds.top],
                vec![bounds.left, bounds.top],
                vec![bounds.left, bounds.bottom],
            ]]));
            let mut properties = geojson::JsonObject::new();
            properties.insert(
                "files".to_string(),
                serde_json::to_value(assets).unwrap_or_default(),
            );
            properties.insert("quadkey".to_string(), serde_json::json!(quadkey));
            features.push(geojson::Feature {
                bbox: None,
                geometry: Some(polygon),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            });
        }
        Ok(geojson::FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        })
    }
}

/// Enforce the §3 invariants, failing with [`MosaicError::Validation`]
/// naming the offending field.
pub fn validate(doc: &MosaicJson) -> Result<()> {
    if doc.mosaicjson != SPEC_VERSION_0_0_2 && doc.mosaicjson != SPEC_VERSION_0_0_3 {
        return Err(MosaicError::Validation(format!(
            "mosaicjson: unsupported spec version {:?}",
            doc.mosaicjson
        )));
    }
    if doc.minzoom > doc.maxzoom {
        return Err(MosaicError::Validation(
            "minzoom: must be <= maxzoom".to_string(),
        ));
    }
    if doc.maxzoom > 30 {
        return Err(MosaicError::Validation(
            "maxzoom: must be in [0, 30]".to_string(),
        ));
    }
    if doc.tilematrixset.is_some() && doc.mosaicjson != SPEC_VERSION_0_0_3 {
        return Err(MosaicError::Validation(
            "tilematrixset: requires mosaicjson 0.0.3".to_string(),
        ));
    }

    let zoom = doc.quadkey_zoom();
    for (quadkey, assets) in &doc.tiles {
        if !is_valid_quadkey(quadkey, zoom) {
            return Err(MosaicError::Validation(format!(
                "tiles: quadkey {quadkey:?} is not {zoom} levels deep"
            )));
        }
        if assets.is_empty() {
            return Err(MosaicError::Validation(format!(
                "tiles: quadkey {quadkey:?} has an empty asset list"
            )));
        }
    }

    let [west, south, east, north] = doc.bounds;
    if west > east || south > north {
        return Err(MosaicError::Validation(
            "bounds: west must be <= east and south <= north".to_string(),
        ));
    }

    Ok(())
}

/// Union two bounding boxes, clipping the result to `WORLD_BOUNDS`.
pub fn union_bounds(a: Bounds, b: Bounds) -> Bounds {
    let merged = [
        a[0].min(b[0]),
        a[1].min(b[1]),
        a[2].max(b[2]),
        a[3].max(b[3]),
    ];
    clip_bounds(merged, WORLD_BOUNDS)
}

pub fn clip_bounds(bounds: Bounds, clip: Bounds) -> Bounds {
    [
        bounds[0].max(clip[0]),
        bounds[1].max(clip[1]),
        bounds[2].min(clip[2]),
        bounds[3].min(clip[3]),
    ]
}

/// Centroid of `bounds`, with `z` taken from the document's `minzoom`.
pub fn center_from_bounds(bounds: Bounds, minzoom: u8) -> Center {
    [
        (bounds[0] + bounds[2]) / 2.0,
        (bounds[1] + bounds[3]) / 2.0,
        minzoom as f64,
    ]
}

/// Recursively re-serialize a [`serde_json::Value`] with object keys
/// sorted, matching Python's `json.dumps(..., sort_keys=True)` used by
/// the reference implementation for `mosaicid` hashing.
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", serde_json::to_string(k).unwrap(), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", parts.join(","))
        }
        other => serde_json::to_string(other).unwrap(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_doc() -> MosaicJson {
        MosaicJson {
            mosaicjson: SPEC_VERSION_0_0_2.to_string(),
            name: None,
            description: None,
            attribution: None,
            version: "1.0.0".to_string(),
            minzoom: 7,
            maxzoom: 12,
            quadkey_zoom: None,
            bounds: WORLD_BOUNDS,
            center: [0.0, 0.0, 7.0],
            tiles: BTreeMap::new(),
            tilematrixset: None,
            asset_type: None,
            asset_prefix: None,
            data_type: None,
            colormap: None,
            layers: None,
        }
    }

    #[test]
    fn validate_rejects_wrong_length_quadkey() {
        let mut doc = minimal_doc();
        doc.tiles.insert("12".to_string(), vec!["a".to_string()]);
        assert!(validate(&doc).is_err());
    }

    #[test]
    fn validate_rejects_empty_asset_list() {
        let mut doc = minimal_doc();
        doc.tiles.insert("0000000".to_string(), vec![]);
        assert!(validate(&doc).is_err());
    }

    #[test]
    fn validate_accepts_well_formed_document() {
        let mut doc = minimal_doc();
        doc.tiles.insert(
            "0".repeat(7),
            vec!["a.tif".to_string()],
        );
        assert!(validate(&doc).is_ok());
    }

    #[test]
    fn increase_version_initializes_and_bumps() {
        let mut doc = minimal_doc();
        doc.version = "".to_string();
        doc.increase_version();
        assert_eq!(doc.version, "1.0.0");
        doc.increase_version();
        assert_eq!(doc.version, "1.0.1");
    }

    #[test]
    fn mosaicid_is_stable_across_field_order() {
        let doc = minimal_doc();
        let id1 = doc.mosaicid().unwrap();
        let id2 = doc.mosaicid().unwrap();
        assert_eq!(id1, id2);
        assert_eq!(id1.len(), 56); // SHA-224 hex digest length
    }

    #[test]
    fn asset_prefix_is_prepended_on_read() {
        let mut doc = minimal_doc();
        doc.asset_prefix = Some("s3://bucket/".to_string());
        doc.tiles.insert("0000000".to_string(), vec!["a.tif".to_string()]);
        assert_eq!(
            doc.assets_at_quadkey("0000000"),
            vec!["s3://bucket/a.tif".to_string()]
        );
    }
}
