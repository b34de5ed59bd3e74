//! Index construction: turning a set of georeferenced features into a
//! [`MosaicJson`] document.

use std::collections::BTreeMap;

use geo_types::Geometry;
use geojson::{GeoJson, Value as GeojsonValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::BuilderOptions;
use crate::error::{MosaicError, Result};
use crate::geometry::tile_cover_quadkeys;
use crate::model::{
    center_from_bounds, union_bounds, validate, Bounds, MosaicJson, SPEC_VERSION_0_0_2,
    SPEC_VERSION_0_0_3, TileMatrixSetRef, WORLD_BOUNDS,
};
use crate::tms::resolve_tms;

/// One input to the builder: a feature's footprint plus the asset
/// identifier(s) it contributes when covered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetFeature {
    pub assets: Vec<String>,
    pub geojson: GeoJson,
}

impl AssetFeature {
    /// Construct a single-asset feature from a URL and its footprint
    /// geometry, as produced by COG footprint extraction.
    pub fn new(asset: impl Into<String>, geometry: geojson::Geometry) -> Self {
        Self {
            assets: vec![asset.into()],
            geojson: GeoJson::Feature(geojson::Feature {
                bbox: None,
                geometry: Some(geometry),
                id: None,
                properties: None,
                foreign_members: None,
            }),
        }
    }

    /// Construct a feature whose asset id(s) are resolved later by an
    /// [`Accessor`] instead of being supplied up front, e.g. one built
    /// straight from a STAC item's or a catalog row's properties.
    pub fn from_geometry_and_properties(
        geometry: geojson::Geometry,
        properties: serde_json::Map<String, Value>,
    ) -> Self {
        Self {
            assets: Vec::new(),
            geojson: GeoJson::Feature(geojson::Feature {
                bbox: None,
                geometry: Some(geometry),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }),
        }
    }

    /// Look up a property on the underlying GeoJSON feature, for
    /// accessors that resolve an asset id from feature properties.
    pub fn property(&self, key: &str) -> Option<&Value> {
        match &self.geojson {
            GeoJson::Feature(f) => f.properties.as_ref()?.get(key),
            _ => None,
        }
    }

    fn geometry(&self) -> Result<Geometry<f64>> {
        let geo_value = match &self.geojson {
            GeoJson::Feature(f) => f
                .geometry
                .clone()
                .ok_or_else(|| MosaicError::Validation("feature has no geometry".to_string()))?,
            GeoJson::Geometry(g) => g.clone(),
            GeoJson::FeatureCollection(_) => {
                return Err(MosaicError::Validation(
                    "expected a single feature or geometry, got a FeatureCollection".to_string(),
                ))
            }
        };
        geo_types::Geometry::<f64>::try_from(geo_value)
            .map_err(|e| MosaicError::Validation(format!("invalid feature geometry: {e}")))
    }

    fn geographic_bounds(&self) -> Result<Bounds> {
        use geo::BoundingRect;
        let geom = self.geometry()?;
        let rect = geom
            .bounding_rect()
            .ok_or_else(|| MosaicError::Validation("feature geometry has no extent".to_string()))?;
        Ok([rect.min().x, rect.min().y, rect.max().x, rect.max().y])
    }
}

/// Resolves the asset identifier(s) a feature contributes, for features
/// built without a pre-populated `assets` list (see
/// [`AssetFeature::from_geometry_and_properties`]). A feature whose
/// `assets` is already non-empty never reaches the accessor.
///
/// Any `Fn(&AssetFeature) -> Result<Vec<String>> + Send + Sync` closure
/// implements this directly, matching the `accessor=lambda f: ...`
/// shape callers expect.
pub trait Accessor: Send + Sync {
    fn resolve(&self, feature: &AssetFeature) -> Result<Vec<String>>;
}

impl<F> Accessor for F
where
    F: Fn(&AssetFeature) -> Result<Vec<String>> + Send + Sync,
{
    fn resolve(&self, feature: &AssetFeature) -> Result<Vec<String>> {
        self(feature)
    }
}

/// Default accessor: reads the feature's `path` property, matching
/// cogeo-mosaic's `default_accessor`.
#[derive(Debug, Default)]
pub struct PathAccessor;

impl Accessor for PathAccessor {
    fn resolve(&self, feature: &AssetFeature) -> Result<Vec<String>> {
        feature
            .property("path")
            .and_then(|v| v.as_str())
            .map(|s| vec![s.to_string()])
            .ok_or_else(|| {
                MosaicError::Validation(
                    "feature has no assets and no string `path` property for the default accessor"
                        .to_string(),
                )
            })
    }
}

/// Filters which features are retained at a covered cell, applied after
/// cover computation and before assets are resolved into `tiles`.
///
/// Receives the full candidate features for the cell alongside their
/// footprint geometries (parallel, same order), so a filter can decide
/// by feature property (e.g. `datetime`) or by the covering geometry
/// itself. The default keeps every contributing feature; callers
/// wanting e.g. a "closest in time" or "highest resolution first"
/// ordering implement this instead of post-processing the finished
/// document.
pub trait AssetFilter: Send + Sync {
    fn filter(
        &self,
        quadkey: &str,
        features: Vec<AssetFeature>,
        geoms: Vec<Geometry<f64>>,
    ) -> Vec<AssetFeature>;
}

#[derive(Debug, Default)]
pub struct KeepAll;

impl AssetFilter for KeepAll {
    fn filter(
        &self,
        _quadkey: &str,
        features: Vec<AssetFeature>,
        _geoms: Vec<Geometry<f64>>,
    ) -> Vec<AssetFeature> {
        features
    }
}

/// Build a [`MosaicJson`] document from a set of features, each an
/// asset footprint geometry plus either a pre-populated `assets` list
/// or properties `accessor` can resolve an asset id from.
///
/// Every feature is covered independently against `options.tms_id` at
/// `options.quadkey_zoom` (or `options.minzoom` if unset). At each
/// covered cell, the candidate features (and their footprint
/// geometries) are passed to `asset_filter`; the survivors' assets
/// (resolved via `accessor` where not already set) are appended, in
/// input order, to that cell. `min_tile_cover`/`tile_cover_sort` are
/// forwarded to the cover kernel per feature.
pub fn from_features(
    features: &[AssetFeature],
    options: &BuilderOptions,
    accessor: &dyn Accessor,
    asset_filter: &dyn AssetFilter,
) -> Result<MosaicJson> {
    if features.is_empty() {
        return Err(MosaicError::Validation(
            "cannot build a mosaic from zero features".to_string(),
        ));
    }
    if options.minzoom > options.maxzoom {
        return Err(MosaicError::Validation(
            "minzoom must be <= maxzoom".to_string(),
        ));
    }

    let tms = resolve_tms(&options.tms_id)?;
    let quadkey_zoom = options.quadkey_zoom.unwrap_or(options.minzoom);

    let mut resolved_features = Vec::with_capacity(features.len());
    for feature in features {
        let assets = if feature.assets.is_empty() {
            accessor.resolve(feature)?
        } else {
            feature.assets.clone()
        };
        resolved_features.push(AssetFeature {
            assets,
            geojson: feature.geojson.clone(),
        });
    }

    let mut feature_geoms = Vec::with_capacity(resolved_features.len());
    let mut cells: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    let mut bounds: Bounds = [f64::MAX, f64::MAX, f64::MIN, f64::MIN];

    for (i, feature) in resolved_features.iter().enumerate() {
        let geom = feature.geometry()?;
        let feature_bounds = feature.geographic_bounds()?;
        bounds = union_bounds(bounds, feature_bounds);

        let covered = tile_cover_quadkeys(
            &geom,
            &tms,
            quadkey_zoom,
            options.min_tile_cover,
            options.tile_cover_sort,
        )?;
        feature_geoms.push(geom);

        if covered.is_empty() {
            if !options.quiet {
                warn!(feature = i, "feature covers zero cells at the chosen zoom");
            }
            continue;
        }

        for (quadkey, _coverage) in covered {
            let entry = cells.entry(quadkey).or_default();
            if !entry.contains(&i) {
                entry.push(i);
            }
        }
    }

    if bounds[0] > bounds[2] {
        bounds = WORLD_BOUNDS;
    }

    let mut tiles: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (quadkey, indices) in cells {
        let cell_features: Vec<AssetFeature> =
            indices.iter().map(|&i| resolved_features[i].clone()).collect();
        let geoms: Vec<Geometry<f64>> = indices.iter().map(|&i| feature_geoms[i].clone()).collect();
        let filtered = asset_filter.filter(&quadkey, cell_features, geoms);

        let mut assets = Vec::new();
        for feature in &filtered {
            for asset in &feature.assets {
                if !assets.contains(asset) {
                    assets.push(asset.clone());
                }
            }
        }
        if !assets.is_empty() {
            tiles.insert(quadkey, assets);
        }
    }

    if tiles.is_empty() {
        return Err(MosaicError::Validation(
            "no cells were covered by any feature at the chosen zoom range".to_string(),
        ));
    }

    debug!(cells = tiles.len(), "built mosaic index");

    let center = center_from_bounds(bounds, options.minzoom);
    let tilematrixset = if options.tms_id == crate::tms::DEFAULT_TMS_ID {
        None
    } else {
        Some(TileMatrixSetRef {
            id: options.tms_id.clone(),
        })
    };

    let doc = MosaicJson {
        mosaicjson: if tilematrixset.is_some() {
            SPEC_VERSION_0_0_3.to_string()
        } else {
            SPEC_VERSION_0_0_2.to_string()
        },
        name: None,
        description: None,
        attribution: None,
        version: "1.0.0".to_string(),
        minzoom: options.minzoom,
        maxzoom: options.maxzoom,
        quadkey_zoom: if options.quadkey_zoom.is_some() {
            options.quadkey_zoom
        } else {
            None
        },
        bounds,
        center,
        tiles,
        tilematrixset,
        asset_type: None,
        asset_prefix: None,
        data_type: None,
        colormap: None,
        layers: None,
    };

    validate(&doc)?;
    Ok(doc)
}

/// Build a document from bare asset URLs plus externally-supplied
/// footprints, convenience wrapper around [`from_features`] for callers
/// who already have `(url, geometry)` pairs rather than full GeoJSON
/// features.
pub fn from_urls(
    urls_and_footprints: Vec<(String, GeojsonValue)>,
    options: &BuilderOptions,
    asset_filter: &dyn AssetFilter,
) -> Result<MosaicJson> {
    let features = urls_and_footprints
        .into_iter()
        .map(|(url, geometry)| AssetFeature::new(url, geojson::Geometry::new(geometry)))
        .collect::<Vec<_>>();
    // Every feature already carries its asset url, so the accessor is
    // never consulted; `PathAccessor` is just a harmless placeholder.
    from_features(&features, options, &PathAccessor, asset_filter)
}

/// Re-run `from_features` against an existing document's zoom/TMS
/// parameters and merge the result in, per §5 update semantics.
///
/// New cells are appended; cells present in both are merged with the
/// new assets either prepended (`add_first = true`, "new data takes
/// priority on read") or appended (`add_first = false`). Bounds are
/// unioned and `version` is bumped. `update(doc, [])` is a no-op: an
/// empty `features` leaves `doc` untouched (no version bump) and
/// returns `Ok(false)` without invoking `from_features` at all. The
/// document is likewise left untouched and `Ok(false)` returned if no
/// feature covers any new ground and no feature contributes an asset
/// not already present.
pub fn update_with_features(
    doc: &mut MosaicJson,
    features: &[AssetFeature],
    accessor: &dyn Accessor,
    add_first: bool,
) -> Result<bool> {
    if features.is_empty() {
        return Ok(false);
    }

    let options = BuilderOptions {
        minzoom: doc.minzoom,
        maxzoom: doc.maxzoom,
        quadkey_zoom: doc.quadkey_zoom,
        tms_id: doc.tms_id().to_string(),
        min_tile_cover: None,
        tile_cover_sort: false,
        quiet: true,
    };
    let incoming = from_features(features, &options, accessor, &KeepAll)?;

    let mut changed = false;
    for (quadkey, new_assets) in incoming.tiles {
        let entry = doc.tiles.entry(quadkey).or_insert_with(|| {
            changed = true;
            Vec::new()
        });
        let fresh: Vec<String> = new_assets
            .into_iter()
            .filter(|a| !entry.contains(a))
            .collect();
        if fresh.is_empty() {
            continue;
        }
        changed = true;
        if add_first {
            let mut merged = fresh;
            merged.extend(std::mem::take(entry));
            *entry = merged;
        } else {
            entry.extend(fresh);
        }
    }

    if !changed {
        return Ok(false);
    }

    doc.bounds = union_bounds(doc.bounds, incoming.bounds);
    doc.center = center_from_bounds(doc.bounds, doc.minzoom);
    doc.increase_version();
    validate(doc)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geojson::{Geometry as GjGeometry, Value as GjValue};

    fn square_feature(asset: &str, west: f64, south: f64, east: f64, north: f64) -> AssetFeature {
        let geometry = GjGeometry::new(GjValue::Polygon(vec![vec![
            vec![west, south],
            vec![east, south],
            vec![east, north],
            vec![west, north],
            vec![west, south],
        ]]));
        AssetFeature::new(asset, geometry)
    }

    #[test]
    fn rejects_empty_feature_list() {
        let options = BuilderOptions::default();
        let err = from_features(&[], &options, &PathAccessor, &KeepAll).unwrap_err();
        assert!(matches!(err, MosaicError::Validation(_)));
    }

    #[test]
    fn builds_minimal_mosaic_from_one_feature() {
        let features = vec![square_feature("a.tif", -10.0, -10.0, 10.0, 10.0)];
        let options = BuilderOptions {
            minzoom: 4,
            maxzoom: 4,
            ..BuilderOptions::default()
        };
        let doc = from_features(&features, &options, &PathAccessor, &KeepAll).unwrap();
        assert!(!doc.tiles.is_empty());
        assert!(doc.tiles.values().all(|v| v == &vec!["a.tif".to_string()]));
    }

    #[test]
    fn overlapping_features_append_in_order() {
        let features = vec![
            square_feature("a.tif", -10.0, -10.0, 10.0, 10.0),
            square_feature("b.tif", -5.0, -5.0, 5.0, 5.0),
        ];
        let options = BuilderOptions {
            minzoom: 4,
            maxzoom: 4,
            ..BuilderOptions::default()
        };
        let doc = from_features(&features, &options, &PathAccessor, &KeepAll).unwrap();
        let center_quadkey = doc
            .tiles
            .iter()
            .find(|(_, v)| v.len() == 2)
            .expect("at least one cell should be covered by both features");
        assert_eq!(center_quadkey.1, &vec!["a.tif".to_string(), "b.tif".to_string()]);
    }

    #[test]
    fn update_add_first_prepends_new_assets() {
        let features = vec![square_feature("a.tif", -10.0, -10.0, 10.0, 10.0)];
        let options = BuilderOptions {
            minzoom: 4,
            maxzoom: 4,
            ..BuilderOptions::default()
        };
        let mut doc = from_features(&features, &options, &PathAccessor, &KeepAll).unwrap();
        let new_features = vec![square_feature("b.tif", -10.0, -10.0, 10.0, 10.0)];
        let changed = update_with_features(&mut doc, &new_features, &PathAccessor, true).unwrap();
        assert!(changed);
        assert!(doc.tiles.values().all(|v| v[0] == "b.tif"));
        assert_eq!(doc.version, "1.0.1");
    }

    #[test]
    fn update_is_noop_when_nothing_new() {
        let features = vec![square_feature("a.tif", -10.0, -10.0, 10.0, 10.0)];
        let options = BuilderOptions {
            minzoom: 4,
            maxzoom: 4,
            ..BuilderOptions::default()
        };
        let mut doc = from_features(&features, &options, &PathAccessor, &KeepAll).unwrap();
        let changed = update_with_features(&mut doc, &features, &PathAccessor, false).unwrap();
        assert!(!changed);
        assert_eq!(doc.version, "1.0.0");
    }

    #[test]
    fn update_with_empty_features_is_a_noop() {
        let features = vec![square_feature("a.tif", -10.0, -10.0, 10.0, 10.0)];
        let options = BuilderOptions {
            minzoom: 4,
            maxzoom: 4,
            ..BuilderOptions::default()
        };
        let mut doc = from_features(&features, &options, &PathAccessor, &KeepAll).unwrap();
        let before = doc.clone();
        let changed = update_with_features(&mut doc, &[], &PathAccessor, false).unwrap();
        assert!(!changed);
        assert_eq!(doc.version, before.version);
        assert_eq!(doc.tiles, before.tiles);
    }

    #[test]
    fn accessor_resolves_asset_from_properties() {
        let geometry = GjGeometry::new(GjValue::Polygon(vec![vec![
            vec![-10.0, -10.0],
            vec![10.0, -10.0],
            vec![10.0, 10.0],
            vec![-10.0, 10.0],
            vec![-10.0, -10.0],
        ]]));
        let mut properties = serde_json::Map::new();
        properties.insert("path".to_string(), serde_json::json!("from-properties.tif"));
        let feature = AssetFeature::from_geometry_and_properties(geometry, properties);

        let options = BuilderOptions {
            minzoom: 4,
            maxzoom: 4,
            ..BuilderOptions::default()
        };
        let doc = from_features(&[feature], &options, &PathAccessor, &KeepAll).unwrap();
        assert!(doc
            .tiles
            .values()
            .all(|v| v == &vec!["from-properties.tif".to_string()]));
    }

    #[test]
    fn closure_accessor_resolves_from_an_arbitrary_property() {
        let geometry = GjGeometry::new(GjValue::Polygon(vec![vec![
            vec![-10.0, -10.0],
            vec![10.0, -10.0],
            vec![10.0, 10.0],
            vec![-10.0, 10.0],
            vec![-10.0, -10.0],
        ]]));
        let mut properties = serde_json::Map::new();
        properties.insert("id".to_string(), serde_json::json!("item-42"));
        let feature = AssetFeature::from_geometry_and_properties(geometry, properties);

        let accessor = |f: &AssetFeature| -> Result<Vec<String>> {
            f.property("id")
                .and_then(|v| v.as_str())
                .map(|s| vec![s.to_string()])
                .ok_or_else(|| MosaicError::Validation("missing id".to_string()))
        };

        let options = BuilderOptions {
            minzoom: 4,
            maxzoom: 4,
            ..BuilderOptions::default()
        };
        let doc = from_features(&[feature], &options, &accessor, &KeepAll).unwrap();
        assert!(doc.tiles.values().all(|v| v == &vec!["item-42".to_string()]));
    }

    struct DropByAsset(&'static str);

    impl AssetFilter for DropByAsset {
        fn filter(
            &self,
            _quadkey: &str,
            features: Vec<AssetFeature>,
            _geoms: Vec<Geometry<f64>>,
        ) -> Vec<AssetFeature> {
            features
                .into_iter()
                .filter(|f| !f.assets.iter().any(|a| a == self.0))
                .collect()
        }
    }

    #[test]
    fn asset_filter_sees_full_features_and_can_drop_one() {
        let features = vec![
            square_feature("a.tif", -10.0, -10.0, 10.0, 10.0),
            square_feature("b.tif", -10.0, -10.0, 10.0, 10.0),
        ];
        let options = BuilderOptions {
            minzoom: 4,
            maxzoom: 4,
            ..BuilderOptions::default()
        };
        let doc = from_features(&features, &options, &PathAccessor, &DropByAsset("b.tif")).unwrap();
        assert!(doc.tiles.values().all(|v| v == &vec!["a.tif".to_string()]));
    }
}
