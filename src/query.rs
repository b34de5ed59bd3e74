//! Asset selection queries and the pixel-selection compositor.
//!
//! Resolving *which assets* cover a tile/point/bbox is in scope and
//! lives here. Actually reading pixels out of those assets is not:
//! callers provide a [`RasterReader`] implementation and this module
//! only orchestrates concurrency. `read_tile` combines the per-asset
//! results per the selected [`PixelSelection`] method; `read_point`
//! returns the raw per-asset samples instead, since a point query has
//! no natural single "right" composited answer across assets.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use geo_types::{Coord, Geometry, Point, Polygon};
use serde::{Deserialize, Serialize};

use crate::error::{MosaicError, Result};
use crate::geometry::tile_cover_quadkeys;
use crate::model::MosaicJson;
use crate::tms::{self, resolve_tms};

/// How to combine per-asset pixel stacks into a single output pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelSelection {
    First,
    Last,
    Highest,
    Lowest,
    Mean,
    Median,
    Stdev,
    Darkest,
    Brightest,
}

impl Default for PixelSelection {
    fn default() -> Self {
        PixelSelection::First
    }
}

/// A read pixel stack for one band, one sample per contributing asset,
/// in the order assets were read. `None` entries are nodata.
pub type BandStack = Vec<Option<f64>>;

impl PixelSelection {
    /// Combine a per-asset stack of samples for a single band into one
    /// output value. Returns `None` when every contributing sample is
    /// nodata.
    pub fn combine(&self, stack: &BandStack) -> Option<f64> {
        let values: Vec<f64> = stack.iter().filter_map(|v| *v).collect();
        if values.is_empty() {
            return None;
        }
        match self {
            PixelSelection::First => stack.iter().find_map(|v| *v),
            PixelSelection::Last => stack.iter().rev().find_map(|v| *v),
            PixelSelection::Highest => values.into_iter().fold(None, |acc, v| match acc {
                None => Some(v),
                Some(a) if v > a => Some(v),
                other => other,
            }),
            PixelSelection::Lowest | PixelSelection::Darkest => {
                values.into_iter().fold(None, |acc, v| match acc {
                    None => Some(v),
                    Some(a) if v < a => Some(v),
                    other => other,
                })
            }
            PixelSelection::Brightest => values.into_iter().fold(None, |acc, v| match acc {
                None => Some(v),
                Some(a) if v > a => Some(v),
                other => other,
            }),
            PixelSelection::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
            PixelSelection::Median => {
                let mut sorted = values;
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    Some((sorted[mid - 1] + sorted[mid]) / 2.0)
                } else {
                    Some(sorted[mid])
                }
            }
            PixelSelection::Stdev => {
                let n = values.len() as f64;
                let mean = values.iter().sum::<f64>() / n;
                let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                Some(variance.sqrt())
            }
        }
    }
}

/// The out-of-scope capability this core delegates raster I/O to.
///
/// Implementations know how to open a COG/asset URL and read pixels out
/// of it; the mosaic core never touches pixel formats, reprojection, or
/// resampling itself.
#[async_trait]
pub trait RasterReader: Send + Sync {
    /// Read one asset's pixel stack for a given output tile, banded.
    async fn read_tile(&self, asset_url: &str, x: u32, y: u32, z: u8) -> Result<Vec<BandStack>>;

    /// Read one asset's value at a geographic point, banded.
    async fn read_point(&self, asset_url: &str, lng: f64, lat: f64) -> Result<Vec<BandStack>>;
}

/// A [`RasterReader`] that always reports no data. Useful as a test
/// double and for exercising the asset-selection path without wiring a
/// real decoder.
#[derive(Debug, Default)]
pub struct NullRasterReader;

#[async_trait]
impl RasterReader for NullRasterReader {
    async fn read_tile(&self, _asset_url: &str, _x: u32, _y: u32, _z: u8) -> Result<Vec<BandStack>> {
        Ok(Vec::new())
    }

    async fn read_point(&self, _asset_url: &str, _lng: f64, _lat: f64) -> Result<Vec<BandStack>> {
        Ok(Vec::new())
    }
}

/// Resolve the ordered, deduplicated list of asset URLs covering an
/// output `(x, y, z)` tile.
///
/// When `tile_tms_id` differs from the document's own TMS, the tile is
/// first converted to a geographic polygon and re-covered against the
/// document's indexing grid (cross-TMS lookup), rather than assuming
/// the two grids share quadkeys.
pub fn assets_for_tile(doc: &MosaicJson, x: u32, y: u32, z: u8, tile_tms_id: &str) -> Result<Vec<String>> {
    if z < doc.minzoom || z > doc.maxzoom {
        return Err(MosaicError::Validation(format!(
            "zoom {z} outside of mosaic range [{}, {}]",
            doc.minzoom, doc.maxzoom
        )));
    }

    if tile_tms_id == doc.tms_id() {
        let quadkey_zoom = doc.quadkey_zoom();
        let assets = match z.cmp(&quadkey_zoom) {
            std::cmp::Ordering::Equal => doc.assets_at_quadkey(&tms::tile_to_quadkey(x, y, z)),
            // `z` is coarser than the indexing level: truncate to the
            // single ancestor quadkey the query tile falls within.
            std::cmp::Ordering::Greater => {
                let shift = z - quadkey_zoom;
                let parent_x = x >> shift;
                let parent_y = y >> shift;
                doc.assets_at_quadkey(&tms::tile_to_quadkey(parent_x, parent_y, quadkey_zoom))
            }
            // `z` is finer than the indexing level: union the assets of
            // every descendant quadkey, in first-seen order.
            std::cmp::Ordering::Less => {
                let shift = quadkey_zoom - z;
                let span = 1u32 << shift;
                let mut seen = std::collections::HashSet::new();
                let mut out = Vec::new();
                for dx in 0..span {
                    for dy in 0..span {
                        let child_x = x * span + dx;
                        let child_y = y * span + dy;
                        let quadkey = tms::tile_to_quadkey(child_x, child_y, quadkey_zoom);
                        for asset in doc.assets_at_quadkey(&quadkey) {
                            if seen.insert(asset.clone()) {
                                out.push(asset);
                            }
                        }
                    }
                }
                out
            }
        };
        return if assets.is_empty() {
            Err(MosaicError::NoAssetFound)
        } else {
            Ok(assets)
        };
    }

    let tile_tms = resolve_tms(tile_tms_id)?;
    let tile = tms::tile_from_indices(x, y, z);
    let bounds = tile_tms
        .bounds(&tile)
        .map_err(|e| MosaicError::Validation(format!("bounds() failed: {e}")))?;
    let polygon = Geometry::Polygon(Polygon::new(
        geo_types::LineString::from(vec![
            (bounds.left, bounds.bottom),
            (bounds.right, bounds.bottom),
            (bounds.right, bounds.top),
            (bounds.left, bounds.top),
            (bounds.left, bounds.bottom),
        ]),
        vec![],
    ));
    assets_for_geometry(doc, &polygon, None, false)
}

/// Resolve the ordered, deduplicated list of asset URLs at a geographic
/// point, raising [`MosaicError::PointOutsideBounds`] if the point
/// falls outside every indexed cell.
pub fn assets_for_point(doc: &MosaicJson, lng: f64, lat: f64) -> Result<Vec<String>> {
    if lng < doc.bounds[0] || lng > doc.bounds[2] || lat < doc.bounds[1] || lat > doc.bounds[3] {
        return Err(MosaicError::PointOutsideBounds);
    }
    let geometry = Geometry::Point(Point(Coord { x: lng, y: lat }));
    match assets_for_geometry(doc, &geometry, None, false) {
        Err(MosaicError::NoAssetFound) => Err(MosaicError::PointOutsideBounds),
        other => other,
    }
}

/// Resolve the ordered, deduplicated list of asset URLs covering a
/// geographic bounding box `[xmin, ymin, xmax, ymax]` (WGS-84 lng/lat).
pub fn assets_for_bbox(doc: &MosaicJson, xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Result<Vec<String>> {
    let polygon = Geometry::Polygon(Polygon::new(
        geo_types::LineString::from(vec![
            (xmin, ymin),
            (xmax, ymin),
            (xmax, ymax),
            (xmin, ymax),
            (xmin, ymin),
        ]),
        vec![],
    ));
    assets_for_geometry(doc, &polygon, None, false)
}

/// Resolve the union of asset URLs covering `geometry`, in first-seen
/// order, optionally filtered by `min_tile_cover` and walked in
/// descending-coverage cell order when `sort_by_coverage` is set.
pub fn assets_for_geometry(
    doc: &MosaicJson,
    geometry: &Geometry<f64>,
    min_tile_cover: Option<f64>,
    sort_by_coverage: bool,
) -> Result<Vec<String>> {
    let tms = resolve_tms(doc.tms_id())?;
    let quadkeys = tile_cover_quadkeys(geometry, &tms, doc.quadkey_zoom(), min_tile_cover, sort_by_coverage)?;

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for (quadkey, _coverage) in quadkeys {
        for asset in doc.assets_at_quadkey(&quadkey) {
            if seen.insert(asset.clone()) {
                out.push(asset);
            }
        }
    }

    if out.is_empty() {
        Err(MosaicError::NoAssetFound)
    } else {
        Ok(out)
    }
}

/// Read and composite every contributing asset's pixel stack for a
/// tile, fanning reads out across at most `concurrency` tasks.
///
/// Reads run concurrently but results are collected in asset order
/// (`buffered`, not `buffer_unordered`), since [`PixelSelection::First`]/
/// `Last` and every policy's tie-break rely on that order, not on
/// whichever asset happens to finish reading first. `reverse` reverses
/// the asset list (bottom-first composition) before any of this.
///
/// A per-asset [`MosaicError::NoAssetFound`] is treated as "no data for
/// this asset" and tolerated; any other per-asset error is surfaced
/// immediately, dropping the rest of the in-flight reads. If every
/// asset comes back with no data, the whole call fails with
/// `NoAssetFound` rather than compositing an all-nodata result.
pub async fn read_tile(
    doc: &MosaicJson,
    reader: Arc<dyn RasterReader>,
    x: u32,
    y: u32,
    z: u8,
    tile_tms_id: &str,
    pixel_selection: PixelSelection,
    concurrency: usize,
    reverse: bool,
) -> Result<Vec<Option<f64>>> {
    let mut assets = assets_for_tile(doc, x, y, z, tile_tms_id)?;
    if reverse {
        assets.reverse();
    }
    let mut reads = stream::iter(assets.into_iter().map(|asset| {
        let reader = Arc::clone(&reader);
        async move { reader.read_tile(&asset, x, y, z).await }
    }))
    .buffered(concurrency.max(1));

    let mut stacks = Vec::new();
    let mut any_data = false;
    while let Some(result) = reads.next().await {
        match result {
            Ok(stack) => {
                any_data = true;
                stacks.push(stack);
            }
            Err(MosaicError::NoAssetFound) => {}
            Err(other) => return Err(other),
        }
    }

    if !any_data {
        return Err(MosaicError::NoAssetFound);
    }
    Ok(composite(&stacks, pixel_selection))
}

/// Read every contributing asset's raw per-band samples at a point,
/// tagged by the asset each reading came from.
///
/// Unlike [`read_tile`] this does not composite across assets: callers
/// see exactly which asset produced which values, matching
/// `point(lng, lat) -> [(asset, values)]`. A per-asset
/// [`MosaicError::NoAssetFound`] (or [`MosaicError::PointOutsideBounds`])
/// is tolerated; any other per-asset error is surfaced immediately,
/// dropping the rest of the in-flight reads. If every asset comes back
/// with no data, the call fails with `PointOutsideBounds`.
pub async fn read_point(
    doc: &MosaicJson,
    reader: Arc<dyn RasterReader>,
    lng: f64,
    lat: f64,
    concurrency: usize,
    reverse: bool,
) -> Result<Vec<(String, Vec<BandStack>)>> {
    let mut assets = assets_for_point(doc, lng, lat)?;
    if reverse {
        assets.reverse();
    }
    let mut reads = stream::iter(assets.into_iter().map(|asset| {
        let reader = Arc::clone(&reader);
        async move {
            let result = reader.read_point(&asset, lng, lat).await;
            (asset, result)
        }
    }))
    .buffered(concurrency.max(1));

    let mut out = Vec::new();
    while let Some((asset, result)) = reads.next().await {
        match result {
            Ok(bands) => out.push((asset, bands)),
            Err(MosaicError::NoAssetFound) | Err(MosaicError::PointOutsideBounds) => {}
            Err(other) => return Err(other),
        }
    }

    if out.is_empty() {
        return Err(MosaicError::PointOutsideBounds);
    }
    Ok(out)
}

/// Combine per-asset, per-band stacks (in asset-read order) into one
/// output value per band.
fn composite(stacks: &[Vec<BandStack>], pixel_selection: PixelSelection) -> Vec<Option<f64>> {
    let band_count = stacks.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut out = Vec::with_capacity(band_count);
    for band in 0..band_count {
        let stack: BandStack = stacks
            .iter()
            .map(|asset_bands| asset_bands.get(band).and_then(|b| b.first().copied().flatten()))
            .collect();
        out.push(pixel_selection.combine(&stack));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_picks_first_non_nodata() {
        let stack = vec![None, Some(2.0), Some(3.0)];
        assert_eq!(PixelSelection::First.combine(&stack), Some(2.0));
    }

    #[test]
    fn last_picks_last_non_nodata() {
        let stack = vec![Some(1.0), Some(2.0), None];
        assert_eq!(PixelSelection::Last.combine(&stack), Some(2.0));
    }

    #[test]
    fn mean_averages_non_nodata_only() {
        let stack = vec![Some(2.0), None, Some(4.0)];
        assert_eq!(PixelSelection::Mean.combine(&stack), Some(3.0));
    }

    #[test]
    fn median_of_even_count_averages_middle_two() {
        let stack = vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)];
        assert_eq!(PixelSelection::Median.combine(&stack), Some(2.5));
    }

    #[test]
    fn all_nodata_combines_to_none() {
        let stack = vec![None, None];
        assert_eq!(PixelSelection::Highest.combine(&stack), None);
    }

    #[test]
    fn highest_and_lowest_pick_extremes() {
        let stack = vec![Some(5.0), Some(1.0), Some(9.0)];
        assert_eq!(PixelSelection::Highest.combine(&stack), Some(9.0));
        assert_eq!(PixelSelection::Lowest.combine(&stack), Some(1.0));
    }

    /// Reports a per-asset constant value; `"a"` deliberately takes longer
    /// than `"b"` so a completion-ordered fan-out (`buffer_unordered`)
    /// would surface `"b"` first even though `"a"` is listed first.
    struct DelayedReader;

    #[async_trait]
    impl RasterReader for DelayedReader {
        async fn read_tile(&self, asset_url: &str, _x: u32, _y: u32, _z: u8) -> Result<Vec<BandStack>> {
            let value = match asset_url {
                "a" => {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    1.0
                }
                "b" => 2.0,
                other => panic!("unexpected asset {other}"),
            };
            Ok(vec![vec![Some(value)]])
        }

        async fn read_point(&self, _asset_url: &str, _lng: f64, _lat: f64) -> Result<Vec<BandStack>> {
            Ok(Vec::new())
        }
    }

    fn two_asset_doc() -> MosaicJson {
        MosaicJson {
            mosaicjson: crate::model::SPEC_VERSION_0_0_2.to_string(),
            name: None,
            description: None,
            attribution: None,
            version: "1.0.0".to_string(),
            minzoom: 0,
            maxzoom: 0,
            quadkey_zoom: None,
            bounds: crate::model::WORLD_BOUNDS,
            center: [0.0, 0.0, 0.0],
            tiles: std::collections::BTreeMap::from([(
                "0".to_string(),
                vec!["a".to_string(), "b".to_string()],
            )]),
            tilematrixset: None,
            asset_type: None,
            asset_prefix: None,
            data_type: None,
            colormap: None,
            layers: None,
        }
    }

    #[tokio::test]
    async fn read_tile_preserves_asset_order_under_concurrency() {
        let doc = two_asset_doc();
        let reader: Arc<dyn RasterReader> = Arc::new(DelayedReader);
        let result = read_tile(
            &doc,
            reader,
            0,
            0,
            0,
            tms::DEFAULT_TMS_ID,
            PixelSelection::First,
            4,
            false,
        )
        .await
        .unwrap();
        // "a" is listed first in `tiles["0"]`, so `First` must pick it even
        // though "b" finishes first.
        assert_eq!(result, vec![Some(1.0)]);
    }

    fn doc_with_quadkey_zoom(quadkey_zoom: u8, tiles: std::collections::BTreeMap<String, Vec<String>>) -> MosaicJson {
        MosaicJson {
            mosaicjson: crate::model::SPEC_VERSION_0_0_2.to_string(),
            name: None,
            description: None,
            attribution: None,
            version: "1.0.0".to_string(),
            minzoom: 0,
            maxzoom: 10,
            quadkey_zoom: Some(quadkey_zoom),
            bounds: crate::model::WORLD_BOUNDS,
            center: [0.0, 0.0, 0.0],
            tiles,
            tilematrixset: None,
            asset_type: None,
            asset_prefix: None,
            data_type: None,
            colormap: None,
            layers: None,
        }
    }

    #[test]
    fn assets_for_tile_truncates_to_parent_when_query_zoom_is_coarser() {
        let quadkey = tms::tile_to_quadkey(2, 4, 5);
        let doc = doc_with_quadkey_zoom(
            5,
            std::collections::BTreeMap::from([(quadkey, vec!["a".to_string()])]),
        );
        // (1, 2, 3) is the z=3 ancestor of (2, 4, 5).
        let assets = assets_for_tile(&doc, 1, 2, 3, tms::DEFAULT_TMS_ID).unwrap();
        assert_eq!(assets, vec!["a".to_string()]);
    }

    #[test]
    fn assets_for_tile_unions_descendants_when_query_zoom_is_finer() {
        // quadkey_zoom=5, query at z=3 must union every zoom-5 descendant
        // of (1, 2, 3), not just look up "123" literally at the wrong zoom.
        let shift = 5 - 3;
        let span = 1u32 << shift;
        let mut tiles = std::collections::BTreeMap::new();
        for dx in 0..span {
            for dy in 0..span {
                let quadkey = tms::tile_to_quadkey(span + dx, 2 * span + dy, 5);
                tiles.insert(quadkey, vec![format!("asset-{dx}-{dy}")]);
            }
        }
        let doc = doc_with_quadkey_zoom(5, tiles);
        let assets = assets_for_tile(&doc, 1, 2, 3, tms::DEFAULT_TMS_ID).unwrap();
        assert_eq!(assets.len(), (span * span) as usize);
    }

    #[tokio::test]
    async fn read_tile_reverse_flips_asset_order() {
        let doc = two_asset_doc();
        let reader: Arc<dyn RasterReader> = Arc::new(DelayedReader);
        let result = read_tile(
            &doc,
            reader,
            0,
            0,
            0,
            tms::DEFAULT_TMS_ID,
            PixelSelection::First,
            4,
            true,
        )
        .await
        .unwrap();
        assert_eq!(result, vec![Some(2.0)]);
    }
}
