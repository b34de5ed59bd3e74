//! Geometry & tile-cover kernel.
//!
//! Given a WGS-84 polygon and a tile matrix set, computes the set of
//! indexing-level tile cells whose cell polygon intersects the input,
//! together with each cell's coverage fraction (area of intersection in
//! the TMS CRS over area of the cell). Polygon/line intersection and
//! area are consumed from the `geo` crate; tile/bounds math from
//! `tile_grid`.

use std::collections::BTreeMap;

use geo::{Area, BooleanOps, Intersects};
use geo_types::{Coord, Geometry, LineString, Polygon};
use tile_grid::{Tile, Tms};

use crate::error::{MosaicError, Result};
use crate::tms::tile_to_quadkey;

/// One covered cell: its `(x, y)` index and coverage fraction in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoveredCell {
    pub x: u32,
    pub y: u32,
    pub coverage: f64,
}

/// Compute the tile cover of `geometry` (WGS-84 lng/lat) at `zoom` in `tms`.
///
/// `min_tile_cover` filters out cells below the given coverage fraction
/// threshold; passing a value `> 1.0` is a caller error and raises
/// [`MosaicError::Validation`] rather than silently clamping. When
/// `sort_by_coverage` is set, the returned vector is ordered by
/// descending coverage.
pub fn tile_cover(
    geometry: &Geometry<f64>,
    tms: &Tms,
    zoom: u8,
    min_tile_cover: Option<f64>,
    sort_by_coverage: bool,
) -> Result<Vec<CoveredCell>> {
    if let Some(c) = min_tile_cover {
        if c > 1.0 {
            return Err(MosaicError::Validation(
                "min_tile_cover must be <= 1".to_string(),
            ));
        }
    }

    let parts = split_antimeridian(geometry);
    let mut by_cell: BTreeMap<(u32, u32), f64> = BTreeMap::new();

    for part in &parts {
        for (tile, coverage) in cover_polygon_part(part, tms, zoom)? {
            let entry = by_cell.entry((tile.x as u32, tile.y as u32)).or_insert(0.0);
            if coverage > *entry {
                *entry = coverage;
            }
        }
    }

    let mut cells: Vec<CoveredCell> = by_cell
        .into_iter()
        .map(|((x, y), coverage)| CoveredCell { x, y, coverage })
        .collect();

    if let Some(threshold) = min_tile_cover {
        cells.retain(|c| c.coverage >= threshold);
    }

    if sort_by_coverage {
        cells.sort_by(|a, b| b.coverage.partial_cmp(&a.coverage).unwrap());
    } else {
        cells.sort_by_key(|c| (c.y, c.x));
    }

    Ok(cells)
}

/// Cover a single antimeridian-free geometry part against the tile grid
/// at `zoom`, returning raw (un-deduplicated) `(tile, coverage)` pairs.
fn cover_polygon_part(geometry: &Geometry<f64>, tms: &Tms, zoom: u8) -> Result<Vec<(Tile, f64)>> {
    let tms_bbox = tms.bbox().map_err(|e| {
        MosaicError::Validation(format!("could not compute tms validity bbox: {e}"))
    })?;

    let Some((west, south, east, north)) = geographic_bbox(geometry) else {
        return Ok(Vec::new());
    };

    // Clip to the TMS geographic validity bbox; empty after clipping means
    // the geometry never touches this tile matrix set at all.
    let west = west.max(tms_bbox.left);
    let south = south.max(tms_bbox.bottom);
    let east = east.min(tms_bbox.right);
    let north = north.min(tms_bbox.top);
    if west >= east || south >= north {
        return Ok(Vec::new());
    }

    let corners = [(west, south), (west, north), (east, south), (east, north)];
    let mut xmin = u32::MAX;
    let mut xmax = 0u32;
    let mut ymin = u32::MAX;
    let mut ymax = 0u32;
    for (lng, lat) in corners {
        let tile = tms
            .tile(lng, lat, zoom)
            .map_err(|e| MosaicError::Validation(format!("tile() failed: {e}")))?;
        xmin = xmin.min(tile.x as u32);
        xmax = xmax.max(tile.x as u32);
        ymin = ymin.min(tile.y as u32);
        ymax = ymax.max(tile.y as u32);
    }

    // Clip the geometry itself (not just its bbox corners) to the TMS's
    // geographic validity range before projecting: `tms.xy()` rejects any
    // coordinate outside that range, so a polygon that only partially
    // extends past it (e.g. touching a pole beyond Web Mercator's
    // ~85.06N/S limit) must be clipped here rather than projected whole.
    let clamped = clip_to_geographic_bbox(geometry, west, south, east, north);
    let Some(clamped) = clamped else {
        return Ok(Vec::new());
    };
    let projected = project_to_tms(&clamped, tms)?;

    let mut out = Vec::new();
    for x in xmin..=xmax {
        for y in ymin..=ymax {
            let tile = Tile::new(x as i64, y as i64, zoom);
            // `xy_bounds` returns the cell in the TMS's own (projected) CRS,
            // matching `projected` below — `bounds()` returns geographic
            // degrees and must never be intersected against it directly.
            let bounds = tms.xy_bounds(&tile);
            let cell = Polygon::new(
                LineString::from(vec![
                    (bounds.left, bounds.bottom),
                    (bounds.right, bounds.bottom),
                    (bounds.right, bounds.top),
                    (bounds.left, bounds.top),
                    (bounds.left, bounds.bottom),
                ]),
                vec![],
            );
            let cell_area = cell.unsigned_area();
            if cell_area <= 0.0 {
                continue;
            }

            match &projected {
                Geometry::Polygon(p) => {
                    let intersection = p.intersection(&cell);
                    let area = intersection.unsigned_area();
                    if area > 0.0 {
                        out.push((tile, (area / cell_area).min(1.0)));
                    }
                }
                Geometry::MultiPolygon(mp) => {
                    let mut area = 0.0;
                    for p in mp {
                        area += p.intersection(&cell).unsigned_area();
                    }
                    if area > 0.0 {
                        out.push((tile, (area / cell_area).min(1.0)));
                    }
                }
                // Degenerate inputs (points/lines): non-empty iff they
                // intersect the cell's interior, not merely its boundary.
                other => {
                    if other.intersects(&cell) && !touches_boundary_only(other, &cell) {
                        out.push((tile, 0.0));
                    }
                }
            }
        }
    }
    Ok(out)
}

/// A conservative boundary-exclusive intersects check for degenerate
/// (point/line) geometries: true when the only contact with `cell` is
/// along its edge, not its interior.
fn touches_boundary_only(geometry: &Geometry<f64>, cell: &Polygon<f64>) -> bool {
    if !geometry.intersects(cell) {
        return true;
    }
    let shrunk = shrink(cell, 1e-9);
    !geometry.intersects(&shrunk)
}

fn shrink(poly: &Polygon<f64>, eps: f64) -> Polygon<f64> {
    let (minx, miny, maxx, maxy) = ring_bbox(poly.exterior());
    Polygon::new(
        LineString::from(vec![
            (minx + eps, miny + eps),
            (maxx - eps, miny + eps),
            (maxx - eps, maxy - eps),
            (minx + eps, maxy - eps),
            (minx + eps, miny + eps),
        ]),
        vec![],
    )
}

fn ring_bbox(ring: &LineString<f64>) -> (f64, f64, f64, f64) {
    let mut minx = f64::MAX;
    let mut miny = f64::MAX;
    let mut maxx = f64::MIN;
    let mut maxy = f64::MIN;
    for c in ring.coords() {
        minx = minx.min(c.x);
        miny = miny.min(c.y);
        maxx = maxx.max(c.x);
        maxy = maxy.max(c.y);
    }
    (minx, miny, maxx, maxy)
}

fn geographic_bbox(geometry: &Geometry<f64>) -> Option<(f64, f64, f64, f64)> {
    use geo::BoundingRect;
    geometry
        .bounding_rect()
        .map(|r| (r.min().x, r.min().y, r.max().x, r.max().y))
}

/// Clip a geographic geometry to `[west, south, east, north]`, the
/// caller's already-TMS-clamped bbox. Polygons/multipolygons are clipped
/// by true intersection (so a pole-touching polygon comes back as the
/// part that actually lies within the TMS's valid range); degenerate
/// point/line inputs are coordinate-clamped, since they contribute to
/// coverage only via an `intersects` check, not an area computation.
fn clip_to_geographic_bbox(
    geometry: &Geometry<f64>,
    west: f64,
    south: f64,
    east: f64,
    north: f64,
) -> Option<Geometry<f64>> {
    let clip = clip_rect(west, south, east, north);
    match geometry {
        Geometry::Polygon(p) => {
            let pieces = p.intersection(&clip);
            if pieces.0.is_empty() {
                None
            } else {
                Some(Geometry::MultiPolygon(pieces))
            }
        }
        Geometry::MultiPolygon(mp) => {
            let mut out = Vec::new();
            for p in mp {
                out.extend(p.intersection(&clip).0);
            }
            if out.is_empty() {
                None
            } else {
                Some(Geometry::MultiPolygon(geo_types::MultiPolygon(out)))
            }
        }
        Geometry::Point(pt) => Some(Geometry::Point(geo_types::Point(Coord {
            x: pt.0.x.clamp(west, east),
            y: pt.0.y.clamp(south, north),
        }))),
        Geometry::LineString(ls) => Some(Geometry::LineString(LineString(
            ls.0.iter()
                .map(|c| Coord {
                    x: c.x.clamp(west, east),
                    y: c.y.clamp(south, north),
                })
                .collect(),
        ))),
        other => Some(other.clone()),
    }
}

/// Project every coordinate of a geographic geometry into the TMS CRS.
fn project_to_tms(geometry: &Geometry<f64>, tms: &Tms) -> Result<Geometry<f64>> {
    let project_coord = |c: Coord<f64>| -> Result<Coord<f64>> {
        let xy = tms
            .xy(c.x, c.y)
            .map_err(|e| MosaicError::Validation(format!("could not project point: {e}")))?;
        Ok(Coord { x: xy.x, y: xy.y })
    };

    match geometry {
        Geometry::Polygon(p) => Ok(Geometry::Polygon(project_polygon(p, &project_coord)?)),
        Geometry::MultiPolygon(mp) => {
            let mut polys = Vec::with_capacity(mp.0.len());
            for p in mp {
                polys.push(project_polygon(p, &project_coord)?);
            }
            Ok(Geometry::MultiPolygon(geo_types::MultiPolygon(polys)))
        }
        Geometry::Point(pt) => {
            let c = project_coord(pt.0)?;
            Ok(Geometry::Point(geo_types::Point(c)))
        }
        Geometry::LineString(ls) => {
            let mut coords = Vec::with_capacity(ls.0.len());
            for c in &ls.0 {
                coords.push(project_coord(*c)?);
            }
            Ok(Geometry::LineString(LineString(coords)))
        }
        other => Err(MosaicError::Validation(format!(
            "unsupported geometry type for tile cover: {other:?}"
        ))),
    }
}

fn project_polygon(
    p: &Polygon<f64>,
    project: &impl Fn(Coord<f64>) -> Result<Coord<f64>>,
) -> Result<Polygon<f64>> {
    let exterior = project_ring(p.exterior(), project)?;
    let mut interiors = Vec::with_capacity(p.interiors().len());
    for ring in p.interiors() {
        interiors.push(project_ring(ring, project)?);
    }
    Ok(Polygon::new(exterior, interiors))
}

fn project_ring(
    ring: &LineString<f64>,
    project: &impl Fn(Coord<f64>) -> Result<Coord<f64>>,
) -> Result<LineString<f64>> {
    let mut coords = Vec::with_capacity(ring.0.len());
    for c in &ring.0 {
        coords.push(project(*c)?);
    }
    Ok(LineString(coords))
}

/// Split a geometry crossing the +/-180 meridian into non-crossing parts.
///
/// Detects a crossing by looking for a longitude jump greater than 180
/// degrees between consecutive ring vertices, "unwraps" the ring into a
/// continuous longitude space, then clips the unwrapped ring back into
/// the two `[-180, 180]` halves it spans.
fn split_antimeridian(geometry: &Geometry<f64>) -> Vec<Geometry<f64>> {
    match geometry {
        Geometry::Polygon(p) => split_polygon(p),
        Geometry::MultiPolygon(mp) => mp.0.iter().flat_map(split_polygon).collect(),
        other => vec![other.clone()],
    }
}

fn split_polygon(p: &Polygon<f64>) -> Vec<Geometry<f64>> {
    if !crosses_antimeridian(p.exterior()) {
        return vec![Geometry::Polygon(p.clone())];
    }

    let unwrapped = unwrap_ring(p.exterior());
    let (minx, _, maxx, _) = ring_bbox(&unwrapped);

    let west_clip = clip_rect(minx.floor() - 1.0, -90.0, 180.0, 90.0);
    let east_clip = clip_rect(180.0, -90.0, maxx.ceil() + 1.0, 90.0);

    let unwrapped_poly = Polygon::new(unwrapped, vec![]);
    let mut parts = Vec::new();
    for (clip, shift) in [(west_clip, 0.0), (east_clip, -360.0)] {
        let piece = unwrapped_poly.intersection(&clip);
        for poly in piece.0 {
            if poly.unsigned_area() > 0.0 {
                parts.push(Geometry::Polygon(shift_polygon(&poly, shift)));
            }
        }
    }
    if parts.is_empty() {
        vec![Geometry::Polygon(p.clone())]
    } else {
        parts
    }
}

fn crosses_antimeridian(ring: &LineString<f64>) -> bool {
    ring.0
        .windows(2)
        .any(|w| (w[0].x - w[1].x).abs() > 180.0)
}

fn unwrap_ring(ring: &LineString<f64>) -> LineString<f64> {
    let mut out = Vec::with_capacity(ring.0.len());
    let mut offset = 0.0;
    let mut prev_x = ring.0.first().map(|c| c.x).unwrap_or(0.0);
    for c in &ring.0 {
        let mut x = c.x + offset;
        if x - prev_x > 180.0 {
            offset -= 360.0;
            x -= 360.0;
        } else if x - prev_x < -180.0 {
            offset += 360.0;
            x += 360.0;
        }
        out.push(Coord { x, y: c.y });
        prev_x = x;
    }
    LineString(out)
}

fn clip_rect(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Polygon<f64> {
    Polygon::new(
        LineString::from(vec![
            (minx, miny),
            (maxx, miny),
            (maxx, maxy),
            (minx, maxy),
            (minx, miny),
        ]),
        vec![],
    )
}

fn shift_polygon(p: &Polygon<f64>, dx: f64) -> Polygon<f64> {
    let shift_ring = |ring: &LineString<f64>| -> LineString<f64> {
        LineString(
            ring.0
                .iter()
                .map(|c| Coord {
                    x: c.x + dx,
                    y: c.y,
                })
                .collect(),
        )
    };
    Polygon::new(
        shift_ring(p.exterior()),
        p.interiors().iter().map(shift_ring).collect(),
    )
}

/// Emit the covered cells as quadkey strings at `zoom`.
pub fn tile_cover_quadkeys(
    geometry: &Geometry<f64>,
    tms: &Tms,
    zoom: u8,
    min_tile_cover: Option<f64>,
    sort_by_coverage: bool,
) -> Result<Vec<(String, f64)>> {
    let cells = tile_cover(geometry, tms, zoom, min_tile_cover, sort_by_coverage)?;
    Ok(cells
        .into_iter()
        .map(|c| (tile_to_quadkey(c.x, c.y, zoom), c.coverage))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tms::resolve_tms;
    use geo_types::polygon;

    fn square(west: f64, south: f64, east: f64, north: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: west, y: south),
            (x: east, y: south),
            (x: east, y: north),
            (x: west, y: north),
            (x: west, y: south),
        ])
    }

    #[test]
    fn min_tile_cover_above_one_is_an_error() {
        let tms = resolve_tms("WebMercatorQuad").unwrap();
        let geom = square(-10.0, -10.0, 10.0, 10.0);
        let err = tile_cover(&geom, &tms, 4, Some(2.0), false).unwrap_err();
        assert!(matches!(err, MosaicError::Validation(_)));
    }

    #[test]
    fn whole_world_covers_every_root_child() {
        let tms = resolve_tms("WebMercatorQuad").unwrap();
        let geom = square(-179.9, -85.0, 179.9, 85.0);
        let cells = tile_cover(&geom, &tms, 1, None, false).unwrap();
        assert_eq!(cells.len(), 4);
    }

    #[test]
    fn polygon_crossing_the_pole_limit_is_clipped_not_rejected() {
        // Web Mercator is valid only to about +/-85.06 degrees; a polygon
        // reaching the geographic pole must be clipped to that range
        // rather than causing a projection error.
        let tms = resolve_tms("WebMercatorQuad").unwrap();
        let geom = square(-10.0, 80.0, 10.0, 90.0);
        let cells = tile_cover(&geom, &tms, 4, None, false).unwrap();
        assert!(!cells.is_empty());
    }

    #[test]
    fn sort_by_coverage_orders_descending() {
        let tms = resolve_tms("WebMercatorQuad").unwrap();
        // A thin sliver mostly inside one of two zoom-1 quadrants.
        let geom = square(-179.0, -1.0, 5.0, 1.0);
        let cells = tile_cover(&geom, &tms, 1, None, true).unwrap();
        for w in cells.windows(2) {
            assert!(w[0].coverage >= w[1].coverage);
        }
    }
}
