//! Quadkey encoding and tile-matrix-set resolution.
//!
//! Tile-matrix-set math itself (`tile(lng, lat, z)`, `bounds(&tile)`, CRS
//! lookup) is consumed from the `tile_grid` crate, which is the Rust port
//! of the OGC TileMatrixSet library this mosaic format was designed
//! against. Quadkey encode/decode is ours: it is the indexing scheme
//! MosaicJSON keys `tiles` by, not something `tile_grid` provides.

use tile_grid::{Tile, Tms};

use crate::error::{MosaicError, Result};

/// The default tile matrix set when a document omits `tilematrixset`.
pub const DEFAULT_TMS_ID: &str = "WebMercatorQuad";

/// Resolve a tile-matrix-set identifier (e.g. `"WebMercatorQuad"`) to a
/// usable [`Tms`] via the global registry.
pub fn resolve_tms(id: &str) -> Result<Tms> {
    let set = tile_grid::tms()
        .get(id)
        .ok_or_else(|| MosaicError::Validation(format!("unknown tile matrix set: {id}")))?;
    set.into_tms()
        .map_err(|e| MosaicError::Validation(format!("invalid tile matrix set {id}: {e}")))
}

/// Encode an `(x, y, z)` tile index as a quadkey string.
///
/// Digit order follows quad-tree traversal: NW=0, NE=1, SW=2, SE=3. The
/// zoom-0 tile is the literal string `"0"` (a single root cell has no
/// quadrant digits to emit).
pub fn tile_to_quadkey(x: u32, y: u32, z: u8) -> String {
    if z == 0 {
        return "0".to_string();
    }
    let mut key = String::with_capacity(z as usize);
    for i in (1..=z).rev() {
        let mask = 1u32 << (i - 1);
        let mut digit = 0u8;
        if x & mask != 0 {
            digit += 1;
        }
        if y & mask != 0 {
            digit += 2;
        }
        key.push((b'0' + digit) as char);
    }
    key
}

/// Decode a quadkey string back into an `(x, y, z)` tile index.
pub fn quadkey_to_tile(quadkey: &str) -> Result<(u32, u32, u8)> {
    if quadkey == "0" {
        return Ok((0, 0, 0));
    }
    let z = quadkey.len();
    if z == 0 || z > 30 {
        return Err(MosaicError::Validation(format!(
            "invalid quadkey length: {quadkey:?}"
        )));
    }
    let mut x: u32 = 0;
    let mut y: u32 = 0;
    for (i, c) in quadkey.chars().enumerate() {
        let mask = 1u32 << (z - i - 1);
        match c {
            '0' => {}
            '1' => x |= mask,
            '2' => y |= mask,
            '3' => {
                x |= mask;
                y |= mask;
            }
            other => {
                return Err(MosaicError::Validation(format!(
                    "invalid quadkey digit {other:?} in {quadkey:?}"
                )))
            }
        }
    }
    Ok((x, y, z as u8))
}

/// Whether `quadkey` is well-formed for an index built at `quadkey_zoom`.
pub fn is_valid_quadkey(quadkey: &str, quadkey_zoom: u8) -> bool {
    if quadkey_zoom == 0 {
        return quadkey == "0";
    }
    quadkey.len() == quadkey_zoom as usize
        && quadkey.chars().all(|c| matches!(c, '0'..='3'))
}

pub fn tile_from_indices(x: u32, y: u32, z: u8) -> Tile {
    Tile::new(x as i64, y as i64, z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zoom_zero_is_literal() {
        assert_eq!(tile_to_quadkey(0, 0, 0), "0");
        assert_eq!(quadkey_to_tile("0").unwrap(), (0, 0, 0));
    }

    #[test]
    fn roundtrip_encodes_quadrants() {
        for z in 1..8u8 {
            let max = 1u32 << z;
            for x in 0..max {
                for y in 0..max {
                    let qk = tile_to_quadkey(x, y, z);
                    assert_eq!(qk.len(), z as usize);
                    assert_eq!(quadkey_to_tile(&qk).unwrap(), (x, y, z));
                }
            }
        }
    }

    #[test]
    fn quadrant_digits_match_convention() {
        // z=1: NW=(0,0)->"0", NE=(1,0)->"1", SW=(0,1)->"2", SE=(1,1)->"3"
        assert_eq!(tile_to_quadkey(0, 0, 1), "0");
        assert_eq!(tile_to_quadkey(1, 0, 1), "1");
        assert_eq!(tile_to_quadkey(0, 1, 1), "2");
        assert_eq!(tile_to_quadkey(1, 1, 1), "3");
    }

    #[test]
    fn resolves_default_tms() {
        let tms = resolve_tms(DEFAULT_TMS_ID).expect("WebMercatorQuad should be registered");
        assert_eq!(tms.minzoom(), 0);
    }

    #[test]
    fn rejects_unknown_tms() {
        assert!(resolve_tms("NotARealTms").is_err());
    }

    #[test]
    fn rejects_malformed_quadkey() {
        assert!(quadkey_to_tile("059").is_err());
        assert!(quadkey_to_tile("").is_err());
    }
}
