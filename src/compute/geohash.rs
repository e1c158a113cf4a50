//! Geohash primitives: encoding, decoding, cell geometry and rasterization.
//!
//! Thin layer over the `geohash` crate plus polygon rasterization, which the
//! crate does not provide.

use crate::compute::geometry;
use crate::compute::validation::{validate_geographic_point, validate_geohash, validate_precision};
use crate::error::Result;
use crate::types::GeoPosition;
use geo::{Distance, Haversine, Intersects, Point, Polygon, Rect};
use std::collections::BTreeSet;

/// Geohash base32 alphabet. Sorted in ASCII order, so byte order of equal
/// length cell strings is the Z-order of the cells.
pub const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Longest supported geohash.
pub const MAX_PRECISION: usize = 12;

/// Encode a position as a geohash of the given length.
pub fn encode(position: &GeoPosition, precision: usize) -> Result<String> {
    encode_point(position.to_point()?, precision)
}

/// Encode a planar (lon, lat) point as a geohash of the given length.
pub fn encode_point(point: Point<f64>, precision: usize) -> Result<String> {
    validate_precision(precision)?;
    validate_geographic_point(&point)?;
    Ok(geohash::encode(point.into(), precision)?)
}

/// Center of a geohash cell.
pub fn decode(hash: &str) -> Result<Point<f64>> {
    validate_geohash(hash)?;
    let (coord, _, _) = geohash::decode(hash)?;
    Ok(coord.into())
}

/// Bounding box of a geohash cell.
pub fn bounding_box(hash: &str) -> Result<Rect<f64>> {
    validate_geohash(hash)?;
    Ok(geohash::decode_bbox(hash)?)
}

/// Width and height in degrees of a cell at the given precision.
///
/// Longitude takes the extra bit when the bit count is odd.
pub fn cell_size(precision: usize) -> (f64, f64) {
    let (lon_bits, lat_bits) = grid_bits(precision);
    (360.0 / 2f64.powi(lon_bits), 180.0 / 2f64.powi(lat_bits))
}

fn grid_bits(precision: usize) -> (i32, i32) {
    let bits = (5 * precision) as i32;
    ((bits + 1) / 2, bits / 2)
}

/// Approximate great-circle distance in meters.
pub fn distance(a: Point<f64>, b: Point<f64>) -> f64 {
    Haversine.distance(a, b)
}

/// Outcome of rasterizing a polygon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rasterization {
    /// Every cell intersecting the polygon, in ascending order.
    Cells(BTreeSet<String>),
    /// Enumeration stopped once the cell limit was passed.
    TooMany { at_least: usize },
}

/// Compute the cells of the given precision intersecting `polygon`.
///
/// Subdivides from the 32 single character cells down to `precision`,
/// descending only into cells whose rectangle intersects the polygon. Stops
/// as soon as more than `max_cells` cells of the target precision were found.
pub fn rasterize(polygon: &Polygon<f64>, precision: usize, max_cells: usize) -> Result<Rasterization> {
    validate_precision(precision)?;
    let Some(bbox) = geometry::bounding_box(polygon) else {
        return Ok(Rasterization::Cells(BTreeSet::new()));
    };

    let mut cells = BTreeSet::new();
    let mut pending = vec![String::new()];
    while let Some(parent) = pending.pop() {
        for &symbol in BASE32 {
            let mut hash = String::with_capacity(parent.len() + 1);
            hash.push_str(&parent);
            hash.push(symbol as char);

            let cell = geohash::decode_bbox(&hash)?;
            if !bbox.intersects(&cell) || !polygon.intersects(&cell) {
                continue;
            }
            if hash.len() < precision {
                pending.push(hash);
                continue;
            }
            cells.insert(hash);
            if cells.len() > max_cells {
                return Ok(Rasterization::TooMany {
                    at_least: cells.len(),
                });
            }
        }
    }

    Ok(Rasterization::Cells(cells))
}
