//! Validation for coordinates, query polygons and geohash strings.

use crate::compute::geohash::{BASE32, MAX_PRECISION};
use crate::error::{GeoIndexError, Result};
use geo::Point;

/// Validates a point has valid longitude and latitude.
///
/// Longitude: [-180.0, 180.0], Latitude: [-90.0, 90.0]
///
/// # Examples
///
/// ```
/// use geoindex::compute::validation::validate_geographic_point;
/// use geo::Point;
///
/// let munich = Point::new(11.576124, 48.137154);
/// assert!(validate_geographic_point(&munich).is_ok());
///
/// let invalid = Point::new(200.0, 40.0);
/// assert!(validate_geographic_point(&invalid).is_err());
/// ```
pub fn validate_geographic_point(point: &Point) -> Result<()> {
    let (x, y) = (point.x(), point.y());

    if !x.is_finite() {
        return Err(GeoIndexError::InvalidPosition(format!(
            "Longitude must be finite, got: {}",
            x
        )));
    }

    if !y.is_finite() {
        return Err(GeoIndexError::InvalidPosition(format!(
            "Latitude must be finite, got: {}",
            y
        )));
    }

    if !(-180.0..=180.0).contains(&x) {
        return Err(GeoIndexError::InvalidPosition(format!(
            "Longitude out of range [-180.0, 180.0]: {}",
            x
        )));
    }

    if !(-90.0..=90.0).contains(&y) {
        return Err(GeoIndexError::InvalidPosition(format!(
            "Latitude out of range [-90.0, 90.0]: {}",
            y
        )));
    }

    Ok(())
}

/// Validates all polygon coordinates (exterior and interior rings).
pub fn validate_polygon(polygon: &geo::Polygon) -> Result<()> {
    for (idx, coord) in polygon.exterior().coords().enumerate() {
        validate_geographic_point(&Point::from(*coord)).map_err(|e| {
            GeoIndexError::InvalidQuery(format!("Exterior ring point at index {}: {}", idx, e))
        })?;
    }

    for (ring_idx, interior) in polygon.interiors().iter().enumerate() {
        for (idx, coord) in interior.coords().enumerate() {
            validate_geographic_point(&Point::from(*coord)).map_err(|e| {
                GeoIndexError::InvalidQuery(format!(
                    "Interior ring {} point at index {}: {}",
                    ring_idx, idx, e
                ))
            })?;
        }
    }

    Ok(())
}

/// Validates a geohash precision is within 1..=12.
pub fn validate_precision(precision: usize) -> Result<()> {
    if !(1..=MAX_PRECISION).contains(&precision) {
        return Err(GeoIndexError::InvalidConfig(format!(
            "Geohash precision must be between 1 and {}, got: {}",
            MAX_PRECISION, precision
        )));
    }
    Ok(())
}

/// Validates a geohash string: 1 to 12 characters of the base32 alphabet.
///
/// ```
/// use geoindex::compute::validation::validate_geohash;
///
/// assert!(validate_geohash("u281z7j").is_ok());
/// assert!(validate_geohash("u28a").is_err()); // 'a' is not in the alphabet
/// assert!(validate_geohash("").is_err());
/// ```
pub fn validate_geohash(geohash: &str) -> Result<()> {
    if geohash.is_empty() || geohash.len() > MAX_PRECISION {
        return Err(GeoIndexError::InvalidGeohash(format!(
            "'{}' must have between 1 and {} characters",
            geohash, MAX_PRECISION
        )));
    }
    if let Some(c) = geohash.bytes().find(|c| !BASE32.contains(c)) {
        return Err(GeoIndexError::InvalidGeohash(format!(
            "'{}' contains invalid character '{}'",
            geohash, c as char
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_geographic_point() {
        let munich = Point::new(11.576124, 48.137154);
        assert!(validate_geographic_point(&munich).is_ok());

        // Edge cases
        assert!(validate_geographic_point(&Point::new(180.0, 0.0)).is_ok());
        assert!(validate_geographic_point(&Point::new(-180.0, 0.0)).is_ok());
        assert!(validate_geographic_point(&Point::new(0.0, 90.0)).is_ok());
        assert!(validate_geographic_point(&Point::new(0.0, -90.0)).is_ok());
    }

    #[test]
    fn test_invalid_coordinates() {
        assert!(validate_geographic_point(&Point::new(180.1, 40.0)).is_err());
        assert!(validate_geographic_point(&Point::new(-74.0, -90.1)).is_err());
        assert!(validate_geographic_point(&Point::new(f64::NAN, 40.0)).is_err());
        assert!(validate_geographic_point(&Point::new(-74.0, f64::INFINITY)).is_err());
    }

    #[test]
    fn test_validate_polygon() {
        use geo::polygon;

        let valid_poly: geo::Polygon = polygon![
            (x: 10.0, y: 48.0),
            (x: 11.0, y: 48.0),
            (x: 11.0, y: 49.0),
            (x: 10.0, y: 49.0),
            (x: 10.0, y: 48.0),
        ];
        assert!(validate_polygon(&valid_poly).is_ok());

        let invalid_poly: geo::Polygon = polygon![
            (x: 10.0, y: 48.0),
            (x: 999.0, y: 48.0),
            (x: 11.0, y: 49.0),
            (x: 10.0, y: 48.0),
        ];
        assert!(matches!(
            validate_polygon(&invalid_poly),
            Err(GeoIndexError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_validate_precision() {
        assert!(validate_precision(1).is_ok());
        assert!(validate_precision(12).is_ok());
        assert!(validate_precision(0).is_err());
        assert!(validate_precision(13).is_err());
    }

    #[test]
    fn test_validate_geohash() {
        assert!(validate_geohash("u281z7j7ppzs").is_ok());
        assert!(validate_geohash("u281z7j7ppzs0").is_err());
        assert!(validate_geohash("U28").is_err());
        assert!(validate_geohash("i").is_err());
    }
}
