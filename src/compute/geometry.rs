//! Planar polygon primitives used by the query engines.

use geo::{BoundingRect, Centroid, Contains, Point, Polygon, Rect};

/// Whether `point` lies strictly inside `polygon`. Points on the boundary are
/// not contained.
pub fn contains(polygon: &Polygon<f64>, point: &Point<f64>) -> bool {
    polygon.contains(point)
}

/// Bounding box of a polygon, `None` for an empty polygon.
pub fn bounding_box(polygon: &Polygon<f64>) -> Option<Rect<f64>> {
    polygon.bounding_rect()
}

/// Centroid of a polygon, `None` for an empty polygon.
pub fn centroid(polygon: &Polygon<f64>) -> Option<Point<f64>> {
    polygon.centroid()
}
