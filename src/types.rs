//! Core data types shared by the index, the query engines and the aggregator.

use crate::error::{GeoIndexError, Result};
use geo::{Point, Polygon, Rect};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored item: field name to value, ordered by field name.
pub type Item = serde_json::Map<String, Value>;

/// The key attributes of an item (primary key, or an index position).
pub type Key = serde_json::Map<String, Value>;

/// Geographic position with exact decimal coordinates.
///
/// Coordinates stay decimal until the moment they are encoded or tested for
/// containment, so values read from the store are never truncated by a float
/// round-trip on the way in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeoPosition {
    pub latitude: Decimal,
    pub longitude: Decimal,
}

impl GeoPosition {
    pub fn new(latitude: Decimal, longitude: Decimal) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Build a position from float coordinates, using their shortest
    /// round-trip decimal representation.
    pub fn from_f64(latitude: f64, longitude: f64) -> Result<Self> {
        Ok(Self {
            latitude: decimal_from_f64(latitude)?,
            longitude: decimal_from_f64(longitude)?,
        })
    }

    /// Planar point (x = longitude, y = latitude) for containment tests.
    ///
    /// Goes through the decimal text, so a position built by
    /// [`GeoPosition::from_f64`] yields exactly the original floats.
    pub fn to_point(&self) -> Result<Point<f64>> {
        Ok(Point::new(
            decimal_to_f64(self.longitude)?,
            decimal_to_f64(self.latitude)?,
        ))
    }
}

fn decimal_to_f64(value: Decimal) -> Result<f64> {
    value
        .to_string()
        .parse::<f64>()
        .map_err(|e| GeoIndexError::InvalidPosition(format!("{}: {}", value, e)))
}

pub(crate) fn decimal_from_f64(value: f64) -> Result<Decimal> {
    if !value.is_finite() {
        return Err(GeoIndexError::InvalidPosition(format!(
            "coordinate must be finite, got: {}",
            value
        )));
    }
    value
        .to_string()
        .parse::<Decimal>()
        .map_err(|e| GeoIndexError::InvalidPosition(format!("{}: {}", value, e)))
}

/// Boundaries of a geohash cell in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBoundingBox {
    pub north: f64,
    pub south: f64,
    pub west: f64,
    pub east: f64,
}

impl From<Rect<f64>> for GeoBoundingBox {
    fn from(rect: Rect<f64>) -> Self {
        Self {
            north: rect.max().y,
            south: rect.min().y,
            west: rect.min().x,
            east: rect.max().x,
        }
    }
}

/// Shape of a geo query: exactly one of a polygon or a single geohash cell.
#[derive(Debug, Clone, Default)]
pub struct QueryShape {
    pub polygon: Option<Polygon<f64>>,
    pub geohash: Option<String>,
}

impl QueryShape {
    pub fn polygon(polygon: Polygon<f64>) -> Self {
        Self {
            polygon: Some(polygon),
            geohash: None,
        }
    }

    pub fn cell(geohash: impl Into<String>) -> Self {
        Self {
            polygon: None,
            geohash: Some(geohash.into()),
        }
    }

    /// Axis-aligned box given as west, south, east, north.
    pub fn bbox(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self::polygon(Rect::new((west, south), (east, north)).to_polygon())
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    pub items: Vec<Item>,
    /// Primary key of the last returned item when more results may follow.
    pub next_cursor: Option<Key>,
}

impl QueryPage {
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// Aggregated item count of one statistics cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsItem {
    pub geohash: String,
    pub center: GeoPosition,
    pub boundaries: GeoBoundingBox,
    pub item_count: i64,
}
