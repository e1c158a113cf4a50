//! Pluggable extraction of a [`GeoPosition`] from an item's position field.

use crate::error::{GeoIndexError, Result};
use crate::types::GeoPosition;
use rust_decimal::Decimal;
use serde_json::Value;

/// Maps the value of an item's position field to a position.
///
/// Implemented for the two common field layouts and for any
/// `Fn(&Value) -> Result<GeoPosition>` closure.
pub trait PositionExtractor: Send + Sync {
    fn extract(&self, value: &Value) -> Result<GeoPosition>;
}

/// Reads `{"latitude": .., "longitude": ..}`. This is the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatitudeLongitudeExtractor;

impl PositionExtractor for LatitudeLongitudeExtractor {
    fn extract(&self, value: &Value) -> Result<GeoPosition> {
        extract_fields(value, "latitude", "longitude")
    }
}

/// Reads `{"lat": .., "long": ..}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatLongExtractor;

impl PositionExtractor for LatLongExtractor {
    fn extract(&self, value: &Value) -> Result<GeoPosition> {
        extract_fields(value, "lat", "long")
    }
}

impl<F> PositionExtractor for F
where
    F: Fn(&Value) -> Result<GeoPosition> + Send + Sync,
{
    fn extract(&self, value: &Value) -> Result<GeoPosition> {
        self(value)
    }
}

fn extract_fields(value: &Value, latitude: &str, longitude: &str) -> Result<GeoPosition> {
    let object = value.as_object().ok_or_else(|| {
        GeoIndexError::InvalidPosition(format!("expected an object, got: {}", value))
    })?;
    let field = |name: &str| {
        object
            .get(name)
            .ok_or_else(|| GeoIndexError::InvalidPosition(format!("missing field '{}'", name)))
            .and_then(decimal_from_value)
    };
    Ok(GeoPosition::new(field(latitude)?, field(longitude)?))
}

/// Parse a JSON number or numeric string into an exact decimal.
pub fn decimal_from_value(value: &Value) -> Result<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        other => {
            return Err(GeoIndexError::InvalidPosition(format!(
                "expected a number, got: {}",
                other
            )));
        }
    };
    text.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| GeoIndexError::InvalidPosition(format!("'{}': {}", text, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_default_extractor_reads_numbers_and_strings() {
        let position = LatitudeLongitudeExtractor
            .extract(&json!({"latitude": 48.137154, "longitude": "11.576124"}))
            .unwrap();
        assert_eq!(position.latitude, Decimal::from_str("48.137154").unwrap());
        assert_eq!(position.longitude, Decimal::from_str("11.576124").unwrap());
    }

    #[test]
    fn test_lat_long_extractor() {
        let position = LatLongExtractor
            .extract(&json!({"lat": 1.5, "long": -2.25}))
            .unwrap();
        assert_eq!(position.latitude, Decimal::from_str("1.5").unwrap());
        assert_eq!(position.longitude, Decimal::from_str("-2.25").unwrap());
    }

    #[test]
    fn test_missing_field_is_invalid_position() {
        let err = LatitudeLongitudeExtractor
            .extract(&json!({"latitude": 1.0}))
            .unwrap_err();
        assert!(matches!(err, GeoIndexError::InvalidPosition(_)));
    }

    #[test]
    fn test_closure_extractor() {
        let extractor = |value: &Value| -> Result<GeoPosition> {
            let pair = value.as_array().unwrap();
            Ok(GeoPosition::new(
                decimal_from_value(&pair[1])?,
                decimal_from_value(&pair[0])?,
            ))
        };
        let position = extractor.extract(&json!([11.5, 48.1])).unwrap();
        assert_eq!(position.latitude, Decimal::from_str("48.1").unwrap());
    }

    #[test]
    fn test_scientific_notation() {
        let decimal = decimal_from_value(&json!("1.5e-3")).unwrap();
        assert_eq!(decimal, Decimal::from_str("0.0015").unwrap());
    }
}
