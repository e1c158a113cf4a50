//! Tagging items with the derived geohash fields the index is built on.

use crate::compute::geohash;
use crate::config::GeoTableConfiguration;
use crate::error::{GeoIndexError, Result};
use crate::types::Item;
use serde_json::Value;

/// Adds the geohash and geohash-prefix fields to items before they are
/// written.
#[derive(Debug, Clone)]
pub struct GeoItemEnricher {
    config: GeoTableConfiguration,
}

impl GeoItemEnricher {
    pub fn new(config: GeoTableConfiguration) -> Self {
        Self { config }
    }

    /// Return a copy of `item` with both derived fields set.
    ///
    /// The input is never modified. Unless `overwrite_existing` is set, an
    /// item that already carries either derived field is rejected with
    /// [`GeoIndexError::FieldConflict`].
    ///
    /// ```
    /// use geoindex::{GeoItemEnricher, GeoTableConfiguration};
    /// use serde_json::json;
    ///
    /// let enricher = GeoItemEnricher::new(GeoTableConfiguration::new("id"));
    /// let item = json!({"id": "1", "position": {"latitude": 48.137154, "longitude": 11.576124}});
    /// let enriched = enricher.enrich_item(item.as_object().unwrap(), false)?;
    /// assert_eq!(enriched["_geohash"], "u281z7j7ppzs");
    /// assert_eq!(enriched["_geohash_prefix"], "u28");
    /// # Ok::<(), geoindex::GeoIndexError>(())
    /// ```
    pub fn enrich_item(&self, item: &Item, overwrite_existing: bool) -> Result<Item> {
        let position = self.config.position_of(item)?;
        let hash = geohash::encode(&position, self.config.precision)?;
        let prefix = hash
            .get(..self.config.prefix_length)
            .ok_or_else(|| {
                GeoIndexError::InvalidConfig(format!(
                    "prefix_length {} exceeds precision {}",
                    self.config.prefix_length, self.config.precision
                ))
            })?
            .to_string();

        let mut enriched = item.clone();
        set_field(&mut enriched, &self.config.geohash_field, hash, overwrite_existing)?;
        set_field(
            &mut enriched,
            &self.config.geohash_prefix_field,
            prefix,
            overwrite_existing,
        )?;
        Ok(enriched)
    }
}

fn set_field(item: &mut Item, field: &str, value: String, overwrite_existing: bool) -> Result<()> {
    if !overwrite_existing && item.contains_key(field) {
        return Err(GeoIndexError::FieldConflict(field.to_string()));
    }
    item.insert(field.to_string(), Value::String(value));
    Ok(())
}
