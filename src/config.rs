//! Configuration for geo tables and statistics tables.
//!
//! Both configurations deserialize from JSON (and TOML with the `toml`
//! feature); every field except the partition key has a default. The
//! position extractor cannot be serialized and always starts out as
//! [`LatitudeLongitudeExtractor`].

use crate::compute::validation::validate_precision;
use crate::error::{GeoIndexError, Result, StoreError};
use crate::position::{LatitudeLongitudeExtractor, PositionExtractor};
use crate::types::{GeoPosition, Item, Key};
use serde::de::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Description of a geo-indexed table and its geohash secondary index.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeoTableConfiguration {
    pub partition_key_field: String,

    #[serde(default)]
    pub sort_key_field: Option<String>,

    #[serde(default = "GeoTableConfiguration::default_geohash_prefix_field")]
    pub geohash_prefix_field: String,

    #[serde(default = "GeoTableConfiguration::default_geohash_field")]
    pub geohash_field: String,

    /// Secondary index keyed by (prefix field, geohash field)
    #[serde(default = "GeoTableConfiguration::default_geohash_index")]
    pub geohash_index: String,

    #[serde(default = "GeoTableConfiguration::default_position_field")]
    pub position_field: String,

    #[serde(skip, default = "GeoTableConfiguration::default_position_extractor")]
    pub position_extractor: Arc<dyn PositionExtractor>,

    /// Length of the geohash prefix used as index partition
    #[serde(default = "GeoTableConfiguration::default_prefix_length")]
    pub prefix_length: usize,

    /// Length of the stored geohash
    #[serde(default = "GeoTableConfiguration::default_precision")]
    pub precision: usize,

    #[serde(default)]
    pub query: QueryTuning,
}

impl GeoTableConfiguration {
    fn default_geohash_prefix_field() -> String {
        "_geohash_prefix".to_string()
    }

    fn default_geohash_field() -> String {
        "_geohash".to_string()
    }

    fn default_geohash_index() -> String {
        "geohash".to_string()
    }

    fn default_position_field() -> String {
        "position".to_string()
    }

    fn default_position_extractor() -> Arc<dyn PositionExtractor> {
        Arc::new(LatitudeLongitudeExtractor)
    }

    const fn default_prefix_length() -> usize {
        3
    }

    const fn default_precision() -> usize {
        12
    }

    /// Configuration with defaults for everything but the partition key.
    pub fn new(partition_key_field: impl Into<String>) -> Self {
        Self {
            partition_key_field: partition_key_field.into(),
            sort_key_field: None,
            geohash_prefix_field: Self::default_geohash_prefix_field(),
            geohash_field: Self::default_geohash_field(),
            geohash_index: Self::default_geohash_index(),
            position_field: Self::default_position_field(),
            position_extractor: Self::default_position_extractor(),
            prefix_length: Self::default_prefix_length(),
            precision: Self::default_precision(),
            query: QueryTuning::default(),
        }
    }

    pub fn with_sort_key_field(mut self, field: impl Into<String>) -> Self {
        self.sort_key_field = Some(field.into());
        self
    }

    pub fn with_geohash_fields(
        mut self,
        geohash_field: impl Into<String>,
        geohash_prefix_field: impl Into<String>,
    ) -> Self {
        self.geohash_field = geohash_field.into();
        self.geohash_prefix_field = geohash_prefix_field.into();
        self
    }

    pub fn with_geohash_index(mut self, index: impl Into<String>) -> Self {
        self.geohash_index = index.into();
        self
    }

    pub fn with_position_field(mut self, field: impl Into<String>) -> Self {
        self.position_field = field.into();
        self
    }

    pub fn with_position_extractor(mut self, extractor: impl PositionExtractor + 'static) -> Self {
        self.position_extractor = Arc::new(extractor);
        self
    }

    pub fn with_prefix_length(mut self, prefix_length: usize) -> Self {
        self.prefix_length = prefix_length;
        self
    }

    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_query_tuning(mut self, query: QueryTuning) -> Self {
        self.query = query;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_precision(self.precision)?;
        validate_precision(self.prefix_length)?;
        if self.prefix_length >= self.precision {
            return Err(GeoIndexError::InvalidConfig(format!(
                "prefix_length ({}) must be smaller than precision ({})",
                self.prefix_length, self.precision
            )));
        }
        let fields = [
            &self.partition_key_field,
            &self.geohash_field,
            &self.geohash_prefix_field,
            &self.position_field,
        ];
        if fields.iter().any(|f| f.is_empty()) {
            return Err(GeoIndexError::InvalidConfig(
                "field names must not be empty".to_string(),
            ));
        }
        if self.geohash_field == self.geohash_prefix_field {
            return Err(GeoIndexError::InvalidConfig(
                "geohash_field and geohash_prefix_field must differ".to_string(),
            ));
        }
        self.query.validate()
    }

    /// Read and extract the position of an item.
    pub fn position_of(&self, item: &Item) -> Result<GeoPosition> {
        let value = item.get(&self.position_field).ok_or_else(|| {
            GeoIndexError::InvalidPosition(format!("missing field '{}'", self.position_field))
        })?;
        self.position_extractor.extract(value)
    }

    /// Primary key (partition key and optional sort key) of an item.
    pub fn primary_key(&self, item: &Item) -> Result<Key> {
        let mut key = Key::new();
        copy_field(item, &mut key, &self.partition_key_field)?;
        if let Some(sort_key) = &self.sort_key_field {
            copy_field(item, &mut key, sort_key)?;
        }
        Ok(key)
    }

    /// Position of an item in the geohash index: primary key plus both
    /// geohash fields. Used to resume a partition scan after the item.
    pub fn index_key(&self, item: &Item) -> Result<Key> {
        let mut key = self.primary_key(item)?;
        copy_field(item, &mut key, &self.geohash_prefix_field)?;
        copy_field(item, &mut key, &self.geohash_field)?;
        Ok(key)
    }

    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        let config: GeoTableConfiguration = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(serde_json::Error::custom(e));
        }
        Ok(config)
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> std::result::Result<Self, toml::de::Error> {
        let config: GeoTableConfiguration = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl fmt::Debug for GeoTableConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeoTableConfiguration")
            .field("partition_key_field", &self.partition_key_field)
            .field("sort_key_field", &self.sort_key_field)
            .field("geohash_prefix_field", &self.geohash_prefix_field)
            .field("geohash_field", &self.geohash_field)
            .field("geohash_index", &self.geohash_index)
            .field("position_field", &self.position_field)
            .field("prefix_length", &self.prefix_length)
            .field("precision", &self.precision)
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

fn copy_field(item: &Item, key: &mut Key, field: &str) -> Result<()> {
    let value = item
        .get(field)
        .filter(|v| !matches!(v, Value::Null | Value::Array(_) | Value::Object(_)))
        .ok_or_else(|| StoreError::InvalidKey(field.to_string()))?;
    key.insert(field.to_string(), value.clone());
    Ok(())
}

/// Thresholds of the adaptive partition selection in geo queries.
///
/// The defaults were picked empirically; tune them to the data density.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryTuning {
    /// Hard ceiling on partitions at the prefix precision
    #[serde(default = "QueryTuning::default_max_partitions")]
    pub max_partitions: usize,

    /// Below this many partitions the prefix rasterization is used as is
    #[serde(default = "QueryTuning::default_min_partitions")]
    pub min_partitions: usize,

    /// Refinement continues while the finer rasterization stays within this
    #[serde(default = "QueryTuning::default_max_refined_partitions")]
    pub max_refined_partitions: usize,
}

impl QueryTuning {
    const fn default_max_partitions() -> usize {
        128
    }

    const fn default_min_partitions() -> usize {
        4
    }

    const fn default_max_refined_partitions() -> usize {
        64
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_partitions == 0 {
            return Err(GeoIndexError::InvalidConfig(
                "max_partitions must be greater than zero".to_string(),
            ));
        }
        if self.max_refined_partitions > self.max_partitions {
            return Err(GeoIndexError::InvalidConfig(format!(
                "max_refined_partitions ({}) must not exceed max_partitions ({})",
                self.max_refined_partitions, self.max_partitions
            )));
        }
        Ok(())
    }
}

impl Default for QueryTuning {
    fn default() -> Self {
        Self {
            max_partitions: Self::default_max_partitions(),
            min_partitions: Self::default_min_partitions(),
            max_refined_partitions: Self::default_max_refined_partitions(),
        }
    }
}

/// Precision tiers at which item counts are aggregated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatisticsConfiguration {
    /// Strictly ascending geohash lengths
    #[serde(default = "StatisticsConfiguration::default_precision_steps")]
    pub precision_steps: Vec<usize>,

    #[serde(default)]
    pub query: StatisticsQueryTuning,
}

impl StatisticsConfiguration {
    fn default_precision_steps() -> Vec<usize> {
        vec![3, 5, 7]
    }

    pub fn new(precision_steps: impl Into<Vec<usize>>) -> Self {
        Self {
            precision_steps: precision_steps.into(),
            query: StatisticsQueryTuning::default(),
        }
    }

    pub fn with_query_tuning(mut self, query: StatisticsQueryTuning) -> Self {
        self.query = query;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.precision_steps.is_empty() {
            return Err(GeoIndexError::InvalidConfig(
                "at least one precision step is required".to_string(),
            ));
        }
        for &step in &self.precision_steps {
            validate_precision(step)?;
        }
        if self.precision_steps.windows(2).any(|w| w[0] >= w[1]) {
            return Err(GeoIndexError::InvalidConfig(format!(
                "precision steps must be strictly ascending: {:?}",
                self.precision_steps
            )));
        }
        if self.query.max_cells == 0 {
            return Err(GeoIndexError::InvalidConfig(
                "max_cells must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        let config: StatisticsConfiguration = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(serde_json::Error::custom(e));
        }
        Ok(config)
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> std::result::Result<Self, toml::de::Error> {
        let config: StatisticsConfiguration = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }
}

impl Default for StatisticsConfiguration {
    fn default() -> Self {
        Self::new(Self::default_precision_steps())
    }
}

/// Cost limits of the statistics query tier selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatisticsQueryTuning {
    /// Largest cell set a single statistics query may fetch
    #[serde(default = "StatisticsQueryTuning::default_max_cells")]
    pub max_cells: usize,

    /// Tiers whose estimated rasterization depth exceeds this are skipped
    #[serde(default = "StatisticsQueryTuning::default_max_estimated_depth")]
    pub max_estimated_depth: usize,
}

impl StatisticsQueryTuning {
    const fn default_max_cells() -> usize {
        1000
    }

    const fn default_max_estimated_depth() -> usize {
        64
    }
}

impl Default for StatisticsQueryTuning {
    fn default() -> Self {
        Self {
            max_cells: Self::default_max_cells(),
            max_estimated_depth: Self::default_max_estimated_depth(),
        }
    }
}
