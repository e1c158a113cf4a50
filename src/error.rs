//! Error types for geo indexing and statistics.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GeoIndexError>;

/// Errors raised by the index, the query engines and the aggregator.
#[derive(Debug, Error)]
pub enum GeoIndexError {
    /// The query shape was missing, ambiguous or otherwise unusable.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The query shape rasterizes to more cells than the configured ceiling.
    #[error(
        "query covers {cells} cells at precision {precision}, at most {max} are supported; \
         use a smaller shape or a shorter prefix length"
    )]
    QueryTooLarge {
        cells: usize,
        precision: usize,
        max: usize,
    },

    /// The item referenced by a pagination cursor no longer exists.
    #[error("the item referenced by the query cursor does not exist")]
    ResumeItemNotFound,

    /// Enrichment would overwrite an existing derived field.
    #[error("field '{0}' already exists")]
    FieldConflict(String),

    #[error("invalid position: {0}")]
    InvalidPosition(String),

    #[error("invalid geohash: {0}")]
    InvalidGeohash(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failure reported by the key-value store, passed through unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors reported by a [`KvStore`](crate::storage::KvStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table '{0}' does not exist")]
    TableNotFound(String),

    #[error("index '{index}' does not exist on table '{table}'")]
    IndexNotFound { table: String, index: String },

    #[error("key attribute '{0}' is missing or not a scalar")]
    InvalidKey(String),

    #[error("batch of {requested} keys exceeds the limit of {limit}")]
    BatchTooLarge { requested: usize, limit: usize },

    #[error("transaction cancelled: {0}")]
    TransactionCanceled(String),

    #[error("attribute '{field}' is not a number: {value}")]
    NotANumber { field: String, value: String },
}

impl From<geohash::GeohashError> for GeoIndexError {
    fn from(err: geohash::GeohashError) -> Self {
        GeoIndexError::InvalidGeohash(err.to_string())
    }
}
