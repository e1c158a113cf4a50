//! Geohash secondary index and incremental spatial statistics on top of a
//! plain key-value store.
//!
//! ```rust
//! use geoindex::prelude::*;
//! use geoindex::storage::{IndexSchema, TableSchema};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! store.create_table(
//!     TableSchema::new("places", "id")
//!         .with_index(IndexSchema::new("geohash", "_geohash_prefix", Some("_geohash")))
//!         .with_stream(),
//! );
//! store.create_table(TableSchema::new("statistics", "_geohash"));
//!
//! let config = GeoTableConfiguration::new("id");
//! let places = GeoTable::new("places", config.clone(), store.clone())?;
//! let munich = json!({"id": "munich", "position": {"latitude": 48.137154, "longitude": 11.576124}});
//! places.put_item(munich.as_object().unwrap())?;
//!
//! let page = places.query(&QueryShape::bbox(11.0, 48.0, 12.0, 48.5), 10, None)?;
//! assert_eq!(page.items.len(), 1);
//!
//! let handler = StatisticsStreamHandler::new(
//!     store.clone(),
//!     "places",
//!     config,
//!     "statistics",
//!     StatisticsConfiguration::default(),
//! )?;
//! handler.handle_events(&store.take_changes("places")?)?;
//!
//! let statistics = StatisticsTable::new("statistics", StatisticsConfiguration::default(), store)?;
//! let counts = statistics.query(&Rect::new((11.0, 48.0), (12.0, 48.5)).to_polygon())?;
//! assert_eq!(counts.iter().map(|c| c.item_count).sum::<i64>(), 1);
//! # Ok::<(), geoindex::GeoIndexError>(())
//! ```

pub mod compute;
pub mod config;
pub mod enricher;
pub mod error;
pub mod position;
pub mod statistics;
pub mod storage;
pub mod table;
pub mod types;

pub use config::{
    GeoTableConfiguration, QueryTuning, StatisticsConfiguration, StatisticsQueryTuning,
};
pub use enricher::GeoItemEnricher;
pub use error::{GeoIndexError, Result, StoreError};

pub use geo::{Point, Polygon, Rect};

pub use position::{LatLongExtractor, LatitudeLongitudeExtractor, PositionExtractor};

pub use statistics::{
    Clock, FixedClock, ReprocessSummary, StatisticsStreamHandler, StatisticsTable, SystemClock,
};

pub use storage::{ChangeEvent, KvStore, MemoryStore};

pub use table::GeoTable;

pub use types::{
    GeoBoundingBox, GeoPosition, Item, Key, QueryPage, QueryShape, StatisticsItem,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{GeoIndexError, GeoTable, Result};

    pub use geo::{Point, Polygon, Rect};

    pub use crate::{GeoTableConfiguration, StatisticsConfiguration};

    pub use crate::{GeoPosition, Item, Key, QueryPage, QueryShape, StatisticsItem};

    pub use crate::{StatisticsStreamHandler, StatisticsTable};

    pub use crate::{ChangeEvent, KvStore, MemoryStore};
}
