//! Geo-indexed table: enriched writes and paginated polygon / cell queries.
//!
//! Items are stored with a geohash and a geohash prefix. The store's
//! secondary index is partitioned by the prefix and sorted by the full
//! geohash, so a geohash cell maps to one begins-with range inside one index
//! partition. A query rasterizes its shape into cells, scans those ranges in
//! ascending cell order and filters every candidate by exact containment.

use crate::compute::geohash::{self, Rasterization};
use crate::compute::geometry;
use crate::compute::validation::{validate_geohash, validate_polygon};
use crate::config::GeoTableConfiguration;
use crate::enricher::GeoItemEnricher;
use crate::error::{GeoIndexError, Result};
use crate::storage::{IndexQuery, KvStore, Page};
use crate::types::{Item, Key, QueryPage, QueryShape};
use geo::Polygon;
use serde_json::Value;
use std::sync::Arc;

/// A table whose items are indexed by geohash.
///
/// # Examples
///
/// ```rust
/// use geoindex::{GeoTable, GeoTableConfiguration, QueryShape};
/// use geoindex::storage::{IndexSchema, MemoryStore, TableSchema};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(MemoryStore::new());
/// store.create_table(
///     TableSchema::new("places", "id")
///         .with_index(IndexSchema::new("geohash", "_geohash_prefix", Some("_geohash"))),
/// );
///
/// let table = GeoTable::new("places", GeoTableConfiguration::new("id"), store)?;
/// let item = json!({"id": "munich", "position": {"latitude": 48.137154, "longitude": 11.576124}});
/// table.put_item(item.as_object().unwrap())?;
///
/// let page = table.query(&QueryShape::bbox(11.0, 48.0, 12.0, 48.5), 10, None)?;
/// assert_eq!(page.items.len(), 1);
/// assert!(page.next_cursor.is_none());
/// # Ok(())
/// # }
/// ```
pub struct GeoTable<S: KvStore> {
    table_name: String,
    config: GeoTableConfiguration,
    store: Arc<S>,
    enricher: GeoItemEnricher,
}

/// Resolved query shape.
enum QueryTarget {
    /// A cell whose length lies between prefix length and precision; its
    /// boundary is trusted and no exact filter runs.
    Cell(String),
    Polygon(Polygon<f64>),
}

/// Cells to scan, ascending, all of one precision.
#[derive(Debug)]
struct PartitionPlan {
    cells: Vec<String>,
    precision: usize,
}

#[derive(Debug, Default)]
struct ScanStats {
    queries: usize,
    scanned: usize,
}

impl<S: KvStore> GeoTable<S> {
    pub fn new(
        table_name: impl Into<String>,
        config: GeoTableConfiguration,
        store: Arc<S>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            table_name: table_name.into(),
            enricher: GeoItemEnricher::new(config.clone()),
            config,
            store,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn config(&self) -> &GeoTableConfiguration {
        &self.config
    }

    /// Enrich and store an item. Fails with
    /// [`GeoIndexError::FieldConflict`] if it already carries derived fields.
    ///
    /// Returns the item as written.
    pub fn put_item(&self, item: &Item) -> Result<Item> {
        self.put(item, false)
    }

    /// Like [`GeoTable::put_item`] but recomputes existing derived fields,
    /// e.g. after the item's position changed.
    pub fn put_item_with_overwrite(&self, item: &Item) -> Result<Item> {
        self.put(item, true)
    }

    fn put(&self, item: &Item, overwrite_existing: bool) -> Result<Item> {
        let enriched = self.enricher.enrich_item(item, overwrite_existing)?;
        self.store.put_item(&self.table_name, enriched.clone())?;
        Ok(enriched)
    }

    pub fn get_item(&self, key: &Key) -> Result<Option<Item>> {
        Ok(self.store.get_item(&self.table_name, key)?)
    }

    pub fn delete_item(&self, key: &Key) -> Result<Option<Item>> {
        Ok(self.store.delete_item(&self.table_name, key)?)
    }

    /// Query one page of items inside `shape`.
    ///
    /// Pass the previous page's `next_cursor` to continue; a page without a
    /// cursor is the last one. Pages are stable only while the same shape
    /// and configuration are used.
    pub fn query(&self, shape: &QueryShape, limit: usize, cursor: Option<&Key>) -> Result<QueryPage> {
        if limit == 0 {
            return Err(GeoIndexError::InvalidQuery(
                "limit must be greater than zero".to_string(),
            ));
        }

        let target = self.resolve_shape(shape)?;
        let plan = match &target {
            QueryTarget::Cell(cell) => PartitionPlan {
                cells: vec![cell.clone()],
                precision: cell.len(),
            },
            QueryTarget::Polygon(polygon) => self.select_partitions(polygon)?,
        };
        let filter = match &target {
            QueryTarget::Cell(_) => None,
            QueryTarget::Polygon(polygon) => Some(polygon),
        };

        let mut cells = plan.cells;
        let mut resume_key = None;
        if let Some(cursor) = cursor {
            let resume_item = self
                .store
                .get_item(&self.table_name, cursor)?
                .ok_or(GeoIndexError::ResumeItemNotFound)?;
            let resume_hash = resume_item
                .get(&self.config.geohash_field)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    GeoIndexError::InvalidGeohash(format!(
                        "resume item has no '{}' field",
                        self.config.geohash_field
                    ))
                })?;
            let resume_cell = resume_hash.get(..plan.precision).unwrap_or(resume_hash);

            // Cells before the resume cell were fully consumed by earlier pages
            cells.retain(|cell| cell.as_str() >= resume_cell);
            if cells.first().is_some_and(|cell| cell == resume_cell) {
                resume_key = Some(self.config.index_key(&resume_item)?);
            }
        }

        let mut items = Vec::new();
        let mut stats = ScanStats::default();
        for cell in &cells {
            if items.len() > limit {
                break;
            }
            let mut exclusive_start_key = resume_key.take();
            loop {
                let remaining = limit + 1 - items.len();
                let page = self.query_partition(cell, remaining, exclusive_start_key.take())?;
                stats.queries += 1;
                stats.scanned += page.items.len();

                for item in page.items {
                    let keep = match filter {
                        Some(polygon) => self.is_within(&item, polygon)?,
                        None => true,
                    };
                    if keep {
                        items.push(item);
                    }
                }

                match page.last_evaluated_key {
                    Some(key) if items.len() <= limit => exclusive_start_key = Some(key),
                    _ => break,
                }
            }
        }

        log::debug!(
            "geo query table={} limit={} cells={} precision={} queries={} queried_items={}",
            self.table_name,
            limit,
            cells.len(),
            plan.precision,
            stats.queries,
            stats.scanned
        );

        let next_cursor = if items.len() > limit {
            Some(self.config.primary_key(&items[limit - 1])?)
        } else {
            None
        };
        items.truncate(limit);

        Ok(QueryPage { items, next_cursor })
    }

    fn resolve_shape(&self, shape: &QueryShape) -> Result<QueryTarget> {
        match (&shape.polygon, &shape.geohash) {
            (Some(_), Some(_)) => Err(GeoIndexError::InvalidQuery(
                "specify either a polygon or a geohash, not both".to_string(),
            )),
            (None, None) => Err(GeoIndexError::InvalidQuery(
                "either a polygon or a geohash is required".to_string(),
            )),
            (Some(polygon), None) => {
                validate_polygon(polygon)?;
                Ok(QueryTarget::Polygon(polygon.clone()))
            }
            (None, Some(hash)) => {
                validate_geohash(hash)?;
                if hash.len() < self.config.prefix_length || hash.len() > self.config.precision {
                    let cell = geohash::bounding_box(hash)?;
                    Ok(QueryTarget::Polygon(cell.to_polygon()))
                } else {
                    Ok(QueryTarget::Cell(hash.clone()))
                }
            }
        }
    }

    /// Pick the raster precision for a polygon.
    ///
    /// Coarse cells mean few round-trips but many rows discarded by the exact
    /// filter; fine cells the opposite. Starting at the prefix length, refine
    /// one step at a time while the cell count stays within
    /// `max_refined_partitions`.
    fn select_partitions(&self, polygon: &Polygon<f64>) -> Result<PartitionPlan> {
        let tuning = &self.config.query;
        let prefix_length = self.config.prefix_length;

        let mut best = match geohash::rasterize(polygon, prefix_length, tuning.max_partitions)? {
            Rasterization::Cells(cells) => PartitionPlan {
                cells: cells.into_iter().collect(),
                precision: prefix_length,
            },
            Rasterization::TooMany { at_least } => {
                log::warn!(
                    "Rejecting geo query on {}: {} or more partitions",
                    self.table_name,
                    at_least
                );
                return Err(GeoIndexError::QueryTooLarge {
                    cells: at_least,
                    precision: prefix_length,
                    max: tuning.max_partitions,
                });
            }
        };

        if best.cells.len() < tuning.min_partitions {
            return Ok(best);
        }

        let ceiling = tuning.max_refined_partitions.min(tuning.max_partitions);
        for precision in prefix_length + 1..=self.config.precision {
            match geohash::rasterize(polygon, precision, ceiling)? {
                Rasterization::Cells(cells) => {
                    best = PartitionPlan {
                        cells: cells.into_iter().collect(),
                        precision,
                    };
                }
                Rasterization::TooMany { .. } => break,
            }
        }
        Ok(best)
    }

    fn query_partition(&self, cell: &str, limit: usize, exclusive_start_key: Option<Key>) -> Result<Page> {
        let prefix = &cell[..self.config.prefix_length.min(cell.len())];
        let query = IndexQuery {
            index: self.config.geohash_index.clone(),
            partition_field: self.config.geohash_prefix_field.clone(),
            partition_value: Value::String(prefix.to_string()),
            sort_prefix: Some((self.config.geohash_field.clone(), cell.to_string())),
            limit,
            exclusive_start_key,
        };
        Ok(self.store.query_index(&self.table_name, &query)?)
    }

    fn is_within(&self, item: &Item, polygon: &Polygon<f64>) -> Result<bool> {
        let point = self.config.position_of(item)?.to_point()?;
        Ok(geometry::contains(polygon, &point))
    }
}
