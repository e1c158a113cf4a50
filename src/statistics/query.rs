use super::{CELL_FIELD, ITEM_COUNT_FIELD, counter_key};
use crate::compute::geohash::{self, Rasterization};
use crate::compute::geometry;
use crate::compute::validation::validate_polygon;
use crate::config::StatisticsConfiguration;
use crate::error::{GeoIndexError, Result, StoreError};
use crate::storage::KvStore;
use crate::types::{GeoPosition, Item, Key, StatisticsItem};
use geo::{Point, Polygon, Rect};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Read side of a statistics table.
pub struct StatisticsTable<S: KvStore> {
    table_name: String,
    config: StatisticsConfiguration,
    store: Arc<S>,
}

impl<S: KvStore> StatisticsTable<S> {
    pub fn new(
        table_name: impl Into<String>,
        config: StatisticsConfiguration,
        store: Arc<S>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            table_name: table_name.into(),
            config,
            store,
        })
    }

    pub fn config(&self) -> &StatisticsConfiguration {
        &self.config
    }

    /// Item counts of the cells intersecting `polygon`, ordered by cell id.
    ///
    /// All cells come from one tier: the finest whose rasterization of the
    /// polygon stays within `max_cells`. Cells without a counter row hold no
    /// items and are left out.
    pub fn query(&self, polygon: &Polygon<f64>) -> Result<Vec<StatisticsItem>> {
        validate_polygon(polygon)?;
        let Some(bbox) = geometry::bounding_box(polygon) else {
            return Ok(Vec::new());
        };
        let (precision, cells) = self.select_cells(polygon, bbox)?;

        let keys: Vec<Key> = cells.iter().map(|cell| counter_key(cell)).collect();
        let mut rows = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(self.store.max_batch_get_keys().max(1)) {
            rows.extend(self.store.batch_get(&self.table_name, chunk)?);
        }

        let mut items = rows
            .iter()
            .map(statistics_item)
            .collect::<Result<Vec<_>>>()?;
        items.sort_by(|a, b| a.geohash.cmp(&b.geohash));

        log::debug!(
            "statistics query table={} precision={} cells={} rows={}",
            self.table_name,
            precision,
            cells.len(),
            items.len()
        );
        Ok(items)
    }

    /// Pick the finest tier whose cell set fits, trying tiers coarse to fine.
    fn select_cells(&self, polygon: &Polygon<f64>, bbox: Rect<f64>) -> Result<(usize, BTreeSet<String>)> {
        let tuning = &self.config.query;
        let center = geometry::centroid(polygon).unwrap_or_else(|| bbox.center().into());
        let diagonal = geohash::distance(bbox.min().into(), bbox.max().into());

        let mut selected = None;
        let mut rejection = None;
        for &precision in &self.config.precision_steps {
            let depth = estimated_depth(diagonal, center, precision);
            if depth > tuning.max_estimated_depth {
                log::debug!(
                    "Skipping precision {} and finer: estimated depth {} exceeds {}",
                    precision,
                    depth,
                    tuning.max_estimated_depth
                );
                rejection = Some((estimated_cells(bbox, precision), precision));
                break;
            }
            match geohash::rasterize(polygon, precision, tuning.max_cells)? {
                Rasterization::Cells(cells) => selected = Some((precision, cells)),
                Rasterization::TooMany { at_least } => {
                    rejection = Some((at_least, precision));
                    break;
                }
            }
        }

        match (selected, rejection) {
            (Some(selected), _) => Ok(selected),
            (None, Some((cells, precision))) => {
                log::warn!(
                    "Rejecting statistics query on {}: {} or more cells at precision {}",
                    self.table_name,
                    cells,
                    precision
                );
                Err(GeoIndexError::QueryTooLarge {
                    cells,
                    precision,
                    max: tuning.max_cells,
                })
            }
            (None, None) => Err(GeoIndexError::InvalidConfig(
                "no precision steps configured".to_string(),
            )),
        }
    }
}

/// Rough rasterization depth: how many cell diagonals fit on the bounding
/// box diagonal, plus a margin of two.
fn estimated_depth(diagonal: f64, center: Point<f64>, precision: usize) -> usize {
    let (width, height) = geohash::cell_size(precision);
    let south = (center.y() - height / 2.0).max(-90.0);
    let north = (center.y() + height / 2.0).min(90.0);
    let cell_diagonal = geohash::distance(
        Point::new(center.x() - width / 2.0, south),
        Point::new(center.x() + width / 2.0, north),
    );
    if cell_diagonal <= 0.0 {
        return usize::MAX;
    }
    ((diagonal / cell_diagonal).floor() as usize).saturating_add(2)
}

fn estimated_cells(bbox: Rect<f64>, precision: usize) -> usize {
    let (width, height) = geohash::cell_size(precision);
    let columns = (bbox.width() / width).ceil().max(1.0) as usize;
    let rows = (bbox.height() / height).ceil().max(1.0) as usize;
    columns.saturating_mul(rows)
}

fn statistics_item(row: &Item) -> Result<StatisticsItem> {
    let cell = row
        .get(CELL_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| GeoIndexError::InvalidGeohash(format!("counter row without '{}'", CELL_FIELD)))?;
    let item_count = match row.get(ITEM_COUNT_FIELD) {
        Some(value) => value.as_i64().ok_or_else(|| StoreError::NotANumber {
            field: ITEM_COUNT_FIELD.to_string(),
            value: value.to_string(),
        })?,
        None => 0,
    };
    let center = geohash::decode(cell)?;
    Ok(StatisticsItem {
        geohash: cell.to_string(),
        center: GeoPosition::from_f64(center.y(), center.x())?,
        boundaries: geohash::bounding_box(cell)?.into(),
        item_count,
    })
}
