//! Incremental per-cell item counts.
//!
//! The [`StatisticsStreamHandler`] turns change events of a geo-indexed table
//! into counter updates in a separate statistics table, one counter row per
//! cell and configured precision tier. The [`StatisticsTable`] answers
//! "how many items in this area" from those rows without touching the items.

mod aggregator;
mod query;

pub use aggregator::{CounterDelta, CounterPlan, ReprocessSummary, StatisticsStreamHandler};
pub use query::StatisticsTable;

use crate::types::Key;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Key attribute of a counter row: the cell id.
pub const CELL_FIELD: &str = "_geohash";

/// Counter attribute of a counter row.
pub const ITEM_COUNT_FIELD: &str = "item_count";

/// Last modification time of a counter row. Informational only.
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// `updated_at` format, e.g. `2020-03-29T13:17:01.000000Z`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Source of the current time for `updated_at` stamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that never moves.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Primary key of the counter row of `cell`.
pub fn counter_key(cell: &str) -> Key {
    let mut key = Key::new();
    key.insert(CELL_FIELD.to_string(), Value::String(cell.to_string()));
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_format() {
        let time = Utc.with_ymd_and_hms(2020, 3, 29, 13, 17, 1).unwrap();
        assert_eq!(format_timestamp(time), "2020-03-29T13:17:01.000000Z");
    }

    #[test]
    fn test_timestamp_keeps_microseconds() {
        let time = Utc.timestamp_opt(1_585_487_821, 123_456_789).unwrap();
        assert_eq!(format_timestamp(time), "2020-03-29T13:17:01.123456Z");
    }

    #[test]
    fn test_fixed_clock() {
        let time = Utc.with_ymd_and_hms(2020, 3, 29, 13, 17, 1).unwrap();
        assert_eq!(FixedClock(time).now(), time);
    }

    #[test]
    fn test_counter_key() {
        let key = counter_key("u28");
        assert_eq!(key.len(), 1);
        assert_eq!(key[CELL_FIELD], "u28");
    }
}
