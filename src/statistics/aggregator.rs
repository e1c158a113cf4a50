use super::{
    CELL_FIELD, Clock, ITEM_COUNT_FIELD, SystemClock, UPDATED_AT_FIELD, counter_key,
    format_timestamp,
};
use crate::compute::validation::validate_geohash;
use crate::config::{GeoTableConfiguration, StatisticsConfiguration};
use crate::error::{GeoIndexError, Result};
use crate::storage::{
    ChangeEvent, Condition, DeleteOutcome, KvStore, Transaction, TransactionOutcome, Update,
};
use crate::types::{Item, Key};
use serde_json::Value;
use smallvec::SmallVec;
use std::sync::Arc;
use uuid::Uuid;

/// Page size used when scanning tables during reprocessing.
const SCAN_PAGE_SIZE: usize = 500;

/// Change of one counter row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterDelta {
    pub cell: String,
    pub delta: i64,
}

/// Store commands derived from one change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterPlan {
    pub event_id: String,
    /// Applied together in one transaction
    pub deltas: SmallVec<[CounterDelta; 4]>,
    /// Cells to delete afterwards if their count dropped to zero
    pub cleanup: SmallVec<[String; 4]>,
}

impl CounterPlan {
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Idempotency token of the plan's transaction.
    pub fn client_token(&self) -> String {
        format!("eventId={}", self.event_id)
    }
}

/// Outcome of [`StatisticsStreamHandler::reprocess_full_table`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReprocessSummary {
    pub counters_removed: usize,
    pub items_scanned: usize,
    pub items_replayed: usize,
}

/// Maintains the counter rows of a statistics table from the change events
/// of a geo-indexed source table.
///
/// Delivery of events is the caller's job: feed every event of the source
/// table's change stream, in order per item, to
/// [`StatisticsStreamHandler::handle_event`]. Events may be delivered more
/// than once; replays are absorbed by the store's idempotency tokens.
pub struct StatisticsStreamHandler<S: KvStore> {
    store: Arc<S>,
    source_table: String,
    source_config: GeoTableConfiguration,
    statistics_table: String,
    config: StatisticsConfiguration,
    clock: Arc<dyn Clock>,
}

impl<S: KvStore> StatisticsStreamHandler<S> {
    pub fn new(
        store: Arc<S>,
        source_table: impl Into<String>,
        source_config: GeoTableConfiguration,
        statistics_table: impl Into<String>,
        config: StatisticsConfiguration,
    ) -> Result<Self> {
        source_config.validate()?;
        config.validate()?;
        Ok(Self {
            store,
            source_table: source_table.into(),
            source_config,
            statistics_table: statistics_table.into(),
            config,
            clock: Arc::new(SystemClock),
        })
    }

    /// Use `clock` for the `updated_at` stamps.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &StatisticsConfiguration {
        &self.config
    }

    /// Apply a batch of events in order. Stops at the first failure; events
    /// before it stay applied and may safely be delivered again.
    pub fn handle_events(&self, events: &[ChangeEvent]) -> Result<usize> {
        log::info!(
            "Handling {} change events of {}",
            events.len(),
            self.source_table
        );
        for event in events {
            self.handle_event(event)?;
        }
        Ok(events.len())
    }

    pub fn handle_event(&self, event: &ChangeEvent) -> Result<()> {
        let plan = self.plan(event)?;
        self.apply(&plan)
    }

    /// Compute the counter changes of `event` without touching the store.
    ///
    /// ```
    /// use geoindex::{GeoTableConfiguration, StatisticsConfiguration, StatisticsStreamHandler};
    /// use geoindex::storage::{ChangeEvent, MemoryStore};
    /// use serde_json::json;
    /// use std::sync::Arc;
    ///
    /// let handler = StatisticsStreamHandler::new(
    ///     Arc::new(MemoryStore::new()),
    ///     "places",
    ///     GeoTableConfiguration::new("id"),
    ///     "statistics",
    ///     StatisticsConfiguration::new([3, 7]),
    /// )?;
    /// let item = json!({"id": "1", "_geohash": "u281z7j7ppzs"});
    /// let plan = handler.plan(&ChangeEvent::delete("event-1", item.as_object().unwrap().clone()))?;
    ///
    /// assert_eq!(plan.deltas.len(), 2);
    /// assert!(plan.deltas.iter().all(|d| d.delta == -1));
    /// assert_eq!(plan.cleanup.as_slice(), ["u28", "u281z7j"]);
    /// # Ok::<(), geoindex::GeoIndexError>(())
    /// ```
    pub fn plan(&self, event: &ChangeEvent) -> Result<CounterPlan> {
        let old_hash = self.geohash_of(event.change.old_image())?;
        let new_hash = self.geohash_of(event.change.new_image())?;

        let mut plan = CounterPlan {
            event_id: event.event_id.clone(),
            deltas: SmallVec::new(),
            cleanup: SmallVec::new(),
        };
        for &precision in &self.config.precision_steps {
            let old_cell = old_hash.map(|hash| cell_at(hash, precision)).transpose()?;
            let new_cell = new_hash.map(|hash| cell_at(hash, precision)).transpose()?;
            if old_cell == new_cell {
                continue;
            }
            if let Some(cell) = old_cell {
                plan.deltas.push(CounterDelta {
                    cell: cell.to_string(),
                    delta: -1,
                });
                plan.cleanup.push(cell.to_string());
            }
            if let Some(cell) = new_cell {
                plan.deltas.push(CounterDelta {
                    cell: cell.to_string(),
                    delta: 1,
                });
            }
        }
        Ok(plan)
    }

    /// Write a plan: all deltas in one idempotent transaction, then the
    /// conditional cleanup deletes.
    pub fn apply(&self, plan: &CounterPlan) -> Result<()> {
        if plan.is_empty() {
            log::debug!("Event {} changes no counters", plan.event_id);
            return Ok(());
        }

        let updated_at = Value::String(format_timestamp(self.clock.now()));
        let mut transaction = Transaction::new(Some(plan.client_token()));
        for delta in &plan.deltas {
            transaction.push(Update {
                table: self.statistics_table.clone(),
                key: counter_key(&delta.cell),
                add: vec![(ITEM_COUNT_FIELD.to_string(), delta.delta)],
                set: vec![(UPDATED_AT_FIELD.to_string(), updated_at.clone())],
            });
        }

        match self.store.transact_write(&transaction)? {
            TransactionOutcome::Committed => {
                log::debug!(
                    "Event {} updated {} counters",
                    plan.event_id,
                    transaction.len()
                );
            }
            TransactionOutcome::AlreadyApplied => {
                log::debug!("Event {} was already applied", plan.event_id);
            }
        }

        // Cleanup also runs on replay: a previous delivery may have stopped
        // between the commit and the deletes.
        let drained = Condition::AttributeAtMost {
            field: ITEM_COUNT_FIELD.to_string(),
            value: 0,
        };
        for cell in &plan.cleanup {
            let outcome =
                self.store
                    .delete_item_if(&self.statistics_table, &counter_key(cell), &drained)?;
            if outcome == DeleteOutcome::PreconditionUnmet {
                log::debug!("Counter {} still in use, not deleting", cell);
            }
        }
        Ok(())
    }

    /// Rebuild every counter from the source table.
    ///
    /// Deletes all counter rows, then replays each source item that has a
    /// geohash as an insert. Events handled concurrently with a rebuild may
    /// be lost or counted twice; run it while the stream is paused, or
    /// accept eventual convergence.
    pub fn reprocess_full_table(&self) -> Result<ReprocessSummary> {
        let mut summary = ReprocessSummary::default();
        log::info!(
            "Reprocessing {} into {}",
            self.source_table,
            self.statistics_table
        );

        self.for_each_row(&self.statistics_table, |row| {
            let Some(cell) = row.get(CELL_FIELD).and_then(Value::as_str) else {
                log::warn!("Skipping counter row without cell id: {:?}", row);
                return Ok(());
            };
            self.store
                .delete_item(&self.statistics_table, &counter_key(cell))?;
            summary.counters_removed += 1;
            Ok(())
        })?;

        self.for_each_row(&self.source_table, |item| {
            summary.items_scanned += 1;
            if self.geohash_of(Some(&item))?.is_none() {
                return Ok(());
            }
            let event = ChangeEvent::insert(format!("reprocess-{}", Uuid::new_v4()), item);
            self.handle_event(&event)?;
            summary.items_replayed += 1;
            Ok(())
        })?;

        log::info!(
            "Reprocessed {}: removed {} counters, replayed {} of {} items",
            self.source_table,
            summary.counters_removed,
            summary.items_replayed,
            summary.items_scanned
        );
        Ok(summary)
    }

    fn for_each_row(&self, table: &str, mut visit: impl FnMut(Item) -> Result<()>) -> Result<()> {
        let mut start: Option<Key> = None;
        loop {
            let page = self.store.scan(table, SCAN_PAGE_SIZE, start.as_ref())?;
            for item in page.items {
                visit(item)?;
            }
            match page.last_evaluated_key {
                Some(key) => start = Some(key),
                None => return Ok(()),
            }
        }
    }

    /// Geohash of an image, `None` if the image or its geohash is missing.
    fn geohash_of<'a>(&self, image: Option<&'a Item>) -> Result<Option<&'a str>> {
        let Some(value) = image.and_then(|item| item.get(&self.source_config.geohash_field)) else {
            return Ok(None);
        };
        match value {
            Value::Null => Ok(None),
            Value::String(hash) => {
                validate_geohash(hash)?;
                Ok(Some(hash.as_str()))
            }
            other => Err(GeoIndexError::InvalidGeohash(format!(
                "'{}' is not a string: {}",
                self.source_config.geohash_field, other
            ))),
        }
    }
}

fn cell_at(hash: &str, precision: usize) -> Result<&str> {
    hash.get(..precision).ok_or_else(|| {
        GeoIndexError::InvalidGeohash(format!(
            "cannot derive a cell of precision {} from '{}'",
            precision, hash
        ))
    })
}
