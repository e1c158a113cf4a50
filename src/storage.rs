//! Key-value store abstraction.
//!
//! The index and the statistics engines only talk to the store through
//! [`KvStore`], so any store offering keyed access, a two-attribute
//! secondary index, conditional deletes and idempotent transactions can back
//! them. [`MemoryStore`] is the in-process implementation.

mod memory;

pub use memory::{IndexSchema, MemoryStore, TableSchema};

use crate::error::StoreError;
use crate::types::{Item, Key};
use serde_json::Value;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Default number of keys a store accepts in one batch-get request.
pub const DEFAULT_BATCH_GET_LIMIT: usize = 100;

/// Store capability required by the geo index and the statistics engines.
///
/// Implementations must make single-item writes, conditional deletes and
/// [`Transaction`]s atomic. Retries and timeouts are the implementation's
/// business; callers propagate every error unchanged.
pub trait KvStore: Send + Sync {
    /// Get an item by primary key
    fn get_item(&self, table: &str, key: &Key) -> StoreResult<Option<Item>>;

    /// Insert or replace an item
    fn put_item(&self, table: &str, item: Item) -> StoreResult<()>;

    /// Delete an item and return the old value if it existed
    fn delete_item(&self, table: &str, key: &Key) -> StoreResult<Option<Item>>;

    /// Delete an item only if `condition` holds for its current value
    fn delete_item_if(&self, table: &str, key: &Key, condition: &Condition)
    -> StoreResult<DeleteOutcome>;

    /// Range query on a secondary index
    fn query_index(&self, table: &str, query: &IndexQuery) -> StoreResult<Page>;

    /// Get several items by primary key. Missing keys are skipped; at most
    /// [`KvStore::max_batch_get_keys`] keys per call.
    fn batch_get(&self, table: &str, keys: &[Key]) -> StoreResult<Vec<Item>>;

    fn max_batch_get_keys(&self) -> usize {
        DEFAULT_BATCH_GET_LIMIT
    }

    /// Apply all updates of a transaction or none of them
    fn transact_write(&self, transaction: &Transaction) -> StoreResult<TransactionOutcome>;

    /// One page of a full table scan
    fn scan(&self, table: &str, limit: usize, exclusive_start_key: Option<&Key>) -> StoreResult<Page>;
}

/// One page of query or scan results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Item>,
    /// Continuation key; `None` once the range is exhausted
    pub last_evaluated_key: Option<Key>,
}

/// Secondary index range query: equality on the index partition attribute,
/// optional begins-with on the index sort attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexQuery {
    pub index: String,
    pub partition_field: String,
    pub partition_value: Value,
    pub sort_prefix: Option<(String, String)>,
    pub limit: usize,
    pub exclusive_start_key: Option<Key>,
}

/// Precondition of a conditional write.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// The numeric attribute exists and is at most `value`
    AttributeAtMost { field: String, value: i64 },
}

/// Result of a conditional delete. Both outcomes are successes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The item was left alone because the condition did not hold
    PreconditionUnmet,
}

/// Atomic group of updates, optionally tagged with an idempotency token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    pub client_token: Option<String>,
    pub updates: Vec<Update>,
}

impl Transaction {
    pub fn new(client_token: Option<String>) -> Self {
        Self {
            client_token,
            updates: Vec::new(),
        }
    }

    pub fn push(&mut self, update: Update) {
        self.updates.push(update);
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

/// Upsert of one item: add to numeric attributes (missing counts as 0) and
/// overwrite others. A missing item is created from its key.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub key: Key,
    pub add: Vec<(String, i64)>,
    pub set: Vec<(String, Value)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Committed,
    /// The client token was seen before; nothing was written
    AlreadyApplied,
}

/// Kind of change carried by a [`ChangeEvent`], with before/after images.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Insert { new: Item },
    Update { old: Item, new: Item },
    Delete { old: Item },
}

impl Change {
    pub fn old_image(&self) -> Option<&Item> {
        match self {
            Change::Insert { .. } => None,
            Change::Update { old, .. } | Change::Delete { old } => Some(old),
        }
    }

    pub fn new_image(&self) -> Option<&Item> {
        match self {
            Change::Insert { new } | Change::Update { new, .. } => Some(new),
            Change::Delete { .. } => None,
        }
    }
}

/// One record of a table's change stream. Delivery is ordered per key and
/// at-least-once, so the same `event_id` may arrive more than once.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub event_id: String,
    pub change: Change,
}

impl ChangeEvent {
    pub fn new(event_id: impl Into<String>, change: Change) -> Self {
        Self {
            event_id: event_id.into(),
            change,
        }
    }

    pub fn insert(event_id: impl Into<String>, new: Item) -> Self {
        Self::new(event_id, Change::Insert { new })
    }

    pub fn update(event_id: impl Into<String>, old: Item, new: Item) -> Self {
        Self::new(event_id, Change::Update { old, new })
    }

    pub fn delete(event_id: impl Into<String>, old: Item) -> Self {
        Self::new(event_id, Change::Delete { old })
    }
}
