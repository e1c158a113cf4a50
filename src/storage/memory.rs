//! In-memory [`KvStore`] backed by ordered maps.

use super::{
    Change, ChangeEvent, Condition, DEFAULT_BATCH_GET_LIMIT, DeleteOutcome, IndexQuery, KvStore,
    Page, StoreResult, Transaction, TransactionOutcome,
};
use crate::error::StoreError;
use crate::types::{Item, Key};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Bound;
use uuid::Uuid;

/// Key layout of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub partition_key: String,
    pub sort_key: Option<String>,
    pub indexes: Vec<IndexSchema>,
    /// Record a change stream for this table
    pub stream: bool,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partition_key: partition_key.into(),
            sort_key: None,
            indexes: Vec::new(),
            stream: false,
        }
    }

    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }

    pub fn with_index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_stream(mut self) -> Self {
        self.stream = true;
        self
    }
}

/// Key layout of a secondary index. Items lacking either attribute are not
/// part of the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub name: String,
    pub partition_key: String,
    pub sort_key: Option<String>,
}

impl IndexSchema {
    pub fn new(
        name: impl Into<String>,
        partition_key: impl Into<String>,
        sort_key: Option<&str>,
    ) -> Self {
        Self {
            name: name.into(),
            partition_key: partition_key.into(),
            sort_key: sort_key.map(str::to_string),
        }
    }
}

/// Thread-safe in-memory store.
///
/// Rows of each table live in a `BTreeMap` ordered by primary key. Index
/// queries filter and sort on demand, which is fine for tests and modest
/// datasets. Tables created with [`TableSchema::with_stream`] record every
/// write as a [`ChangeEvent`]; drain them with [`MemoryStore::take_changes`].
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
    batch_get_limit: usize,
}

#[derive(Default)]
struct MemoryInner {
    tables: FxHashMap<String, MemoryTable>,
    /// Client tokens of committed transactions
    client_tokens: FxHashSet<String>,
}

struct MemoryTable {
    schema: TableSchema,
    rows: BTreeMap<String, Item>,
    changes: Vec<ChangeEvent>,
}

impl MemoryTable {
    fn row_id(&self, item: &Item) -> StoreResult<String> {
        let mut id = scalar_text(item, &self.schema.partition_key)?;
        if let Some(sort_key) = &self.schema.sort_key {
            id.push('\u{0}');
            id.push_str(&scalar_text(item, sort_key)?);
        }
        Ok(id)
    }

    fn primary_key(&self, item: &Item) -> Key {
        let mut key = Key::new();
        let fields = std::iter::once(&self.schema.partition_key).chain(&self.schema.sort_key);
        for field in fields {
            if let Some(value) = item.get(field) {
                key.insert(field.clone(), value.clone());
            }
        }
        key
    }

    fn record(&mut self, old: Option<Item>, new: Option<Item>) {
        if !self.schema.stream {
            return;
        }
        let change = match (old, new) {
            (None, Some(new)) => Change::Insert { new },
            (Some(old), Some(new)) => Change::Update { old, new },
            (Some(old), None) => Change::Delete { old },
            (None, None) => return,
        };
        self.changes
            .push(ChangeEvent::new(Uuid::new_v4().to_string(), change));
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryInner::default()),
            batch_get_limit: DEFAULT_BATCH_GET_LIMIT,
        }
    }

    /// Limit the number of keys accepted per batch-get request.
    pub fn with_batch_get_limit(mut self, limit: usize) -> Self {
        self.batch_get_limit = limit.max(1);
        self
    }

    /// Create a table, replacing any existing table of the same name.
    pub fn create_table(&self, schema: TableSchema) {
        let table = MemoryTable {
            schema,
            rows: BTreeMap::new(),
            changes: Vec::new(),
        };
        self.inner
            .write()
            .tables
            .insert(table.schema.name.clone(), table);
    }

    /// Drain the change events recorded for a table since the last call.
    pub fn take_changes(&self, table: &str) -> StoreResult<Vec<ChangeEvent>> {
        let mut inner = self.inner.write();
        let table = table_mut(&mut inner, table)?;
        Ok(std::mem::take(&mut table.changes))
    }

    /// All items of a table in primary key order.
    pub fn items(&self, table: &str) -> StoreResult<Vec<Item>> {
        let inner = self.inner.read();
        Ok(table_ref(&inner, table)?.rows.values().cloned().collect())
    }

    pub fn len(&self, table: &str) -> StoreResult<usize> {
        let inner = self.inner.read();
        Ok(table_ref(&inner, table)?.rows.len())
    }

    pub fn is_empty(&self, table: &str) -> StoreResult<bool> {
        Ok(self.len(table)? == 0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryStore {
    fn get_item(&self, table: &str, key: &Key) -> StoreResult<Option<Item>> {
        let inner = self.inner.read();
        let table = table_ref(&inner, table)?;
        let id = table.row_id(key)?;
        Ok(table.rows.get(&id).cloned())
    }

    fn put_item(&self, table: &str, item: Item) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let table = table_mut(&mut inner, table)?;
        let id = table.row_id(&item)?;
        let old = table.rows.insert(id, item.clone());
        table.record(old, Some(item));
        Ok(())
    }

    fn delete_item(&self, table: &str, key: &Key) -> StoreResult<Option<Item>> {
        let mut inner = self.inner.write();
        let table = table_mut(&mut inner, table)?;
        let id = table.row_id(key)?;
        let old = table.rows.remove(&id);
        table.record(old.clone(), None);
        Ok(old)
    }

    fn delete_item_if(
        &self,
        table: &str,
        key: &Key,
        condition: &Condition,
    ) -> StoreResult<DeleteOutcome> {
        let mut inner = self.inner.write();
        let table = table_mut(&mut inner, table)?;
        let id = table.row_id(key)?;
        let holds = table
            .rows
            .get(&id)
            .is_some_and(|item| condition_holds(item, condition));
        if !holds {
            return Ok(DeleteOutcome::PreconditionUnmet);
        }
        let old = table.rows.remove(&id);
        table.record(old, None);
        Ok(DeleteOutcome::Deleted)
    }

    fn query_index(&self, table: &str, query: &IndexQuery) -> StoreResult<Page> {
        let inner = self.inner.read();
        let table = table_ref(&inner, table)?;
        let index = table
            .schema
            .indexes
            .iter()
            .find(|index| index.name == query.index)
            .ok_or_else(|| StoreError::IndexNotFound {
                table: table.schema.name.clone(),
                index: query.index.clone(),
            })?;

        // (index sort value, primary key) orders the index like a real one
        let sort_text = |item: &Item| -> StoreResult<String> {
            match &index.sort_key {
                Some(field) => scalar_text(item, field),
                None => Ok(String::new()),
            }
        };

        let mut entries = Vec::new();
        for (id, item) in &table.rows {
            let in_partition = item
                .get(&index.partition_key)
                .is_some_and(|value| scalar_eq(value, &query.partition_value));
            if !in_partition {
                continue;
            }
            let Ok(sort) = sort_text(item) else {
                continue;
            };
            if let Some((field, prefix)) = &query.sort_prefix {
                let matches = item
                    .get(field)
                    .and_then(Value::as_str)
                    .is_some_and(|s| s.starts_with(prefix.as_str()));
                if !matches {
                    continue;
                }
            }
            entries.push((sort, id.clone(), item));
        }
        entries.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

        let start = match &query.exclusive_start_key {
            Some(key) => {
                let position = (sort_text(key)?, table.row_id(key)?);
                entries.partition_point(|(sort, id, _)| (sort, id) <= (&position.0, &position.1))
            }
            None => 0,
        };

        let limit = query.limit.max(1);
        let remaining = &entries[start.min(entries.len())..];
        let items: Vec<Item> = remaining
            .iter()
            .take(limit)
            .map(|(_, _, item)| (*item).clone())
            .collect();

        let last_evaluated_key = if remaining.len() > limit {
            items.last().map(|item| {
                let mut key = table.primary_key(item);
                for field in std::iter::once(&index.partition_key).chain(&index.sort_key) {
                    if let Some(value) = item.get(field) {
                        key.insert(field.clone(), value.clone());
                    }
                }
                key
            })
        } else {
            None
        };

        Ok(Page {
            items,
            last_evaluated_key,
        })
    }

    fn batch_get(&self, table: &str, keys: &[Key]) -> StoreResult<Vec<Item>> {
        if keys.len() > self.batch_get_limit {
            return Err(StoreError::BatchTooLarge {
                requested: keys.len(),
                limit: self.batch_get_limit,
            });
        }
        let inner = self.inner.read();
        let table = table_ref(&inner, table)?;
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(item) = table.rows.get(&table.row_id(key)?) {
                items.push(item.clone());
            }
        }
        Ok(items)
    }

    fn max_batch_get_keys(&self) -> usize {
        self.batch_get_limit
    }

    fn transact_write(&self, transaction: &Transaction) -> StoreResult<TransactionOutcome> {
        let mut inner = self.inner.write();
        if let Some(token) = &transaction.client_token
            && inner.client_tokens.contains(token)
        {
            return Ok(TransactionOutcome::AlreadyApplied);
        }

        // Validate everything before the first write so a failure leaves no trace
        let mut targets = FxHashSet::default();
        let mut ids = Vec::with_capacity(transaction.updates.len());
        for update in &transaction.updates {
            let table = table_ref(&inner, &update.table)?;
            let id = table.row_id(&update.key)?;
            if !targets.insert((update.table.as_str(), id.clone())) {
                return Err(StoreError::TransactionCanceled(format!(
                    "multiple updates of one item in table '{}'",
                    update.table
                )));
            }
            if let Some(existing) = table.rows.get(&id) {
                for (field, _) in &update.add {
                    if let Some(value) = existing.get(field)
                        && value.as_i64().is_none()
                    {
                        return Err(StoreError::NotANumber {
                            field: field.clone(),
                            value: value.to_string(),
                        });
                    }
                }
            }
            ids.push(id);
        }

        for (update, id) in transaction.updates.iter().zip(ids) {
            let table = table_mut(&mut inner, &update.table)?;
            let old = table.rows.get(&id).cloned();
            let mut row = old.clone().unwrap_or_else(|| update.key.clone());
            for (field, delta) in &update.add {
                let current = row.get(field).and_then(Value::as_i64).unwrap_or(0);
                row.insert(field.clone(), Value::from(current + delta));
            }
            for (field, value) in &update.set {
                row.insert(field.clone(), value.clone());
            }
            table.rows.insert(id, row.clone());
            table.record(old, Some(row));
        }

        if let Some(token) = &transaction.client_token {
            inner.client_tokens.insert(token.clone());
        }
        Ok(TransactionOutcome::Committed)
    }

    fn scan(&self, table: &str, limit: usize, exclusive_start_key: Option<&Key>) -> StoreResult<Page> {
        let inner = self.inner.read();
        let table = table_ref(&inner, table)?;
        let lower = match exclusive_start_key {
            Some(key) => Bound::Excluded(table.row_id(key)?),
            None => Bound::Unbounded,
        };
        let limit = limit.max(1);
        let mut range = table.rows.range((lower, Bound::Unbounded));
        let items: Vec<Item> = range.by_ref().take(limit).map(|(_, item)| item.clone()).collect();
        let last_evaluated_key = match range.next() {
            Some(_) => items.last().map(|item| table.primary_key(item)),
            None => None,
        };
        Ok(Page {
            items,
            last_evaluated_key,
        })
    }
}

fn table_ref<'a>(inner: &'a MemoryInner, name: &str) -> StoreResult<&'a MemoryTable> {
    inner
        .tables
        .get(name)
        .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
}

fn table_mut<'a>(inner: &'a mut MemoryInner, name: &str) -> StoreResult<&'a mut MemoryTable> {
    inner
        .tables
        .get_mut(name)
        .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
}

/// Type-tagged text of a scalar key attribute, so `"1"` and `1` differ.
fn scalar_text(item: &Item, field: &str) -> StoreResult<String> {
    match item.get(field) {
        Some(Value::String(s)) => Ok(format!("S{}", s)),
        Some(Value::Number(n)) => Ok(format!("N{}", n)),
        Some(Value::Bool(b)) => Ok(format!("B{}", b)),
        _ => Err(StoreError::InvalidKey(field.to_string())),
    }
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn condition_holds(item: &Item, condition: &Condition) -> bool {
    match condition {
        Condition::AttributeAtMost { field, value } => item
            .get(field)
            .and_then(Value::as_f64)
            .is_some_and(|current| current <= *value as f64),
    }
}
