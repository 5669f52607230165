//! Per-request batch loader for N+1 elimination (C2).
//!
//! One loader lives for the duration of a single GraphQL request. Resolvers
//! queue the key values they will need, the data fetcher drains a slot into
//! one `IN` query, and the results are indexed for `lookup`. Field
//! resolution may fan out, so every map here is a concurrent map.

use async_graphql::Value;
use dashmap::{DashMap, DashSet};
use indexmap::IndexMap;

use crate::convert::Record;

/// A slot is one `(table, key_column)` pair.
type SlotKey = (String, String);

/// Canonical hash key for a GraphQL value used as a batch key.
fn value_key(value: &Value) -> String {
    value.to_string()
}

#[derive(Default)]
pub struct BatchLoader {
    pending: DashMap<SlotKey, IndexMap<String, Value>>,
    cached: DashMap<SlotKey, DashMap<String, Vec<Record>>>,
    processed: DashSet<String>,
}

impl BatchLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a key value for a later batched fetch.
    pub fn queue(&self, table: &str, key_column: &str, value: Value) {
        if matches!(value, Value::Null) {
            return;
        }
        self.pending
            .entry((table.to_string(), key_column.to_string()))
            .or_default()
            .insert(value_key(&value), value);
    }

    pub fn queue_many(&self, table: &str, key_column: &str, values: impl IntoIterator<Item = Value>) {
        for value in values {
            self.queue(table, key_column, value);
        }
    }

    /// Queued values not already cached; empties the queue slot.
    pub fn drain_pending(&self, table: &str, key_column: &str) -> Vec<Value> {
        let slot = (table.to_string(), key_column.to_string());
        let Some((_, queued)) = self.pending.remove(&slot) else {
            return Vec::new();
        };
        match self.cached.get(&slot) {
            Some(cache) => queued
                .into_iter()
                .filter(|(key, _)| !cache.contains_key(key))
                .map(|(_, value)| value)
                .collect(),
            None => queued.into_values().collect(),
        }
    }

    /// Index fetched records under the value each holds in `key_column`.
    pub fn cache(&self, table: &str, key_column: &str, records: Vec<Record>) {
        let slot = self
            .cached
            .entry((table.to_string(), key_column.to_string()))
            .or_default();
        for record in records {
            let Some(key) = record.get(key_column).map(value_key) else {
                continue;
            };
            slot.entry(key).or_default().push(record);
        }
    }

    /// Mark a key as fetched even when the fetch returned nothing, so a
    /// later `lookup` miss is answered from memory instead of re-queried.
    pub fn cache_miss(&self, table: &str, key_column: &str, value: &Value) {
        self.cached
            .entry((table.to_string(), key_column.to_string()))
            .or_default()
            .entry(value_key(value))
            .or_default();
    }

    /// First cached record for the key value, if any.
    pub fn lookup(&self, table: &str, key_column: &str, value: &Value) -> Option<Record> {
        self.cached
            .get(&(table.to_string(), key_column.to_string()))?
            .get(&value_key(value))
            .and_then(|records| records.first().cloned())
    }

    /// Every cached record for the key value (reverse relationships).
    pub fn lookup_many(&self, table: &str, key_column: &str, value: &Value) -> Option<Vec<Record>> {
        self.cached
            .get(&(table.to_string(), key_column.to_string()))?
            .get(&value_key(value))
            .map(|records| records.clone())
    }

    /// True when a slot holds any cached data for the key column.
    pub fn has_cached(&self, table: &str, key_column: &str) -> bool {
        self.cached
            .contains_key(&(table.to_string(), key_column.to_string()))
    }

    /// Idempotent guard breaking cycles when the same relationship shows up
    /// more than once in a selection tree. Returns true the first time.
    pub fn mark_processed(&self, table: &str) -> bool {
        self.processed.insert(table.to_string())
    }

    /// End-of-request reset.
    pub fn clear(&self) {
        self.pending.clear();
        self.cached.clear();
        self.processed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap as Map;

    fn record(pairs: &[(&str, Value)]) -> Record {
        let mut columns = Map::new();
        for (k, v) in pairs {
            columns.insert((*k).to_string(), v.clone());
        }
        Record { columns }
    }

    #[test]
    fn queued_then_cached_is_retrievable() {
        let loader = BatchLoader::new();
        loader.queue("address", "address_id", Value::from(7));

        let pending = loader.drain_pending("address", "address_id");
        assert_eq!(pending, vec![Value::from(7)]);

        loader.cache(
            "address",
            "address_id",
            vec![record(&[("address_id", Value::from(7)), ("city", Value::String("X".into()))])],
        );
        let hit = loader.lookup("address", "address_id", &Value::from(7)).unwrap();
        assert_eq!(hit.get("city"), Some(&Value::String("X".into())));
    }

    #[test]
    fn unqueued_values_are_not_cached_implicitly() {
        let loader = BatchLoader::new();
        loader.queue("address", "address_id", Value::from(1));
        loader.drain_pending("address", "address_id");
        loader.cache("address", "address_id", vec![record(&[("address_id", Value::from(1))])]);

        assert!(loader.lookup("address", "address_id", &Value::from(2)).is_none());
    }

    #[test]
    fn drain_skips_already_cached_and_empties_slot() {
        let loader = BatchLoader::new();
        loader.cache("t", "k", vec![record(&[("k", Value::from(1))])]);

        loader.queue_many("t", "k", [Value::from(1), Value::from(2), Value::from(2)]);
        let pending = loader.drain_pending("t", "k");
        // 1 is cached, 2 was queued twice but deduplicated.
        assert_eq!(pending, vec![Value::from(2)]);

        assert!(loader.drain_pending("t", "k").is_empty());
    }

    #[test]
    fn null_keys_are_ignored() {
        let loader = BatchLoader::new();
        loader.queue("t", "k", Value::Null);
        assert!(loader.drain_pending("t", "k").is_empty());
    }

    #[test]
    fn mark_processed_is_idempotent() {
        let loader = BatchLoader::new();
        assert!(loader.mark_processed("customer"));
        assert!(!loader.mark_processed("customer"));
        loader.clear();
        assert!(loader.mark_processed("customer"));
    }

    #[test]
    fn reverse_lookup_returns_all_records() {
        let loader = BatchLoader::new();
        loader.cache(
            "payment",
            "customer_id",
            vec![
                record(&[("customer_id", Value::from(1)), ("amount", Value::from(10))]),
                record(&[("customer_id", Value::from(1)), ("amount", Value::from(20))]),
            ],
        );
        let hits = loader.lookup_many("payment", "customer_id", &Value::from(1)).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn cache_miss_answers_later_lookups() {
        let loader = BatchLoader::new();
        loader.cache_miss("t", "k", &Value::from(9));
        assert!(loader.has_cached("t", "k"));
        assert!(loader.lookup("t", "k", &Value::from(9)).is_none());
        assert_eq!(loader.lookup_many("t", "k", &Value::from(9)), Some(vec![]));
    }
}
