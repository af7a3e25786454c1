use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{Record, Result, event_time};
use crate::storage::engine::Predicate;

/// A keyed in-memory table. Rows are stored under their primary (or
/// surrogate) key string, so upserts and delete+insert commits address rows
/// by key rather than by position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    name: String,
    rows: BTreeMap<String, Record>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert or overwrite a row. Returns `true` when the key was new.
    pub fn upsert(&mut self, key: String, record: Record) -> bool {
        self.rows.insert(key, record).is_none()
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.rows.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.rows.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Record> {
        self.rows.remove(key)
    }

    pub fn scan(&self) -> Vec<Record> {
        self.rows.values().cloned().collect()
    }

    pub fn scan_with_keys(&self) -> Vec<(String, Record)> {
        self.rows
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Scan rows whose event-time field satisfies the predicate.
    pub fn scan_where(&self, time_field: &str, predicate: &Predicate) -> Result<Vec<Record>> {
        if matches!(predicate, Predicate::All) {
            return Ok(self.scan());
        }
        let mut out = Vec::new();
        for record in self.rows.values() {
            let ts = event_time(record, time_field)?;
            if predicate.matches(ts) {
                out.push(record.clone());
            }
        }
        Ok(out)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.rows.keys()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
