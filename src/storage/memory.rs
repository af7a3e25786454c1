use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::core::{PipelineError, Record, Result};
use crate::storage::engine::{Predicate, StorageAdapter, UpsertOutcome};
use crate::storage::table::Table;

/// In-memory storage backend. Each table sits behind its own lock; table
/// creation and removal go through `&mut self`, row access through `&self`.
#[derive(Default)]
pub struct InMemoryStorage {
    tables: HashMap<String, Arc<RwLock<Table>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    fn get_table(&self, name: &str) -> Result<Arc<RwLock<Table>>> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::TableNotFound(name.to_string()))
    }

    /// Install an empty table unless one already exists. Infallible, for
    /// reserved system tables on construction and restore paths.
    pub fn bootstrap_table(&mut self, name: &str) {
        self.tables
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Table::new(name))));
    }

    /// Clone out every table, for snapshotting.
    pub fn export_tables(&self) -> Result<HashMap<String, Table>> {
        let mut out = HashMap::with_capacity(self.tables.len());
        for (name, handle) in &self.tables {
            let table = handle.read()?;
            out.insert(name.clone(), table.clone());
        }
        Ok(out)
    }

    /// Replace all tables with a snapshot's content.
    pub fn import_tables(&mut self, tables: HashMap<String, Table>) {
        self.tables = tables
            .into_iter()
            .map(|(name, table)| (name, Arc::new(RwLock::new(table))))
            .collect();
    }
}

impl StorageAdapter for InMemoryStorage {
    fn create_table(&mut self, name: &str) -> Result<()> {
        if self.tables.contains_key(name) {
            return Err(PipelineError::TableExists(name.to_string()));
        }
        self.tables
            .insert(name.to_string(), Arc::new(RwLock::new(Table::new(name))));
        Ok(())
    }

    fn ensure_table(&mut self, name: &str) -> Result<()> {
        if !self.tables.contains_key(name) {
            self.create_table(name)?;
        }
        Ok(())
    }

    fn drop_table(&mut self, name: &str) -> Result<()> {
        if self.tables.remove(name).is_none() {
            return Err(PipelineError::TableNotFound(name.to_string()));
        }
        Ok(())
    }

    fn table_exists(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    fn list_tables(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    fn row_count(&self, table: &str) -> Result<usize> {
        let handle = self.get_table(table)?;
        let table = handle.read()?;
        Ok(table.row_count())
    }

    fn upsert_rows(&self, table: &str, rows: Vec<(String, Record)>) -> Result<UpsertOutcome> {
        let handle = self.get_table(table)?;
        let mut table = handle.write()?;
        let mut outcome = UpsertOutcome::default();
        for (key, record) in rows {
            if table.upsert(key, record) {
                outcome.inserted += 1;
            } else {
                outcome.updated += 1;
            }
        }
        Ok(outcome)
    }

    fn scan(&self, table: &str) -> Result<Vec<Record>> {
        let handle = self.get_table(table)?;
        let table = handle.read()?;
        Ok(table.scan())
    }

    fn scan_with_keys(&self, table: &str) -> Result<Vec<(String, Record)>> {
        let handle = self.get_table(table)?;
        let table = handle.read()?;
        Ok(table.scan_with_keys())
    }

    fn scan_where(
        &self,
        table: &str,
        time_field: &str,
        predicate: &Predicate,
    ) -> Result<Vec<Record>> {
        let handle = self.get_table(table)?;
        let table = handle.read()?;
        table.scan_where(time_field, predicate)
    }

    fn get_row(&self, table: &str, key: &str) -> Result<Option<Record>> {
        let handle = self.get_table(table)?;
        let table = handle.read()?;
        Ok(table.get(key).cloned())
    }

    fn replace_keys(
        &self,
        table: &str,
        keys: &HashSet<String>,
        rows: Vec<(String, Record)>,
    ) -> Result<()> {
        let handle = self.get_table(table)?;
        // Stage the full new content off to the side, then install it with a
        // single assignment under the write lock. A failure while staging
        // leaves the live table untouched.
        let staged = {
            let current = handle.read()?;
            let mut staged = Table::new(current.name());
            for (key, record) in current.scan_with_keys() {
                if !keys.contains(&key) {
                    staged.upsert(key, record);
                }
            }
            staged
        };
        let mut staged = staged;
        for (key, record) in rows {
            staged.upsert(key, record);
        }
        let mut guard = handle.write()?;
        *guard = staged;
        Ok(())
    }

    fn swap_in(&self, table: &str, rows: Vec<(String, Record)>) -> Result<()> {
        let handle = self.get_table(table)?;
        let name = {
            let current = handle.read()?;
            current.name().to_string()
        };
        let mut staged = Table::new(name);
        for (key, record) in rows {
            staged.upsert(key, record);
        }
        let mut guard = handle.write()?;
        *guard = staged;
        Ok(())
    }
}
