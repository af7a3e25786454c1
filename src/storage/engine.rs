use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Record, Result};

/// Event-time read predicate supplied by the transform mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Predicate {
    /// Every row (full rebuild, or first run with no watermark).
    All,
    /// Strictly newer than the watermark (incremental).
    After(DateTime<Utc>),
    /// At or after a bucket boundary (incremental re-read of a bucket that
    /// already has committed rows).
    From(DateTime<Utc>),
    /// Closed range, inclusive on both ends (ranged backfill).
    Between(DateTime<Utc>, DateTime<Utc>),
}

impl Predicate {
    pub fn matches(&self, ts: DateTime<Utc>) -> bool {
        match self {
            Self::All => true,
            Self::After(cutoff) => ts > *cutoff,
            Self::From(start) => ts >= *start,
            Self::Between(start, end) => ts >= *start && ts <= *end,
        }
    }
}

/// Outcome of an upsert batch against one table.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpsertOutcome {
    pub inserted: usize,
    pub updated: usize,
}

/// Storage adapter seam - allows pluggable table backends.
///
/// The three write primitives the pipeline relies on: upsert-by-key,
/// all-or-nothing delete+insert over a key set, and a whole-table swap.
/// Reads are either full scans or event-time predicate scans.
pub trait StorageAdapter: Send + Sync {
    /// Create an empty table. Fails if the name is taken.
    fn create_table(&mut self, name: &str) -> Result<()>;

    /// Create the table if it does not exist yet.
    fn ensure_table(&mut self, name: &str) -> Result<()>;

    fn drop_table(&mut self, name: &str) -> Result<()>;

    fn table_exists(&self, name: &str) -> bool;

    fn list_tables(&self) -> Vec<String>;

    fn row_count(&self, table: &str) -> Result<usize>;

    /// Insert-or-overwrite each row under its key.
    fn upsert_rows(&self, table: &str, rows: Vec<(String, Record)>) -> Result<UpsertOutcome>;

    fn scan(&self, table: &str) -> Result<Vec<Record>>;

    fn scan_with_keys(&self, table: &str) -> Result<Vec<(String, Record)>>;

    fn scan_where(&self, table: &str, time_field: &str, predicate: &Predicate)
    -> Result<Vec<Record>>;

    fn get_row(&self, table: &str, key: &str) -> Result<Option<Record>>;

    /// Delete every existing row whose key is in `keys`, then insert `rows`,
    /// as one atomic step. No intermediate state is observable.
    fn replace_keys(
        &self,
        table: &str,
        keys: &HashSet<String>,
        rows: Vec<(String, Record)>,
    ) -> Result<()>;

    /// Replace the entire table content with `rows` as one atomic step.
    fn swap_in(&self, table: &str, rows: Vec<(String, Record)>) -> Result<()>;
}
