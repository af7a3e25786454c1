//! Idempotent batch loading of raw records.
//!
//! Each source declares its primary-key tuple, its event-time field and an
//! optional tie-break field. Loading merges the batch into the raw table by
//! key: replaying the same batch any number of times leaves the table in the
//! same state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::{PipelineError, Record, Result, composite_key, event_time};
use crate::storage::StorageAdapter;

/// Declaration of a raw source feed. The tie-break rule is part of the
/// declaration so duplicate resolution is documented per source rather than
/// left implicit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Source name, used in reports and error messages.
    pub name: String,
    /// Raw table the source loads into.
    pub raw_table: String,
    /// Primary-key field tuple; unique in the raw table after a load.
    pub key_fields: Vec<String>,
    /// Field holding the record's event time.
    pub event_time_field: String,
    /// When two records in one batch share a key, the one with the larger
    /// value in this field wins. Without a designated field, first-seen wins.
    #[serde(default)]
    pub tie_break_field: Option<String>,
}

/// Outcome of one `ingest` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadReport {
    pub source: String,
    pub rows_inserted: usize,
    pub rows_updated: usize,
    pub duplicates_resolved: usize,
    /// Non-fatal anomalies, one entry per in-batch duplicate resolution.
    pub errors: Vec<String>,
}

/// Merges incoming batches into raw tables.
pub struct UpsertLoader;

impl UpsertLoader {
    /// Load a batch into the source's raw table.
    ///
    /// The whole batch is validated before anything is written: a record
    /// missing a key field or carrying a non-coercible event time aborts the
    /// load with `Schema` and leaves the raw table untouched. Watermarks are
    /// never touched here.
    pub fn ingest<S: StorageAdapter>(
        storage: &S,
        source: &SourceSpec,
        batch: Vec<Record>,
    ) -> Result<LoadReport> {
        let mut keyed = Vec::with_capacity(batch.len());
        for (idx, record) in batch.into_iter().enumerate() {
            let key = composite_key(&record, &source.key_fields).map_err(|e| {
                PipelineError::Schema {
                    source_name: source.name.clone(),
                    message: format!("record {}: {}", idx, e),
                }
            })?;
            event_time(&record, &source.event_time_field).map_err(|e| {
                PipelineError::Schema {
                    source_name: source.name.clone(),
                    message: format!("record {}: {}", idx, e),
                }
            })?;
            keyed.push((key, record));
        }

        let mut report = LoadReport {
            source: source.name.clone(),
            rows_inserted: 0,
            rows_updated: 0,
            duplicates_resolved: 0,
            errors: Vec::new(),
        };

        let deduped = Self::dedup_batch(source, keyed, &mut report);

        let outcome = storage.upsert_rows(&source.raw_table, deduped)?;
        report.rows_inserted = outcome.inserted;
        report.rows_updated = outcome.updated;

        debug!(
            source = %source.name,
            inserted = report.rows_inserted,
            updated = report.rows_updated,
            duplicates = report.duplicates_resolved,
            "batch loaded"
        );
        Ok(report)
    }

    /// Collapse in-batch duplicates, preserving first-seen order of keys.
    fn dedup_batch(
        source: &SourceSpec,
        keyed: Vec<(String, Record)>,
        report: &mut LoadReport,
    ) -> Vec<(String, Record)> {
        let mut order: Vec<(String, Record)> = Vec::with_capacity(keyed.len());
        let mut index: HashMap<String, usize> = HashMap::with_capacity(keyed.len());

        for (key, record) in keyed {
            match index.get(&key) {
                None => {
                    index.insert(key.clone(), order.len());
                    order.push((key, record));
                }
                Some(&pos) => {
                    report.duplicates_resolved += 1;
                    let kept = &order[pos].1;
                    let replace = Self::incoming_wins(source, kept, &record);
                    let note = format!(
                        "duplicate key '{}' in batch for source '{}': kept {} record",
                        key,
                        source.name,
                        if replace { "incoming" } else { "first-seen" },
                    );
                    warn!(
                        source = %source.name,
                        key = %key,
                        kept_incoming = replace,
                        "duplicate key within batch resolved by tie-break"
                    );
                    report.errors.push(note);
                    if replace {
                        order[pos].1 = record;
                    }
                }
            }
        }
        order
    }

    /// Tie-break rule: larger designated field wins; a missing, NULL or
    /// incomparable tie-break value falls back to first-seen order.
    fn incoming_wins(source: &SourceSpec, kept: &Record, incoming: &Record) -> bool {
        let Some(field) = &source.tie_break_field else {
            return false;
        };
        let (Some(kept_val), Some(incoming_val)) = (kept.get(field), incoming.get(field)) else {
            return false;
        };
        if kept_val.is_null() || incoming_val.is_null() {
            return false;
        }
        match incoming_val.compare(kept_val) {
            Ok(std::cmp::Ordering::Greater) => true,
            Ok(_) => false,
            Err(_) => {
                warn!(
                    source = %source.name,
                    field = %field,
                    "tie-break values incomparable; keeping first-seen record"
                );
                false
            }
        }
    }
}
