//! The transform runner: reads raw rows by predicate, derives rows through
//! the target's model, commits them via staged delete+insert (or whole-table
//! swap for full rebuilds) and only then advances the watermark. A crash
//! between commit and advance causes redundant reprocessing on retry, never
//! a skipped window.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::{Record, Result, Value, event_time};
use crate::storage::{Predicate, StorageAdapter};
use crate::transform::{TargetSpec, TransformMode, TransformPlan};
use crate::watermark::{RunStatus, WatermarkStore};

/// Structured outcome of one transform run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub target: String,
    pub run_id: String,
    pub mode: String,
    pub status: RunStatus,
    pub rows_read: usize,
    pub rows_written: usize,
    pub watermark_before: Option<DateTime<Utc>>,
    pub watermark_after: Option<DateTime<Utc>>,
}

pub struct TransformRunner;

impl TransformRunner {
    /// Run a plan against a target. State machine: Pending -> Running ->
    /// Committed, or Failed with the derived table and watermark untouched.
    pub fn run<S: StorageAdapter>(
        storage: &S,
        target: &TargetSpec,
        plan: TransformPlan,
    ) -> Result<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        let watermark_before = WatermarkStore::read(storage, &target.name)?.max_event_time;

        info!(
            target = %target.name,
            run_id = %run_id,
            mode = plan.mode.label(),
            watermark = ?watermark_before,
            "transform run started"
        );

        match Self::execute(storage, target, plan, &run_id, watermark_before) {
            Ok(report) => {
                info!(
                    target = %target.name,
                    run_id = %run_id,
                    rows_written = report.rows_written,
                    watermark = ?report.watermark_after,
                    "transform run committed"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(
                    target = %target.name,
                    run_id = %run_id,
                    error = %e,
                    "transform run failed; derived table and watermark untouched"
                );
                Err(e)
            }
        }
    }

    /// Convenience entry for a plain incremental run.
    pub fn transform<S: StorageAdapter>(storage: &S, target: &TargetSpec) -> Result<RunReport> {
        Self::run(storage, target, TransformPlan::incremental())
    }

    fn execute<S: StorageAdapter>(
        storage: &S,
        target: &TargetSpec,
        plan: TransformPlan,
        run_id: &str,
        watermark_before: Option<DateTime<Utc>>,
    ) -> Result<RunReport> {
        let watermark = WatermarkStore::read(storage, &target.name)?;
        let predicate = plan.mode.predicate(&watermark);
        let mut raw =
            storage.scan_where(&target.source_table, &target.event_time_field, &predicate)?;

        // An incremental run with nothing new is a strict no-op: the computed
        // key set would be empty, so no derived row may be deleted and the
        // watermark stays put.
        if raw.is_empty() && plan.mode == TransformMode::Incremental {
            return Ok(RunReport {
                target: target.name.clone(),
                run_id: run_id.to_string(),
                mode: plan.mode.label().to_string(),
                status: RunStatus::Committed,
                rows_read: 0,
                rows_written: 0,
                watermark_before,
                watermark_after: watermark_before,
            });
        }

        let model = target.model.as_model();

        // A bucketed model may have already committed partial counts for the
        // bucket the new rows fall into. Widen the read to the start of the
        // earliest affected bucket so those buckets are recomputed from every
        // row they contain, not just the rows past the watermark.
        if plan.mode == TransformMode::Incremental
            && let Some(wm) = watermark.max_event_time
        {
            let mut window_start: Option<DateTime<Utc>> = None;
            for record in &raw {
                let floor = model.bucket_floor(event_time(record, &target.event_time_field)?);
                window_start = Some(match window_start {
                    Some(current) if current <= floor => current,
                    _ => floor,
                });
            }
            if let Some(start) = window_start
                && start <= wm
            {
                raw = storage.scan_where(
                    &target.source_table,
                    &target.event_time_field,
                    &Predicate::From(start),
                )?;
            }
        }

        let mut max_event: Option<DateTime<Utc>> = None;
        for record in &raw {
            let ts = event_time(record, &target.event_time_field)?;
            max_event = Some(match max_event {
                Some(current) if current >= ts => current,
                _ => ts,
            });
        }

        let derived = model.derive(&raw, &target.event_time_field)?;
        let namespace = Self::surrogate_namespace(&target.name);

        let mut keys = HashSet::with_capacity(derived.len());
        let mut rows: Vec<(String, Record)> = Vec::with_capacity(derived.len());
        for row in derived {
            let surrogate = Uuid::new_v5(&namespace, row.business_key.as_bytes()).to_string();
            let mut fields = row.fields;
            fields
                .entry("event_time".to_string())
                .or_insert(Value::Timestamp(row.event_time));
            keys.insert(surrogate.clone());
            rows.push((surrogate, fields));
        }
        let rows_written = rows.len();

        match plan.mode {
            // Whole-table swap: every pre-existing key not in the new set is
            // gone afterward, which is what repairs stale rows.
            TransformMode::FullRebuild => storage.swap_in(&target.derived_table, rows)?,
            // Delete exactly the recomputed keys, then insert their fresh
            // versions. Re-running the same window yields the same rows.
            TransformMode::Incremental | TransformMode::Ranged { .. } => {
                storage.replace_keys(&target.derived_table, &keys, rows)?;
            }
        }

        let watermark_after =
            Self::settle_watermark(storage, target, plan, run_id, watermark_before, max_event)?;

        Ok(RunReport {
            target: target.name.clone(),
            run_id: run_id.to_string(),
            mode: plan.mode.label().to_string(),
            status: RunStatus::Committed,
            rows_read: raw.len(),
            rows_written,
            watermark_before,
            watermark_after,
        })
    }

    /// Watermark rules after a durable commit: incremental always advances;
    /// a ranged run advances only when its range end exceeds the stored
    /// watermark, or rolls back when the operator asked for it; a full
    /// rebuild advances monotonically since it reflects every raw row.
    fn settle_watermark<S: StorageAdapter>(
        storage: &S,
        target: &TargetSpec,
        plan: TransformPlan,
        run_id: &str,
        watermark_before: Option<DateTime<Utc>>,
        max_event: Option<DateTime<Utc>>,
    ) -> Result<Option<DateTime<Utc>>> {
        match (plan.mode, max_event) {
            (_, None) => Ok(watermark_before),
            (TransformMode::Incremental, Some(ts)) | (TransformMode::FullRebuild, Some(ts)) => {
                let wm = WatermarkStore::advance(storage, &target.name, ts, run_id)?;
                Ok(wm.max_event_time)
            }
            (TransformMode::Ranged { end, .. }, Some(ts)) => {
                if plan.rollback_watermark {
                    let wm = WatermarkStore::rollback(storage, &target.name, ts, run_id)?;
                    Ok(wm.max_event_time)
                } else if watermark_before.is_none_or(|wm| end > wm) {
                    let wm = WatermarkStore::advance(storage, &target.name, ts, run_id)?;
                    Ok(wm.max_event_time)
                } else {
                    Ok(watermark_before)
                }
            }
        }
    }

    /// Per-target namespace for surrogate keys: pure function of the target
    /// name, so recomputation from the same raw inputs is stable.
    fn surrogate_namespace(target_name: &str) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, target_name.as_bytes())
    }
}
