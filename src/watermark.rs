//! Per-target watermark tracking.
//!
//! A watermark records the highest source event time already reflected in a
//! derived target. It is persisted through the storage adapter in a reserved
//! table, so snapshots carry it along with the data. Only the transform
//! runner writes it, and only after its derived-table commit: a crash between
//! commit and advance costs redundant reprocessing, never lost data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::{Record, Result, Value};
use crate::storage::StorageAdapter;

/// Reserved table holding one watermark record per derived target.
pub const WATERMARK_TABLE: &str = "_watermarks";

/// Terminal and transient states of a transform run. The watermark record
/// keeps the status of the run that last wrote it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Committed,
    Failed,
}

impl RunStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Committed => "committed",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "failed" => Self::Failed,
            _ => Self::Committed,
        }
    }
}

/// Persisted watermark record for one derived target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watermark {
    pub target_name: String,
    /// `None` means minus infinity: the first incremental run processes all
    /// available raw data.
    pub max_event_time: Option<DateTime<Utc>>,
    pub last_run_id: Option<String>,
    pub status: RunStatus,
}

impl Watermark {
    pub fn empty(target_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            max_event_time: None,
            last_run_id: None,
            status: RunStatus::Pending,
        }
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert(
            "target_name".to_string(),
            Value::Text(self.target_name.clone()),
        );
        record.insert(
            "max_event_time".to_string(),
            match self.max_event_time {
                Some(ts) => Value::Timestamp(ts),
                None => Value::Null,
            },
        );
        record.insert(
            "last_run_id".to_string(),
            match &self.last_run_id {
                Some(id) => Value::Text(id.clone()),
                None => Value::Null,
            },
        );
        record.insert(
            "status".to_string(),
            Value::Text(self.status.as_str().to_string()),
        );
        record
    }

    fn from_record(target_name: &str, record: &Record) -> Self {
        let max_event_time = record
            .get("max_event_time")
            .and_then(Value::as_timestamp);
        let last_run_id = record
            .get("last_run_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let status = record
            .get("status")
            .and_then(Value::as_str)
            .map_or(RunStatus::Committed, RunStatus::parse);
        Self {
            target_name: target_name.to_string(),
            max_event_time,
            last_run_id,
            status,
        }
    }
}

/// Reads and writes watermark records through the storage adapter.
pub struct WatermarkStore;

impl WatermarkStore {
    /// Read the watermark for a target; a target never transformed yet gets
    /// the empty (minus-infinity) watermark.
    pub fn read<S: StorageAdapter>(storage: &S, target: &str) -> Result<Watermark> {
        match storage.get_row(WATERMARK_TABLE, target)? {
            Some(record) => Ok(Watermark::from_record(target, &record)),
            None => Ok(Watermark::empty(target)),
        }
    }

    /// Advance the watermark, monotonically. A `new_max` at or below the
    /// stored value only refreshes run metadata, never moves the watermark
    /// backward.
    pub fn advance<S: StorageAdapter>(
        storage: &S,
        target: &str,
        new_max: DateTime<Utc>,
        run_id: &str,
    ) -> Result<Watermark> {
        let current = Self::read(storage, target)?;
        let max_event_time = match current.max_event_time {
            Some(existing) if existing >= new_max => Some(existing),
            _ => Some(new_max),
        };
        let updated = Watermark {
            target_name: target.to_string(),
            max_event_time,
            last_run_id: Some(run_id.to_string()),
            status: RunStatus::Committed,
        };
        Self::write(storage, &updated)?;
        debug!(
            target = %target,
            watermark = ?updated.max_event_time,
            run_id = %run_id,
            "watermark advanced"
        );
        Ok(updated)
    }

    /// Explicitly set the watermark backward. Only a backfill with an
    /// operator-requested rollback goes through here.
    pub fn rollback<S: StorageAdapter>(
        storage: &S,
        target: &str,
        to: DateTime<Utc>,
        run_id: &str,
    ) -> Result<Watermark> {
        let updated = Watermark {
            target_name: target.to_string(),
            max_event_time: Some(to),
            last_run_id: Some(run_id.to_string()),
            status: RunStatus::Committed,
        };
        Self::write(storage, &updated)?;
        info!(target = %target, watermark = %to, run_id = %run_id, "watermark rolled back");
        Ok(updated)
    }

    fn write<S: StorageAdapter>(storage: &S, watermark: &Watermark) -> Result<()> {
        storage.upsert_rows(
            WATERMARK_TABLE,
            vec![(watermark.target_name.clone(), watermark.to_record())],
        )?;
        Ok(())
    }
}
