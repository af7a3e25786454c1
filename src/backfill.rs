//! Backfill planning: turns an operator request into a validated transform
//! plan.
//!
//! Known limitation of ranged backfills: only keys present in the newly
//! computed set are replaced. A key whose grouping boundary straddles the
//! window edge, or a key orphaned by a correction outside the window, is not
//! reconciled. For bucketed models this includes range bounds that cut
//! through a bucket; align the range to bucket boundaries or run a full
//! rebuild, which is the safe repair path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::{PipelineError, Result};
use crate::storage::StorageAdapter;
use crate::transform::{TransformMode, TransformPlan};
use crate::watermark::WatermarkStore;

/// Requested transformation mode, before range validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillMode {
    Incremental,
    Ranged,
    FullRebuild,
}

/// An operator- or scheduler-created request. Consumed once; never persisted
/// beyond the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillRequest {
    pub target_name: String,
    pub mode: BackfillMode,
    pub range_start: Option<DateTime<Utc>>,
    pub range_end: Option<DateTime<Utc>>,
    /// Explicit operator consent to move the watermark backward. Without it,
    /// a ranged request ending behind the stored watermark is rejected.
    #[serde(default)]
    pub rollback_watermark: bool,
}

impl BackfillRequest {
    pub fn incremental(target_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            mode: BackfillMode::Incremental,
            range_start: None,
            range_end: None,
            rollback_watermark: false,
        }
    }

    pub fn full_rebuild(target_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            mode: BackfillMode::FullRebuild,
            range_start: None,
            range_end: None,
            rollback_watermark: false,
        }
    }

    pub fn ranged(
        target_name: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            target_name: target_name.into(),
            mode: BackfillMode::Ranged,
            range_start: Some(start),
            range_end: Some(end),
            rollback_watermark: false,
        }
    }

    pub fn with_rollback(mut self) -> Self {
        self.rollback_watermark = true;
        self
    }
}

pub struct BackfillCoordinator;

impl BackfillCoordinator {
    /// Validate a request against the target's stored watermark and produce
    /// the plan the runner executes.
    pub fn plan<S: StorageAdapter>(storage: &S, request: &BackfillRequest) -> Result<TransformPlan> {
        match request.mode {
            BackfillMode::Incremental => Ok(TransformPlan::incremental()),
            BackfillMode::FullRebuild => Ok(TransformPlan {
                mode: TransformMode::FullRebuild,
                rollback_watermark: false,
            }),
            BackfillMode::Ranged => {
                let (start, end) = match (request.range_start, request.range_end) {
                    (Some(start), Some(end)) => (start, end),
                    _ => {
                        return Err(PipelineError::InvalidRange(
                            "ranged backfill requires both range_start and range_end".to_string(),
                        ));
                    }
                };
                if start > end {
                    return Err(PipelineError::InvalidRange(format!(
                        "range_start {} is after range_end {}",
                        start, end
                    )));
                }

                let watermark = WatermarkStore::read(storage, &request.target_name)?;
                if let Some(wm) = watermark.max_event_time
                    && end < wm
                    && !request.rollback_watermark
                {
                    return Err(PipelineError::WatermarkStale {
                        target: request.target_name.clone(),
                        range_end: end.to_rfc3339(),
                        watermark: wm.to_rfc3339(),
                    });
                }

                info!(
                    target = %request.target_name,
                    start = %start,
                    end = %end,
                    rollback = request.rollback_watermark,
                    "ranged backfill planned"
                );
                Ok(TransformPlan {
                    mode: TransformMode::Ranged { start, end },
                    rollback_watermark: request.rollback_watermark,
                })
            }
        }
    }
}
