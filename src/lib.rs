// ============================================================================
// Tidemark Library
// ============================================================================
//
// Embeddable idempotent ingestion and incremental transformation engine:
// upsert loading of timestamped records, watermark-driven derivation of fact
// and aggregate tables with staged delete+insert commits, ranged/full
// backfills, and read-only validation of the result.

pub mod backfill;
pub mod core;
pub mod facade;
pub mod ingest;
pub mod storage;
pub mod transform;
pub mod validate;
pub mod watermark;

// Re-export main types for convenience
pub use backfill::{BackfillCoordinator, BackfillMode, BackfillRequest};
pub use crate::core::{PipelineError, Record, Result, Value};
pub use facade::{Pipeline, PipelineConfig, TargetConfig};
pub use ingest::{LoadReport, SourceSpec, UpsertLoader};
pub use storage::{InMemoryStorage, Predicate, StorageAdapter, Table};
pub use transform::{
    DailyAggregateModel, FactModel, ModelSpec, RunReport, TargetSpec, TransformMode, TransformPlan,
    TransformRunner,
};
pub use validate::{
    CheckResult, CoverageCheck, GapCheck, Severity, ValidationConfig, ValidationGate,
    ValidationReport, VolumeCheck,
};
pub use watermark::{RunStatus, Watermark, WatermarkStore};
