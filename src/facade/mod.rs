//! High-level pipeline facade tying the loader, runner, coordinator and gate
//! together over one storage backend.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backfill::{BackfillCoordinator, BackfillRequest};
use crate::core::{PipelineError, Record, Result};
use crate::ingest::{LoadReport, SourceSpec, UpsertLoader};
use crate::storage::{
    DatasetSnapshot, InMemoryStorage, SnapshotManager, StorageAdapter,
};
use crate::transform::{RunReport, TargetSpec, TransformRunner};
use crate::validate::{ValidationConfig, ValidationGate, ValidationReport};
use crate::watermark::WATERMARK_TABLE;

/// A target declaration plus its validation settings, as carried in config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(flatten)]
    pub spec: TargetSpec,
    #[serde(default)]
    pub validation: ValidationConfig,
}

/// Whole-pipeline declaration, loadable from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub sources: Vec<SourceSpec>,
    pub targets: Vec<TargetConfig>,
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| PipelineError::Serialization(format!("invalid pipeline config: {}", e)))
    }
}

/// The embedded pipeline: registered sources and targets over an in-memory
/// store, with optional snapshot persistence.
///
/// Single-writer per target: callers must not run two transforms for the
/// same target concurrently, nor interleave load and transform on one
/// target. Read-only access (validation, external readers) is safe at any
/// time.
///
/// # Examples
///
/// ```
/// use tidemark::{Pipeline, SourceSpec};
///
/// # fn main() -> tidemark::Result<()> {
/// let mut pipeline = Pipeline::new();
/// pipeline.register_source(SourceSpec {
///     name: "trips".to_string(),
///     raw_table: "raw_trips".to_string(),
///     key_fields: vec!["trip_id".to_string()],
///     event_time_field: "pickup_datetime".to_string(),
///     tie_break_field: None,
/// })?;
/// # Ok(())
/// # }
/// ```
pub struct Pipeline {
    storage: InMemoryStorage,
    sources: HashMap<String, SourceSpec>,
    targets: HashMap<String, TargetSpec>,
    validations: HashMap<String, ValidationConfig>,
    snapshot: Option<SnapshotManager>,
}

impl Pipeline {
    pub fn new() -> Self {
        let mut storage = InMemoryStorage::new();
        storage.bootstrap_table(WATERMARK_TABLE);
        Self {
            storage,
            sources: HashMap::new(),
            targets: HashMap::new(),
            validations: HashMap::new(),
            snapshot: None,
        }
    }

    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let mut pipeline = Self::new();
        for source in config.sources {
            pipeline.register_source(source)?;
        }
        for target in config.targets {
            pipeline.register_target(target.spec, target.validation)?;
        }
        Ok(pipeline)
    }

    pub fn register_source(&mut self, spec: SourceSpec) -> Result<()> {
        self.storage.ensure_table(&spec.raw_table)?;
        self.sources.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn register_target(&mut self, spec: TargetSpec, validation: ValidationConfig) -> Result<()> {
        self.storage.ensure_table(&spec.derived_table)?;
        self.validations.insert(spec.name.clone(), validation);
        self.targets.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Load keyed reference dimension rows, for coverage checks.
    pub fn upsert_reference(&mut self, table: &str, rows: Vec<(String, Record)>) -> Result<()> {
        self.storage.ensure_table(table)?;
        self.storage.upsert_rows(table, rows)?;
        Ok(())
    }

    /// Merge a batch into the named source's raw table.
    pub fn ingest(&self, source: &str, batch: Vec<Record>) -> Result<LoadReport> {
        let spec = self
            .sources
            .get(source)
            .ok_or_else(|| PipelineError::SourceNotFound(source.to_string()))?;
        UpsertLoader::ingest(&self.storage, spec, batch)
    }

    /// Run an incremental transform for the named target.
    pub fn transform(&self, target: &str) -> Result<RunReport> {
        let spec = self.target_spec(target)?;
        TransformRunner::transform(&self.storage, spec)
    }

    /// Plan and run a backfill request.
    pub fn run_backfill(&self, request: &BackfillRequest) -> Result<RunReport> {
        let spec = self.target_spec(&request.target_name)?;
        let plan = BackfillCoordinator::plan(&self.storage, request)?;
        TransformRunner::run(&self.storage, spec, plan)
    }

    /// Run the configured validation checks for the named target.
    pub fn validate(&self, target: &str) -> Result<ValidationReport> {
        let spec = self.target_spec(target)?;
        let config = self
            .validations
            .get(target)
            .cloned()
            .unwrap_or_default();
        ValidationGate::validate(&self.storage, spec, &config)
    }

    pub fn storage(&self) -> &InMemoryStorage {
        &self.storage
    }

    /// Attach a snapshot file for save/restore.
    pub fn attach_snapshot<P: AsRef<Path>>(&mut self, path: P) {
        self.snapshot = Some(SnapshotManager::new(path));
    }

    /// Write the whole dataset (raw, derived and watermark tables) to the
    /// attached snapshot file.
    pub fn save_snapshot(&self) -> Result<()> {
        let manager = self
            .snapshot
            .as_ref()
            .ok_or_else(|| PipelineError::Execution("no snapshot file attached".to_string()))?;
        let tables = self.storage.export_tables()?;
        manager.save(&DatasetSnapshot::new(tables))
    }

    /// Restore tables from the attached snapshot file, if one exists.
    /// Returns `true` when a snapshot was loaded.
    pub fn load_snapshot(&mut self) -> Result<bool> {
        let manager = self
            .snapshot
            .as_ref()
            .ok_or_else(|| PipelineError::Execution("no snapshot file attached".to_string()))?;
        match manager.load()? {
            Some(snapshot) => {
                self.storage.import_tables(snapshot.tables);
                self.storage.bootstrap_table(WATERMARK_TABLE);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn target_spec(&self, target: &str) -> Result<&TargetSpec> {
        self.targets
            .get(target)
            .ok_or_else(|| PipelineError::TargetNotFound(target.to_string()))
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
