//! Dataset snapshotting for restart recovery.
//!
//! A snapshot captures every table (raw, derived and the reserved watermark
//! table) as one MessagePack blob, written to a temp path and atomically
//! renamed into place so a crash mid-write never corrupts the last snapshot.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::core::{PipelineError, Result};
use crate::storage::table::Table;

#[derive(Debug, Serialize, Deserialize)]
pub struct DatasetSnapshot {
    pub version: u32,
    pub tables: HashMap<String, Table>,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: u64,
    pub row_count: usize,
    pub table_count: usize,
}

impl DatasetSnapshot {
    pub fn new(tables: HashMap<String, Table>) -> Self {
        let row_count = tables.values().map(Table::row_count).sum();
        let table_count = tables.len();
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            version: 1,
            tables,
            metadata: SnapshotMetadata {
                created_at,
                row_count,
                table_count,
            },
        }
    }
}

pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    pub fn save(&self, snapshot: &DatasetSnapshot) -> Result<()> {
        if let Some(parent) = self.snapshot_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PipelineError::Io(format!("Failed to create snapshot directory: {}", e)))?;
        }
        let temp_path = self.snapshot_path.with_extension("tmp");
        let temp_file = File::create(&temp_path)
            .map_err(|e| PipelineError::Io(format!("Failed to create temp file: {}", e)))?;
        let mut writer = BufWriter::new(temp_file);
        let serialized = rmp_serde::to_vec(snapshot)
            .map_err(|e| PipelineError::Serialization(format!("Failed to serialize snapshot: {}", e)))?;
        writer
            .write_all(&serialized)
            .map_err(|e| PipelineError::Io(format!("Failed to write snapshot: {}", e)))?;
        writer
            .flush()
            .map_err(|e| PipelineError::Io(format!("Failed to flush snapshot: {}", e)))?;
        writer
            .get_mut()
            .sync_all()
            .map_err(|e| PipelineError::Io(format!("Failed to sync snapshot: {}", e)))?;
        fs::rename(&temp_path, &self.snapshot_path)
            .map_err(|e| PipelineError::Io(format!("Failed to rename snapshot: {}", e)))?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<DatasetSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.snapshot_path)
            .map_err(|e| PipelineError::Io(format!("Failed to open snapshot: {}", e)))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| PipelineError::Io(format!("Failed to read snapshot: {}", e)))?;
        let snapshot: DatasetSnapshot = rmp_serde::from_slice(&data)
            .map_err(|e| PipelineError::Serialization(format!("Failed to deserialize snapshot: {}", e)))?;
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }

    pub fn delete(&self) -> Result<()> {
        if self.snapshot_path.exists() {
            fs::remove_file(&self.snapshot_path)
                .map_err(|e| PipelineError::Io(format!("Failed to delete snapshot: {}", e)))?;
        }
        Ok(())
    }
}
