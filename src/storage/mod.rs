pub mod engine;
pub mod memory;
pub mod persistence;
pub mod table;

pub use engine::{Predicate, StorageAdapter, UpsertOutcome};
pub use memory::InMemoryStorage;
pub use persistence::{DatasetSnapshot, SnapshotManager, SnapshotMetadata};
pub use table::Table;
