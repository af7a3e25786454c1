use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    // `source` is reserved by thiserror for error chaining, hence the
    // longer field name.
    #[error("Schema error in source '{source_name}': {message}")]
    Schema {
        source_name: String,
        message: String,
    },

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Source '{0}' is not registered")]
    SourceNotFound(String),

    #[error("Target '{0}' is not registered")]
    TargetNotFound(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Invalid backfill range: {0}")]
    InvalidRange(String),

    #[error(
        "Stale watermark for target '{target}': range end {range_end} is behind watermark {watermark}; \
         an explicit rollback is required to reprocess behind the watermark"
    )]
    WatermarkStale {
        target: String,
        range_end: String,
        watermark: String,
    },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl<T> From<std::sync::PoisonError<T>> for PipelineError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}
