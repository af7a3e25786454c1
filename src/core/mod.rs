pub mod error;
pub mod types;
pub mod value;

pub use error::{PipelineError, Result};
pub use types::{KEY_SEPARATOR, Record, composite_key, event_time};
pub use value::Value;
