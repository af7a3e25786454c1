use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::core::{PipelineError, Result, Value};

/// A single record: named fields mapped to dynamic values. Raw feeds vary in
/// shape across months, so records are maps rather than positional rows.
pub type Record = BTreeMap<String, Value>;

/// Separator used when rendering a composite key tuple into a single string.
/// ASCII unit separator never occurs in real field data.
pub const KEY_SEPARATOR: char = '\u{1f}';

/// Render the named key fields of a record into one composite key string.
///
/// Fails when a key field is absent or NULL; a record without a full primary
/// key cannot be loaded.
pub fn composite_key(record: &Record, key_fields: &[String]) -> Result<String> {
    let mut parts = Vec::with_capacity(key_fields.len());
    for field in key_fields {
        match record.get(field) {
            Some(value) if !value.is_null() => parts.push(value.to_string()),
            Some(_) => {
                return Err(PipelineError::Execution(format!(
                    "key field '{}' is NULL",
                    field
                )));
            }
            None => {
                return Err(PipelineError::Execution(format!(
                    "key field '{}' is missing",
                    field
                )));
            }
        }
    }
    Ok(parts.join(&KEY_SEPARATOR.to_string()))
}

/// Extract and coerce the event time of a record.
pub fn event_time(record: &Record, field: &str) -> Result<DateTime<Utc>> {
    let value = record
        .get(field)
        .ok_or_else(|| PipelineError::Execution(format!("event-time field '{}' is missing", field)))?;
    value.as_timestamp().ok_or_else(|| {
        PipelineError::TypeMismatch(format!(
            "event-time field '{}' holds non-timestamp {}",
            field,
            value.type_name()
        ))
    })
}
