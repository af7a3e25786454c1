use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{PipelineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        match (self, other) {
            // NULL handling: NULL sorts after all values (NULL LAST)
            (Value::Null, Value::Null) => Ok(Ordering::Equal),
            (Value::Null, _) => Ok(Ordering::Greater),
            (_, Value::Null) => Ok(Ordering::Less),

            (Value::Integer(a), Value::Integer(b)) => Ok(a.cmp(b)),

            (Value::Float(a), Value::Float(b)) => {
                // NaN compares equal to NaN and greater than everything else
                match (a.is_nan(), b.is_nan()) {
                    (true, true) => Ok(Ordering::Equal),
                    (true, false) => Ok(Ordering::Greater),
                    (false, true) => Ok(Ordering::Less),
                    (false, false) => Ok(a.partial_cmp(b).unwrap_or(Ordering::Equal)),
                }
            }

            (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),

            (Value::Boolean(a), Value::Boolean(b)) => Ok(a.cmp(b)),

            (Value::Timestamp(a), Value::Timestamp(b)) => Ok(a.cmp(b)),

            // Mixed numeric types (implicit coercion)
            (Value::Integer(a), Value::Float(b)) => {
                let a_float = *a as f64;
                if b.is_nan() {
                    Ok(Ordering::Less)
                } else {
                    Ok(a_float.partial_cmp(b).unwrap_or(Ordering::Equal))
                }
            }

            (Value::Float(a), Value::Integer(b)) => {
                let b_float = *b as f64;
                if a.is_nan() {
                    Ok(Ordering::Greater)
                } else {
                    Ok(a.partial_cmp(&b_float).unwrap_or(Ordering::Equal))
                }
            }

            // Text timestamps compare against native timestamps after coercion
            (Value::Text(_), Value::Timestamp(b)) => match self.as_timestamp() {
                Some(a) => Ok(a.cmp(b)),
                None => Err(PipelineError::TypeMismatch(format!(
                    "Cannot compare non-timestamp text with {}",
                    other.type_name()
                ))),
            },
            (Value::Timestamp(a), Value::Text(_)) => match other.as_timestamp() {
                Some(b) => Ok(a.cmp(&b)),
                None => Err(PipelineError::TypeMismatch(format!(
                    "Cannot compare {} with non-timestamp text",
                    self.type_name()
                ))),
            },

            _ => Err(PipelineError::TypeMismatch(format!(
                "Cannot compare incompatible types: {} and {}",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Boolean(_) => "BOOLEAN",
            Self::Timestamp(_) => "TIMESTAMP",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) => {
                if f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Some(*f as i64)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Coerce to a UTC timestamp. Text accepts RFC 3339, `%Y-%m-%d %H:%M:%S`
    /// and bare `%Y-%m-%d` (midnight), mirroring the formats raw feeds carry.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            Self::Text(s) => {
                if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                    return Some(ts.with_timezone(&Utc));
                }
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                    return Some(naive.and_utc());
                }
                if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                    return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
                }
                None
            }
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Float(_))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => {
                if a.is_nan() && b.is_nan() {
                    return true;
                }
                (a - b).abs() < f64::EPSILON
            }
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            // Implicit Integer/Float equivalence
            (Self::Integer(i), Self::Float(f)) | (Self::Float(f), Self::Integer(i)) => {
                (*i as f64 - f).abs() < f64::EPSILON
            }
            _ => false,
        }
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => {
                if fl.is_nan() {
                    write!(f, "NaN")
                } else if fl.is_infinite() {
                    if *fl > 0.0 {
                        write!(f, "Infinity")
                    } else {
                        write!(f, "-Infinity")
                    }
                } else {
                    write!(f, "{}", fl)
                }
            }
            Self::Text(s) => write!(f, "{}", s),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}
