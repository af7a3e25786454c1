//! The two built-in transform models: row-level fact projection and daily
//! aggregate rollup.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{KEY_SEPARATOR, Record, Result, Value, composite_key, event_time};
use crate::transform::{DerivedRow, TransformModel};

/// Closed set of model configurations. Serializable so targets can be
/// declared in config; dispatches through the `TransformModel` seam.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSpec {
    Fact(FactModel),
    DailyAggregate(DailyAggregateModel),
}

impl ModelSpec {
    pub fn as_model(&self) -> &dyn TransformModel {
        match self {
            Self::Fact(m) => m,
            Self::DailyAggregate(m) => m,
        }
    }
}

/// One derived row per raw record: the business key is the raw primary key,
/// and the listed fields are carried over (missing fields become NULL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactModel {
    /// Fields forming the business key.
    pub key_fields: Vec<String>,
    /// Dimension and measure fields copied into the derived row.
    pub copy_fields: Vec<String>,
}

impl TransformModel for FactModel {
    fn derive(&self, raw: &[Record], time_field: &str) -> Result<Vec<DerivedRow>> {
        let mut out = Vec::with_capacity(raw.len());
        for record in raw {
            let business_key = composite_key(record, &self.key_fields)?;
            let ts = event_time(record, time_field)?;
            let mut fields = Record::new();
            for name in &self.copy_fields {
                fields.insert(
                    name.clone(),
                    record.get(name).cloned().unwrap_or(Value::Null),
                );
            }
            out.push(DerivedRow {
                business_key,
                event_time: ts,
                fields,
            });
        }
        Ok(out)
    }
}

/// One derived row per (calendar day, dimension tuple): a row count plus a
/// sum per configured measure field. The row's event time is the day's start,
/// which keeps recomputation of a day idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyAggregateModel {
    /// Grouping dimensions beside the calendar day. May be empty.
    pub dimension_fields: Vec<String>,
    /// Numeric fields summed per group; each produces `<field>_total`.
    pub sum_fields: Vec<String>,
}

struct Bucket {
    day_start: DateTime<Utc>,
    dimensions: Vec<(String, Value)>,
    row_count: i64,
    sums: Vec<f64>,
}

impl TransformModel for DailyAggregateModel {
    fn bucket_floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        ts.date_naive().and_time(chrono::NaiveTime::MIN).and_utc()
    }

    fn derive(&self, raw: &[Record], time_field: &str) -> Result<Vec<DerivedRow>> {
        // BTreeMap keeps group order deterministic regardless of raw order.
        let mut buckets: BTreeMap<String, Bucket> = BTreeMap::new();

        for record in raw {
            let ts = event_time(record, time_field)?;
            let day = ts.date_naive();
            let day_start = day.and_time(chrono::NaiveTime::MIN).and_utc();

            let mut key_parts = vec![day.format("%Y-%m-%d").to_string()];
            let mut dimensions = Vec::with_capacity(self.dimension_fields.len());
            for dim in &self.dimension_fields {
                let value = record.get(dim).cloned().unwrap_or(Value::Null);
                key_parts.push(value.to_string());
                dimensions.push((dim.clone(), value));
            }
            let business_key = key_parts.join(&KEY_SEPARATOR.to_string());

            let bucket = buckets.entry(business_key).or_insert_with(|| Bucket {
                day_start,
                dimensions,
                row_count: 0,
                sums: vec![0.0; self.sum_fields.len()],
            });
            bucket.row_count += 1;
            for (idx, field) in self.sum_fields.iter().enumerate() {
                if let Some(v) = record.get(field).and_then(Value::as_f64) {
                    bucket.sums[idx] += v;
                }
            }
        }

        let mut out = Vec::with_capacity(buckets.len());
        for (business_key, bucket) in buckets {
            let mut fields = Record::new();
            fields.insert(
                "date".to_string(),
                Value::Text(bucket.day_start.format("%Y-%m-%d").to_string()),
            );
            for (name, value) in bucket.dimensions {
                fields.insert(name, value);
            }
            fields.insert("row_count".to_string(), Value::Integer(bucket.row_count));
            for (idx, field) in self.sum_fields.iter().enumerate() {
                fields.insert(format!("{}_total", field), Value::Float(bucket.sums[idx]));
            }
            out.push(DerivedRow {
                business_key,
                event_time: bucket.day_start,
                fields,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trip(id: i64, ts: &str, station: &str, fare: f64) -> Record {
        let mut r = Record::new();
        r.insert("trip_id".to_string(), Value::Integer(id));
        r.insert("pickup_datetime".to_string(), Value::Text(ts.to_string()));
        r.insert("station".to_string(), Value::Text(station.to_string()));
        r.insert("fare".to_string(), Value::Float(fare));
        r
    }

    #[test]
    fn test_fact_model_projects_per_record() {
        let model = FactModel {
            key_fields: vec!["trip_id".to_string()],
            copy_fields: vec!["station".to_string(), "fare".to_string()],
        };
        let raw = vec![trip(1, "2025-10-01 08:00:00", "A", 12.5)];
        let derived = model.derive(&raw, "pickup_datetime").unwrap();
        assert_eq!(derived.len(), 1);
        assert_eq!(derived[0].business_key, "1");
        assert_eq!(derived[0].fields["station"], Value::Text("A".into()));
        assert_eq!(derived[0].fields["fare"], Value::Float(12.5));
    }

    #[test]
    fn test_daily_aggregate_groups_by_day_and_dimension() {
        let model = DailyAggregateModel {
            dimension_fields: vec!["station".to_string()],
            sum_fields: vec!["fare".to_string()],
        };
        let raw = vec![
            trip(1, "2025-10-01 08:00:00", "A", 10.0),
            trip(2, "2025-10-01 09:00:00", "A", 5.0),
            trip(3, "2025-10-01 09:30:00", "B", 7.0),
            trip(4, "2025-10-02 10:00:00", "A", 1.0),
        ];
        let derived = model.derive(&raw, "pickup_datetime").unwrap();
        assert_eq!(derived.len(), 3);

        let day1_a = derived
            .iter()
            .find(|d| d.fields["date"] == Value::Text("2025-10-01".into())
                && d.fields["station"] == Value::Text("A".into()))
            .unwrap();
        assert_eq!(day1_a.fields["row_count"], Value::Integer(2));
        assert_eq!(day1_a.fields["fare_total"], Value::Float(15.0));
    }

    #[test]
    fn test_daily_aggregate_bucket_floor_is_day_start() {
        use chrono::{TimeZone, Utc};
        let model = DailyAggregateModel {
            dimension_fields: vec![],
            sum_fields: vec![],
        };
        let ts = Utc.with_ymd_and_hms(2025, 10, 1, 13, 45, 7).unwrap();
        assert_eq!(
            model.bucket_floor(ts),
            Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_daily_aggregate_keys_are_order_independent() {
        let model = DailyAggregateModel {
            dimension_fields: vec![],
            sum_fields: vec![],
        };
        let forward = vec![
            trip(1, "2025-10-01 08:00:00", "A", 0.0),
            trip(2, "2025-10-02 08:00:00", "B", 0.0),
        ];
        let reversed: Vec<Record> = forward.iter().rev().cloned().collect();

        let a = model.derive(&forward, "pickup_datetime").unwrap();
        let b = model.derive(&reversed, "pickup_datetime").unwrap();
        let keys_a: Vec<&String> = a.iter().map(|d| &d.business_key).collect();
        let keys_b: Vec<&String> = b.iter().map(|d| &d.business_key).collect();
        assert_eq!(keys_a, keys_b);
    }
}
