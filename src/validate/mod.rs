//! Post-transform validation checks.
//!
//! All checks are read-only against the derived table. A failed check never
//! rolls back a committed transform; downstream consumers are expected to
//! inspect the report before trusting a target.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::{Record, Result, Value};
use crate::storage::StorageAdapter;
use crate::transform::TargetSpec;

/// How a failed check is treated downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Downstream consumption should halt on failure.
    Error,
    /// Reported only.
    Warn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeCheck {
    /// Minimum rows per calendar month.
    pub min_rows_per_month: usize,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageCheck {
    /// Derived-row field that should join the reference dimension.
    pub dimension_field: String,
    /// Reference table keyed by the dimension value.
    pub reference_table: String,
    /// Minimum joined percentage, e.g. 99.99.
    pub threshold_pct: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapCheck {
    /// Longest tolerated run of missing calendar days.
    pub max_gap_days: i64,
    pub severity: Severity,
}

/// Per-target validation configuration. Unset checks are skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub volume: Option<VolumeCheck>,
    pub coverage: Option<CoverageCheck>,
    pub gap: Option<GapCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub severity: Severity,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub target: String,
    pub checks: Vec<CheckResult>,
}

impl ValidationReport {
    /// True when no error-severity check failed. Warn-severity failures do
    /// not block.
    pub fn passed(&self) -> bool {
        self.checks
            .iter()
            .all(|c| c.passed || c.severity == Severity::Warn)
    }
}

pub struct ValidationGate;

impl ValidationGate {
    pub fn validate<S: StorageAdapter>(
        storage: &S,
        target: &TargetSpec,
        config: &ValidationConfig,
    ) -> Result<ValidationReport> {
        let rows = storage.scan(&target.derived_table)?;
        let mut checks = Vec::new();

        if let Some(check) = &config.volume {
            checks.push(Self::check_volume(&rows, check));
        }
        if let Some(check) = &config.coverage {
            checks.push(Self::check_coverage(storage, &rows, check)?);
        }
        if let Some(check) = &config.gap {
            checks.push(Self::check_gaps(&rows, check));
        }

        let report = ValidationReport {
            target: target.name.clone(),
            checks,
        };
        if report.passed() {
            info!(target = %target.name, checks = report.checks.len(), "validation passed");
        } else {
            warn!(target = %target.name, "validation failed");
        }
        Ok(report)
    }

    /// Row count per calendar month must reach the configured minimum.
    fn check_volume(rows: &[Record], check: &VolumeCheck) -> CheckResult {
        if rows.is_empty() && check.min_rows_per_month > 0 {
            return CheckResult {
                name: "volume".to_string(),
                severity: check.severity,
                passed: false,
                detail: "LowVolumeWarning: derived table is empty".to_string(),
            };
        }

        let mut by_month: BTreeMap<String, usize> = BTreeMap::new();
        for record in rows {
            if let Some(ts) = Self::row_event_time(record) {
                let bucket = format!("{:04}-{:02}", ts.year(), ts.month());
                *by_month.entry(bucket).or_insert(0) += 1;
            }
        }

        let low: Vec<String> = by_month
            .iter()
            .filter(|&(_, &count)| count < check.min_rows_per_month)
            .map(|(month, count)| format!("{} has {} rows", month, count))
            .collect();

        if low.is_empty() {
            CheckResult {
                name: "volume".to_string(),
                severity: check.severity,
                passed: true,
                detail: format!(
                    "all {} month(s) at or above {} rows",
                    by_month.len(),
                    check.min_rows_per_month
                ),
            }
        } else {
            CheckResult {
                name: "volume".to_string(),
                severity: check.severity,
                passed: false,
                detail: format!(
                    "LowVolumeWarning: below {} rows per month: {}",
                    check.min_rows_per_month,
                    low.join(", ")
                ),
            }
        }
    }

    /// Percentage of rows whose dimension value joins the reference table.
    /// A NULL or missing dimension value counts as unjoined.
    fn check_coverage<S: StorageAdapter>(
        storage: &S,
        rows: &[Record],
        check: &CoverageCheck,
    ) -> Result<CheckResult> {
        if rows.is_empty() {
            return Ok(CheckResult {
                name: "coverage".to_string(),
                severity: check.severity,
                passed: true,
                detail: "no rows to check".to_string(),
            });
        }

        let mut joined = 0usize;
        for record in rows {
            let Some(value) = record.get(&check.dimension_field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            if storage
                .get_row(&check.reference_table, &value.to_string())?
                .is_some()
            {
                joined += 1;
            }
        }

        let pct = 100.0 * joined as f64 / rows.len() as f64;
        let passed = pct >= check.threshold_pct;
        Ok(CheckResult {
            name: "coverage".to_string(),
            severity: check.severity,
            passed,
            detail: if passed {
                format!("{:.4}% joined (threshold {:.4}%)", pct, check.threshold_pct)
            } else {
                format!(
                    "CoverageBelowThreshold: {:.4}% joined, threshold {:.4}%",
                    pct, check.threshold_pct
                )
            },
        })
    }

    /// Scan the covered date range for runs of missing calendar days longer
    /// than the tolerance.
    fn check_gaps(rows: &[Record], check: &GapCheck) -> CheckResult {
        let mut days: BTreeSet<NaiveDate> = BTreeSet::new();
        for record in rows {
            if let Some(ts) = Self::row_event_time(record) {
                days.insert(ts.date_naive());
            }
        }

        let mut gaps: Vec<String> = Vec::new();
        let mut prev: Option<NaiveDate> = None;
        for &day in &days {
            if let Some(p) = prev {
                let missing = (day - p).num_days() - 1;
                if missing > check.max_gap_days {
                    let gap_start = p.succ_opt().unwrap_or(p);
                    let gap_end = day.pred_opt().unwrap_or(day);
                    gaps.push(format!("{}..{} ({} days)", gap_start, gap_end, missing));
                }
            }
            prev = Some(day);
        }

        if gaps.is_empty() {
            CheckResult {
                name: "gap".to_string(),
                severity: check.severity,
                passed: true,
                detail: format!("{} day(s) covered, no gap above {} days", days.len(), check.max_gap_days),
            }
        } else {
            CheckResult {
                name: "gap".to_string(),
                severity: check.severity,
                passed: false,
                detail: format!("GapDetected: {}", gaps.join(", ")),
            }
        }
    }

    fn row_event_time(record: &Record) -> Option<chrono::DateTime<chrono::Utc>> {
        record.get("event_time").and_then(Value::as_timestamp)
    }
}
