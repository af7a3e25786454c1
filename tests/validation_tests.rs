use chrono::{Duration, TimeZone, Utc};
use tidemark::{
    CoverageCheck, FactModel, GapCheck, ModelSpec, Pipeline, Record, Severity, SourceSpec,
    StorageAdapter, TargetSpec, ValidationConfig, Value, VolumeCheck,
};

fn pipeline_with(config: ValidationConfig) -> Pipeline {
    let mut p = Pipeline::new();
    p.register_source(SourceSpec {
        name: "trips".to_string(),
        raw_table: "raw_trips".to_string(),
        key_fields: vec!["trip_id".to_string()],
        event_time_field: "pickup_datetime".to_string(),
        tie_break_field: None,
    })
    .unwrap();
    p.register_target(
        TargetSpec {
            name: "fact_trips".to_string(),
            derived_table: "fact_trips".to_string(),
            source_table: "raw_trips".to_string(),
            event_time_field: "pickup_datetime".to_string(),
            model: ModelSpec::Fact(FactModel {
                key_fields: vec!["trip_id".to_string()],
                copy_fields: vec!["station".to_string()],
            }),
        },
        config,
    )
    .unwrap();
    p
}

/// Seed derived rows directly; validation only reads the derived table.
fn seed_derived(p: &Pipeline, rows: Vec<(String, Record)>) {
    p.storage().upsert_rows("fact_trips", rows).unwrap();
}

fn derived_row(ts: chrono::DateTime<Utc>, station: Option<&str>) -> Record {
    let mut r = Record::new();
    r.insert("event_time".to_string(), Value::Timestamp(ts));
    r.insert(
        "station".to_string(),
        match station {
            Some(s) => Value::Text(s.to_string()),
            None => Value::Null,
        },
    );
    r
}

#[test]
fn test_low_volume_month_fails_volume_check() {
    let p = pipeline_with(ValidationConfig {
        volume: Some(VolumeCheck {
            min_rows_per_month: 100_000,
            severity: Severity::Warn,
        }),
        ..Default::default()
    });

    // 40,000 rows in October against a 100,000 minimum.
    let base = Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap();
    let rows: Vec<(String, Record)> = (0..40_000)
        .map(|i| {
            (
                format!("row-{}", i),
                derived_row(base + Duration::minutes(i % (30 * 24 * 60)), Some("x")),
            )
        })
        .collect();
    seed_derived(&p, rows);

    let report = p.validate("fact_trips").unwrap();
    let volume = report.checks.iter().find(|c| c.name == "volume").unwrap();
    assert!(!volume.passed);
    assert!(volume.detail.contains("LowVolumeWarning"));
    assert!(volume.detail.contains("2025-10"));
    // Warn severity: the report as a whole still passes.
    assert!(report.passed());
}

#[test]
fn test_volume_check_passes_when_every_month_is_full() {
    let p = pipeline_with(ValidationConfig {
        volume: Some(VolumeCheck {
            min_rows_per_month: 2,
            severity: Severity::Error,
        }),
        ..Default::default()
    });

    let oct = Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap();
    seed_derived(
        &p,
        vec![
            ("a".to_string(), derived_row(oct, Some("x"))),
            ("b".to_string(), derived_row(oct + Duration::days(1), Some("x"))),
            ("c".to_string(), derived_row(oct + Duration::days(2), Some("x"))),
        ],
    );

    let report = p.validate("fact_trips").unwrap();
    assert!(report.checks.iter().all(|c| c.passed));
    assert!(report.passed());
}

#[test]
fn test_empty_table_fails_volume_check() {
    let p = pipeline_with(ValidationConfig {
        volume: Some(VolumeCheck {
            min_rows_per_month: 1000,
            severity: Severity::Error,
        }),
        ..Default::default()
    });

    let report = p.validate("fact_trips").unwrap();
    assert!(!report.passed());
}

#[test]
fn test_coverage_below_threshold_is_flagged() {
    let mut p = pipeline_with(ValidationConfig {
        coverage: Some(CoverageCheck {
            dimension_field: "station".to_string(),
            reference_table: "dim_stations".to_string(),
            threshold_pct: 99.99,
            severity: Severity::Error,
        }),
        ..Default::default()
    });

    let mut station = Record::new();
    station.insert("name".to_string(), Value::Text("Central".to_string()));
    p.upsert_reference("dim_stations", vec![("x".to_string(), station)])
        .unwrap();

    let ts = Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap();
    seed_derived(
        &p,
        vec![
            ("a".to_string(), derived_row(ts, Some("x"))),
            ("b".to_string(), derived_row(ts, Some("x"))),
            ("c".to_string(), derived_row(ts, Some("x"))),
            // Unknown station: does not join the reference dimension.
            ("d".to_string(), derived_row(ts, Some("zz"))),
        ],
    );

    let report = p.validate("fact_trips").unwrap();
    let coverage = report.checks.iter().find(|c| c.name == "coverage").unwrap();
    assert!(!coverage.passed);
    assert!(coverage.detail.contains("CoverageBelowThreshold"));
    assert!(!report.passed());
}

#[test]
fn test_null_dimension_counts_as_unjoined() {
    let mut p = pipeline_with(ValidationConfig {
        coverage: Some(CoverageCheck {
            dimension_field: "station".to_string(),
            reference_table: "dim_stations".to_string(),
            threshold_pct: 50.0,
            severity: Severity::Error,
        }),
        ..Default::default()
    });

    let mut station = Record::new();
    station.insert("name".to_string(), Value::Text("Central".to_string()));
    p.upsert_reference("dim_stations", vec![("x".to_string(), station)])
        .unwrap();

    let ts = Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap();
    seed_derived(
        &p,
        vec![
            ("a".to_string(), derived_row(ts, Some("x"))),
            ("b".to_string(), derived_row(ts, None)),
        ],
    );

    let report = p.validate("fact_trips").unwrap();
    let coverage = report.checks.iter().find(|c| c.name == "coverage").unwrap();
    // Exactly 50%: meets the threshold.
    assert!(coverage.passed);
}

#[test]
fn test_gap_detection_reports_run_of_missing_days() {
    let p = pipeline_with(ValidationConfig {
        gap: Some(GapCheck {
            max_gap_days: 3,
            severity: Severity::Error,
        }),
        ..Default::default()
    });

    // Oct 1-3 present, Oct 4-9 missing (6 days), Oct 10-11 present.
    let mut rows = Vec::new();
    for day in [1, 2, 3, 10, 11] {
        let ts = Utc.with_ymd_and_hms(2025, 10, day, 12, 0, 0).unwrap();
        rows.push((format!("d{}", day), derived_row(ts, Some("x"))));
    }
    seed_derived(&p, rows);

    let report = p.validate("fact_trips").unwrap();
    let gap = report.checks.iter().find(|c| c.name == "gap").unwrap();
    assert!(!gap.passed);
    assert!(gap.detail.contains("GapDetected"));
    assert!(gap.detail.contains("2025-10-04..2025-10-09"));
}

#[test]
fn test_gap_within_tolerance_passes() {
    let p = pipeline_with(ValidationConfig {
        gap: Some(GapCheck {
            max_gap_days: 3,
            severity: Severity::Error,
        }),
        ..Default::default()
    });

    // A 2-day hole is inside the 3-day tolerance.
    let mut rows = Vec::new();
    for day in [1, 2, 5, 6] {
        let ts = Utc.with_ymd_and_hms(2025, 10, day, 12, 0, 0).unwrap();
        rows.push((format!("d{}", day), derived_row(ts, Some("x"))));
    }
    seed_derived(&p, rows);

    let report = p.validate("fact_trips").unwrap();
    assert!(report.passed());
}

#[test]
fn test_validation_does_not_mutate_state() {
    let p = pipeline_with(ValidationConfig {
        volume: Some(VolumeCheck {
            min_rows_per_month: 10,
            severity: Severity::Error,
        }),
        ..Default::default()
    });

    let ts = Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap();
    seed_derived(&p, vec![("a".to_string(), derived_row(ts, Some("x")))]);
    let before = p.storage().scan_with_keys("fact_trips").unwrap();

    // A failing validation leaves the committed derived table untouched.
    let report = p.validate("fact_trips").unwrap();
    assert!(!report.passed());
    assert_eq!(p.storage().scan_with_keys("fact_trips").unwrap(), before);
}
