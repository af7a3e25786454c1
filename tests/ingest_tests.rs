use tidemark::{Pipeline, PipelineError, Record, SourceSpec, StorageAdapter, Value};

fn trips_source(tie_break: Option<&str>) -> SourceSpec {
    SourceSpec {
        name: "trips".to_string(),
        raw_table: "raw_trips".to_string(),
        key_fields: vec!["trip_id".to_string()],
        event_time_field: "pickup_datetime".to_string(),
        tie_break_field: tie_break.map(str::to_string),
    }
}

fn pipeline(tie_break: Option<&str>) -> Pipeline {
    let mut p = Pipeline::new();
    p.register_source(trips_source(tie_break)).unwrap();
    p
}

fn trip(id: &str, ts: &str, fare: f64) -> Record {
    let mut r = Record::new();
    r.insert("trip_id".to_string(), Value::Text(id.to_string()));
    r.insert("pickup_datetime".to_string(), Value::Text(ts.to_string()));
    r.insert("fare".to_string(), Value::Float(fare));
    r
}

#[test]
fn test_load_inserts_then_updates() {
    let p = pipeline(None);

    let report = p
        .ingest("trips", vec![trip("a", "2025-10-01 08:00:00", 10.0)])
        .unwrap();
    assert_eq!(report.rows_inserted, 1);
    assert_eq!(report.rows_updated, 0);

    let report = p
        .ingest("trips", vec![trip("a", "2025-10-01 08:00:00", 12.0)])
        .unwrap();
    assert_eq!(report.rows_inserted, 0);
    assert_eq!(report.rows_updated, 1);
}

#[test]
fn test_replaying_a_batch_is_idempotent() {
    let p = pipeline(None);
    let batch = vec![
        trip("a", "2025-10-01 08:00:00", 10.0),
        trip("b", "2025-10-01 09:00:00", 20.0),
        trip("c", "2025-10-01 10:00:00", 30.0),
    ];

    p.ingest("trips", batch.clone()).unwrap();
    let first = p.storage().scan_with_keys("raw_trips").unwrap();

    p.ingest("trips", batch).unwrap();
    let second = p.storage().scan_with_keys("raw_trips").unwrap();

    assert_eq!(first, second);
    assert_eq!(second.len(), 3);
}

#[test]
fn test_in_batch_duplicate_tie_break_prefers_larger_field() {
    let p = pipeline(Some("fare"));

    let report = p
        .ingest(
            "trips",
            vec![
                trip("a", "2025-10-01 08:00:00", 10.0),
                trip("a", "2025-10-01 08:00:00", 25.0),
                trip("a", "2025-10-01 08:00:00", 5.0),
            ],
        )
        .unwrap();

    assert_eq!(report.rows_inserted, 1);
    assert_eq!(report.duplicates_resolved, 2);
    assert_eq!(report.errors.len(), 2);

    let row = p.storage().scan("raw_trips").unwrap().remove(0);
    assert_eq!(row["fare"], Value::Float(25.0));
}

#[test]
fn test_in_batch_duplicate_without_tie_break_keeps_first_seen() {
    let p = pipeline(None);

    p.ingest(
        "trips",
        vec![
            trip("a", "2025-10-01 08:00:00", 10.0),
            trip("a", "2025-10-01 08:00:00", 99.0),
        ],
    )
    .unwrap();

    let row = p.storage().scan("raw_trips").unwrap().remove(0);
    assert_eq!(row["fare"], Value::Float(10.0));
}

#[test]
fn test_tie_break_dedup_is_order_independent() {
    let forward = pipeline(Some("fare"));
    let reversed = pipeline(Some("fare"));

    let batch = vec![
        trip("a", "2025-10-01 08:00:00", 10.0),
        trip("a", "2025-10-01 08:00:00", 25.0),
    ];
    let mut rev = batch.clone();
    rev.reverse();

    forward.ingest("trips", batch).unwrap();
    reversed.ingest("trips", rev).unwrap();

    assert_eq!(
        forward.storage().scan("raw_trips").unwrap(),
        reversed.storage().scan("raw_trips").unwrap()
    );
}

#[test]
fn test_malformed_record_aborts_whole_batch() {
    let p = pipeline(None);

    let mut missing_key = Record::new();
    missing_key.insert(
        "pickup_datetime".to_string(),
        Value::Text("2025-10-01 08:00:00".to_string()),
    );

    let result = p.ingest(
        "trips",
        vec![trip("a", "2025-10-01 08:00:00", 10.0), missing_key],
    );

    assert!(matches!(result, Err(PipelineError::Schema { .. })));
    // Partial application is not permitted: nothing was written.
    assert_eq!(p.storage().row_count("raw_trips").unwrap(), 0);
}

#[test]
fn test_bad_event_time_aborts_whole_batch() {
    let p = pipeline(None);

    let result = p.ingest("trips", vec![trip("a", "not a timestamp", 10.0)]);
    match result {
        Err(e @ PipelineError::Schema { .. }) => {
            assert!(e.to_string().contains("source 'trips'"));
        }
        other => panic!("expected schema error, got {:?}", other),
    }
    assert_eq!(p.storage().row_count("raw_trips").unwrap(), 0);
}

#[test]
fn test_unknown_source_is_rejected() {
    let p = pipeline(None);
    let result = p.ingest("weather", vec![]);
    assert!(matches!(result, Err(PipelineError::SourceNotFound(_))));
}
