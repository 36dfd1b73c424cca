use listen_stats::aggregate::compute_with_stats;
use listen_stats::models::ListenerFilter;
use listen_stats::store;
use rusqlite::{params, Connection};
use tempfile::TempDir;

fn seed_source(conn: &Connection) {
    conn.execute_batch(
        "CREATE TABLE listens (
            user_id INTEGER NOT NULL,
            recording_name TEXT NOT NULL,
            recording_mbid TEXT,
            artist_name TEXT NOT NULL,
            artist_credit_mbids TEXT,
            release_name TEXT,
            release_mbid TEXT
        );
        CREATE TABLE recording_cache (
            recording_mbid TEXT PRIMARY KEY,
            artists TEXT NOT NULL
        );
        CREATE TABLE release_cache (
            release_mbid TEXT PRIMARY KEY,
            caa_id INTEGER,
            caa_release_mbid TEXT
        );",
    )
    .unwrap();

    let listens: &[(i64, &str, &str, Option<&str>, &str, &str)] = &[
        (7, "Everlong", "rec-x", Some(r#"["ff"]"#), "The Colour and the Shape", "rel-1"),
        (7, "EVERLONG", "rec-x", Some(r#"["ff"]"#), "The Colour and the Shape", "rel-1"),
        (7, "Monkey Wrench", "rec-y", Some(r#"["ff"]"#), "", ""),
        (8, "Everlong", "rec-x", None, "The Colour and the Shape", "rel-1"),
        (9, "Unknown Song", "", None, "", ""),
    ];
    for (user, name, rec, credits, release, rel) in listens {
        conn.execute(
            "INSERT INTO listens VALUES (?1, ?2, ?3, 'Foo Fighters', ?4, ?5, ?6)",
            params![user, name, rec, credits, release, rel],
        )
        .unwrap();
    }
    conn.execute(
        "INSERT INTO recording_cache VALUES ('rec-x', '[\"artist-ff\"]')",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO release_cache VALUES ('rel-1', 123, 'rel-1-caa')",
        [],
    )
    .unwrap();
}

#[test]
fn aggregates_and_round_trips_through_sqlite() {
    let dir = TempDir::new().unwrap();
    let source_path = dir.path().join("listens.sqlite3");
    let output_path = dir.path().join("listen-stats.sqlite3");

    seed_source(&Connection::open(&source_path).unwrap());

    let source = store::open_source(&source_path).unwrap();
    let recording_cache = store::read_recording_cache(&source).unwrap();
    let release_cache = store::read_release_cache(&source).unwrap();
    let filter = ListenerFilter::parse("7,8").unwrap();
    assert_eq!(store::count_listens(&source, &filter).unwrap(), 4);
    let events = store::read_listens(&source, &filter).unwrap();
    assert_eq!(events.len(), 4);

    let (results, stats) =
        compute_with_stats(&events, &filter, &recording_cache, &release_cache, 1).unwrap();
    assert_eq!(stats.listeners, 2);
    assert_eq!(stats.events_filtered_out, 0);

    let mut output = Connection::open(&output_path).unwrap();
    store::create_output_schema(&output).unwrap();
    assert_eq!(store::write_results(&mut output, results.clone()).unwrap(), 2);

    let listener_7 = store::read_result(&output, 7).unwrap().unwrap();
    assert_eq!(listener_7, results[0]);
    assert_eq!(listener_7.distinct_recording_count, 2);
    assert_eq!(listener_7.top_recordings.len(), 1);

    let top = &listener_7.top_recordings[0];
    assert_eq!(top.listen_count, 2);
    assert_eq!(top.track_name, "EVERLONG");
    assert_eq!(top.recording_id.as_deref(), Some("rec-x"));
    assert_eq!(top.artist_credit_ids, vec!["ff".to_string()]);
    assert_eq!(top.artist_ids, Some(vec!["artist-ff".to_string()]));
    assert_eq!(top.caa_id, Some(123));
    assert_eq!(top.caa_release_id.as_deref(), Some("rel-1-caa"));

    // Listener 9 was filtered out before reading
    assert!(store::read_result(&output, 9).unwrap().is_none());
}

#[test]
fn blank_identifiers_read_as_null() {
    let dir = TempDir::new().unwrap();
    let source_path = dir.path().join("listens.sqlite3");
    seed_source(&Connection::open(&source_path).unwrap());

    let source = store::open_source(&source_path).unwrap();
    let events = store::read_listens(&source, &ListenerFilter::only([9])).unwrap();
    let (results, _) = compute_with_stats(
        &events,
        &ListenerFilter::all(),
        &Default::default(),
        &Default::default(),
        10,
    )
    .unwrap();

    let stat = &results[0].top_recordings[0];
    assert_eq!(stat.recording_id, None);
    assert_eq!(stat.release_id, None);
    assert_eq!(stat.release_name, None);
    assert!(stat.artist_credit_ids.is_empty());
}
