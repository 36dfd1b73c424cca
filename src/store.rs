//! SQLite adapter for the `listen-stats` binary.
//!
//! ## Source schema
//!
//! ```sql
//! CREATE TABLE listens (
//!     user_id             INTEGER NOT NULL,
//!     recording_name      TEXT NOT NULL,
//!     recording_mbid      TEXT,
//!     artist_name         TEXT NOT NULL,
//!     artist_credit_mbids TEXT,            -- JSON array of ids
//!     release_name        TEXT,
//!     release_mbid        TEXT
//! );
//! CREATE TABLE recording_cache (
//!     recording_mbid TEXT PRIMARY KEY,
//!     artists        TEXT NOT NULL         -- JSON array of artist ids
//! );
//! CREATE TABLE release_cache (
//!     release_mbid     TEXT PRIMARY KEY,
//!     caa_id           INTEGER,
//!     caa_release_mbid TEXT
//! );
//! ```
//!
//! Output is one `user_recording_stats` row per listener with the ranked
//! recordings stored as JSON.

use std::path::Path;

use rusqlite::{params, params_from_iter, Connection};

use crate::error::Result;
use crate::models::{
    CoverArt, ListenEvent, ListenerFilter, RecordingCache, ReleaseCache, UserStatsResult,
};
use crate::progress::{create_progress_bar, log_progress, Phase};

/// Rows per output transaction
pub const WRITE_BATCH_SIZE: usize = 10_000;

const LISTEN_COLUMNS: &str = "user_id, recording_name, recording_mbid, artist_name, \
     artist_credit_mbids, release_name, release_mbid";

/// Open a source database read-mostly with large caches.
pub fn open_source(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA mmap_size = 8589934592;
         PRAGMA cache_size = -1000000;
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(conn)
}

fn where_clause(filter: &ListenerFilter) -> String {
    if filter.is_empty() {
        String::new()
    } else {
        let placeholders = vec!["?"; filter.len()].join(", ");
        format!(" WHERE user_id IN ({})", placeholders)
    }
}

fn decode_id_list(json: Option<String>) -> Result<Option<Vec<String>>> {
    match json {
        None => Ok(None),
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
    }
}

/// Number of listens the filter admits
pub fn count_listens(conn: &Connection, filter: &ListenerFilter) -> Result<u64> {
    let sql = format!("SELECT COUNT(*) FROM listens{}", where_clause(filter));
    let count: i64 = conn.query_row(&sql, params_from_iter(filter.sorted_ids()), |row| row.get(0))?;
    Ok(count as u64)
}

/// Read the listens of the filtered listeners.
pub fn read_listens(conn: &Connection, filter: &ListenerFilter) -> Result<Vec<ListenEvent>> {
    let count = count_listens(conn, filter)?;
    let pb = create_progress_bar(count, Phase::ReadListens);

    let sql = format!("SELECT {} FROM listens{}", LISTEN_COLUMNS, where_clause(filter));
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(filter.sorted_ids()))?;

    let mut events = Vec::with_capacity(count as usize);
    while let Some(row) = rows.next()? {
        let artist_credit_ids: Option<String> = row.get(4)?;
        events.push(ListenEvent {
            listener_id: row.get(0)?,
            recording_name: row.get(1)?,
            recording_id: row.get(2)?,
            artist_name: row.get(3)?,
            artist_credit_ids: decode_id_list(artist_credit_ids)?,
            release_name: row.get(5)?,
            release_id: row.get(6)?,
        });
        log_progress(&pb, Phase::ReadListens, events.len() as u64, count);
    }

    pb.finish_with_message(Phase::ReadListens.done_message(format!("Read {} listens", events.len())));
    Ok(events)
}

/// Load the recording -> artists reference cache.
pub fn read_recording_cache(conn: &Connection) -> Result<RecordingCache> {
    let mut stmt = conn.prepare("SELECT recording_mbid, artists FROM recording_cache")?;
    let mut rows = stmt.query([])?;
    let mut cache = RecordingCache::default();
    while let Some(row) = rows.next()? {
        let recording_id: String = row.get(0)?;
        let artists: String = row.get(1)?;
        cache.insert(recording_id, serde_json::from_str(&artists)?);
    }
    Ok(cache)
}

/// Load the release -> cover art reference cache.
pub fn read_release_cache(conn: &Connection) -> Result<ReleaseCache> {
    let mut stmt = conn.prepare("SELECT release_mbid, caa_id, caa_release_mbid FROM release_cache")?;
    let mut rows = stmt.query([])?;
    let mut cache = ReleaseCache::default();
    while let Some(row) = rows.next()? {
        cache.insert(
            row.get(0)?,
            CoverArt {
                caa_id: row.get(1)?,
                caa_release_id: row.get(2)?,
            },
        );
    }
    Ok(cache)
}

/// Create the output table.
pub fn create_output_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA cache_size = -64000;
        PRAGMA temp_store = MEMORY;

        CREATE TABLE user_recording_stats (
            user_id INTEGER PRIMARY KEY,
            recordings_count INTEGER NOT NULL,
            recordings TEXT NOT NULL
        );",
    )?;
    Ok(())
}

/// Write results in batched transactions as they arrive. Returns the row count.
pub fn write_results<I>(conn: &mut Connection, results: I) -> Result<usize>
where
    I: IntoIterator<Item = UserStatsResult>,
{
    let mut written = 0;
    let mut batch: Vec<UserStatsResult> = Vec::with_capacity(WRITE_BATCH_SIZE);
    for result in results {
        batch.push(result);
        if batch.len() == WRITE_BATCH_SIZE {
            written += write_batch(conn, &batch)?;
            batch.clear();
        }
    }
    written += write_batch(conn, &batch)?;
    Ok(written)
}

fn write_batch(conn: &mut Connection, batch: &[UserStatsResult]) -> Result<usize> {
    if batch.is_empty() {
        return Ok(0);
    }
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO user_recording_stats (user_id, recordings_count, recordings)
             VALUES (?1, ?2, ?3)",
        )?;
        for result in batch {
            stmt.execute(params![
                result.listener_id,
                result.distinct_recording_count as i64,
                serde_json::to_string(&result.top_recordings)?,
            ])?;
        }
    }
    tx.commit()?;
    Ok(batch.len())
}

/// Read one listener's stored result, `None` when absent.
pub fn read_result(conn: &Connection, listener_id: i64) -> Result<Option<UserStatsResult>> {
    let mut stmt = conn.prepare(
        "SELECT recordings_count, recordings FROM user_recording_stats WHERE user_id = ?1",
    )?;
    let mut rows = stmt.query([listener_id])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let count: i64 = row.get(0)?;
    let recordings: String = row.get(1)?;
    Ok(Some(UserStatsResult {
        listener_id,
        distinct_recording_count: count as u64,
        top_recordings: serde_json::from_str(&recordings)?,
    }))
}
