//! Error types for listen statistics.
//!
//! Absence (a listener with no events, a cache miss, an entity without a
//! popularity record) is never an error; it shows up as empty results, zero
//! counts or `None` fields. Only contract violations, malformed data and
//! collaborator failures end up here.

use thiserror::Error;

/// Library error type.
#[derive(Error, Debug)]
pub enum StatsError {
    /// `top_n` must be at least 1
    #[error("Invalid top-N: {0} (must be >= 1)")]
    InvalidTopN(i64),

    /// Listener filter could not be parsed
    #[error("Invalid listener filter: {0}")]
    InvalidListenerFilter(String),

    /// A release date is present but is not a calendar date
    #[error("Malformed release date {value:?} for entity {entity_id}")]
    MalformedReleaseDate { entity_id: String, value: String },

    /// SQLite errors from the store adapter, propagated unchanged
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON encoding/decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StatsError>;
