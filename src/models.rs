//! Core data models for listen statistics.
//!
//! This module contains the input event and reference cache types, the
//! ranked outputs of both pipelines, and run instrumentation.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StatsError};

// ============================================================================
// Reference Caches
// ============================================================================

/// Recording id -> contributing artist ids
pub type RecordingCache = FxHashMap<String, Vec<String>>;

/// Release id -> cover art identifiers
pub type ReleaseCache = FxHashMap<String, CoverArt>;

/// Cover art identifiers for a release. Either side may be unknown.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverArt {
    pub caa_id: Option<i64>,
    pub caa_release_id: Option<String>,
}

// ============================================================================
// Listen Events
// ============================================================================

/// One recorded play of a track by a listener. Never mutated once read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenEvent {
    pub listener_id: i64,
    pub recording_name: String,
    pub recording_id: Option<String>, // "" is treated as None
    pub artist_name: String,
    pub artist_credit_ids: Option<Vec<String>>,
    pub release_name: Option<String>, // "" is treated as None
    pub release_id: Option<String>,   // "" is treated as None
}

/// Recording identity of a listen event.
///
/// Text fields are lower-cased so case variants collapse; identifiers are
/// compared exactly, so a null and a non-null `recording_id` never collapse.
/// The reference cache lookups are part of the key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub listener_id: i64,
    pub recording_name: String,
    pub recording_id: Option<String>,
    pub artist_name: String,
    pub artist_credit_ids: Option<Vec<String>>,
    pub release_name: Option<String>,
    pub release_id: Option<String>,
    pub artist_ids: Option<Vec<String>>,
    pub caa_id: Option<i64>,
    pub caa_release_id: Option<String>,
}

// ============================================================================
// Listener Filter
// ============================================================================

/// Set of listener ids to restrict an aggregation run to.
/// An empty filter means every listener.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListenerFilter {
    ids: FxHashSet<i64>,
}

impl ListenerFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Parse a comma-separated list of listener ids, e.g. `"1, 7,42"`.
    /// A blank string yields the empty filter.
    pub fn parse(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Ok(Self::all());
        }
        let mut ids = FxHashSet::default();
        for part in s.split(',') {
            let part = part.trim();
            let id: i64 = part.parse().map_err(|_| {
                StatsError::InvalidListenerFilter(format!(
                    "'{}' is not a listener id (in {:?})",
                    part, s
                ))
            })?;
            ids.insert(id);
        }
        Ok(Self { ids })
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn allows(&self, listener_id: i64) -> bool {
        self.ids.is_empty() || self.ids.contains(&listener_id)
    }

    /// Ids in ascending order (stable SQL parameter order)
    pub fn sorted_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.ids.iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}

// ============================================================================
// Aggregation Output
// ============================================================================

/// One ranked recording group for a listener.
///
/// Field order is the display sort order: the derived `Ord` compares
/// `listen_count` first, then every following field, `rank` last.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RankedRecordingStat {
    pub listen_count: u64,
    pub track_name: String,
    pub recording_id: Option<String>,
    pub artist_name: String,
    pub artist_credit_ids: Vec<String>, // empty when the events carried none
    pub release_name: Option<String>,
    pub release_id: Option<String>,
    pub artist_ids: Option<Vec<String>>,
    pub caa_id: Option<i64>,
    pub caa_release_id: Option<String>,
    pub rank: u64,
}

/// Top recordings of one listener.
///
/// `top_recordings` is sorted least-played first; reverse it for a
/// most-played-first display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatsResult {
    pub listener_id: i64,
    pub distinct_recording_count: u64, // over all groups, not just the kept ones
    pub top_recordings: Vec<RankedRecordingStat>,
}

// ============================================================================
// Entity Ranking Models
// ============================================================================

/// Pre-aggregated popularity of one entity. Null counts read as zero when ranking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopularityRecord {
    #[serde(alias = "mbid", alias = "release_group_mbid", alias = "recording_mbid")]
    pub entity_id: String,
    pub total_listen_count: Option<i64>,
    #[serde(alias = "total_user_count")]
    pub total_listener_count: Option<i64>,
}

/// An entity to rank (typically a release group of one artist).
/// Display attributes ride along untouched and keys keep their metadata names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankableEntity {
    #[serde(rename = "mbid", alias = "entity_id")]
    pub entity_id: String,
    #[serde(default, rename = "date", alias = "release_date")]
    pub release_date: Option<String>, // ISO calendar date, YYYY-MM-DD
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl RankableEntity {
    pub fn new(entity_id: impl Into<String>, release_date: Option<&str>) -> Self {
        Self {
            entity_id: entity_id.into(),
            release_date: release_date.map(str::to_string),
            attributes: serde_json::Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: serde_json::Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

/// Keys the merged popularity counts are written under
pub const POPULARITY_COUNT_KEYS: [&str; 3] =
    ["total_listen_count", "total_user_count", "total_listener_count"];

/// An entity with its merged popularity counts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankedEntity {
    #[serde(flatten)]
    pub entity: RankableEntity,
    pub total_listen_count: i64,
    #[serde(rename = "total_user_count", alias = "total_listener_count")]
    pub total_listener_count: i64,
}

/// One track of an album medium, with optional popularity.
///
/// Counts stay `None` when the popularity store knows nothing about the
/// recording, so a page can tell "unknown" from zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlbumTrack {
    #[serde(rename = "recording_mbid", alias = "recording_id")]
    pub recording_id: String,
    #[serde(default)]
    pub total_listen_count: Option<i64>,
    #[serde(default, rename = "total_user_count", alias = "total_listener_count")]
    pub total_listener_count: Option<i64>,
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// A medium (disc) of an album
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Medium {
    pub tracks: Vec<AlbumTrack>,
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// Recording data of an album: the release its tracklist comes from and
/// the mediums of that release.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AlbumRecordings {
    #[serde(default, rename = "release_mbid", alias = "release_id")]
    pub release_id: Option<String>,
    #[serde(default)]
    pub mediums: Vec<Medium>,
}

// ============================================================================
// Statistics (Instrumentation)
// ============================================================================

/// Per-run aggregation statistics.
#[derive(Default, Debug, Clone, Serialize)]
pub struct AggregationStats {
    pub events_read: usize,
    pub events_filtered_out: usize,
    pub groups: usize,
    pub listeners: usize,
    pub recordings_kept: usize,
    pub recording_cache_hits: usize,
    pub release_cache_hits: usize,
    pub top_n: usize,
    pub elapsed_seconds: f64,
}

impl AggregationStats {
    /// Share of groups that survived the top-N cut, as a percentage
    pub fn kept_rate(&self) -> f64 {
        if self.groups == 0 {
            0.0
        } else {
            100.0 * self.recordings_kept as f64 / self.groups as f64
        }
    }

    /// Log stats in JSON format
    pub fn log_phase(&self, phase: &str) {
        if let Ok(json) = serde_json::to_string(self) {
            tracing::info!(phase, stats = %json, "aggregation stats");
        }
    }

    /// Write stats to a JSON file
    pub fn write_to_file(&self, path: &std::path::Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
