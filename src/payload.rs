//! Entity page payloads.
//!
//! Composes ranked release groups, cover art candidates and listening stats
//! for artist and album pages. Metadata lookups, image rendering and HTTP
//! errors belong to the caller; this module only shapes the data.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{AlbumRecordings, Medium, PopularityRecord, RankableEntity, RankedEntity};
use crate::ranking::{attach_track_popularity, rank_entities_by_popularity, top_entity};

/// Release group eligible for an artist's cover art grid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverArtCandidate {
    #[serde(rename = "entity_mbid")]
    pub entity_id: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub caa_id: i64,
    #[serde(rename = "caa_release_mbid")]
    pub caa_release_id: Option<String>,
}

/// Listener of an entity and how often they played it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopListener {
    pub user_name: String,
    pub listen_count: i64,
}

/// All-time listening stats of an entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListeningStats {
    pub total_listen_count: i64,
    pub listeners: Vec<TopListener>,
}

impl ListeningStats {
    /// Stats of an entity nobody has listened to yet
    pub fn empty() -> Self {
        Self {
            total_listen_count: 0,
            listeners: Vec::new(),
        }
    }

    pub fn or_empty(stats: Option<ListeningStats>) -> Self {
        stats.unwrap_or_else(Self::empty)
    }
}

/// Cover art candidates in ranked order: every release group carrying a
/// non-null `caa_id` attribute.
pub fn cover_art_candidates(release_groups: &[RankedEntity]) -> Vec<CoverArtCandidate> {
    release_groups
        .iter()
        .filter_map(|rg| {
            let entity = &rg.entity;
            let caa_id = entity.attributes.get("caa_id")?.as_i64()?;
            Some(CoverArtCandidate {
                entity_id: entity.entity_id.clone(),
                title: entity.attribute_str("name").map(str::to_string),
                artist: entity.attribute_str("artist_credit_name").map(str::to_string),
                caa_id,
                caa_release_id: entity
                    .attribute_str("caa_release_mbid")
                    .or_else(|| entity.attribute_str("caa_release_id"))
                    .map(str::to_string),
            })
        })
        .collect()
}

/// Data behind an artist page.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtistPayload {
    pub artist: serde_json::Value,
    pub release_groups: Vec<RankedEntity>,
    pub top_release_group: Option<RankedEntity>,
    pub cover_art: Vec<CoverArtCandidate>,
    pub listening_stats: ListeningStats,
}

impl ArtistPayload {
    pub fn compose(
        artist: serde_json::Value,
        release_groups: Vec<RankableEntity>,
        popularity: &[PopularityRecord],
        listening_stats: Option<ListeningStats>,
    ) -> Result<Self> {
        let release_groups = rank_entities_by_popularity(release_groups, popularity)?;
        Ok(Self {
            artist,
            top_release_group: top_entity(&release_groups).cloned(),
            cover_art: cover_art_candidates(&release_groups),
            release_groups,
            listening_stats: ListeningStats::or_empty(listening_stats),
        })
    }
}

/// Data behind an album (release group) page.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlbumPayload {
    #[serde(rename = "release_group_mbid")]
    pub release_group_id: String,
    pub release_group_metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(rename = "recordings_release_mbid")]
    pub recordings_release_id: Option<String>,
    pub mediums: Vec<Medium>,
    pub caa_id: Option<i64>,
    #[serde(rename = "caa_release_mbid")]
    pub caa_release_id: Option<String>,
    #[serde(rename = "type")]
    pub release_group_type: Option<String>,
    pub listening_stats: ListeningStats,
}

/// Cover art and type fields live on the nested `release_group` object of
/// the metadata; flat metadata is read as a fallback.
fn release_group_field<'a>(
    metadata: &'a serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Option<&'a serde_json::Value> {
    metadata
        .get("release_group")
        .and_then(|rg| rg.get(key))
        .or_else(|| metadata.get(key))
        .filter(|v| !v.is_null())
}

impl AlbumPayload {
    pub fn compose(
        release_group_id: impl Into<String>,
        metadata: serde_json::Map<String, serde_json::Value>,
        recordings: AlbumRecordings,
        popularity: &[PopularityRecord],
        listening_stats: Option<ListeningStats>,
    ) -> Self {
        let AlbumRecordings {
            release_id: recordings_release_id,
            mut mediums,
        } = recordings;
        attach_track_popularity(&mut mediums, popularity);

        let caa_id = release_group_field(&metadata, "caa_id").and_then(|v| v.as_i64());
        let caa_release_id = release_group_field(&metadata, "caa_release_mbid")
            .or_else(|| release_group_field(&metadata, "caa_release_id"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let release_group_type = release_group_field(&metadata, "type")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Self {
            release_group_id: release_group_id.into(),
            release_group_metadata: metadata,
            recordings_release_id,
            mediums,
            caa_id,
            caa_release_id,
            release_group_type,
            listening_stats: ListeningStats::or_empty(listening_stats),
        }
    }
}
