//! Popularity ranking of entities for display.
//!
//! Merges pre-aggregated popularity counts into entity metadata by id and
//! orders the result by listen count, then release date, both descending.

use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::error::{Result, StatsError};
use crate::models::{
    Medium, PopularityRecord, RankableEntity, RankedEntity, POPULARITY_COUNT_KEYS,
};

/// Release date format of entity metadata
pub const RELEASE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Popularity counts by entity id. The first record wins on duplicate ids.
pub fn popularity_index(records: &[PopularityRecord]) -> FxHashMap<&str, &PopularityRecord> {
    let mut index = FxHashMap::default();
    for record in records {
        index.entry(record.entity_id.as_str()).or_insert(record);
    }
    index
}

/// Parse an entity's release date.
///
/// A missing date is `Ok(None)`. A date that is present but malformed is an
/// error; it is never defaulted.
pub fn parse_release_date(entity_id: &str, value: Option<&str>) -> Result<Option<NaiveDate>> {
    let Some(value) = value else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(value, RELEASE_DATE_FORMAT)
        .map(Some)
        .map_err(|_| {
            warn!(entity_id, value, "rejecting malformed release date");
            StatsError::MalformedReleaseDate {
                entity_id: entity_id.to_string(),
                value: value.to_string(),
            }
        })
}

/// Sort key of a ranked entity: listen count, then release date.
/// A missing date sorts as the earliest representable date.
pub fn release_group_sort_key(entity: &RankedEntity) -> Result<(i64, NaiveDate)> {
    let date = parse_release_date(&entity.entity.entity_id, entity.entity.release_date.as_deref())?;
    Ok((entity.total_listen_count, date.unwrap_or(NaiveDate::MIN)))
}

/// Merge popularity into `entities` and sort them most popular first.
///
/// Entities without a popularity record get zero counts. Count keys already
/// present in an entity's attributes are replaced by the merged ones. Every release date
/// is validated before anything is returned. Entities tied on both keys keep
/// their input order.
pub fn rank_entities_by_popularity(
    entities: Vec<RankableEntity>,
    popularity: &[PopularityRecord],
) -> Result<Vec<RankedEntity>> {
    let index = popularity_index(popularity);

    let mut keyed: Vec<((i64, NaiveDate), RankedEntity)> = Vec::with_capacity(entities.len());
    for mut entity in entities {
        for key in POPULARITY_COUNT_KEYS {
            entity.attributes.remove(key);
        }
        let counts = index.get(entity.entity_id.as_str());
        let ranked = RankedEntity {
            total_listen_count: counts.and_then(|c| c.total_listen_count).unwrap_or(0),
            total_listener_count: counts.and_then(|c| c.total_listener_count).unwrap_or(0),
            entity,
        };
        let key = release_group_sort_key(&ranked)?;
        keyed.push((key, ranked));
    }

    // Stable sort, descending on both keys
    keyed.sort_by(|a, b| b.0.cmp(&a.0));

    debug!(
        entities = keyed.len(),
        with_popularity = index.len(),
        "ranked entities by popularity"
    );
    Ok(keyed.into_iter().map(|(_, ranked)| ranked).collect())
}

/// Most popular entity of a ranked sequence, `None` when there are none.
pub fn top_entity(ranked: &[RankedEntity]) -> Option<&RankedEntity> {
    ranked.first()
}

/// Fill in per-track popularity on an album's mediums.
///
/// Tracks missing from `popularity` keep `None` counts.
pub fn attach_track_popularity(mediums: &mut [Medium], popularity: &[PopularityRecord]) {
    let index = popularity_index(popularity);
    for track in mediums.iter_mut().flat_map(|m| m.tracks.iter_mut()) {
        let counts = index.get(track.recording_id.as_str());
        track.total_listen_count = counts.and_then(|c| c.total_listen_count);
        track.total_listener_count = counts.and_then(|c| c.total_listener_count);
    }
}

// ============================================================================
