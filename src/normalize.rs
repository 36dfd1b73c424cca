//! Grouping-key normalization for listen events.
//!
//! Text that a listener's player supplied (recording, artist and release
//! names) is compared case-insensitively. Identifiers are compared exactly,
//! except that a blank identifier is the same as a missing one.

use crate::models::{GroupKey, ListenEvent, RecordingCache, ReleaseCache};

/// Coerce a blank string to `None`. Only `""` is blank; whitespace is kept.
pub fn blank_to_none(value: Option<&str>) -> Option<String> {
    match value {
        None | Some("") => None,
        Some(v) => Some(v.to_string()),
    }
}

/// Case folding used for every text component of a group key.
pub fn fold_case(s: &str) -> String {
    s.to_lowercase()
}

impl GroupKey {
    /// Build the recording identity of an event, resolving the contributing
    /// artists and cover art through the reference caches. A missing or
    /// blank identifier never matches a cache entry.
    pub fn from_event(
        event: &ListenEvent,
        recording_cache: &RecordingCache,
        release_cache: &ReleaseCache,
    ) -> Self {
        let recording_id = blank_to_none(event.recording_id.as_deref());
        let release_id = blank_to_none(event.release_id.as_deref());
        let release_name = blank_to_none(event.release_name.as_deref());

        let artist_ids = recording_id
            .as_ref()
            .and_then(|id| recording_cache.get(id))
            .cloned();
        let cover_art = release_id.as_ref().and_then(|id| release_cache.get(id));

        GroupKey {
            listener_id: event.listener_id,
            recording_name: fold_case(&event.recording_name),
            recording_id,
            artist_name: fold_case(&event.artist_name),
            artist_credit_ids: event.artist_credit_ids.clone(),
            release_name: release_name.as_deref().map(fold_case),
            release_id,
            artist_ids,
            caa_id: cover_art.and_then(|c| c.caa_id),
            caa_release_id: cover_art.and_then(|c| c.caa_release_id.clone()),
        }
    }
}

// ============================================================================
