//! Per-listener top recordings.
//!
//! The pipeline runs in explicit stages:
//!
//! 1. `count_groups`: filter by listener, build each event's `GroupKey`, count.
//!    Runs data-parallel: every rayon task folds its share of events into a
//!    partial tally map, then the partial maps are merged (the combine step).
//! 2. `partition_by_listener`: regroup the merged tallies per listener.
//! 3. `rank_groups`: competition rank by listen count, descending.
//! 4. `truncate_to_top_n`: keep at most N groups per listener.
//! 5. `sort_for_display`: ascending composite order, least played first.
//! 6. `assemble`: package one listener's result with its distinct count.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::time::Instant;

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::error::{Result, StatsError};
use crate::models::{
    AggregationStats, GroupKey, ListenEvent, ListenerFilter, RankedRecordingStat,
    RecordingCache, ReleaseCache, UserStatsResult,
};
use crate::normalize::blank_to_none;

/// Merged tallies of every group
pub type GroupCounts = FxHashMap<GroupKey, GroupTally>;

/// Groups of one listener, before ranking
pub type ListenerGroups = Vec<(GroupKey, GroupTally)>;

// ============================================================================
// Group Tally
// ============================================================================

/// Play count of one group plus its representative display text.
///
/// Events of a group only differ in the case of their text, so any of them is
/// a valid representative. The smallest original-case text is kept, which
/// makes the result independent of how events were split across partitions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupTally {
    pub listen_count: u64,
    pub track_name: String,
    pub artist_name: String,
    pub release_name: Option<String>,
}

impl GroupTally {
    fn from_event(event: &ListenEvent) -> Self {
        Self {
            listen_count: 1,
            track_name: event.recording_name.clone(),
            artist_name: event.artist_name.clone(),
            release_name: blank_to_none(event.release_name.as_deref()),
        }
    }

    fn merge(&mut self, other: GroupTally) {
        self.listen_count += other.listen_count;
        if other.track_name < self.track_name {
            self.track_name = other.track_name;
        }
        if other.artist_name < self.artist_name {
            self.artist_name = other.artist_name;
        }
        // Same lower-cased release name on both sides, so both are Some or both None
        if other.release_name < self.release_name {
            self.release_name = other.release_name;
        }
    }

    fn into_stat(self, key: GroupKey) -> RankedRecordingStat {
        RankedRecordingStat {
            listen_count: self.listen_count,
            track_name: self.track_name,
            recording_id: key.recording_id,
            artist_name: self.artist_name,
            artist_credit_ids: key.artist_credit_ids.unwrap_or_default(),
            release_name: self.release_name,
            release_id: key.release_id,
            artist_ids: key.artist_ids,
            caa_id: key.caa_id,
            caa_release_id: key.caa_release_id,
            rank: 0,
        }
    }
}

/// Partial result of one partition of the event stream.
#[derive(Default, Debug)]
pub struct PartitionTally {
    pub groups: GroupCounts,
    pub events_read: usize,
    pub events_filtered_out: usize,
}

impl PartitionTally {
    fn add(&mut self, key: GroupKey, tally: GroupTally) {
        match self.groups.get_mut(&key) {
            Some(existing) => existing.merge(tally),
            None => {
                self.groups.insert(key, tally);
            }
        }
    }

    fn combine(mut self, other: PartitionTally) -> PartitionTally {
        // Fold the smaller map into the larger one
        let (mut into, from) = if self.groups.len() >= other.groups.len() {
            (std::mem::take(&mut self.groups), other.groups)
        } else {
            (other.groups, std::mem::take(&mut self.groups))
        };
        for (key, tally) in from {
            match into.get_mut(&key) {
                Some(existing) => existing.merge(tally),
                None => {
                    into.insert(key, tally);
                }
            }
        }
        PartitionTally {
            groups: into,
            events_read: self.events_read + other.events_read,
            events_filtered_out: self.events_filtered_out + other.events_filtered_out,
        }
    }
}

// ============================================================================
// Stages
// ============================================================================

/// Reject a non-positive top-N before any work is done.
pub fn validate_top_n(top_n: i64) -> Result<usize> {
    if top_n < 1 {
        return Err(StatsError::InvalidTopN(top_n));
    }
    usize::try_from(top_n).map_err(|_| StatsError::InvalidTopN(top_n))
}

/// Filter, normalize and count events into groups.
pub fn count_groups<I>(
    events: I,
    filter: &ListenerFilter,
    recording_cache: &RecordingCache,
    release_cache: &ReleaseCache,
) -> PartitionTally
where
    I: IntoParallelIterator,
    I::Item: Borrow<ListenEvent>,
{
    events
        .into_par_iter()
        .fold(PartitionTally::default, |mut part, event| {
            let event = event.borrow();
            part.events_read += 1;
            if !filter.allows(event.listener_id) {
                part.events_filtered_out += 1;
                return part;
            }
            let key = GroupKey::from_event(event, recording_cache, release_cache);
            part.add(key, GroupTally::from_event(event));
            part
        })
        .reduce(PartitionTally::default, PartitionTally::combine)
}

/// Regroup merged tallies per listener, ordered by listener id.
pub fn partition_by_listener(groups: GroupCounts) -> BTreeMap<i64, ListenerGroups> {
    let mut partitions: BTreeMap<i64, ListenerGroups> = BTreeMap::new();
    for (key, tally) in groups {
        partitions.entry(key.listener_id).or_default().push((key, tally));
    }
    partitions
}

/// Rank one listener's groups by listen count, highest first.
///
/// `rank` is 1 + the number of groups with a strictly greater count, so
/// equal counts share a rank. The returned order is count descending, then
/// the display key ascending; ties are never split by the rank itself.
pub fn rank_groups(groups: ListenerGroups) -> Vec<RankedRecordingStat> {
    let mut stats: Vec<RankedRecordingStat> = groups
        .into_iter()
        .map(|(key, tally)| tally.into_stat(key))
        .collect();

    stats.sort_by(|a, b| b.listen_count.cmp(&a.listen_count).then_with(|| a.cmp(b)));

    let mut rank = 0u64;
    let mut previous: Option<u64> = None;
    for (idx, stat) in stats.iter_mut().enumerate() {
        if previous != Some(stat.listen_count) {
            rank = idx as u64 + 1;
            previous = Some(stat.listen_count);
        }
        stat.rank = rank;
    }
    stats
}

/// Keep at most `top_n` groups of a ranked listing (as returned by `rank_groups`).
///
/// Only groups with `rank <= top_n` qualify. When a tie straddles the cut,
/// the groups listed first are kept.
pub fn truncate_to_top_n(
    mut ranked: Vec<RankedRecordingStat>,
    top_n: usize,
) -> Vec<RankedRecordingStat> {
    ranked.retain(|stat| stat.rank <= top_n as u64);
    ranked.truncate(top_n);
    ranked
}

/// Sort into display order: ascending by listen count, then every remaining
/// field. Least played first; callers reverse for most played first.
pub fn sort_for_display(stats: &mut [RankedRecordingStat]) {
    stats.sort();
}

/// Build the result of one listener from its groups.
pub fn assemble(listener_id: i64, groups: ListenerGroups, top_n: usize) -> UserStatsResult {
    let distinct_recording_count = groups.len() as u64;
    let mut top_recordings = truncate_to_top_n(rank_groups(groups), top_n);
    sort_for_display(&mut top_recordings);
    UserStatsResult {
        listener_id,
        distinct_recording_count,
        top_recordings,
    }
}

// ============================================================================
// Entry Points
// ============================================================================

/// Results of an aggregation run, produced one listener at a time.
///
/// Listeners come out in ascending id order; that order is incidental.
pub struct UserStatsIter {
    partitions: std::collections::btree_map::IntoIter<i64, ListenerGroups>,
    top_n: usize,
    stats: AggregationStats,
}

impl UserStatsIter {
    /// Counts gathered while grouping. `recordings_kept` and
    /// `elapsed_seconds` are left for the consumer to fill in.
    pub fn stats(&self) -> &AggregationStats {
        &self.stats
    }

    /// Rank every listener in parallel instead of one by one.
    pub fn into_par_iter(self) -> impl IndexedParallelIterator<Item = UserStatsResult> {
        let top_n = self.top_n;
        self.partitions
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(move |(listener_id, groups)| assemble(listener_id, groups, top_n))
    }
}

impl Iterator for UserStatsIter {
    type Item = UserStatsResult;

    fn next(&mut self) -> Option<UserStatsResult> {
        self.partitions
            .next()
            .map(|(listener_id, groups)| assemble(listener_id, groups, self.top_n))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.partitions.size_hint()
    }
}

impl ExactSizeIterator for UserStatsIter {}

/// Compute the top `top_n` recordings of every listener present in `events`
/// (restricted to `filter` unless it is empty).
///
/// `top_n` is validated before any event is read. Grouping and counting run
/// here; ranking happens as the returned iterator is consumed.
pub fn compute_user_top_recordings<I>(
    events: I,
    filter: &ListenerFilter,
    recording_cache: &RecordingCache,
    release_cache: &ReleaseCache,
    top_n: i64,
) -> Result<UserStatsIter>
where
    I: IntoParallelIterator,
    I::Item: Borrow<ListenEvent>,
{
    let top_n = validate_top_n(top_n)?;
    let tally = count_groups(events, filter, recording_cache, release_cache);

    let mut stats = AggregationStats {
        events_read: tally.events_read,
        events_filtered_out: tally.events_filtered_out,
        groups: tally.groups.len(),
        top_n,
        ..Default::default()
    };
    for key in tally.groups.keys() {
        if key.artist_ids.is_some() {
            stats.recording_cache_hits += 1;
        }
        if key.caa_id.is_some() || key.caa_release_id.is_some() {
            stats.release_cache_hits += 1;
        }
    }
    debug!(
        events = stats.events_read,
        filtered_out = stats.events_filtered_out,
        groups = stats.groups,
        "counted listen groups"
    );

    let partitions = partition_by_listener(tally.groups);
    stats.listeners = partitions.len();
    Ok(UserStatsIter {
        partitions: partitions.into_iter(),
        top_n,
        stats,
    })
}

/// Like `compute_user_top_recordings`, ranking listeners in parallel and
/// returning the completed run statistics.
pub fn compute_with_stats<I>(
    events: I,
    filter: &ListenerFilter,
    recording_cache: &RecordingCache,
    release_cache: &ReleaseCache,
    top_n: i64,
) -> Result<(Vec<UserStatsResult>, AggregationStats)>
where
    I: IntoParallelIterator,
    I::Item: Borrow<ListenEvent>,
{
    let start = Instant::now();
    let iter = compute_user_top_recordings(events, filter, recording_cache, release_cache, top_n)?;
    let mut stats = iter.stats().clone();
    let results: Vec<UserStatsResult> = iter.into_par_iter().collect();

    stats.recordings_kept = results.iter().map(|r| r.top_recordings.len()).sum();
    stats.elapsed_seconds = start.elapsed().as_secs_f64();
    info!(
        listeners = stats.listeners,
        groups = stats.groups,
        kept = stats.recordings_kept,
        "computed top recordings"
    );
    Ok((results, stats))
}

// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CoverArt;
    use proptest::prelude::*;

    fn listen(listener_id: i64, name: &str, recording_id: Option<&str>) -> ListenEvent {
        ListenEvent {
            listener_id,
            recording_name: name.to_string(),
            recording_id: recording_id.map(str::to_string),
            artist_name: "Artist".to_string(),
            artist_credit_ids: None,
            release_name: None,
            release_id: None,
        }
    }

    fn run(events: &[ListenEvent], filter: &ListenerFilter, top_n: i64) -> Vec<UserStatsResult> {
        compute_user_top_recordings(
            events,
            filter,
            &RecordingCache::default(),
            &ReleaseCache::default(),
            top_n,
        )
        .unwrap()
        .collect()
    }

    #[test]
    fn test_two_plays_beat_one() {
        let events = vec![
            listen(7, "X", Some("x")),
            listen(7, "X", Some("x")),
            listen(7, "Y", Some("y")),
        ];
        let results = run(&events, &ListenerFilter::all(), 1);
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.listener_id, 7);
        assert_eq!(result.distinct_recording_count, 2);
        assert_eq!(result.top_recordings.len(), 1);
        assert_eq!(result.top_recordings[0].track_name, "X");
        assert_eq!(result.top_recordings[0].listen_count, 2);
        assert_eq!(result.top_recordings[0].rank, 1);
    }

    #[test]
    fn test_sorted_least_played_first() {
        let events = vec![
            listen(1, "A", Some("a")),
            listen(1, "B", Some("b")),
            listen(1, "B", Some("b")),
            listen(1, "C", Some("c")),
            listen(1, "C", Some("c")),
            listen(1, "C", Some("c")),
        ];
        let results = run(&events, &ListenerFilter::all(), 10);
        let counts: Vec<u64> = results[0].top_recordings.iter().map(|r| r.listen_count).collect();
        assert_eq!(counts, vec![1, 2, 3]);
        let ranks: Vec<u64> = results[0].top_recordings.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![3, 2, 1]);
    }

    #[test]
    fn test_ties_share_rank() {
        let events = vec![
            listen(1, "A", Some("a")),
            listen(1, "A", Some("a")),
            listen(1, "B", Some("b")),
            listen(1, "B", Some("b")),
            listen(1, "C", Some("c")),
        ];
        let results = run(&events, &ListenerFilter::all(), 10);
        let top = &results[0].top_recordings;
        assert_eq!(top[0].track_name, "C");
        assert_eq!(top[0].rank, 3);
        assert_eq!(top[1].rank, 1);
        assert_eq!(top[2].rank, 1);
    }

    #[test]
    fn test_tie_at_cut_respects_bound() {
        let events = vec![
            listen(1, "B", Some("b")),
            listen(1, "A", Some("a")),
            listen(1, "C", Some("c")),
        ];
        let results = run(&events, &ListenerFilter::all(), 2);
        let top = &results[0].top_recordings;
        assert_eq!(results[0].distinct_recording_count, 3);
        assert_eq!(top.len(), 2);
        assert!(top.iter().all(|r| r.rank == 1));
        // Cut keeps the first groups by display key
        assert_eq!(top[0].track_name, "A");
        assert_eq!(top[1].track_name, "B");
    }

    #[test]
    fn test_case_variants_collapse() {
        let events = vec![
            listen(1, "Everlong", Some("rec")),
            listen(1, "EVERLONG", Some("rec")),
            listen(1, "everlong", Some("rec")),
        ];
        let results = run(&events, &ListenerFilter::all(), 5);
        let top = &results[0].top_recordings;
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].listen_count, 3);
        // Smallest original-case text represents the group
        assert_eq!(top[0].track_name, "EVERLONG");
    }

    #[test]
    fn test_null_and_real_recording_id_stay_apart() {
        let events = vec![
            listen(1, "Song", None),
            listen(1, "Song", Some("")),
            listen(1, "Song", Some("rec-1")),
        ];
        let results = run(&events, &ListenerFilter::all(), 5);
        assert_eq!(results[0].distinct_recording_count, 2);
        let top = &results[0].top_recordings;
        assert_eq!(top[0].recording_id.as_deref(), Some("rec-1"));
        assert_eq!(top[0].listen_count, 1);
        assert_eq!(top[1].recording_id, None);
        assert_eq!(top[1].listen_count, 2);
    }

    #[test]
    fn test_filter_keeps_only_requested_listeners() {
        let events = vec![
            listen(1, "A", Some("a")),
            listen(2, "A", Some("a")),
            listen(3, "B", Some("b")),
        ];
        let results = run(&events, &ListenerFilter::only([2]), 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].listener_id, 2);

        let results = run(&events, &ListenerFilter::only([99]), 5);
        assert!(results.is_empty());
    }

    #[test]
    fn test_empty_input() {
        assert!(run(&[], &ListenerFilter::all(), 5).is_empty());
    }

    #[test]
    fn test_invalid_top_n_rejected() {
        for bad in [0, -1] {
            let err = compute_user_top_recordings(
                Vec::<ListenEvent>::new(),
                &ListenerFilter::all(),
                &RecordingCache::default(),
                &ReleaseCache::default(),
                bad,
            )
            .err()
            .unwrap();
            assert!(matches!(err, StatsError::InvalidTopN(n) if n == bad));
        }
    }

    #[test]
    fn test_enrichment_from_caches() {
        let mut recordings = RecordingCache::default();
        recordings.insert("rec".to_string(), vec!["art-1".to_string(), "art-2".to_string()]);
        let mut releases = ReleaseCache::default();
        releases.insert(
            "rel".to_string(),
            CoverArt {
                caa_id: Some(9),
                caa_release_id: Some("rel-caa".to_string()),
            },
        );
        let mut event = listen(1, "Song", Some("rec"));
        event.release_id = Some("rel".to_string());
        event.release_name = Some("Album".to_string());
        event.artist_credit_ids = Some(vec!["credit".to_string()]);

        let (results, stats) =
            compute_with_stats(vec![event], &ListenerFilter::all(), &recordings, &releases, 3)
                .unwrap();
        let stat = &results[0].top_recordings[0];
        assert_eq!(stat.artist_ids, Some(vec!["art-1".to_string(), "art-2".to_string()]));
        assert_eq!(stat.caa_id, Some(9));
        assert_eq!(stat.caa_release_id.as_deref(), Some("rel-caa"));
        assert_eq!(stat.artist_credit_ids, vec!["credit".to_string()]);
        assert_eq!(stat.release_name.as_deref(), Some("Album"));
        assert_eq!(stats.recording_cache_hits, 1);
        assert_eq!(stats.release_cache_hits, 1);
    }

    #[test]
    fn test_missing_credit_ids_default_to_empty() {
        let results = run(&[listen(1, "Song", None)], &ListenerFilter::all(), 1);
        assert!(results[0].top_recordings[0].artist_credit_ids.is_empty());
    }

    #[test]
    fn test_stats_counts() {
        let events = vec![
            listen(1, "A", Some("a")),
            listen(1, "A", Some("a")),
            listen(2, "B", Some("b")),
            listen(3, "C", Some("c")),
        ];
        let (results, stats) = compute_with_stats(
            &events,
            &ListenerFilter::only([1, 2]),
            &RecordingCache::default(),
            &ReleaseCache::default(),
            5,
        )
        .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(stats.events_read, 4);
        assert_eq!(stats.events_filtered_out, 1);
        assert_eq!(stats.groups, 2);
        assert_eq!(stats.listeners, 2);
        assert_eq!(stats.recordings_kept, 2);
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let events: Vec<ListenEvent> = (0..500)
            .map(|i| listen(i % 7, &format!("Song {}", i % 13), Some(format!("r{}", i % 13).as_str())))
            .collect();
        let sequential = run(&events, &ListenerFilter::all(), 4);
        let (parallel, _) = compute_with_stats(
            &events,
            &ListenerFilter::all(),
            &RecordingCache::default(),
            &ReleaseCache::default(),
            4,
        )
        .unwrap();
        assert_eq!(sequential, parallel);
    }

    fn arb_events() -> impl Strategy<Value = Vec<ListenEvent>> {
        proptest::collection::vec((0i64..4, 0usize..12, any::<bool>()), 0..200).prop_map(|raw| {
            raw.into_iter()
                .map(|(listener, song, shout)| {
                    let name = format!("Song {}", song);
                    let name = if shout { name.to_uppercase() } else { name };
                    listen(listener, &name, Some(format!("rec-{}", song % 9).as_str()))
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn ranks_follow_counts(events in arb_events(), top_n in 1i64..8) {
            for result in run(&events, &ListenerFilter::all(), top_n) {
                let top = &result.top_recordings;
                prop_assert!(top.len() <= top_n as usize);
                prop_assert!(result.distinct_recording_count >= top.len() as u64);
                for pair in top.windows(2) {
                    prop_assert!(pair[0].listen_count <= pair[1].listen_count);
                    prop_assert!(pair[0].rank >= pair[1].rank);
                    if pair[0].listen_count == pair[1].listen_count {
                        prop_assert_eq!(pair[0].rank, pair[1].rank);
                    }
                }
            }
        }

        #[test]
        fn grouping_is_repeatable(events in arb_events()) {
            let first = run(&events, &ListenerFilter::all(), 3);
            let second = run(&events, &ListenerFilter::all(), 3);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn listen_counts_add_up(events in arb_events()) {
            let total: u64 = run(&events, &ListenerFilter::all(), i64::MAX)
                .iter()
                .flat_map(|r| r.top_recordings.iter().map(|s| s.listen_count))
                .sum();
            prop_assert_eq!(total, events.len() as u64);
        }
    }
}
