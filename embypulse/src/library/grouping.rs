//! Grouping of a drained batch into per-series and per-item groups.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::domain::{ItemKind, RawLibraryEvent};
use crate::emby::MediaSource;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    /// Everything attributed to one series.
    Series(String),
    /// A movie or an episode without a series id.
    Item(String),
}

/// Events that become one notification.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesGroup {
    pub key: GroupKey,
    pub events: Vec<RawLibraryEvent>,
}

impl SeriesGroup {
    pub fn is_series(&self) -> bool {
        matches!(self.key, GroupKey::Series(_))
    }

    pub fn series_id(&self) -> Option<&str> {
        match &self.key {
            GroupKey::Series(id) => Some(id),
            GroupKey::Item(_) => None,
        }
    }

    pub fn episodes(&self) -> impl Iterator<Item = &RawLibraryEvent> {
        self.events.iter().filter(|e| e.is_episode())
    }

    pub fn has_episodes(&self) -> bool {
        self.episodes().next().is_some()
    }

    /// The series-level event, if the batch carried one.
    pub fn series_event(&self) -> Option<&RawLibraryEvent> {
        self.events.iter().find(|e| e.kind == ItemKind::Series)
    }

    /// A series group made of series events only, with no episode detail.
    pub fn is_singleton_series(&self) -> bool {
        self.is_series() && !self.has_episodes()
    }
}

fn key_for(event: &RawLibraryEvent) -> GroupKey {
    match event.kind {
        ItemKind::Series => GroupKey::Series(event.id.clone()),
        ItemKind::Episode | ItemKind::Season => match event.series_id.as_deref() {
            Some(series_id) if !series_id.is_empty() => GroupKey::Series(series_id.to_string()),
            _ => GroupKey::Item(event.id.clone()),
        },
        ItemKind::Movie | ItemKind::Other => GroupKey::Item(event.id.clone()),
    }
}

/// Partition `events` into groups, ordered by first appearance.
pub fn group_events(events: Vec<RawLibraryEvent>) -> Vec<SeriesGroup> {
    let mut groups: Vec<SeriesGroup> = Vec::new();
    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    let mut seen: HashSet<String> = HashSet::new();

    for event in events {
        if !seen.insert(event.id.clone()) {
            continue;
        }
        let key = key_for(&event);
        match index.get(&key) {
            Some(&i) => groups[i].events.push(event),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(SeriesGroup {
                    key,
                    events: vec![event],
                });
            }
        }
    }
    groups
}

/// Length of the leading run of `timestamps` whose neighbours are at most `gap` apart.
///
/// The first entry always counts. The run ends at the first gap wider than `gap`, or at
/// an entry without a timestamp.
pub fn cluster_len(timestamps: &[Option<DateTime<Utc>>], gap: Duration) -> usize {
    if timestamps.is_empty() {
        return 0;
    }
    let mut len = 1;
    for pair in timestamps.windows(2) {
        match (pair[0], pair[1]) {
            (Some(prev), Some(cur)) if (prev - cur).abs() <= gap => len += 1,
            _ => break,
        }
    }
    len
}

/// Recovers episode detail for series groups that arrived without any.
pub struct Reconciler {
    source: Arc<dyn MediaSource>,
    cluster_gap: Duration,
    episode_limit: u32,
}

impl Reconciler {
    pub fn new(source: Arc<dyn MediaSource>, cluster_gap: Duration, episode_limit: u32) -> Self {
        Self {
            source,
            cluster_gap,
            episode_limit,
        }
    }

    /// Append the most recent import cluster to every singleton series group.
    pub async fn reconcile(&self, groups: &mut [SeriesGroup]) {
        let mut seen: HashSet<String> = groups
            .iter()
            .flat_map(|g| g.events.iter().map(|e| e.id.clone()))
            .collect();

        for group in groups.iter_mut().filter(|g| g.is_singleton_series()) {
            let Some(series_id) = group.series_id().map(str::to_string) else {
                continue;
            };

            let episodes = match self
                .source
                .list_recent_episodes(&series_id, self.episode_limit)
                .await
            {
                Ok(episodes) => episodes,
                Err(e) => {
                    warn!(series_id = %series_id, error = %e, kind = e.kind(), "Episode lookup failed, keeping series-only group");
                    continue;
                }
            };

            let timestamps: Vec<_> = episodes.iter().map(|e| e.date_created).collect();
            let len = cluster_len(&timestamps, self.cluster_gap);
            let series_name = group
                .series_event()
                .map(|e| e.name.clone());
            let now = Utc::now();

            let mut recovered = 0;
            for item in episodes.into_iter().take(len) {
                if !seen.insert(item.id.clone()) {
                    continue;
                }
                let mut event = item.to_library_event(now);
                event.kind = ItemKind::Episode;
                if event.series_id.is_none() {
                    event.series_id = Some(series_id.clone());
                }
                if event.series_name.is_none() {
                    event.series_name = series_name.clone();
                }
                group.events.push(event);
                recovered += 1;
            }
            debug!(series_id = %series_id, recovered, "Reconciled series group");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emby::MediaItem;
    use crate::test_support::FakeMediaSource;

    fn episode(id: &str, series: &str) -> RawLibraryEvent {
        RawLibraryEvent::new(id, ItemKind::Episode, id).with_series(series, "Show")
    }

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0)
    }

    #[test]
    fn test_episode_and_series_event_merge() {
        let groups = group_events(vec![
            episode("e1", "s1"),
            RawLibraryEvent::new("s1", ItemKind::Series, "Show"),
            RawLibraryEvent::new("m1", ItemKind::Movie, "Film"),
            episode("e2", "s1"),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, GroupKey::Series("s1".to_string()));
        assert_eq!(groups[0].events.len(), 3);
        assert!(!groups[0].is_singleton_series());
        assert_eq!(groups[1].key, GroupKey::Item("m1".to_string()));
    }

    #[test]
    fn test_orphan_episode_and_duplicates() {
        let orphan = RawLibraryEvent::new("e9", ItemKind::Episode, "Orphan");
        let groups = group_events(vec![orphan.clone(), orphan, episode("e1", "s1"), episode("e1", "s1")]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, GroupKey::Item("e9".to_string()));
        assert_eq!(groups[0].events.len(), 1);
        assert_eq!(groups[1].events.len(), 1);
    }

    #[test]
    fn test_cluster_boundaries() {
        let gap = Duration::seconds(60);
        assert_eq!(cluster_len(&[at(0), at(-30), at(-90)], gap), 2);
        assert_eq!(cluster_len(&[at(0), at(-59)], gap), 2);
        assert_eq!(cluster_len(&[at(0), at(-60)], gap), 2);
        assert_eq!(cluster_len(&[at(0), at(-61)], gap), 1);
        assert_eq!(cluster_len(&[at(0), at(-60), at(-121)], gap), 2);
        assert_eq!(cluster_len(&[], gap), 0);
    }

    #[test]
    fn test_cluster_stops_at_missing_timestamp() {
        let gap = Duration::seconds(60);
        assert_eq!(cluster_len(&[at(0), None, at(-1)], gap), 1);
        assert_eq!(cluster_len(&[None, at(0)], gap), 1);
    }

    fn recent(id: &str, secs: i64, number: u32) -> MediaItem {
        MediaItem {
            id: id.to_string(),
            name: format!("Episode {number}"),
            item_type: "Episode".to_string(),
            parent_index_number: Some(1),
            index_number: Some(number),
            date_created: at(secs),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_reconcile_recovers_import_cluster() {
        let source = Arc::new(FakeMediaSource::new());
        source.set_episodes(
            "s1",
            vec![recent("e3", 0, 3), recent("e2", -20, 2), recent("e1", -3600, 1)],
        );
        let reconciler = Reconciler::new(source.clone(), Duration::seconds(60), 50);

        let mut groups = group_events(vec![RawLibraryEvent::new("s1", ItemKind::Series, "Show")]);
        reconciler.reconcile(&mut groups).await;

        let ids: Vec<_> = groups[0].events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "e3", "e2"]);
        assert!(groups[0].episodes().all(|e| e.series_name.as_deref() == Some("Show")));
    }

    #[tokio::test]
    async fn test_reconcile_series_with_season_event() {
        let source = Arc::new(FakeMediaSource::new());
        source.set_episodes("s1", vec![recent("e2", 0, 2), recent("e1", -10, 1)]);
        let reconciler = Reconciler::new(source.clone(), Duration::seconds(60), 50);

        let season = RawLibraryEvent::new("se2", ItemKind::Season, "Season 2").with_series("s1", "Show");
        let mut groups = group_events(vec![RawLibraryEvent::new("s1", ItemKind::Series, "Show"), season]);
        assert_eq!(groups.len(), 1);
        assert!(!groups[0].has_episodes());
        assert!(groups[0].is_singleton_series());

        reconciler.reconcile(&mut groups).await;

        assert_eq!(source.episode_calls(), 1);
        let ids: Vec<_> = groups[0].episodes().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e2", "e1"]);
    }

    #[tokio::test]
    async fn test_reconcile_lookup_failure_keeps_group() {
        let source = Arc::new(FakeMediaSource::new());
        source.fail_lookups();
        let reconciler = Reconciler::new(source, Duration::seconds(60), 50);

        let mut groups = group_events(vec![RawLibraryEvent::new("s1", ItemKind::Series, "Show")]);
        reconciler.reconcile(&mut groups).await;
        assert_eq!(groups[0].events.len(), 1);
        assert!(groups[0].is_singleton_series());
    }

    #[tokio::test]
    async fn test_reconcile_skips_groups_with_episodes() {
        let source = Arc::new(FakeMediaSource::new());
        source.set_episodes("s1", vec![recent("e7", 0, 7)]);
        let reconciler = Reconciler::new(source.clone(), Duration::seconds(60), 50);

        let mut groups = group_events(vec![episode("e1", "s1")]);
        reconciler.reconcile(&mut groups).await;
        assert_eq!(groups[0].events.len(), 1);
        assert_eq!(source.episode_calls(), 0);
    }
}
