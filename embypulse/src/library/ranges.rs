//! Episode range compression.

use std::collections::BTreeMap;
use std::fmt;

use crate::domain::RawLibraryEvent;

/// A run of consecutive episode numbers within one season.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeRange {
    pub season: u32,
    pub start: u32,
    pub end: u32,
}

impl fmt::Display for EpisodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "E{}", self.start)
        } else {
            write!(f, "E{}-E{}", self.start, self.end)
        }
    }
}

/// Compress episode numbers into disjoint ranges. Input order and duplicates don't matter.
pub fn compress(season: u32, indices: &[u32]) -> Vec<EpisodeRange> {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut ranges: Vec<EpisodeRange> = Vec::new();
    for index in sorted {
        match ranges.last_mut() {
            Some(open) if open.end.checked_add(1) == Some(index) => open.end = index,
            _ => ranges.push(EpisodeRange {
                season,
                start: index,
                end: index,
            }),
        }
    }
    ranges
}

/// `"E1-E3, E7, E9-E10"`.
pub fn format_ranges(ranges: &[EpisodeRange]) -> String {
    ranges
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Per-season summary such as `"S01 (E4-E6) · S02 (E1)"`.
///
/// Episodes without a season number count as season 1. When no event carries an
/// episode number the summary falls back to a plain count.
pub fn summarize_episodes(events: &[RawLibraryEvent]) -> String {
    let mut seasons: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    let mut episode_count = 0usize;

    for event in events.iter().filter(|e| e.is_episode()) {
        episode_count += 1;
        if let Some(episode) = event.episode {
            seasons
                .entry(event.season.unwrap_or(1))
                .or_default()
                .push(episode);
        }
    }

    if seasons.is_empty() {
        return count_label(episode_count);
    }

    seasons
        .into_iter()
        .map(|(season, indices)| {
            format!("S{:02} ({})", season, format_ranges(&compress(season, &indices)))
        })
        .collect::<Vec<_>>()
        .join(" · ")
}

fn count_label(count: usize) -> String {
    if count == 1 {
        "1 episode".to_string()
    } else {
        format!("{count} episodes")
    }
}
