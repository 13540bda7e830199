//! Metadata enrichment: turn a group into a [`NotificationUnit`].
//!
//! Fallback order: the triggering event's own fields when it already carries an image
//! tag, then source lookups on the backoff schedule, then whatever was learned with the
//! placeholder poster. Enrichment never fails.

use std::sync::Arc;

use chrono::Local;
use tracing::{debug, error, info, warn};

use super::grouping::SeriesGroup;
use super::ranges::summarize_episodes;
use crate::Error;
use crate::domain::{ImageKind, ItemKind, RawLibraryEvent, RetryPolicy};
use crate::emby::{MediaItem, MediaSource};
use crate::notification::unit::{NotificationUnit, PosterRef, UnitKind, deep_link};

pub const MOVIE_HEADLINE: &str = "🎬 New movie";
pub const EPISODES_HEADLINE: &str = "📺 New episodes";
pub const SERIES_HEADLINE: &str = "📺 New series";

#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    pub retry: RetryPolicy,
    pub placeholder_poster_url: String,
    /// Base URL for deep links.
    pub public_base: String,
}

/// Display metadata, from an event or from a fetched record.
#[derive(Debug, Clone, Default)]
struct Meta {
    name: String,
    year: Option<i32>,
    rating: Option<f32>,
    overview: Option<String>,
    server_id: Option<String>,
    /// Fetched from the series record rather than from an episode.
    is_series_record: bool,
}

impl Meta {
    fn from_event(event: &RawLibraryEvent) -> Self {
        Self {
            name: event.name.clone(),
            year: event.year,
            rating: event.rating,
            overview: event.overview.clone(),
            server_id: event.server_id.clone(),
            is_series_record: event.kind == ItemKind::Series,
        }
    }

    fn from_record(item: &MediaItem, is_series_record: bool) -> Self {
        Self {
            name: item.name.clone(),
            year: item.production_year,
            rating: item.community_rating,
            overview: item.overview.clone(),
            server_id: item.server_id.clone(),
            is_series_record,
        }
    }

    fn bare(event: &RawLibraryEvent) -> Self {
        Self {
            name: event.name.clone(),
            server_id: event.server_id.clone(),
            is_series_record: event.kind == ItemKind::Series,
            ..Default::default()
        }
    }
}

pub struct Enricher {
    source: Arc<dyn MediaSource>,
    config: EnrichmentConfig,
}

impl Enricher {
    pub fn new(source: Arc<dyn MediaSource>, config: EnrichmentConfig) -> Self {
        Self { source, config }
    }

    pub async fn enrich(&self, group: &SeriesGroup) -> NotificationUnit {
        if let Some(trigger) = trigger_event(group)
            && let Some(tag) = trigger.image_tag.clone()
        {
            debug!(item_id = %trigger.id, "Building notification from event fields");
            let poster = PosterRef::Item {
                item_id: trigger.id.clone(),
                image: ImageKind::Primary,
                tag: Some(tag),
            };
            return self.build(group, Meta::from_event(trigger), poster);
        }

        let (lookup_id, is_series) = match group.series_id() {
            Some(series_id) => (series_id.to_string(), true),
            None => match group.events.first() {
                Some(event) => (event.id.clone(), false),
                None => return self.build(group, Meta::default(), self.placeholder()),
            },
        };

        let mut last_record: Option<MediaItem> = None;
        let attempts = self.config.retry.attempts();
        for attempt in 0..attempts {
            let delay = self.config.retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let result = if is_series {
                self.source.get_series(&lookup_id).await
            } else {
                self.source.get_item(&lookup_id).await
            };

            match result {
                Ok(item) => {
                    if let Some(tag) = item.primary_image_tag() {
                        let poster = PosterRef::Item {
                            item_id: item.id.clone(),
                            image: ImageKind::Primary,
                            tag: Some(tag.to_string()),
                        };
                        return self.build(group, Meta::from_record(&item, is_series), poster);
                    }
                    debug!(item_id = %lookup_id, attempt = attempt + 1, "Record has no primary image yet");
                    last_record = Some(item);
                }
                Err(e) => log_lookup_error(&lookup_id, attempt + 1, attempts, &e),
            }
        }

        warn!(item_id = %lookup_id, attempts, "Metadata lookups exhausted, using placeholder poster");
        let meta = match &last_record {
            Some(item) => Meta::from_record(item, is_series),
            None => primary_event(group).map(Meta::bare).unwrap_or_default(),
        };
        self.build(group, meta, self.placeholder())
    }

    fn placeholder(&self) -> PosterRef {
        PosterRef::Url(self.config.placeholder_poster_url.clone())
    }

    fn build(&self, group: &SeriesGroup, meta: Meta, poster: PosterRef) -> NotificationUnit {
        let link_id = group
            .series_id()
            .map(str::to_string)
            .or_else(|| group.events.first().map(|e| e.id.clone()))
            .unwrap_or_default();
        let server_id = meta
            .server_id
            .clone()
            .or_else(|| group.events.iter().find_map(|e| e.server_id.clone()));

        let mut unit = if group.has_episodes() {
            let series_name = series_title(group, &meta);
            let headline = if group.series_event().is_some() {
                SERIES_HEADLINE
            } else {
                EPISODES_HEADLINE
            };
            let episodes: Vec<RawLibraryEvent> = group.episodes().cloned().collect();
            let mut unit = NotificationUnit::new(
                UnitKind::Episodes,
                headline,
                format!("{} {}", series_name, summarize_episodes(&episodes)),
            );
            if let [only] = episodes.as_slice()
                && only.name != series_name
            {
                unit = unit.with_subtitle(only.name.clone());
            }
            unit
        } else if group.is_series() {
            NotificationUnit::new(UnitKind::Series, SERIES_HEADLINE, meta.name.clone())
        } else {
            NotificationUnit::new(UnitKind::Movie, MOVIE_HEADLINE, meta.name.clone())
        };

        unit.year = meta.year;
        unit.rating = meta.rating;
        unit.overview = meta.overview.filter(|o| !o.trim().is_empty());

        let added_at = group
            .events
            .iter()
            .map(|e| e.received_at)
            .min()
            .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string());
        if let Some(added_at) = added_at {
            unit = unit.with_field("🕒 Added", added_at);
        }

        if !link_id.is_empty() {
            unit = unit.with_deep_link(deep_link(
                &self.config.public_base,
                &link_id,
                server_id.as_deref(),
            ));
        }
        unit.with_poster(poster)
    }
}

/// The event whose image tag decides whether a lookup is needed.
fn trigger_event(group: &SeriesGroup) -> Option<&RawLibraryEvent> {
    let tagged = |e: &&RawLibraryEvent| e.image_tag.as_deref().is_some_and(|t| !t.is_empty());
    if group.is_series() {
        group
            .episodes()
            .find(tagged)
            .or_else(|| group.events.iter().find(tagged))
    } else {
        group.events.iter().find(tagged)
    }
}

/// The event representing the group when nothing else is known.
fn primary_event(group: &SeriesGroup) -> Option<&RawLibraryEvent> {
    group
        .series_event()
        .or_else(|| group.episodes().next())
        .or_else(|| group.events.first())
}

fn series_title(group: &SeriesGroup, meta: &Meta) -> String {
    if meta.is_series_record && !meta.name.is_empty() {
        return meta.name.clone();
    }
    group
        .series_event()
        .map(|e| e.name.clone())
        .or_else(|| {
            group
                .episodes()
                .find_map(|e| e.series_name.clone().filter(|s| !s.trim().is_empty()))
        })
        .unwrap_or_else(|| meta.name.clone())
}

fn log_lookup_error(id: &str, attempt: u32, attempts: u32, error: &Error) {
    match error {
        Error::NotFound { .. } => {
            info!(item_id = %id, attempt, attempts, "Item not indexed yet")
        }
        Error::Timeout(_) => {
            warn!(item_id = %id, attempt, attempts, error = %error, "Metadata lookup timed out")
        }
        Error::AuthFailure(_) => {
            error!(item_id = %id, attempt, attempts, error = %error, "Metadata lookup rejected")
        }
        Error::MalformedResponse(_) => {
            warn!(item_id = %id, attempt, attempts, error = %error, "Malformed metadata response")
        }
        _ => warn!(item_id = %id, attempt, attempts, error = %error, "Metadata lookup failed"),
    }
}
