//! Playback start/stop notifications.
//!
//! No batching: each webhook becomes one notification, rendered and dispatched like
//! library notifications.

mod geo;

pub use geo::{GeoLocator, IpApiLocator, LOCAL_NETWORK, UNKNOWN_LOCATION, describe_address};

use std::sync::Arc;

use chrono::Local;
use tracing::{debug, info};

use crate::config::ConfigService;
use crate::domain::{ImageKind, ItemKind, PlaybackAction, PlaybackEvent};
use crate::notification::unit::deep_link;
use crate::notification::{DeliveryResult, Dispatcher, NotificationUnit, PosterRef, UnitKind};

pub struct PlaybackNotifier {
    config: Arc<ConfigService>,
    locator: Arc<dyn GeoLocator>,
    dispatcher: Arc<Dispatcher>,
}

impl PlaybackNotifier {
    pub fn new(
        config: Arc<ConfigService>,
        locator: Arc<dyn GeoLocator>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            config,
            locator,
            dispatcher,
        }
    }

    pub async fn notify(&self, event: &PlaybackEvent) -> Vec<DeliveryResult> {
        let config = self.config.snapshot();
        if !config.features.enable_notify {
            debug!(user = %event.user_name, "Playback notifications disabled");
            return Vec::new();
        }

        let location = describe_address(self.locator.as_ref(), event.remote_address.as_deref()).await;
        let unit = playback_unit(event, &location, &config.emby.public_base());
        let results = self.dispatcher.broadcast(&unit).await;
        info!(
            user = %event.user_name,
            item = %event.item.name,
            action = ?event.action,
            delivered = results.iter().filter(|r| r.success).count(),
            "Playback notification sent"
        );
        results
    }
}

/// `"Show S01E02 Title"` for episodes, the item name otherwise.
pub fn playback_title(event: &PlaybackEvent) -> String {
    let item = &event.item;
    match item.series_name.as_deref().filter(|s| !s.is_empty()) {
        Some(series) => format!(
            "{} S{:02}E{:02} {}",
            series,
            item.season.unwrap_or(1),
            item.episode.unwrap_or(0),
            item.name
        ),
        None => item.name.clone(),
    }
}

pub fn playback_unit(event: &PlaybackEvent, location: &str, public_base: &str) -> NotificationUnit {
    let (kind, headline) = match event.action {
        PlaybackAction::Start => (UnitKind::PlaybackStart, format!("▶️ {} started playing", event.user_name)),
        PlaybackAction::Stop => (UnitKind::PlaybackStop, format!("⏹️ {} stopped playing", event.user_name)),
    };
    let media_type = match event.item.kind {
        ItemKind::Episode => "Episode",
        _ => "Movie",
    };
    let progress = event.progress_percent().unwrap_or(0.0);
    let address = event.remote_address.as_deref().unwrap_or("127.0.0.1");

    let mut unit = NotificationUnit::new(kind, headline, playback_title(event))
        .with_field("📚 Type", media_type)
        .with_field("🔄 Progress", format!("{progress:.2}%"))
        .with_field("🌐 Address", format!("{address} ({location})"))
        .with_field("📱 Device", format!("{} on {}", event.client, event.device_name))
        .with_field(
            "🕒 Time",
            event
                .occurred_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        );

    if let Some(item_id) = event.item.id.as_deref().filter(|id| !id.is_empty()) {
        unit = unit
            .with_poster(PosterRef::Item {
                item_id: item_id.to_string(),
                image: ImageKind::Backdrop,
                tag: None,
            })
            .with_deep_link(deep_link(public_base, item_id, event.server_id.as_deref()));
    }
    unit
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::Result;
    use crate::config::AppConfig;
    use crate::domain::PlaybackItem;
    use crate::notification::PosterResolver;
    use crate::test_support::{ChannelBehaviour, FakeMediaSource, RecordingChannel, SentKind, as_channels, test_client};

    struct StaticLocator;

    #[async_trait]
    impl GeoLocator for StaticLocator {
        async fn locate(&self, _ip: IpAddr) -> Result<String> {
            Ok("Canada Ontario Toronto".to_string())
        }
    }

    fn episode_event(action: PlaybackAction) -> PlaybackEvent {
        PlaybackEvent {
            action,
            user_name: "alice".to_string(),
            device_name: "Living Room".to_string(),
            client: "Emby Theater".to_string(),
            remote_address: Some("198.51.100.4".to_string()),
            item: PlaybackItem {
                id: Some("ep9".to_string()),
                name: "Hello, Ms. Cobel".to_string(),
                kind: ItemKind::Episode,
                series_name: Some("Severance".to_string()),
                season: Some(2),
                episode: Some(1),
                run_time_ticks: Some(3_000),
            },
            position_ticks: Some(1_000),
            server_id: None,
            occurred_at: Utc::now(),
        }
    }

    fn field<'a>(unit: &'a NotificationUnit, label: &str) -> &'a str {
        unit.fields
            .iter()
            .find(|f| f.label == label)
            .map(|f| f.value.as_str())
            .unwrap()
    }

    #[test]
    fn test_episode_unit() {
        let unit = playback_unit(&episode_event(PlaybackAction::Start), "Canada", "http://emby:8096");

        assert_eq!(unit.kind, UnitKind::PlaybackStart);
        assert_eq!(unit.headline, "▶️ alice started playing");
        assert_eq!(unit.title, "Severance S02E01 Hello, Ms. Cobel");
        assert_eq!(field(&unit, "📚 Type"), "Episode");
        assert_eq!(field(&unit, "🔄 Progress"), "33.33%");
        assert_eq!(field(&unit, "🌐 Address"), "198.51.100.4 (Canada)");
        assert_eq!(field(&unit, "📱 Device"), "Emby Theater on Living Room");
        assert_eq!(
            unit.poster,
            Some(PosterRef::Item {
                item_id: "ep9".to_string(),
                image: ImageKind::Backdrop,
                tag: None,
            })
        );
    }

    #[test]
    fn test_movie_stop_unit() {
        let mut event = episode_event(PlaybackAction::Stop);
        event.item.kind = ItemKind::Movie;
        event.item.series_name = None;
        event.item.name = "Dune".to_string();
        event.item.run_time_ticks = None;

        let unit = playback_unit(&event, "Canada", "http://emby:8096");

        assert_eq!(unit.headline, "⏹️ alice stopped playing");
        assert_eq!(unit.title, "Dune");
        assert_eq!(field(&unit, "📚 Type"), "Movie");
        assert_eq!(field(&unit, "🔄 Progress"), "0.00%");
    }

    fn notifier(config: AppConfig, source: Arc<FakeMediaSource>, channel: &Arc<RecordingChannel>) -> PlaybackNotifier {
        let dispatcher = Arc::new(Dispatcher::new(
            PosterResolver::new(source, test_client()),
            Duration::from_secs(60),
        ));
        dispatcher.replace_channels(as_channels(&[channel]));
        PlaybackNotifier::new(Arc::new(ConfigService::new(config)), Arc::new(StaticLocator), dispatcher)
    }

    #[tokio::test]
    async fn test_notify_uses_primary_when_backdrop_missing() {
        let source = Arc::new(FakeMediaSource::new());
        source.set_image("ep9", ImageKind::Primary, b"poster");
        let channel = RecordingChannel::new("alpha", ChannelBehaviour::Succeed);
        let notifier = notifier(AppConfig::default(), source, &channel);

        let results = notifier.notify(&episode_event(PlaybackAction::Start)).await;

        assert!(results[0].success);
        let sent = channel.sent();
        assert_eq!(sent[0].kind, SentKind::Photo);
        assert!(sent[0].text().contains("Canada Ontario Toronto"));
    }

    #[tokio::test]
    async fn test_notify_respects_feature_flag() {
        let mut config = AppConfig::default();
        config.features.enable_notify = false;
        let channel = RecordingChannel::new("alpha", ChannelBehaviour::Succeed);
        let notifier = notifier(config, Arc::new(FakeMediaSource::new()), &channel);

        assert!(notifier.notify(&episode_event(PlaybackAction::Stop)).await.is_empty());
        assert!(channel.sent().is_empty());
    }
}
