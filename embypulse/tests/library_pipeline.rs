//! End-to-end library notification flow through the running service.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use common::{RecordingChannel, service, wait_until};
use embypulse::config::AppConfig;
use embypulse::domain::{ItemKind, RawLibraryEvent};
use embypulse::notification::{NotificationChannel, RenderStyle};
use embypulse::webhook::WebhookEvent;

fn episode(id: &str, number: u32) -> RawLibraryEvent {
    RawLibraryEvent::new(id, ItemKind::Episode, format!("Episode {number}"))
        .with_series("series-s", "S")
        .with_episode(1, number)
        .with_image_tag(format!("tag-{id}"))
}

#[tokio::test(start_paused = true)]
async fn burst_of_episodes_becomes_one_notification_per_channel() {
    let (service, emby) = service(AppConfig::default());
    emby.images
        .lock()
        .insert("e4".to_string(), Bytes::from_static(b"poster"));

    let telegram = RecordingChannel::new("telegram", RenderStyle::RichClient);
    let wecom = RecordingChannel::new("wecom", RenderStyle::EnterpriseIm);
    let channels: Vec<Arc<dyn NotificationChannel>> = vec![telegram.clone(), wecom.clone()];
    service.dispatcher().replace_channels(channels);
    service.start();

    service.ingest(WebhookEvent::Library(episode("e4", 4)));
    tokio::time::sleep(Duration::from_secs(1)).await;
    service.ingest(WebhookEvent::Library(episode("e5", 5)));
    tokio::time::sleep(Duration::from_millis(900)).await;
    service.ingest(WebhookEvent::Library(episode("e6", 6)));
    // Duplicate webhook for an already queued item.
    service.ingest(WebhookEvent::Library(episode("e5", 5)));

    let delivered = wait_until(Duration::from_secs(60), || {
        !telegram.delivered().is_empty() && !wecom.delivered().is_empty()
    })
    .await;
    assert!(delivered);

    // Nothing else shows up later.
    tokio::time::sleep(Duration::from_secs(30)).await;

    for channel in [&telegram, &wecom] {
        let messages = channel.delivered();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].text().contains("S01 (E4-E6)"));
        assert!(messages[0].with_image);
        assert_eq!(messages[0].recipient, "admin");
    }

    service.stop_with_timeout(Duration::from_secs(5)).await;
}

#[tokio::test(start_paused = true)]
async fn library_notifications_respect_feature_flag() {
    let mut config = AppConfig::default();
    config.features.enable_library_notify = false;
    let (service, _emby) = service(config);

    let telegram = RecordingChannel::new("telegram", RenderStyle::RichClient);
    let channels: Vec<Arc<dyn NotificationChannel>> = vec![telegram.clone()];
    service.dispatcher().replace_channels(channels);
    service.start();

    service.ingest(WebhookEvent::Library(episode("e1", 1)));
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert!(service.queue().is_empty());
    assert!(telegram.delivered().is_empty());
    service.stop_with_timeout(Duration::from_secs(5)).await;
}
