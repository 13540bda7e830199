//! Fan-out of rendered notifications to channels.
//!
//! The poster is resolved once per notification and shared. Each channel delivers in
//! its own task under a timeout, so a failing, hanging or panicking channel only
//! affects its own [`DeliveryResult`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::channels::NotificationChannel;
use super::render::render;
use super::unit::{NotificationUnit, PosterRef};
use crate::Result;
use crate::domain::ImageKind;
use crate::emby::MediaSource;

/// Outcome of one channel delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    pub channel: String,
    pub success: bool,
    pub error: Option<String>,
}

impl DeliveryResult {
    fn ok(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            success: true,
            error: None,
        }
    }

    fn failed(channel: &str, error: impl Into<String>) -> Self {
        Self {
            channel: channel.to_string(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Downloads poster bytes.
pub struct PosterResolver {
    source: Arc<dyn MediaSource>,
    client: Client,
}

impl PosterResolver {
    pub fn new(source: Arc<dyn MediaSource>, client: Client) -> Self {
        Self { source, client }
    }

    /// Poster bytes, or `None` when nothing could be fetched.
    ///
    /// Non-primary item images fall back to the primary image.
    pub async fn resolve(&self, poster: &PosterRef) -> Option<Bytes> {
        match poster {
            PosterRef::Item {
                item_id,
                image,
                tag,
            } => {
                if let Some(bytes) = self.item_image(item_id, *image, tag.as_deref()).await {
                    return Some(bytes);
                }
                if *image != ImageKind::Primary {
                    return self.item_image(item_id, ImageKind::Primary, None).await;
                }
                None
            }
            PosterRef::Url(url) => self.fetch_url(url).await,
        }
    }

    async fn item_image(&self, item_id: &str, kind: ImageKind, tag: Option<&str>) -> Option<Bytes> {
        match self.source.get_image(item_id, kind, tag).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(item_id, kind = kind.as_str(), error = %e, "Failed to download poster");
                None
            }
        }
    }

    async fn fetch_url(&self, url: &str) -> Option<Bytes> {
        let response = match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(url, status = %response.status(), "Poster URL returned an error");
                return None;
            }
            Err(e) => {
                warn!(url, error = %e, "Failed to fetch poster URL");
                return None;
            }
        };
        match response.bytes().await {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => None,
            Err(e) => {
                warn!(url, error = %e, "Failed to read poster body");
                None
            }
        }
    }
}

pub struct Dispatcher {
    channels: RwLock<Vec<Arc<dyn NotificationChannel>>>,
    posters: PosterResolver,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(posters: PosterResolver, send_timeout: Duration) -> Self {
        Self {
            channels: RwLock::new(Vec::new()),
            posters,
            send_timeout,
        }
    }

    /// Swap the channel set; deliveries already running keep their snapshot.
    pub fn replace_channels(&self, channels: Vec<Arc<dyn NotificationChannel>>) {
        let enabled = channels.iter().filter(|c| c.is_enabled()).count();
        *self.channels.write() = channels;
        info!(enabled, "Notification channels updated");
    }

    /// Enabled channels.
    pub fn active_channels(&self) -> Vec<Arc<dyn NotificationChannel>> {
        self.channels
            .read()
            .iter()
            .filter(|c| c.is_enabled())
            .cloned()
            .collect()
    }

    /// The first enabled channel of `channel_type`.
    pub fn channel(&self, channel_type: &str) -> Option<Arc<dyn NotificationChannel>> {
        self.active_channels()
            .into_iter()
            .find(|c| c.channel_type() == channel_type)
    }

    /// Send `unit` to every enabled channel's default recipient.
    pub async fn broadcast(&self, unit: &NotificationUnit) -> Vec<DeliveryResult> {
        let channels = self.active_channels();
        if channels.is_empty() {
            debug!(title = %unit.title, "No enabled channels, notification dropped");
            return Vec::new();
        }

        let image = self.resolve_poster(unit).await;
        let unit = Arc::new(unit.clone());

        let deliveries = channels.into_iter().map(|channel| {
            let recipient = channel.default_recipient();
            self.spawn_delivery(channel, recipient, unit.clone(), image.clone())
        });
        let results = join_all(deliveries).await;

        for result in &results {
            match &result.error {
                None => debug!(channel = %result.channel, "Notification delivered"),
                Some(error) => warn!(channel = %result.channel, error = %error, "Notification delivery failed"),
            }
        }
        results
    }

    /// Send `unit` to one recipient on one channel.
    pub async fn reply(&self, channel_type: &str, recipient: &str, unit: &NotificationUnit) -> DeliveryResult {
        let Some(channel) = self.channel(channel_type) else {
            return DeliveryResult::failed(channel_type, "channel not configured");
        };
        let image = self.resolve_poster(unit).await;
        self.spawn_delivery(channel, recipient.to_string(), Arc::new(unit.clone()), image)
            .await
    }

    async fn resolve_poster(&self, unit: &NotificationUnit) -> Option<Bytes> {
        match &unit.poster {
            Some(poster) => self.posters.resolve(poster).await,
            None => None,
        }
    }

    async fn spawn_delivery(
        &self,
        channel: Arc<dyn NotificationChannel>,
        recipient: String,
        unit: Arc<NotificationUnit>,
        image: Option<Bytes>,
    ) -> DeliveryResult {
        let name = channel.channel_type();
        let send_timeout = self.send_timeout;
        let handle = tokio::spawn(async move {
            tokio::time::timeout(
                send_timeout,
                deliver(channel.as_ref(), &recipient, &unit, image.as_ref()),
            )
            .await
        });

        match handle.await {
            Ok(Ok(Ok(()))) => DeliveryResult::ok(name),
            Ok(Ok(Err(e))) => DeliveryResult::failed(name, e.to_string()),
            Ok(Err(_)) => DeliveryResult::failed(name, format!("timed out after {:?}", send_timeout)),
            Err(e) if e.is_panic() => DeliveryResult::failed(name, "channel panicked"),
            Err(e) => DeliveryResult::failed(name, e.to_string()),
        }
    }
}

/// Render for the channel's style and send, falling back to text when the photo fails.
async fn deliver(
    channel: &dyn NotificationChannel,
    recipient: &str,
    unit: &NotificationUnit,
    image: Option<&Bytes>,
) -> Result<()> {
    let message = render(unit, channel.style());

    if let (Some(media), Some(image)) = (&message.media, image) {
        match channel.send_photo(recipient, media, image).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_auth_failure() => return Err(e),
            Err(e) => {
                warn!(channel = channel.channel_type(), error = %e, "Photo send failed, falling back to text");
            }
        }
    }

    channel.send_text(recipient, &message.text).await
}
