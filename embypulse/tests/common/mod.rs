//! Fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use embypulse::config::{AppConfig, ConfigService};
use embypulse::domain::ImageKind;
use embypulse::emby::{MediaItem, MediaSource, ServerQueries, SessionInfo, SystemInfo, UserInfo};
use embypulse::notification::{MessageBody, NotificationChannel, RenderStyle};
use embypulse::playback::GeoLocator;
use embypulse::service::{PulseService, ServiceDeps};
use embypulse::{Error, Result};

#[derive(Default)]
pub struct FakeEmby {
    pub items: Mutex<HashMap<String, MediaItem>>,
    pub images: Mutex<HashMap<String, Bytes>>,
}

#[async_trait]
impl MediaSource for FakeEmby {
    async fn get_item(&self, id: &str) -> Result<MediaItem> {
        self.items
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("Item", id))
    }

    async fn get_series(&self, id: &str) -> Result<MediaItem> {
        self.get_item(id).await
    }

    async fn list_recent_episodes(&self, _series_id: &str, _limit: u32) -> Result<Vec<MediaItem>> {
        Ok(Vec::new())
    }

    async fn get_image(&self, item_id: &str, _kind: ImageKind, _tag: Option<&str>) -> Result<Option<Bytes>> {
        Ok(self.images.lock().get(item_id).cloned())
    }
}

#[async_trait]
impl ServerQueries for FakeEmby {
    async fn search(&self, _keyword: &str, _limit: u32) -> Result<Vec<MediaItem>> {
        Ok(Vec::new())
    }

    async fn latest_items(&self, _limit: u32) -> Result<Vec<MediaItem>> {
        Ok(Vec::new())
    }

    async fn now_playing(&self) -> Result<Vec<SessionInfo>> {
        Ok(Vec::new())
    }

    async fn system_info(&self) -> Result<SystemInfo> {
        Ok(SystemInfo::default())
    }

    async fn list_users(&self) -> Result<Vec<UserInfo>> {
        Ok(Vec::new())
    }

    async fn disable_user(&self, _user_id: &str) -> Result<()> {
        Ok(())
    }
}

pub struct NoLocator;

#[async_trait]
impl GeoLocator for NoLocator {
    async fn locate(&self, _ip: IpAddr) -> Result<String> {
        Err(Error::Other("offline".to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct Delivered {
    pub recipient: String,
    pub body: MessageBody,
    pub with_image: bool,
}

impl Delivered {
    pub fn text(&self) -> String {
        match &self.body {
            MessageBody::Rich { text, .. } => text.clone(),
            MessageBody::Card {
                title, description, ..
            } => format!("{title}\n{description}"),
            MessageBody::Markdown { content } => content.clone(),
        }
    }
}

pub struct RecordingChannel {
    name: &'static str,
    style: RenderStyle,
    pub delivered: Mutex<Vec<Delivered>>,
}

impl RecordingChannel {
    pub fn new(name: &'static str, style: RenderStyle) -> Arc<Self> {
        Arc::new(Self {
            name,
            style,
            delivered: Mutex::new(Vec::new()),
        })
    }

    pub fn delivered(&self) -> Vec<Delivered> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn channel_type(&self) -> &'static str {
        self.name
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn style(&self) -> RenderStyle {
        self.style
    }

    fn default_recipient(&self) -> String {
        "admin".to_string()
    }

    async fn send_text(&self, recipient: &str, body: &MessageBody) -> Result<()> {
        self.delivered.lock().push(Delivered {
            recipient: recipient.to_string(),
            body: body.clone(),
            with_image: false,
        });
        Ok(())
    }

    async fn send_photo(&self, recipient: &str, body: &MessageBody, _image: &Bytes) -> Result<()> {
        self.delivered.lock().push(Delivered {
            recipient: recipient.to_string(),
            body: body.clone(),
            with_image: true,
        });
        Ok(())
    }
}

/// A service with fake collaborators; the bot is disabled so no polling starts.
pub fn service(mut config: AppConfig) -> (Arc<PulseService>, Arc<FakeEmby>) {
    config.features.enable_bot = false;
    let emby = Arc::new(FakeEmby::default());
    let service = PulseService::new(
        Arc::new(ConfigService::new(config)),
        ServiceDeps {
            source: emby.clone(),
            queries: emby.clone(),
            stats: None,
            locator: Arc::new(NoLocator),
            emby: None,
        },
    );
    (service, emby)
}

/// Poll `check` on virtual time until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let step = Duration::from_millis(100);
    let mut waited = Duration::ZERO;
    while waited < limit {
        if check() {
            return true;
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
    check()
}
