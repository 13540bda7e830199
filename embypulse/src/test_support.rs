//! Hand-written fakes shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use parking_lot::Mutex;

use crate::domain::ImageKind;
use crate::emby::{MediaItem, MediaSource, ServerQueries, SessionInfo, SystemInfo, UserInfo};
use crate::stats::{DailyDigest, ExpiredAccount, PlayRecord, StatsStore};
use crate::notification::channels::NotificationChannel;
use crate::notification::render::{MessageBody, RenderStyle};
use crate::utils::http_client::install_rustls_provider;
use crate::{Error, Result};

/// In-memory [`MediaSource`] with call counters.
#[derive(Default)]
pub struct FakeMediaSource {
    items: Mutex<HashMap<String, MediaItem>>,
    episodes: Mutex<HashMap<String, Vec<MediaItem>>>,
    images: Mutex<HashMap<(String, ImageKind), Bytes>>,
    scripted: Mutex<VecDeque<Result<MediaItem>>>,
    fail: AtomicBool,
    lookup_calls: AtomicU32,
    episode_calls: AtomicU32,
    image_calls: AtomicU32,
}

impl FakeMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_item(&self, item: MediaItem) {
        self.items.lock().insert(item.id.clone(), item);
    }

    pub fn set_episodes(&self, series_id: &str, episodes: Vec<MediaItem>) {
        self.episodes.lock().insert(series_id.to_string(), episodes);
    }

    pub fn set_image(&self, item_id: &str, kind: ImageKind, bytes: &'static [u8]) {
        self.images
            .lock()
            .insert((item_id.to_string(), kind), Bytes::from_static(bytes));
    }

    /// Queue a response for the next `get_item`/`get_series` call.
    pub fn script_lookup(&self, response: Result<MediaItem>) {
        self.scripted.lock().push_back(response);
    }

    /// Every lookup fails with a timeout.
    pub fn fail_lookups(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn lookup_calls(&self) -> u32 {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    pub fn episode_calls(&self) -> u32 {
        self.episode_calls.load(Ordering::SeqCst)
    }

    pub fn image_calls(&self) -> u32 {
        self.image_calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, id: &str, entity: &str) -> Result<MediaItem> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(response) = self.scripted.lock().pop_front() {
            return response;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Timeout(format!("{entity} {id}")));
        }
        self.items
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(entity, id))
    }
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn get_item(&self, id: &str) -> Result<MediaItem> {
        self.lookup(id, "Item")
    }

    async fn get_series(&self, id: &str) -> Result<MediaItem> {
        self.lookup(id, "Series")
    }

    async fn list_recent_episodes(&self, series_id: &str, limit: u32) -> Result<Vec<MediaItem>> {
        self.episode_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Timeout(format!("episodes of {series_id}")));
        }
        Ok(self
            .episodes
            .lock()
            .get(series_id)
            .map(|eps| eps.iter().take(limit as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_image(
        &self,
        item_id: &str,
        kind: ImageKind,
        _tag: Option<&str>,
    ) -> Result<Option<Bytes>> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.images.lock().get(&(item_id.to_string(), kind)).cloned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelBehaviour {
    Succeed,
    FailPhoto,
    FailAll,
    AuthFailure,
    Panic,
    Hang,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentKind {
    Text,
    Photo,
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub recipient: String,
    pub kind: SentKind,
    pub body: MessageBody,
    pub image_len: Option<usize>,
}

impl SentMessage {
    /// Flattened body text for assertions.
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

/// [`NotificationChannel`] that records what it was asked to send.
pub struct RecordingChannel {
    name: &'static str,
    enabled: bool,
    style: RenderStyle,
    behaviour: ChannelBehaviour,
    attempts: AtomicU32,
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingChannel {
    pub fn new(name: &'static str, behaviour: ChannelBehaviour) -> Arc<Self> {
        Arc::new(Self {
            name,
            enabled: true,
            style: RenderStyle::RichClient,
            behaviour,
            attempts: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn enterprise(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            enabled: true,
            style: RenderStyle::EnterpriseIm,
            behaviour: ChannelBehaviour::Succeed,
            attempts: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn disabled(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            enabled: false,
            style: RenderStyle::RichClient,
            behaviour: ChannelBehaviour::Succeed,
            attempts: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    async fn record(&self, recipient: &str, kind: SentKind, body: &MessageBody, image: Option<&Bytes>) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match (self.behaviour, kind) {
            (ChannelBehaviour::Panic, _) => panic!("{} exploded", self.name),
            (ChannelBehaviour::Hang, _) => futures::future::pending::<()>().await,
            (ChannelBehaviour::FailAll, _) | (ChannelBehaviour::FailPhoto, SentKind::Photo) => {
                return Err(Error::Other(format!("{} rejected the message", self.name)));
            }
            (ChannelBehaviour::AuthFailure, _) => {
                return Err(Error::auth(format!("{} token expired", self.name)));
            }
            _ => {}
        }
        self.sent.lock().push(SentMessage {
            recipient: recipient.to_string(),
            kind,
            body: body.clone(),
            image_len: image.map(|bytes| bytes.len()),
        });
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn channel_type(&self) -> &'static str {
        self.name
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn style(&self) -> RenderStyle {
        self.style
    }

    fn default_recipient(&self) -> String {
        format!("{}-default", self.name)
    }

    async fn send_text(&self, recipient: &str, body: &MessageBody) -> Result<()> {
        self.record(recipient, SentKind::Text, body, None).await
    }

    async fn send_photo(&self, recipient: &str, body: &MessageBody, image: &Bytes) -> Result<()> {
        self.record(recipient, SentKind::Photo, body, Some(image)).await
    }
}

/// Upcast recording channels for `Dispatcher::replace_channels`.
pub fn as_channels(channels: &[&Arc<RecordingChannel>]) -> Vec<Arc<dyn NotificationChannel>> {
    channels
        .iter()
        .map(|c| Arc::clone(*c) as Arc<dyn NotificationChannel>)
        .collect()
}

/// In-memory [`ServerQueries`].
#[derive(Default)]
pub struct FakeServer {
    pub items: Mutex<Vec<MediaItem>>,
    pub sessions: Mutex<Vec<SessionInfo>>,
    pub info: Mutex<SystemInfo>,
    pub users: Mutex<Vec<UserInfo>>,
    pub disabled: Mutex<Vec<String>>,
    fail: AtomicBool,
    crash: AtomicBool,
    queries: AtomicU32,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, id: &str, name: &str) {
        self.users.lock().push(UserInfo {
            id: id.to_string(),
            name: name.to_string(),
        });
    }

    /// Every query fails with a transport-style error.
    pub fn go_offline(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Every query panics.
    pub fn crash(&self) {
        self.crash.store(true, Ordering::SeqCst);
    }

    /// Queries made so far, including failed and panicked ones.
    pub fn query_count(&self) -> u32 {
        self.queries.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.crash.load(Ordering::SeqCst) {
            panic!("server query crashed");
        }
        if self.fail.load(Ordering::SeqCst) {
            Err(Error::Timeout("server offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ServerQueries for FakeServer {
    async fn search(&self, keyword: &str, limit: u32) -> Result<Vec<MediaItem>> {
        self.check()?;
        let keyword = keyword.to_lowercase();
        Ok(self
            .items
            .lock()
            .iter()
            .filter(|item| item.name.to_lowercase().contains(&keyword))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn latest_items(&self, limit: u32) -> Result<Vec<MediaItem>> {
        self.check()?;
        Ok(self.items.lock().iter().take(limit as usize).cloned().collect())
    }

    async fn now_playing(&self) -> Result<Vec<SessionInfo>> {
        self.check()?;
        Ok(self.sessions.lock().clone())
    }

    async fn system_info(&self) -> Result<SystemInfo> {
        self.check()?;
        Ok(self.info.lock().clone())
    }

    async fn list_users(&self) -> Result<Vec<UserInfo>> {
        self.check()?;
        Ok(self.users.lock().clone())
    }

    async fn disable_user(&self, user_id: &str) -> Result<()> {
        self.check()?;
        self.disabled.lock().push(user_id.to_string());
        Ok(())
    }
}

/// In-memory [`StatsStore`].
#[derive(Default)]
pub struct FakeStats {
    pub digest: Mutex<DailyDigest>,
    pub plays: Mutex<Vec<PlayRecord>>,
    /// Filtered by expiry date like the SQL query.
    pub accounts: Mutex<Vec<ExpiredAccount>>,
}

impl FakeStats {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatsStore for FakeStats {
    async fn daily_digest(&self, day: NaiveDate) -> Result<DailyDigest> {
        let mut digest = self.digest.lock().clone();
        digest.date = Some(day);
        Ok(digest)
    }

    async fn recent_plays(&self, limit: u32) -> Result<Vec<PlayRecord>> {
        Ok(self.plays.lock().iter().take(limit as usize).cloned().collect())
    }

    async fn expired_accounts(&self, today: NaiveDate) -> Result<Vec<ExpiredAccount>> {
        let today = today.format("%Y-%m-%d").to_string();
        Ok(self
            .accounts
            .lock()
            .iter()
            .filter(|a| !a.expire_date.is_empty() && a.expire_date < today)
            .cloned()
            .collect())
    }
}

/// A plain HTTP client; the crypto provider must be installed before any client is built.
pub fn test_client() -> reqwest::Client {
    install_rustls_provider();
    reqwest::Client::new()
}
