//! Emby server access.
//!
//! Two capability traits split what the notification pipeline needs from the server
//! ([`MediaSource`]) from what interactive commands and housekeeping need
//! ([`ServerQueries`]). [`EmbyClient`] implements both over the REST API.

mod client;
pub mod models;

pub use client::EmbyClient;
pub use models::{MediaItem, SessionInfo, SystemInfo, UserInfo};

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;
use crate::domain::ImageKind;

/// Metadata and artwork lookups used by enrichment and poster resolution.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn get_item(&self, id: &str) -> Result<MediaItem>;

    async fn get_series(&self, id: &str) -> Result<MediaItem>;

    /// Episodes of a series, newest first by creation time.
    async fn list_recent_episodes(&self, series_id: &str, limit: u32) -> Result<Vec<MediaItem>>;

    /// Image bytes, or `None` when the item has no image of that kind.
    async fn get_image(
        &self,
        item_id: &str,
        kind: ImageKind,
        tag: Option<&str>,
    ) -> Result<Option<Bytes>>;
}

/// Read queries and account actions for bot commands and housekeeping.
#[async_trait]
pub trait ServerQueries: Send + Sync {
    /// Movies and series matching `keyword`.
    async fn search(&self, keyword: &str, limit: u32) -> Result<Vec<MediaItem>>;

    /// Most recently added movies and episodes.
    async fn latest_items(&self, limit: u32) -> Result<Vec<MediaItem>>;

    /// Sessions that are currently playing something.
    async fn now_playing(&self) -> Result<Vec<SessionInfo>>;

    async fn system_info(&self) -> Result<SystemInfo>;

    async fn list_users(&self) -> Result<Vec<UserInfo>>;

    async fn disable_user(&self, user_id: &str) -> Result<()>;
}
