//! reqwest-backed Emby client.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::models::{ItemsResponse, MediaItem, SessionInfo, SystemInfo, UserInfo};
use super::{MediaSource, ServerQueries};
use crate::config::EmbyConfig;
use crate::domain::{ImageKind, ProxyConfig};
use crate::utils::http_client::build_client;
use crate::{Error, Result};

const ITEM_FIELDS: &str = "Overview,ProductionYear,CommunityRating,DateCreated,SeriesId,SeriesName,ParentIndexNumber,IndexNumber,ImageTags,BackdropImageTags,RunTimeTicks";

/// Image transform applied to every poster download.
const IMAGE_PARAMS: [(&str, &str); 3] = [("maxHeight", "800"), ("maxWidth", "1200"), ("quality", "90")];

#[derive(Debug, Clone)]
struct Endpoint {
    base: String,
    api_key: String,
}

/// Emby REST client.
pub struct EmbyClient {
    client: Client,
    endpoint: RwLock<Endpoint>,
}

impl EmbyClient {
    /// The Emby server is reached directly; the configured proxy only applies to chat platforms.
    pub fn new(config: &EmbyConfig) -> Self {
        Self {
            client: build_client(&ProxyConfig::disabled(), config.request_timeout()),
            endpoint: RwLock::new(Self::endpoint_from(config)),
        }
    }

    /// Swap host and key after a settings change.
    pub fn update_settings(&self, config: &EmbyConfig) {
        *self.endpoint.write() = Self::endpoint_from(config);
    }

    fn endpoint_from(config: &EmbyConfig) -> Endpoint {
        Endpoint {
            base: config.host.trim().trim_end_matches('/').to_string(),
            api_key: config.api_key.trim().to_string(),
        }
    }

    fn url(&self, path: &str) -> (String, String) {
        let endpoint = self.endpoint.read();
        (
            format!("{}/emby{}", endpoint.base, path),
            endpoint.api_key.clone(),
        )
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        entity: &str,
        id: &str,
    ) -> Result<T> {
        let (url, api_key) = self.url(path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .query(&[("api_key", api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        check_status(status, entity, id)?;

        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| Error::malformed(format!("{entity} response from {path}: {e}")))
    }

    async fn query_items(&self, query: &[(&str, &str)], entity: &str, id: &str) -> Result<Vec<MediaItem>> {
        let response: ItemsResponse = self.get_json("/Items", query, entity, id).await?;
        Ok(response.items)
    }

    async fn get_by_id(&self, id: &str, entity: &str) -> Result<MediaItem> {
        let items = self
            .query_items(&[("Ids", id), ("Fields", ITEM_FIELDS)], entity, id)
            .await?;
        items
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(entity, id))
    }
}

/// Map a non-success status to the error kind callers branch on.
fn check_status(status: StatusCode, entity: &str, id: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::NOT_FOUND => Err(Error::not_found(entity, id)),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(Error::auth(format!("Emby rejected the API key ({status})")))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            Err(Error::Timeout(format!("Emby returned {status}")))
        }
        _ => Err(Error::Other(format!("Emby returned {status} for {entity} {id}"))),
    }
}

#[async_trait]
impl MediaSource for EmbyClient {
    async fn get_item(&self, id: &str) -> Result<MediaItem> {
        self.get_by_id(id, "Item").await
    }

    async fn get_series(&self, id: &str) -> Result<MediaItem> {
        self.get_by_id(id, "Series").await
    }

    async fn list_recent_episodes(&self, series_id: &str, limit: u32) -> Result<Vec<MediaItem>> {
        let limit = limit.to_string();
        self.query_items(
            &[
                ("ParentId", series_id),
                ("IncludeItemTypes", "Episode"),
                ("Recursive", "true"),
                ("SortBy", "DateCreated"),
                ("SortOrder", "Descending"),
                ("Limit", limit.as_str()),
                ("Fields", ITEM_FIELDS),
            ],
            "Series",
            series_id,
        )
        .await
    }

    async fn get_image(
        &self,
        item_id: &str,
        kind: ImageKind,
        tag: Option<&str>,
    ) -> Result<Option<Bytes>> {
        let (url, api_key) = self.url(&format!("/Items/{}/Images/{}", item_id, kind.as_str()));
        let mut request = self
            .client
            .get(&url)
            .query(&IMAGE_PARAMS)
            .query(&[("api_key", api_key.as_str())]);
        if let Some(tag) = tag {
            request = request.query(&[("tag", tag)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(item_id, kind = kind.as_str(), "No image on item");
            return Ok(None);
        }
        check_status(status, "Image", item_id)?;

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            warn!(item_id, kind = kind.as_str(), "Emby returned an empty image");
            return Ok(None);
        }
        Ok(Some(bytes))
    }
}

#[async_trait]
impl ServerQueries for EmbyClient {
    async fn search(&self, keyword: &str, limit: u32) -> Result<Vec<MediaItem>> {
        let limit = limit.to_string();
        self.query_items(
            &[
                ("SearchTerm", keyword),
                ("IncludeItemTypes", "Movie,Series"),
                ("Recursive", "true"),
                ("Limit", limit.as_str()),
                ("Fields", ITEM_FIELDS),
            ],
            "Search",
            keyword,
        )
        .await
    }

    async fn latest_items(&self, limit: u32) -> Result<Vec<MediaItem>> {
        let limit = limit.to_string();
        self.query_items(
            &[
                ("SortBy", "DateCreated"),
                ("SortOrder", "Descending"),
                ("IncludeItemTypes", "Movie,Episode"),
                ("Recursive", "true"),
                ("Limit", limit.as_str()),
                ("Fields", ITEM_FIELDS),
            ],
            "Latest",
            "",
        )
        .await
    }

    async fn now_playing(&self) -> Result<Vec<SessionInfo>> {
        let sessions: Vec<SessionInfo> = self.get_json("/Sessions", &[], "Sessions", "").await?;
        Ok(sessions
            .into_iter()
            .filter(|s| s.now_playing_item.is_some())
            .collect())
    }

    async fn system_info(&self) -> Result<SystemInfo> {
        self.get_json("/System/Info", &[], "SystemInfo", "").await
    }

    async fn list_users(&self) -> Result<Vec<UserInfo>> {
        self.get_json("/Users", &[], "Users", "").await
    }

    async fn disable_user(&self, user_id: &str) -> Result<()> {
        // The policy endpoint replaces the whole policy, so start from the current one.
        let user: serde_json::Value = self
            .get_json(&format!("/Users/{user_id}"), &[], "User", user_id)
            .await?;
        let mut policy = user
            .get("Policy")
            .cloned()
            .filter(serde_json::Value::is_object)
            .unwrap_or_else(|| serde_json::json!({}));
        policy["IsDisabled"] = serde_json::Value::Bool(true);

        let (url, api_key) = self.url(&format!("/Users/{user_id}/Policy"));
        let response = self
            .client
            .post(&url)
            .query(&[("api_key", api_key.as_str())])
            .json(&policy)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        check_status(response.status(), "User", user_id)
    }
}
