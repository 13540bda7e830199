//! Emby REST API payloads.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ItemKind, RawLibraryEvent};

/// An item as returned by `/emby/Items`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MediaItem {
    pub id: String,
    pub name: String,
    #[serde(rename = "Type")]
    pub item_type: String,
    pub series_id: Option<String>,
    pub series_name: Option<String>,
    pub parent_index_number: Option<u32>,
    pub index_number: Option<u32>,
    pub production_year: Option<i32>,
    pub community_rating: Option<f32>,
    pub overview: Option<String>,
    pub image_tags: HashMap<String, String>,
    pub backdrop_image_tags: Vec<String>,
    pub date_created: Option<DateTime<Utc>>,
    pub server_id: Option<String>,
    pub run_time_ticks: Option<i64>,
}

impl MediaItem {
    pub fn kind(&self) -> ItemKind {
        ItemKind::parse(&self.item_type)
    }

    pub fn primary_image_tag(&self) -> Option<&str> {
        self.image_tags
            .get("Primary")
            .map(String::as_str)
            .filter(|tag| !tag.is_empty())
    }

    /// Convert into a library event, as if the webhook had delivered it.
    pub fn to_library_event(&self, received_at: DateTime<Utc>) -> RawLibraryEvent {
        RawLibraryEvent {
            id: self.id.clone(),
            kind: self.kind(),
            name: self.name.clone(),
            series_id: self.series_id.clone(),
            series_name: self.series_name.clone(),
            season: self.parent_index_number,
            episode: self.index_number,
            image_tag: self.primary_image_tag().map(str::to_string),
            year: self.production_year,
            rating: self.community_rating,
            overview: self.overview.clone(),
            server_id: self.server_id.clone(),
            received_at,
        }
    }

    /// `"Series - Episode"` for episodes, the bare name otherwise.
    pub fn display_name(&self) -> String {
        match self.series_name.as_deref().filter(|s| !s.is_empty()) {
            Some(series) => format!("{} - {}", series, self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ItemsResponse {
    pub items: Vec<MediaItem>,
    pub total_record_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PlayState {
    pub position_ticks: Option<i64>,
    pub is_paused: bool,
}

/// An entry from `/emby/Sessions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SessionInfo {
    pub user_name: Option<String>,
    pub device_name: Option<String>,
    pub client: Option<String>,
    pub remote_end_point: Option<String>,
    pub now_playing_item: Option<MediaItem>,
    pub play_state: Option<PlayState>,
}

impl SessionInfo {
    /// Progress through the current item in whole percent.
    pub fn progress_percent(&self) -> Option<u32> {
        let item = self.now_playing_item.as_ref()?;
        let total = item.run_time_ticks.filter(|t| *t > 0)?;
        let position = self
            .play_state
            .as_ref()
            .and_then(|p| p.position_ticks)
            .unwrap_or(0)
            .max(0);
        Some(((position as f64 / total as f64) * 100.0).min(100.0) as u32)
    }
}

/// `/emby/System/Info`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SystemInfo {
    pub server_name: String,
    pub version: String,
    pub id: Option<String>,
    pub local_address: Option<String>,
    pub local_addresses: Vec<String>,
    pub wan_address: Option<String>,
    pub remote_addresses: Vec<String>,
}

impl SystemInfo {
    pub fn lan_address(&self) -> Option<&str> {
        self.local_address
            .as_deref()
            .filter(|a| !a.is_empty())
            .or_else(|| self.local_addresses.first().map(String::as_str))
    }

    pub fn wan_address(&self) -> Option<&str> {
        self.wan_address
            .as_deref()
            .filter(|a| !a.is_empty())
            .or_else(|| self.remote_addresses.first().map(String::as_str))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
}
