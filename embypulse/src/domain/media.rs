//! Library item records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Emby item type, as reported in the `Type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    Movie,
    Episode,
    Series,
    Season,
    #[serde(other)]
    Other,
}

impl ItemKind {
    /// Parse an Emby `Type` string.
    pub fn parse(value: &str) -> Self {
        match value {
            "Movie" => Self::Movie,
            "Episode" => Self::Episode,
            "Series" => Self::Series,
            "Season" => Self::Season,
            _ => Self::Other,
        }
    }

    /// Kinds that may enter the library notification queue.
    pub fn is_library_notifiable(&self) -> bool {
        !matches!(self, Self::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movie => "Movie",
            Self::Episode => "Episode",
            Self::Series => "Series",
            Self::Season => "Season",
            Self::Other => "Other",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emby image slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageKind {
    Primary,
    Backdrop,
    Thumb,
}

impl ImageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "Primary",
            Self::Backdrop => "Backdrop",
            Self::Thumb => "Thumb",
        }
    }
}

/// An "item added" event as handed over by the webhook ingress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLibraryEvent {
    pub id: String,
    pub kind: ItemKind,
    pub name: String,
    #[serde(default)]
    pub series_id: Option<String>,
    #[serde(default)]
    pub series_name: Option<String>,
    /// Season number (`ParentIndexNumber`).
    #[serde(default)]
    pub season: Option<u32>,
    /// Episode number (`IndexNumber`).
    #[serde(default)]
    pub episode: Option<u32>,
    /// Primary image tag, present once the server has extracted artwork.
    #[serde(default)]
    pub image_tag: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub rating: Option<f32>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub server_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl RawLibraryEvent {
    pub fn new(id: impl Into<String>, kind: ItemKind, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            series_id: None,
            series_name: None,
            season: None,
            episode: None,
            image_tag: None,
            year: None,
            rating: None,
            overview: None,
            server_id: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_series(mut self, series_id: impl Into<String>, series_name: impl Into<String>) -> Self {
        self.series_id = Some(series_id.into());
        self.series_name = Some(series_name.into());
        self
    }

    pub fn with_episode(mut self, season: u32, episode: u32) -> Self {
        self.season = Some(season);
        self.episode = Some(episode);
        self
    }

    pub fn with_image_tag(mut self, tag: impl Into<String>) -> Self {
        self.image_tag = Some(tag.into());
        self
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    /// Only episodes count towards ranges; seasons are grouped under their series but
    /// carry no episode detail.
    pub fn is_episode(&self) -> bool {
        self.kind == ItemKind::Episode
    }

    /// Series name for display, falling back to the item name.
    pub fn display_series_name(&self) -> &str {
        self.series_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.name)
    }
}
