//! Channel-agnostic notification content.

use serde::Serialize;

use crate::domain::ImageKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Movie,
    Series,
    Episodes,
    PlaybackStart,
    PlaybackStop,
    /// Answer to an interactive command.
    Reply,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitField {
    pub label: String,
    pub value: String,
}

/// Where the poster comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PosterRef {
    /// An image slot of an Emby item.
    Item {
        item_id: String,
        image: ImageKind,
        tag: Option<String>,
    },
    /// A fixed URL, such as the placeholder poster.
    Url(String),
}

/// One outbound alert. Built once, then rendered per channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationUnit {
    pub kind: UnitKind,
    pub headline: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub year: Option<i32>,
    pub rating: Option<f32>,
    pub overview: Option<String>,
    pub fields: Vec<UnitField>,
    pub lines: Vec<String>,
    pub poster: Option<PosterRef>,
    pub deep_link: Option<String>,
}

impl NotificationUnit {
    pub fn new(kind: UnitKind, headline: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            kind,
            headline: headline.into(),
            title: title.into(),
            subtitle: None,
            year: None,
            rating: None,
            overview: None,
            fields: Vec::new(),
            lines: Vec::new(),
            poster: None,
            deep_link: None,
        }
    }

    /// A text reply made of a headline and free-form lines.
    pub fn reply(headline: impl Into<String>, lines: Vec<String>) -> Self {
        let mut unit = Self::new(UnitKind::Reply, headline, "");
        unit.lines = lines;
        unit
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        let subtitle = subtitle.into();
        if !subtitle.trim().is_empty() {
            self.subtitle = Some(subtitle);
        }
        self
    }

    pub fn with_field(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(UnitField {
            label: label.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    pub fn with_poster(mut self, poster: PosterRef) -> Self {
        self.poster = Some(poster);
        self
    }

    pub fn with_deep_link(mut self, link: impl Into<String>) -> Self {
        self.deep_link = Some(link.into());
        self
    }

    /// `"Title (2024)"`, or the bare title.
    pub fn display_title(&self) -> String {
        match self.year {
            Some(year) if year > 0 => format!("{} ({})", self.title, year),
            _ => self.title.clone(),
        }
    }
}

/// Link into the Emby web client for `item_id`.
pub fn deep_link(public_base: &str, item_id: &str, server_id: Option<&str>) -> String {
    let base = public_base.trim().trim_end_matches('/');
    match server_id.filter(|s| !s.is_empty()) {
        Some(server_id) => format!("{base}/web/index.html#!/item?id={item_id}&serverId={server_id}"),
        None => format!("{base}/web/index.html#!/item?id={item_id}"),
    }
}
