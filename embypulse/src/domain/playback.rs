//! Playback start/stop records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::media::ItemKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackAction {
    Start,
    Stop,
}

/// The item being played.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackItem {
    pub id: Option<String>,
    pub name: String,
    pub kind: ItemKind,
    pub series_name: Option<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub run_time_ticks: Option<i64>,
}

/// A decoded `playback.start` / `playback.stop` webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackEvent {
    pub action: PlaybackAction,
    pub user_name: String,
    pub device_name: String,
    pub client: String,
    pub remote_address: Option<String>,
    pub item: PlaybackItem,
    pub position_ticks: Option<i64>,
    pub server_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl PlaybackEvent {
    /// Playback progress in percent, when both position and runtime are known.
    pub fn progress_percent(&self) -> Option<f64> {
        let total = self.item.run_time_ticks.filter(|t| *t > 0)?;
        let position = self.position_ticks.unwrap_or(0).max(0);
        Some((position as f64 / total as f64 * 100.0).min(100.0))
    }
}
