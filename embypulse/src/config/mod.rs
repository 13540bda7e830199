//! Application configuration.
//!
//! Settings live in one JSON file. Every section defaults, so a missing file or a
//! partial one still yields a runnable configuration; selected keys can be overridden
//! from the environment (and `.env`) at load time.

pub mod events;
pub mod service;

pub use events::{ConfigEventBroadcaster, ConfigUpdateEvent};
pub use service::ConfigService;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{ProxyConfig, RetryPolicy};
use crate::notification::channels::{ChannelConfig, TelegramConfig};
use crate::{Error, Result};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "EMBYPULSE_CONFIG";

/// Config file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";

/// Root configuration snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub emby: EmbyConfig,
    pub proxy: ProxyConfig,
    pub features: FeatureFlags,
    pub library: LibraryConfig,
    pub notification: NotificationConfig,
    pub bot: BotConfig,
    pub server: ServerConfig,
    pub stats: StatsConfig,
    pub logging: LoggingConfig,
}

/// Emby server connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbyConfig {
    /// Base URL the service uses to reach Emby, e.g. `http://127.0.0.1:8096`.
    pub host: String,
    pub api_key: String,
    /// Externally reachable URL used in deep links.
    pub public_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for EmbyConfig {
    fn default() -> Self {
        Self {
            host: "http://127.0.0.1:8096".to_string(),
            api_key: String::new(),
            public_url: None,
            request_timeout_secs: 15,
        }
    }
}

impl EmbyConfig {
    pub fn is_configured(&self) -> bool {
        !self.host.trim().is_empty() && !self.api_key.trim().is_empty()
    }

    /// Base for user-facing links: the public URL when set, else the host.
    pub fn public_base(&self) -> String {
        let base = self
            .public_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(self.host.trim());
        base.trim_end_matches('/').to_string()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Feature switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Interactive commands and the daily digest.
    pub enable_bot: bool,
    /// Playback start/stop notifications.
    pub enable_notify: bool,
    /// New-media notifications.
    pub enable_library_notify: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_bot: true,
            enable_notify: true,
            enable_library_notify: true,
        }
    }
}

/// Library-event aggregation tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub poll_interval_ms: u64,
    pub debounce_secs: u64,
    /// Episodes created less than this many seconds apart belong to one import.
    pub cluster_gap_secs: u64,
    pub episode_lookup_limit: u32,
    pub retry: RetryPolicy,
    pub placeholder_poster_url: String,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            debounce_secs: 15,
            cluster_gap_secs: 60,
            episode_lookup_limit: 50,
            retry: RetryPolicy::default(),
            placeholder_poster_url: "https://emby.media/resources/logowhite_1881.png".to_string(),
        }
    }
}

impl LibraryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub fn cluster_gap(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cluster_gap_secs as i64)
    }
}

/// Outbound channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub channels: Vec<ChannelConfig>,
    pub send_timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            send_timeout_secs: 60,
        }
    }
}

impl NotificationConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs.max(1))
    }

    /// The first configured Telegram channel, if any.
    pub fn telegram(&self) -> Option<&TelegramConfig> {
        self.channels.iter().find_map(|c| match c {
            ChannelConfig::Telegram(tg) => Some(tg),
            _ => None,
        })
    }

    /// The first Telegram channel, created enabled when none is configured.
    fn telegram_mut(&mut self) -> Option<&mut TelegramConfig> {
        if !self
            .channels
            .iter()
            .any(|c| matches!(c, ChannelConfig::Telegram(_)))
        {
            self.channels.push(ChannelConfig::Telegram(TelegramConfig {
                enabled: true,
                ..Default::default()
            }));
        }
        self.channels.iter_mut().find_map(|c| match c {
            ChannelConfig::Telegram(tg) => Some(tg),
            _ => None,
        })
    }
}

/// Bot schedule and assets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Six-field cron expression (seconds first).
    pub daily_cron: String,
    /// IANA timezone for `daily_cron`; local time when unset.
    pub timezone: Option<String>,
    /// Cover image attached to the daily digest.
    pub report_cover_url: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            daily_cron: "0 0 9 * * *".to_string(),
            timezone: None,
            report_cover_url: None,
        }
    }
}

/// HTTP ingress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Shared secret expected in the `token` query parameter.
    pub webhook_token: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:10307".to_string(),
            webhook_token: String::new(),
        }
    }
}

/// Statistics database (read-only).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// e.g. `sqlite:/emby/data/playback_reporting.db?mode=ro`
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: String,
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: Option<String>,
    pub retention_days: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: "logs".to_string(),
            filter: None,
            retention_days: 7,
        }
    }
}

impl AppConfig {
    /// Parse a config document.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Apply environment overrides using `lookup` as the variable source.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("EMBY_HOST") {
            self.emby.host = v;
        }
        if let Some(v) = get("EMBY_API_KEY") {
            self.emby.api_key = v;
        }
        if let Some(v) = get("EMBY_PUBLIC_URL") {
            self.emby.public_url = Some(v);
        }
        if let Some(v) = get("WEBHOOK_TOKEN") {
            self.server.webhook_token = v;
        }
        if let Some(v) = get("PROXY_URL") {
            self.proxy = ProxyConfig::from_setting(&v);
        }
        if let Some(v) = get("TG_BOT_TOKEN")
            && let Some(tg) = self.notification.telegram_mut()
        {
            tg.bot_token = v;
        }
        if let Some(v) = get("TG_CHAT_ID")
            && let Some(tg) = self.notification.telegram_mut()
        {
            tg.chat_id = v;
        }
        if let Some(v) = get("LISTEN_ADDR") {
            self.server.listen_addr = v;
        }
        if let Some(v) = get("STATS_DB_URL") {
            self.stats.database_url = Some(v);
        }
        if let Some(v) = get("LOG_DIR") {
            self.logging.dir = v;
        }
    }

    /// Reject values that would make a long-lived task misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.library.retry.attempts() == 0 {
            return Err(Error::config("library.retry.delays_secs must not be empty"));
        }
        if self.library.episode_lookup_limit == 0 {
            return Err(Error::config("library.episode_lookup_limit must be positive"));
        }
        crate::bot::daily::parse_timezone(self.bot.timezone.as_deref())?;
        crate::bot::daily::parse_schedule(&self.bot.daily_cron)?;
        Ok(())
    }
}
