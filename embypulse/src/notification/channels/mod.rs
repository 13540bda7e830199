//! Notification channels.
//!
//! - Telegram Bot API (rich client: HTML captions, inline buttons)
//! - WeCom application messages (enterprise IM: article cards, markdown)

mod telegram;
mod wecom;

pub use telegram::{BotCommandSpec, IncomingMessage, TelegramChannel, TelegramConfig, Update};
pub use wecom::{WeComChannel, WeComConfig};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::render::{MessageBody, RenderStyle};
use crate::Result;
use crate::domain::ProxyConfig;
use crate::utils::http_client::build_client;

/// One chat integration target.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Get the channel type name.
    fn channel_type(&self) -> &'static str;

    /// Check if the channel is enabled.
    fn is_enabled(&self) -> bool;

    /// How units are rendered for this channel.
    fn style(&self) -> RenderStyle;

    /// Recipient for broadcasts.
    fn default_recipient(&self) -> String;

    async fn send_text(&self, recipient: &str, body: &MessageBody) -> Result<()>;

    async fn send_photo(&self, recipient: &str, body: &MessageBody, image: &Bytes) -> Result<()>;
}

/// Channel configuration wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelConfig {
    /// Telegram Bot API channel.
    Telegram(TelegramConfig),
    /// WeCom application channel.
    WeCom(WeComConfig),
}

impl ChannelConfig {
    /// Get the channel type name.
    pub fn channel_type(&self) -> &'static str {
        match self {
            Self::Telegram(_) => "telegram",
            Self::WeCom(_) => "wecom",
        }
    }

    /// Check if the channel is enabled.
    pub fn is_enabled(&self) -> bool {
        match self {
            Self::Telegram(c) => c.enabled,
            Self::WeCom(c) => c.enabled,
        }
    }

    /// Optional human-friendly display name.
    pub fn display_name(&self) -> Option<&str> {
        match self {
            Self::Telegram(c) => c.name.as_deref(),
            Self::WeCom(c) => c.name.as_deref(),
        }
    }

    /// Build the runtime channel; outbound requests go through `proxy`.
    pub fn build(&self, proxy: &ProxyConfig, request_timeout: Duration) -> Arc<dyn NotificationChannel> {
        let client = build_client(proxy, request_timeout);
        match self {
            Self::Telegram(c) => Arc::new(TelegramChannel::new(c.clone(), client)),
            Self::WeCom(c) => Arc::new(WeComChannel::new(c.clone(), client)),
        }
    }
}
