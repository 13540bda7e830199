//! Telegram Bot API notification channel.
//!
//! Sends messages via `sendMessage`/`sendPhoto` and exposes the `getUpdates` and
//! `setMyCommands` calls the bot poller needs. Handles 429 rate limits by respecting
//! the `parameters.retry_after` field returned in the JSON response body.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, StatusCode, multipart};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::NotificationChannel;
use crate::notification::render::{ActionButton, MessageBody, RenderStyle, strip_tags};
use crate::{Error, Result};

/// Maximum number of retries for rate-limited requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Server-side long-poll timeout for `getUpdates`.
pub const LONG_POLL_TIMEOUT_SECS: u64 = 30;

/// Client-side timeout for `getUpdates`, longer than the server-side one.
const LONG_POLL_CLIENT_TIMEOUT: Duration = Duration::from_secs(35);

/// Telegram channel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Stable channel instance identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Optional display name for this channel instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Whether the channel is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Telegram Bot API token.
    #[serde(default)]
    pub bot_token: String,
    /// Admin chat: broadcast target and the only chat whose commands are answered.
    #[serde(default)]
    pub chat_id: String,
    /// Bot API base URL, for self-hosted API servers.
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            id: None,
            name: None,
            enabled: false,
            bot_token: String::new(),
            chat_id: String::new(),
            api_base: default_api_base(),
        }
    }
}

/// One entry from `getUpdates`.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotCommandSpec {
    pub command: String,
    pub description: String,
}

/// Telegram notification channel.
pub struct TelegramChannel {
    config: TelegramConfig,
    client: Client,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig, client: Client) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &TelegramConfig {
        &self.config
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    /// Send a request, retrying on 429 with the server-provided delay.
    ///
    /// `build` is called once per attempt since multipart bodies cannot be reused.
    async fn send_with_retry<F>(&self, method: &str, build: F) -> Result<Value>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = build().send().await?;
            let status = response.status();
            let raw = response.bytes().await?;
            let body: Value = serde_json::from_slice(&raw).unwrap_or(Value::Null);

            if status.is_success() {
                if body.get("ok").and_then(Value::as_bool) == Some(true) {
                    return Ok(body.get("result").cloned().unwrap_or(Value::Null));
                }
                return Err(Error::malformed(format!("Telegram {method}: unexpected body {body}")));
            }

            let description = body
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = body
                    .get("parameters")
                    .and_then(|p| p.get("retry_after"))
                    .and_then(Value::as_u64)
                    .map(Duration::from_secs);

                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    warn!(
                        "Telegram rate limit: max retries ({}) exceeded, last retry_after was {:?}",
                        MAX_RATE_LIMIT_RETRIES, retry_after
                    );
                    return Err(Error::Other(format!(
                        "Telegram rate limit exceeded after {} retries",
                        MAX_RATE_LIMIT_RETRIES
                    )));
                }

                let wait_duration = retry_after.unwrap_or(Duration::from_secs(1));
                debug!(
                    "Telegram rate limited (429), waiting {:?} before retry (attempt {}/{})",
                    wait_duration, attempts, MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait_duration).await;
                continue;
            }

            return Err(classify_failure(method, status, description));
        }
    }

    /// Call `send` with the inline button, dropping it once if Telegram rejects its URL
    /// (LAN addresses are refused as button targets).
    async fn send_with_button_fallback<F, Fut>(&self, button: Option<&ActionButton>, send: F) -> Result<()>
    where
        F: Fn(Option<Value>) -> Fut,
        Fut: std::future::Future<Output = Result<Value>>,
    {
        let markup = button.map(reply_markup);
        match send(markup.clone()).await {
            Ok(_) => Ok(()),
            Err(Error::Validation(msg)) if markup.is_some() && is_button_rejection(&msg) => {
                warn!(error = %msg, "Telegram rejected the button URL, resending without it");
                send(None).await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let url = self.method_url("getUpdates");
        let result = self
            .send_with_retry("getUpdates", || {
                self.client
                    .get(&url)
                    .query(&[
                        ("offset", offset.to_string()),
                        ("timeout", LONG_POLL_TIMEOUT_SECS.to_string()),
                    ])
                    .timeout(LONG_POLL_CLIENT_TIMEOUT)
            })
            .await?;
        serde_json::from_value(result)
            .map_err(|e| Error::malformed(format!("Telegram getUpdates: {e}")))
    }

    /// Register the command menu.
    pub async fn set_my_commands(&self, commands: &[BotCommandSpec]) -> Result<()> {
        let url = self.method_url("setMyCommands");
        let payload = json!({ "commands": commands });
        self.send_with_retry("setMyCommands", || self.client.post(&url).json(&payload))
            .await
            .map(|_| ())
    }
}

fn reply_markup(button: &ActionButton) -> Value {
    json!({
        "inline_keyboard": [[{ "text": button.text, "url": button.url }]]
    })
}

fn is_button_rejection(description: &str) -> bool {
    let lower = description.to_ascii_lowercase();
    lower.contains("button") || lower.contains("http url")
}

fn classify_failure(method: &str, status: StatusCode, description: String) -> Error {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            Error::auth(format!("Telegram {method}: {status} {description}"))
        }
        StatusCode::BAD_REQUEST => Error::validation(format!("Telegram {method}: {description}")),
        _ => Error::Other(format!("Telegram {method} failed: {status} - {description}")),
    }
}

/// Plain or HTML text for a body rendered for another style.
fn body_text(body: &MessageBody) -> (String, Option<&ActionButton>, bool) {
    match body {
        MessageBody::Rich { text, button } => (text.clone(), button.as_ref(), true),
        MessageBody::Card {
            title, description, ..
        } => (format!("{title}\n{description}"), None, false),
        MessageBody::Markdown { content } => (strip_tags(content), None, false),
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn channel_type(&self) -> &'static str {
        "telegram"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.bot_token.is_empty() && !self.config.chat_id.is_empty()
    }

    fn style(&self) -> RenderStyle {
        RenderStyle::RichClient
    }

    fn default_recipient(&self) -> String {
        self.config.chat_id.clone()
    }

    async fn send_text(&self, recipient: &str, body: &MessageBody) -> Result<()> {
        let (text, button, html) = body_text(body);
        let url = self.method_url("sendMessage");

        self.send_with_button_fallback(button, |markup| {
            let mut payload = json!({
                "chat_id": recipient,
                "text": text,
                "disable_web_page_preview": true,
            });
            if html {
                payload["parse_mode"] = json!("HTML");
            }
            if let Some(markup) = markup {
                payload["reply_markup"] = markup;
            }
            let url = url.clone();
            async move {
                self.send_with_retry("sendMessage", || self.client.post(&url).json(&payload))
                    .await
            }
        })
        .await?;

        debug!(recipient, "Telegram message sent");
        Ok(())
    }

    async fn send_photo(&self, recipient: &str, body: &MessageBody, image: &Bytes) -> Result<()> {
        let (caption, button, html) = body_text(body);
        let url = self.method_url("sendPhoto");

        self.send_with_button_fallback(button, |markup| {
            let build = {
                let url = url.clone();
                let caption = caption.clone();
                let recipient = recipient.to_string();
                let image = image.clone();
                move || {
                    let photo = multipart::Part::stream_with_length(
                        reqwest::Body::from(image.clone()),
                        image.len() as u64,
                    )
                    .file_name("poster.jpg")
                    .mime_str("image/jpeg")
                    .unwrap_or_else(|_| {
                        multipart::Part::stream(reqwest::Body::from(image.clone()))
                            .file_name("poster.jpg")
                    });
                    let mut form = multipart::Form::new()
                        .text("chat_id", recipient.clone())
                        .text("caption", caption.clone())
                        .part("photo", photo);
                    if html {
                        form = form.text("parse_mode", "HTML");
                    }
                    if let Some(markup) = &markup {
                        form = form.text("reply_markup", markup.to_string());
                    }
                    self.client.post(&url).multipart(form)
                }
            };
            async move { self.send_with_retry("sendPhoto", build).await }
        })
        .await?;

        debug!(recipient, bytes = image.len(), "Telegram photo sent");
        Ok(())
    }
}
