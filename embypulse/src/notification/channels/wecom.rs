//! WeCom (WeChat Work) application message channel.
//!
//! Authenticates with a corp id/secret pair exchanged for a short-lived access token.
//! Posters are uploaded as temporary media and sent as `mpnews` article cards; text
//! goes out as `markdown`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, multipart};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::NotificationChannel;
use crate::notification::render::{MessageBody, RenderStyle, html_to_markdown};
use crate::notification::token::AccessTokenCache;
use crate::utils::text::truncate_chars;
use crate::{Error, Result};

/// errcodes meaning the access token is invalid or expired.
const TOKEN_ERRCODES: [i64; 3] = [40014, 42001, 42009];

/// Article digests longer than this are cut.
const DIGEST_LIMIT: usize = 120;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeComConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub corp_id: String,
    #[serde(default)]
    pub corp_secret: String,
    #[serde(default)]
    pub agent_id: i64,
    /// Broadcast recipients, `|`-separated user ids or `@all`.
    #[serde(default = "default_to_user")]
    pub to_user: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_to_user() -> String {
    "@all".to_string()
}

fn default_api_base() -> String {
    "https://qyapi.weixin.qq.com".to_string()
}

impl Default for WeComConfig {
    fn default() -> Self {
        Self {
            id: None,
            name: None,
            enabled: false,
            corp_id: String::new(),
            corp_secret: String::new(),
            agent_id: 0,
            to_user: default_to_user(),
            api_base: default_api_base(),
        }
    }
}

pub struct WeComChannel {
    config: WeComConfig,
    client: Client,
    tokens: AccessTokenCache,
}

impl WeComChannel {
    pub fn new(config: WeComConfig, client: Client) -> Self {
        Self {
            config,
            client,
            tokens: AccessTokenCache::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/cgi-bin/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn fetch_token(&self) -> Result<(String, Duration)> {
        let response = self
            .client
            .get(self.url("gettoken"))
            .query(&[
                ("corpid", self.config.corp_id.as_str()),
                ("corpsecret", self.config.corp_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::auth(format!("WeCom gettoken request failed: {e}")))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::auth(format!("WeCom gettoken returned no JSON: {e}")))?;

        let errcode = body.get("errcode").and_then(Value::as_i64).unwrap_or(0);
        let token = body.get("access_token").and_then(Value::as_str);
        match token {
            Some(token) if errcode == 0 && !token.is_empty() => {
                let ttl = body.get("expires_in").and_then(Value::as_u64).unwrap_or(7200);
                Ok((token.to_string(), Duration::from_secs(ttl)))
            }
            _ => Err(Error::auth(format!(
                "WeCom gettoken failed: {} {}",
                errcode,
                body.get("errmsg").and_then(Value::as_str).unwrap_or("")
            ))),
        }
    }

    async fn token(&self) -> Result<String> {
        self.tokens.get_or_refresh(|| self.fetch_token()).await
    }

    /// Run `call` with a valid token, refreshing and retrying once on a token errcode.
    async fn with_token<F, Fut>(&self, call: F) -> Result<Value>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let token = self.token().await?;
        let reply = call(token).await?;
        if !is_token_error(&reply) {
            return check_reply(reply);
        }

        warn!(errcode = ?reply.get("errcode"), "WeCom token rejected, refreshing");
        self.tokens.invalidate().await;
        let token = self.token().await?;
        check_reply(call(token).await?)
    }

    async fn post_message(&self, payload: Value) -> Result<()> {
        let url = self.url("message/send");
        self.with_token(|token| {
            let request = self
                .client
                .post(&url)
                .query(&[("access_token", token)])
                .json(&payload);
            async move { Ok(request.send().await?.json::<Value>().await?) }
        })
        .await
        .map(|_| ())
    }

    /// Upload `image` as temporary media and return its `media_id`.
    async fn upload_image(&self, image: &Bytes) -> Result<String> {
        let url = self.url("media/upload");
        let reply = self
            .with_token(|token| {
                let part = multipart::Part::stream_with_length(
                    reqwest::Body::from(image.clone()),
                    image.len() as u64,
                )
                .file_name("poster.jpg");
                let request = self
                    .client
                    .post(&url)
                    .query(&[("access_token", token.as_str()), ("type", "image")])
                    .multipart(multipart::Form::new().part("media", part));
                async move { Ok(request.send().await?.json::<Value>().await?) }
            })
            .await?;

        reply
            .get("media_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::malformed("WeCom media/upload returned no media_id"))
    }

    fn envelope(&self, recipient: &str, msgtype: &str, content: Value) -> Value {
        let mut payload = json!({
            "touser": recipient,
            "msgtype": msgtype,
            "agentid": self.config.agent_id,
            "safe": 0,
        });
        payload[msgtype] = content;
        payload
    }
}

fn errcode(reply: &Value) -> i64 {
    reply.get("errcode").and_then(Value::as_i64).unwrap_or(0)
}

fn is_token_error(reply: &Value) -> bool {
    TOKEN_ERRCODES.contains(&errcode(reply))
}

fn check_reply(reply: Value) -> Result<Value> {
    match errcode(&reply) {
        0 => Ok(reply),
        code if TOKEN_ERRCODES.contains(&code) => Err(Error::auth(format!(
            "WeCom token rejected after refresh: {code}"
        ))),
        code => Err(Error::Other(format!(
            "WeCom error {}: {}",
            code,
            reply.get("errmsg").and_then(Value::as_str).unwrap_or("")
        ))),
    }
}

/// Article body for `mpnews`: plain text with HTML line breaks.
fn article_content(description: &str) -> String {
    description.replace('\n', "<br/>")
}

#[async_trait]
impl NotificationChannel for WeComChannel {
    fn channel_type(&self) -> &'static str {
        "wecom"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
            && !self.config.corp_id.is_empty()
            && !self.config.corp_secret.is_empty()
            && self.config.agent_id != 0
    }

    fn style(&self) -> RenderStyle {
        RenderStyle::EnterpriseIm
    }

    fn default_recipient(&self) -> String {
        self.config.to_user.clone()
    }

    async fn send_text(&self, recipient: &str, body: &MessageBody) -> Result<()> {
        let content = match body {
            MessageBody::Markdown { content } => content.clone(),
            MessageBody::Rich { text, .. } => html_to_markdown(text),
            MessageBody::Card {
                title,
                description,
                link,
            } => match link {
                Some(link) => format!("**{title}**\n{description}\n[View details]({link})"),
                None => format!("**{title}**\n{description}"),
            },
        };
        let payload = self.envelope(recipient, "markdown", json!({ "content": content }));
        self.post_message(payload).await?;
        debug!(recipient, "WeCom markdown sent");
        Ok(())
    }

    async fn send_photo(&self, recipient: &str, body: &MessageBody, image: &Bytes) -> Result<()> {
        let MessageBody::Card {
            title,
            description,
            link,
        } = body
        else {
            return Err(Error::validation("WeCom photo messages need a card body"));
        };

        let media_id = self.upload_image(image).await?;
        let mut article = json!({
            "title": title,
            "thumb_media_id": media_id,
            "author": "EmbyPulse",
            "content": article_content(description),
            "digest": truncate_chars(description, DIGEST_LIMIT),
        });
        if let Some(link) = link {
            article["content_source_url"] = json!(link);
        }

        let payload = self.envelope(recipient, "mpnews", json!({ "articles": [article] }));
        self.post_message(payload).await?;
        debug!(recipient, "WeCom article sent");
        Ok(())
    }
}
