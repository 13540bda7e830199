//! Proxy configuration value object.

use serde::{Deserialize, Serialize};

/// Proxy configuration for outbound chat-platform requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Whether proxy is enabled.
    pub enabled: bool,
    /// Proxy URL (e.g., "http://proxy.example.com:8080" or "socks5://127.0.0.1:1080").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Username for proxy authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Password for proxy authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Use system proxy settings.
    #[serde(default)]
    pub use_system_proxy: bool,
}

impl ProxyConfig {
    /// Create a disabled proxy config.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            url: None,
            username: None,
            password: None,
            use_system_proxy: false,
        }
    }

    /// Create a proxy config with a URL.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            enabled: true,
            url: Some(url.into()),
            username: None,
            password: None,
            use_system_proxy: false,
        }
    }

    /// Build from the single `proxy_url` setting: blank means no proxy.
    pub fn from_setting(url: &str) -> Self {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            Self::disabled()
        } else {
            Self::with_url(trimmed)
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::disabled()
    }
}
