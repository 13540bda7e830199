//! Cached access tokens for channels that authenticate with short-lived credentials.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::Result;

/// Tokens are refreshed this long before they expire.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Lazily refreshed token slot.
///
/// The lock is held across the refresh so concurrent senders wait for one fetch.
pub struct AccessTokenCache {
    slot: Mutex<Option<CachedToken>>,
    margin: Duration,
}

impl AccessTokenCache {
    pub fn new() -> Self {
        Self::with_margin(DEFAULT_REFRESH_MARGIN)
    }

    pub fn with_margin(margin: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            margin,
        }
    }

    /// Return the cached token, calling `fetch` when there is none or it is about to expire.
    ///
    /// `fetch` yields the token and its lifetime.
    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(String, Duration)>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(token) = slot.as_ref()
            && token.expires_at > Instant::now() + self.margin
        {
            return Ok(token.value.clone());
        }

        let (value, ttl) = fetch().await?;
        debug!(ttl_secs = ttl.as_secs(), "Access token refreshed");
        *slot = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + ttl,
        });
        Ok(value)
    }

    /// Drop the cached token so the next call refreshes.
    pub async fn invalidate(&self) {
        self.slot.lock().await.take();
    }
}

impl Default for AccessTokenCache {
    fn default() -> Self {
        Self::new()
    }
}
