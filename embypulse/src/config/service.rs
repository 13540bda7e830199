//! Configuration service implementation.
//!
//! The ConfigService hands out immutable snapshots of the current configuration,
//! re-reads the config file when it changes and broadcasts what changed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{ConfigEventBroadcaster, ConfigUpdateEvent};
use super::{AppConfig, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use crate::Result;

/// Configuration service providing snapshot access and update broadcasting.
pub struct ConfigService {
    path: Option<PathBuf>,
    current: RwLock<Arc<AppConfig>>,
    broadcaster: ConfigEventBroadcaster,
}

impl ConfigService {
    /// In-memory service without a backing file.
    pub fn new(config: AppConfig) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(config)),
            broadcaster: ConfigEventBroadcaster::new(),
        }
    }

    /// Load from the file named by `EMBYPULSE_CONFIG` (or the default path) and apply
    /// process environment overrides.
    pub async fn load_from_env() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        Self::load(path, process_env).await
    }

    /// Load from `path`; a missing file yields defaults.
    pub async fn load<F>(path: impl AsRef<Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = path.as_ref().to_path_buf();
        let config = read_config(&path, env).await?;

        Ok(Self {
            path: Some(path),
            current: RwLock::new(Arc::new(config)),
            broadcaster: ConfigEventBroadcaster::new(),
        })
    }

    /// Current configuration snapshot.
    pub fn snapshot(&self) -> Arc<AppConfig> {
        self.current.read().clone()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Subscribe to configuration update events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigUpdateEvent> {
        self.broadcaster.subscribe()
    }

    /// Validate `next`, swap it in and broadcast the changed sections. The old snapshot
    /// stays in place on error.
    pub fn replace(&self, next: AppConfig) -> Result<Vec<ConfigUpdateEvent>> {
        next.validate()?;

        let mut current = self.current.write();
        let events = ConfigUpdateEvent::diff(&current, &next);
        if events.is_empty() {
            return Ok(events);
        }
        *current = Arc::new(next);
        drop(current);

        for event in &events {
            info!("{}", event.description());
            self.broadcaster.publish(event.clone());
        }
        Ok(events)
    }

    /// Re-read the config file with process environment overrides.
    pub async fn reload(&self) -> Result<Vec<ConfigUpdateEvent>> {
        self.reload_with(process_env).await
    }

    pub async fn reload_with<F>(&self, env: F) -> Result<Vec<ConfigUpdateEvent>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };
        let next = read_config(path, env).await?;
        self.replace(next)
    }

    /// Reload whenever the file content changes, checking every `interval`.
    pub fn spawn_file_watcher(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let Some(path) = service.path.clone() else {
                return;
            };
            let mut last = tokio::fs::read_to_string(&path).await.ok();
            debug!(path = %path.display(), "Watching config file");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let content = tokio::fs::read_to_string(&path).await.ok();
                if content == last {
                    continue;
                }
                last = content;

                match service.reload().await {
                    Ok(events) => info!(changes = events.len(), "Config file reloaded"),
                    Err(e) => warn!(error = %e, "Config file rejected, keeping current settings"),
                }
            }
            debug!("Config file watcher stopped");
        })
    }
}

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

async fn read_config<F>(path: &Path, env: F) -> Result<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match tokio::fs::read_to_string(path).await {
        Ok(raw) => AppConfig::from_json(&raw)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "Config file not found, using defaults");
            AppConfig::default()
        }
        Err(e) => return Err(e.into()),
    };
    config.apply_overrides(env);
    config.validate()?;
    Ok(config)
}
