//! Configuration update events.

use tokio::sync::broadcast;

use super::AppConfig;

/// Events broadcast when the configuration snapshot changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigUpdateEvent {
    /// The channel list or the outbound proxy changed; channel clients must be rebuilt.
    ChannelsUpdated,
    /// Feature switches changed.
    FeaturesUpdated,
    /// Emby connection settings changed.
    EmbyUpdated,
    /// Daily schedule settings changed.
    ScheduleUpdated,
    /// Anything else (library tuning, stats, server settings).
    GlobalUpdated,
}

impl ConfigUpdateEvent {
    /// Get a description of the event for logging.
    pub fn description(&self) -> &'static str {
        match self {
            Self::ChannelsUpdated => "Notification channels updated",
            Self::FeaturesUpdated => "Feature flags updated",
            Self::EmbyUpdated => "Emby connection updated",
            Self::ScheduleUpdated => "Daily schedule updated",
            Self::GlobalUpdated => "Global config updated",
        }
    }

    /// Events describing the difference between two snapshots.
    pub fn diff(old: &AppConfig, new: &AppConfig) -> Vec<Self> {
        let mut events = Vec::new();
        if old.notification != new.notification || old.proxy != new.proxy {
            events.push(Self::ChannelsUpdated);
        }
        if old.features != new.features {
            events.push(Self::FeaturesUpdated);
        }
        if old.emby != new.emby {
            events.push(Self::EmbyUpdated);
        }
        if old.bot != new.bot {
            events.push(Self::ScheduleUpdated);
        }
        if old.library != new.library
            || old.server != new.server
            || old.stats != new.stats
            || old.logging != new.logging
        {
            events.push(Self::GlobalUpdated);
        }
        events
    }
}

/// Default channel capacity for config update events.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Broadcaster for configuration update events.
#[derive(Clone)]
pub struct ConfigEventBroadcaster {
    sender: broadcast::Sender<ConfigUpdateEvent>,
}

impl ConfigEventBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigUpdateEvent> {
        self.sender.subscribe()
    }

    /// Publish a configuration update event.
    ///
    /// Returns the number of receivers that received the event.
    pub fn publish(&self, event: ConfigUpdateEvent) -> usize {
        tracing::debug!("Publishing config event: {}", event.description());
        // send() returns Err if there are no receivers, which is fine
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ConfigEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
