//! Service object owning the queue, dispatcher and background tasks.
//!
//! Long-lived tasks (debounce loop, Telegram polling, daily job, config listener) share
//! one cancellation token. Polling and the daily job run under child tokens so they can be
//! restarted when their settings change.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bot::{CommandRouter, DailyScheduler, TelegramPoller};
use crate::config::{ConfigService, ConfigUpdateEvent};
use crate::emby::{EmbyClient, MediaSource, ServerQueries};
use crate::library::{DebounceConfig, DebounceScheduler, LibraryPipeline, PendingQueue};
use crate::notification::channels::TelegramChannel;
use crate::notification::{Dispatcher, NotificationChannel, PosterResolver};
use crate::playback::{GeoLocator, IpApiLocator, PlaybackNotifier};
use crate::stats::StatsStore;
use crate::utils::http_client::build_client;
use crate::webhook::WebhookEvent;

/// Default shutdown timeout.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Poster downloads and geolocation.
const AUX_HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// External collaborators of the service.
pub struct ServiceDeps {
    pub source: Arc<dyn MediaSource>,
    pub queries: Arc<dyn ServerQueries>,
    pub stats: Option<Arc<dyn StatsStore>>,
    pub locator: Arc<dyn GeoLocator>,
    /// Emby client whose settings follow config updates.
    pub emby: Option<Arc<EmbyClient>>,
}

impl ServiceDeps {
    /// Everything backed by one Emby client.
    pub fn from_emby(emby: Arc<EmbyClient>, stats: Option<Arc<dyn StatsStore>>, http: Client) -> Self {
        Self {
            source: emby.clone(),
            queries: emby.clone(),
            stats,
            locator: Arc::new(IpApiLocator::new(http)),
            emby: Some(emby),
        }
    }
}

struct RestartableTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct PulseService {
    config: Arc<ConfigService>,
    queries: Arc<dyn ServerQueries>,
    stats: Option<Arc<dyn StatsStore>>,
    emby: Option<Arc<EmbyClient>>,
    queue: Arc<PendingQueue>,
    dispatcher: Arc<Dispatcher>,
    pipeline: Arc<LibraryPipeline>,
    playback: Arc<PlaybackNotifier>,
    commands: Arc<CommandRouter>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    poller: Mutex<Option<RestartableTask>>,
    daily: Mutex<Option<RestartableTask>>,
}

impl PulseService {
    pub fn new(config: Arc<ConfigService>, deps: ServiceDeps) -> Arc<Self> {
        let snapshot = config.snapshot();
        let http = build_client(&snapshot.proxy, AUX_HTTP_TIMEOUT);

        let dispatcher = Arc::new(Dispatcher::new(
            PosterResolver::new(deps.source.clone(), http),
            snapshot.notification.send_timeout(),
        ));
        let pipeline = Arc::new(LibraryPipeline::new(
            config.clone(),
            deps.source.clone(),
            dispatcher.clone(),
        ));
        let playback = Arc::new(PlaybackNotifier::new(
            config.clone(),
            deps.locator.clone(),
            dispatcher.clone(),
        ));
        let commands = Arc::new(CommandRouter::new(
            config.clone(),
            deps.queries.clone(),
            deps.stats.clone(),
            dispatcher.clone(),
        ));

        let service = Arc::new(Self {
            config,
            queries: deps.queries,
            stats: deps.stats,
            emby: deps.emby,
            queue: Arc::new(PendingQueue::new()),
            dispatcher,
            pipeline,
            playback,
            commands,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            poller: Mutex::new(None),
            daily: Mutex::new(None),
        });
        service.rebuild_channels();
        service
    }

    pub fn config(&self) -> &Arc<ConfigService> {
        &self.config
    }

    pub fn queue(&self) -> &Arc<PendingQueue> {
        &self.queue
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn commands(&self) -> &Arc<CommandRouter> {
        &self.commands
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Start the background tasks.
    pub fn start(self: &Arc<Self>) {
        info!("Starting EmbyPulse services");
        let library = self.config.snapshot().library.clone();

        let debounce = DebounceScheduler::new(
            self.queue.clone(),
            self.pipeline.clone(),
            DebounceConfig {
                poll_interval: library.poll_interval(),
                debounce_window: library.debounce_window(),
            },
        )
        .spawn(self.cancel.clone());

        let listener = self.spawn_config_listener();
        self.tasks.lock().extend([debounce, listener]);

        self.restart_poller();
        self.restart_daily();
        info!("EmbyPulse services started");
    }

    /// Route a decoded webhook.
    pub fn ingest(&self, event: WebhookEvent) {
        match event {
            WebhookEvent::Library(event) => {
                let id = event.id.clone();
                if self.queue.enqueue(event) {
                    debug!(item_id = %id, pending = self.queue.len(), "Library event queued");
                } else {
                    debug!(item_id = %id, "Library event already pending");
                }
            }
            WebhookEvent::Playback(event) => {
                let playback = self.playback.clone();
                tokio::spawn(async move {
                    playback.notify(&event).await;
                });
            }
            WebhookEvent::Ignored(name) => debug!(event = %name, "Webhook event ignored"),
        }
    }

    /// Rebuild channel clients from the current config.
    pub fn rebuild_channels(&self) {
        let config = self.config.snapshot();
        let send_timeout = config.notification.send_timeout();
        let channels: Vec<Arc<dyn NotificationChannel>> = config
            .notification
            .channels
            .iter()
            .map(|c| c.build(&config.proxy, send_timeout))
            .collect();
        self.dispatcher.replace_channels(channels);
    }

    fn spawn_config_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let mut receiver = self.config.subscribe();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Config event handler shutting down");
                        break;
                    }
                    result = receiver.recv() => match result {
                        Ok(event) => service.apply_config_event(&event),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Config events lagged, reapplying everything");
                            for event in [
                                ConfigUpdateEvent::ChannelsUpdated,
                                ConfigUpdateEvent::EmbyUpdated,
                                ConfigUpdateEvent::ScheduleUpdated,
                            ] {
                                service.apply_config_event(&event);
                            }
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        })
    }

    fn apply_config_event(self: &Arc<Self>, event: &ConfigUpdateEvent) {
        info!(event = event.description(), "Applying config update");
        match event {
            ConfigUpdateEvent::ChannelsUpdated => {
                self.rebuild_channels();
                self.restart_poller();
            }
            ConfigUpdateEvent::FeaturesUpdated => self.restart_poller(),
            ConfigUpdateEvent::EmbyUpdated => {
                if let Some(emby) = &self.emby {
                    emby.update_settings(&self.config.snapshot().emby);
                }
            }
            ConfigUpdateEvent::ScheduleUpdated => self.restart_daily(),
            ConfigUpdateEvent::GlobalUpdated => {}
        }
    }

    /// (Re)start Telegram polling when the bot is enabled and Telegram is configured.
    fn restart_poller(&self) {
        let mut slot = self.poller.lock();
        if let Some(task) = slot.take() {
            task.cancel.cancel();
        }
        if self.cancel.is_cancelled() {
            return;
        }

        let config = self.config.snapshot();
        if !config.features.enable_bot {
            debug!("Bot disabled, Telegram polling not started");
            return;
        }
        let Some(telegram) = config
            .notification
            .telegram()
            .filter(|t| t.enabled && !t.bot_token.is_empty())
        else {
            debug!("Telegram not configured, polling not started");
            return;
        };

        let channel = Arc::new(TelegramChannel::new(
            telegram.clone(),
            build_client(&config.proxy, config.notification.send_timeout()),
        ));
        let cancel = self.cancel.child_token();
        let handle = TelegramPoller::new(channel, self.commands.clone(), telegram.chat_id.clone())
            .spawn(cancel.clone());
        *slot = Some(RestartableTask { cancel, handle });
    }

    fn restart_daily(&self) {
        let mut slot = self.daily.lock();
        if let Some(task) = slot.take() {
            task.cancel.cancel();
        }
        if self.cancel.is_cancelled() {
            return;
        }

        let cancel = self.cancel.child_token();
        let handle = DailyScheduler::new(
            self.config.clone(),
            self.queries.clone(),
            self.stats.clone(),
            self.commands.clone(),
            self.dispatcher.clone(),
        )
        .spawn(cancel.clone());
        *slot = Some(RestartableTask { cancel, handle });
    }

    pub async fn stop(&self) {
        self.stop_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Cancel every task and wait for them, up to `timeout`.
    pub async fn stop_with_timeout(&self, timeout: Duration) {
        info!(timeout = ?timeout, pending = self.queue.len(), "Shutting down services");
        self.cancel.cancel();

        let mut handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        handles.extend(self.poller.lock().take().map(|t| t.handle));
        handles.extend(self.daily.lock().take().map(|t| t.handle));

        if tokio::time::timeout(timeout, join_all(handles)).await.is_err() {
            warn!("Shutdown timeout reached, abandoning remaining tasks");
        }
        info!("Services shut down");
    }
}
