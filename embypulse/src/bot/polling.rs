//! Telegram long-poll loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::commands::{CommandRouter, command_specs};
use crate::Result;
use crate::notification::channels::{BotCommandSpec, TelegramChannel, Update};

/// Wait after a failed `getUpdates`.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Where updates come from.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>>;

    async fn set_my_commands(&self, commands: &[BotCommandSpec]) -> Result<()>;
}

#[async_trait]
impl UpdateSource for TelegramChannel {
    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        TelegramChannel::get_updates(self, offset).await
    }

    async fn set_my_commands(&self, commands: &[BotCommandSpec]) -> Result<()> {
        TelegramChannel::set_my_commands(self, commands).await
    }
}

pub struct TelegramPoller {
    source: Arc<dyn UpdateSource>,
    router: Arc<CommandRouter>,
    /// Only this chat is answered; empty answers everyone.
    admin_chat: String,
    offset: i64,
}

impl TelegramPoller {
    pub fn new(source: Arc<dyn UpdateSource>, router: Arc<CommandRouter>, admin_chat: impl Into<String>) -> Self {
        Self {
            source,
            router,
            admin_chat: admin_chat.into(),
            offset: 0,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        match self.source.set_my_commands(&command_specs()).await {
            Ok(()) => debug!("Bot commands registered"),
            Err(e) => warn!(error = %e, "Failed to register bot commands"),
        }
        info!(admin_chat = %self.admin_chat, "Telegram polling started");

        loop {
            let updates = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.source.get_updates(self.offset) => result,
            };

            match updates {
                Ok(updates) => {
                    for update in updates {
                        self.handle_update(update).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, kind = e.kind(), "getUpdates failed, backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }
        info!("Telegram polling stopped");
    }

    async fn handle_update(&mut self, update: Update) {
        self.offset = self.offset.max(update.update_id + 1);

        let Some(message) = update.message else {
            return;
        };
        let chat_id = message.chat.id.to_string();
        if !self.admin_chat.is_empty() && chat_id != self.admin_chat {
            debug!(chat_id = %chat_id, "Ignoring message from non-admin chat");
            return;
        }
        let Some(text) = message.text else {
            return;
        };

        // Handlers run in their own task so a panic cannot end the poll loop.
        let router = self.router.clone();
        let recipient = chat_id.clone();
        let handler =
            tokio::spawn(async move { router.handle_message("telegram", &recipient, &text).await });

        match handler.await {
            Ok(Some(result)) if !result.success => {
                warn!(chat_id = %chat_id, error = ?result.error, "Command reply failed");
            }
            Ok(_) => {}
            Err(e) if e.is_panic() => error!(chat_id = %chat_id, "Command handler panicked"),
            Err(e) => warn!(chat_id = %chat_id, error = %e, "Command handler task cancelled"),
        }
    }
}
