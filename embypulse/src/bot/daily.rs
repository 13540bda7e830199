//! Daily housekeeping and digest.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use chrono_tz::Tz;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::commands::CommandRouter;
use crate::config::{BotConfig, ConfigService};
use crate::emby::ServerQueries;
use crate::notification::Dispatcher;
use crate::stats::StatsStore;
use crate::{Error, Result};

/// Wait before re-reading an unusable schedule.
const INVALID_SCHEDULE_RETRY: Duration = Duration::from_secs(60);

pub fn parse_schedule(expression: &str) -> Result<cron::Schedule> {
    cron::Schedule::from_str(expression.trim())
        .map_err(|e| Error::config(format!("invalid cron expression '{expression}': {e}")))
}

/// `None` means the host's local time.
pub fn parse_timezone(name: Option<&str>) -> Result<Option<Tz>> {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => name
            .parse::<Tz>()
            .map(Some)
            .map_err(|_| Error::config(format!("'{name}' is not a valid IANA timezone"))),
        None => Ok(None),
    }
}

/// Next fire time strictly after `now`.
pub fn next_fire(config: &BotConfig, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    let schedule = parse_schedule(&config.daily_cron)?;
    let next = match parse_timezone(config.timezone.as_deref())? {
        Some(tz) => schedule
            .after(&now.with_timezone(&tz))
            .next()
            .map(|t| t.with_timezone(&Utc)),
        None => schedule
            .after(&now.with_timezone(&Local))
            .next()
            .map(|t| t.with_timezone(&Utc)),
    };
    Ok(next)
}

/// Calendar date of `now` in the schedule's timezone.
pub fn schedule_date(config: &BotConfig, now: DateTime<Utc>) -> NaiveDate {
    match parse_timezone(config.timezone.as_deref()) {
        Ok(Some(tz)) => now.with_timezone(&tz).date_naive(),
        _ => now.with_timezone(&Local).date_naive(),
    }
}

pub struct DailyScheduler {
    config: Arc<ConfigService>,
    queries: Arc<dyn ServerQueries>,
    stats: Option<Arc<dyn StatsStore>>,
    router: Arc<CommandRouter>,
    dispatcher: Arc<Dispatcher>,
}

impl DailyScheduler {
    pub fn new(
        config: Arc<ConfigService>,
        queries: Arc<dyn ServerQueries>,
        stats: Option<Arc<dyn StatsStore>>,
        router: Arc<CommandRouter>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            config,
            queries,
            stats,
            router,
            dispatcher,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(self, cancel: CancellationToken) {
        let scheduler = Arc::new(self);
        loop {
            let bot = scheduler.config.snapshot().bot.clone();
            let wait = match next_fire(&bot, Utc::now()) {
                Ok(Some(next)) => {
                    info!(next = %next, cron = %bot.daily_cron, "Daily job scheduled");
                    (next - Utc::now()).to_std().unwrap_or(Duration::ZERO)
                }
                Ok(None) => {
                    warn!(cron = %bot.daily_cron, "Schedule has no upcoming fire time, daily job stopped");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Unusable daily schedule");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(INVALID_SCHEDULE_RETRY) => continue,
                    }
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            let today = schedule_date(&bot, Utc::now());
            scheduler.fire_in_task(today).await;
        }
        info!("Daily scheduler stopped");
    }

    /// Run [`Self::fire`] in its own task; a panic is logged and the schedule goes on.
    async fn fire_in_task(self: &Arc<Self>, today: NaiveDate) {
        let scheduler = Arc::clone(self);
        match tokio::spawn(async move { scheduler.fire(today).await }).await {
            Ok(disabled) => debug!(date = %today, disabled, "Daily job finished"),
            Err(e) if e.is_panic() => error!(date = %today, "Daily job panicked"),
            Err(e) => warn!(date = %today, error = %e, "Daily job task cancelled"),
        }
    }

    /// Housekeeping, then the digest. Returns how many accounts were disabled.
    pub async fn fire(&self, today: NaiveDate) -> usize {
        let disabled = self.disable_expired(today).await;

        if self.config.snapshot().features.enable_bot {
            match self.router.stats_unit().await {
                Ok(unit) => {
                    let results = self.dispatcher.broadcast(&unit).await;
                    info!(
                        delivered = results.iter().filter(|r| r.success).count(),
                        "Daily digest sent"
                    );
                }
                Err(e) => warn!(error = %e, "Daily digest unavailable"),
            }
        }
        disabled
    }

    async fn disable_expired(&self, today: NaiveDate) -> usize {
        let Some(stats) = &self.stats else {
            return 0;
        };
        let accounts = match stats.expired_accounts(today).await {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!(error = %e, "Failed to read account expiry dates");
                return 0;
            }
        };

        let mut disabled = 0;
        for account in accounts {
            match self.queries.disable_user(&account.user_id).await {
                Ok(()) => {
                    info!(user_id = %account.user_id, expired = %account.expire_date, "Disabled expired account");
                    disabled += 1;
                }
                Err(e) => warn!(user_id = %account.user_id, error = %e, "Failed to disable expired account"),
            }
        }
        disabled
    }
}
