//! Interactive bot commands.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use tracing::{debug, error, info};

use crate::config::ConfigService;
use crate::emby::ServerQueries;
use crate::notification::channels::BotCommandSpec;
use crate::notification::{DeliveryResult, Dispatcher, NotificationUnit, PosterRef};
use crate::stats::StatsStore;
use crate::{Error, Result};

const SEARCH_LIMIT: u32 = 10;
const LATEST_LIMIT: u32 = 5;
const RECENT_LIMIT: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Search(String),
    Stats,
    Now,
    Latest,
    Recent,
    Check,
    Help,
    Start,
}

impl Command {
    /// Parse `/name[@bot] [args]`. Anything else is not a command.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let body = text.strip_prefix('/')?;
        let (head, rest) = match body.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (body, ""),
        };
        let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();

        match name.as_str() {
            "search" => Some(Self::Search(rest.to_string())),
            "stats" => Some(Self::Stats),
            "now" => Some(Self::Now),
            "latest" => Some(Self::Latest),
            "recent" => Some(Self::Recent),
            "check" => Some(Self::Check),
            "help" => Some(Self::Help),
            "start" => Some(Self::Start),
            _ => None,
        }
    }

    /// WeCom menu keys are command names, optionally with the leading slash.
    pub fn from_menu_key(key: &str) -> Option<Self> {
        Self::parse(&format!("/{}", key.trim().trim_start_matches('/')))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Search(_) => "search",
            Self::Stats => "stats",
            Self::Now => "now",
            Self::Latest => "latest",
            Self::Recent => "recent",
            Self::Check => "check",
            Self::Help => "help",
            Self::Start => "start",
        }
    }
}

/// Commands advertised through `setMyCommands`.
pub fn command_specs() -> Vec<BotCommandSpec> {
    [
        ("stats", "📊 Daily report"),
        ("now", "🟢 Now playing"),
        ("latest", "🆕 Recently added"),
        ("recent", "📜 Playback history"),
        ("search", "🔍 Search the library"),
        ("check", "📡 Server check"),
        ("help", "🤖 Help"),
    ]
    .into_iter()
    .map(|(command, description)| BotCommandSpec {
        command: command.to_string(),
        description: description.to_string(),
    })
    .collect()
}

fn help_lines() -> Vec<String> {
    vec![
        "/stats - today's playback report".to_string(),
        "/now - sessions playing right now".to_string(),
        "/latest - recently added movies and episodes".to_string(),
        "/recent - latest playback history".to_string(),
        "/search <keyword> - find movies and series".to_string(),
        "/check - server connectivity".to_string(),
    ]
}

/// Runs commands against the server and statistics, and replies through the dispatcher.
pub struct CommandRouter {
    config: Arc<ConfigService>,
    queries: Arc<dyn ServerQueries>,
    stats: Option<Arc<dyn StatsStore>>,
    dispatcher: Arc<Dispatcher>,
}

impl CommandRouter {
    pub fn new(
        config: Arc<ConfigService>,
        queries: Arc<dyn ServerQueries>,
        stats: Option<Arc<dyn StatsStore>>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            config,
            queries,
            stats,
            dispatcher,
        }
    }

    /// Handle a chat message. Non-command text is ignored.
    pub async fn handle_message(
        &self,
        channel_type: &str,
        recipient: &str,
        text: &str,
    ) -> Option<DeliveryResult> {
        let command = Command::parse(text)?;
        debug!(command = command.name(), channel = channel_type, "Bot command received");
        let unit = self.respond(&command).await;
        Some(self.dispatcher.reply(channel_type, recipient, &unit).await)
    }

    /// Handle a WeCom menu click; the reply goes to the clicking user.
    pub async fn handle_menu_click(&self, key: &str, user: &str) -> Option<DeliveryResult> {
        let command = Command::from_menu_key(key)?;
        debug!(command = command.name(), user, "Menu click received");
        let unit = self.respond(&command).await;
        Some(self.dispatcher.reply("wecom", user, &unit).await)
    }

    /// The reply for `command`; failures become a short apology.
    pub async fn respond(&self, command: &Command) -> NotificationUnit {
        match self.run(command).await {
            Ok(unit) => unit,
            Err(e) => {
                error!(command = command.name(), error = %e, kind = e.kind(), "Bot command failed");
                NotificationUnit::reply(
                    "❌ Request failed",
                    vec![format!("/{} could not be completed, please try again later.", command.name())],
                )
            }
        }
    }

    async fn run(&self, command: &Command) -> Result<NotificationUnit> {
        match command {
            Command::Search(keyword) => self.search(keyword).await,
            Command::Stats => self.stats_unit().await,
            Command::Now => self.now_playing().await,
            Command::Latest => self.latest().await,
            Command::Recent => self.recent().await,
            Command::Check => self.check().await,
            Command::Help => Ok(NotificationUnit::reply("🤖 EmbyPulse bot", help_lines())),
            Command::Start => {
                let mut lines = vec!["Welcome! Available commands:".to_string()];
                lines.extend(help_lines());
                Ok(NotificationUnit::reply("👋 EmbyPulse", lines))
            }
        }
    }

    fn stats_store(&self) -> Result<&Arc<dyn StatsStore>> {
        self.stats
            .as_ref()
            .ok_or_else(|| Error::config("statistics database is not configured"))
    }

    /// Id to display name, best effort.
    async fn user_names(&self) -> HashMap<String, String> {
        match self.queries.list_users().await {
            Ok(users) => users.into_iter().map(|u| (u.id, u.name)).collect(),
            Err(e) => {
                debug!(error = %e, "User list unavailable, showing ids");
                HashMap::new()
            }
        }
    }

    /// Today's digest; also used by the daily report.
    pub async fn stats_unit(&self) -> Result<NotificationUnit> {
        let store = self.stats_store()?;
        let today = Local::now().date_naive();
        let digest = store.daily_digest(today).await?;
        let names = self.user_names().await;

        let users: Vec<&str> = digest
            .active_users
            .iter()
            .map(|id| names.get(id).map(String::as_str).unwrap_or(id))
            .collect();
        let users = if users.is_empty() {
            "none".to_string()
        } else {
            users.join(", ")
        };

        let mut lines = vec![
            format!("▶️ Plays today: {}", digest.play_count),
            format!("👥 Active users: {}", users),
        ];
        for (rank, (name, plays)) in digest.top_items.iter().enumerate() {
            lines.push(format!("{}. {} ({} plays)", rank + 1, name, plays));
        }

        let mut unit = NotificationUnit::reply("📊 Daily report", lines);
        if let Some(cover) = self
            .config
            .snapshot()
            .bot
            .report_cover_url
            .clone()
            .filter(|url| !url.trim().is_empty())
        {
            unit = unit.with_poster(PosterRef::Url(cover));
        }
        Ok(unit)
    }

    async fn search(&self, keyword: &str) -> Result<NotificationUnit> {
        if keyword.is_empty() {
            return Ok(NotificationUnit::reply(
                "🔍 Search",
                vec!["Usage: /search <keyword>".to_string()],
            ));
        }
        let items = self.queries.search(keyword, SEARCH_LIMIT).await?;
        if items.is_empty() {
            return Ok(NotificationUnit::reply(
                "🔍 Search",
                vec![format!("No results for \"{keyword}\"")],
            ));
        }
        let lines = items
            .iter()
            .map(|item| match item.production_year {
                Some(year) => format!("🎬 {} ({}) · {}", item.name, year, item.item_type),
                None => format!("🎬 {} · {}", item.name, item.item_type),
            })
            .collect();
        Ok(NotificationUnit::reply(
            format!("🔍 Results for \"{keyword}\" ({})", items.len()),
            lines,
        ))
    }

    async fn now_playing(&self) -> Result<NotificationUnit> {
        let sessions = self.queries.now_playing().await?;
        if sessions.is_empty() {
            return Ok(NotificationUnit::reply("🟢 Nothing is playing right now", Vec::new()));
        }
        let mut lines = Vec::new();
        for session in &sessions {
            let title = session
                .now_playing_item
                .as_ref()
                .map(|item| item.display_name())
                .unwrap_or_default();
            lines.push(format!(
                "👤 {} | 📱 {}",
                session.user_name.as_deref().unwrap_or("unknown"),
                session.device_name.as_deref().unwrap_or("unknown")
            ));
            lines.push(format!("📺 {title}"));
            lines.push(format!("🔄 Progress: {}%", session.progress_percent().unwrap_or(0)));
        }
        Ok(NotificationUnit::reply(
            format!("🟢 Now playing ({})", sessions.len()),
            lines,
        ))
    }

    async fn latest(&self) -> Result<NotificationUnit> {
        let items = self.queries.latest_items(LATEST_LIMIT).await?;
        let lines = items
            .iter()
            .map(|item| {
                let date = item
                    .date_created
                    .map(|d| d.with_timezone(&Local).format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "----------".to_string());
                format!("📅 {} | {}", date, item.display_name())
            })
            .collect();
        Ok(NotificationUnit::reply(
            format!("🆕 Recently added (top {LATEST_LIMIT})"),
            lines,
        ))
    }

    async fn recent(&self) -> Result<NotificationUnit> {
        let plays = self.stats_store()?.recent_plays(RECENT_LIMIT).await?;
        let names = self.user_names().await;
        let mut lines = Vec::new();
        for play in &plays {
            let user = names
                .get(&play.user_id)
                .map(String::as_str)
                .unwrap_or(&play.user_id);
            lines.push(format!("⏰ {} | {}", short_timestamp(&play.played_at), user));
            lines.push(format!("🎬 {}", play.item_name));
        }
        Ok(NotificationUnit::reply(
            format!("📜 Last {} plays", plays.len()),
            lines,
        ))
    }

    async fn check(&self) -> Result<NotificationUnit> {
        let started = Instant::now();
        let info = self.queries.system_info().await?;
        let latency = started.elapsed().as_millis();
        info!(latency_ms = latency as u64, server = %info.server_name, "Server check");

        Ok(NotificationUnit::reply(
            "✅ Server reachable",
            vec![
                format!("📡 Latency: {latency}ms"),
                format!("🖥️ Emby: {} ({})", info.server_name, info.version),
                format!("🏠 LAN: {}", info.lan_address().unwrap_or("unknown")),
                format!("🌍 WAN: {}", info.wan_address().unwrap_or("unknown")),
            ],
        ))
    }
}

/// `2026-03-01T12:34:56.000Z` → `03-01 12:34`; other formats pass through.
fn short_timestamp(raw: &str) -> String {
    let parts = raw
        .split_once(['T', ' '])
        .and_then(|(date, time)| Some((date.get(5..10)?, time.get(..5)?)));
    match parts {
        Some((day, minute)) => format!("{day} {minute}"),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;


    use super::*;
    use crate::config::AppConfig;
    use crate::emby::{MediaItem, SessionInfo, SystemInfo};
    use crate::notification::PosterResolver;
    use crate::stats::{DailyDigest, PlayRecord};
    use crate::test_support::{
        ChannelBehaviour, FakeMediaSource, FakeServer, FakeStats, RecordingChannel, as_channels,
        test_client,
    };

    struct Harness {
        router: CommandRouter,
        server: Arc<FakeServer>,
        stats: Arc<FakeStats>,
        telegram: Arc<RecordingChannel>,
        wecom: Arc<RecordingChannel>,
    }

    fn harness(with_stats: bool) -> Harness {
        let server = Arc::new(FakeServer::new());
        let stats = Arc::new(FakeStats::new());
        let dispatcher = Arc::new(Dispatcher::new(
            PosterResolver::new(Arc::new(FakeMediaSource::new()), test_client()),
            Duration::from_secs(60),
        ));
        let telegram = RecordingChannel::new("telegram", ChannelBehaviour::Succeed);
        let wecom = RecordingChannel::enterprise("wecom");
        dispatcher.replace_channels(as_channels(&[&telegram, &wecom]));
        let store: Option<Arc<dyn StatsStore>> = if with_stats {
            Some(stats.clone())
        } else {
            None
        };
        let router = CommandRouter::new(
            Arc::new(ConfigService::new(AppConfig::default())),
            server.clone(),
            store,
            dispatcher,
        );
        Harness {
            router,
            server,
            stats,
            telegram,
            wecom,
        }
    }

    fn item(name: &str, year: Option<i32>) -> MediaItem {
        MediaItem {
            id: name.to_lowercase(),
            name: name.to_string(),
            item_type: "Movie".to_string(),
            production_year: year,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/stats"), Some(Command::Stats));
        assert_eq!(Command::parse("  /NOW  "), Some(Command::Now));
        assert_eq!(Command::parse("/latest@PulseBot"), Some(Command::Latest));
        assert_eq!(
            Command::parse("/search@PulseBot  the expanse "),
            Some(Command::Search("the expanse".to_string()))
        );
        assert_eq!(Command::parse("/search"), Some(Command::Search(String::new())));
        assert_eq!(Command::parse("hello"), None);
        assert_eq!(Command::parse("/unknown"), None);
    }

    #[test]
    fn test_menu_keys() {
        assert_eq!(Command::from_menu_key("check"), Some(Command::Check));
        assert_eq!(Command::from_menu_key("/recent"), Some(Command::Recent));
        assert_eq!(Command::from_menu_key("settings"), None);
    }

    #[test]
    fn test_command_specs_are_lowercase() {
        let specs = command_specs();
        assert!(specs.iter().all(|s| s.command.chars().all(|c| c.is_ascii_lowercase())));
        assert!(specs.iter().any(|s| s.command == "search"));
    }

    #[test]
    fn test_short_timestamp() {
        assert_eq!(short_timestamp("2026-03-01T12:34:56.0000000Z"), "03-01 12:34");
        assert_eq!(short_timestamp("2026-03-01 08:05:00"), "03-01 08:05");
        assert_eq!(short_timestamp("yesterday"), "yesterday");
    }

    #[tokio::test]
    async fn test_search_reply() {
        let h = harness(true);
        h.server.items.lock().extend([item("Dune", Some(2021)), item("Arrival", None)]);

        let result = h.router.handle_message("telegram", "42", "/search dune").await.unwrap();

        assert!(result.success);
        let sent = h.telegram.sent();
        assert_eq!(sent[0].recipient, "42");
        assert!(sent[0].text().contains("Dune (2021)"));
        assert!(!sent[0].text().contains("Arrival"));
    }

    #[tokio::test]
    async fn test_non_command_is_ignored() {
        let h = harness(true);
        assert!(h.router.handle_message("telegram", "42", "hi there").await.is_none());
        assert!(h.telegram.sent().is_empty());
    }

    #[tokio::test]
    async fn test_stats_resolves_user_names() {
        let h = harness(true);
        h.server.add_user("u1", "alice");
        *h.stats.digest.lock() = DailyDigest {
            date: None,
            play_count: 7,
            active_users: vec!["u1".to_string(), "u2".to_string()],
            top_items: vec![("Dune".to_string(), 3)],
        };

        let unit = h.router.respond(&Command::Stats).await;

        assert_eq!(unit.headline, "📊 Daily report");
        assert!(unit.lines.contains(&"▶️ Plays today: 7".to_string()));
        assert!(unit.lines.contains(&"👥 Active users: alice, u2".to_string()));
        assert!(unit.lines.contains(&"1. Dune (3 plays)".to_string()));
    }

    #[tokio::test]
    async fn test_stats_without_store_is_short_failure() {
        let h = harness(false);
        let unit = h.router.respond(&Command::Stats).await;
        assert_eq!(unit.headline, "❌ Request failed");
        assert!(!unit.lines[0].contains("statistics database"));
    }

    #[tokio::test]
    async fn test_now_playing() {
        let h = harness(true);
        let unit = h.router.respond(&Command::Now).await;
        assert_eq!(unit.headline, "🟢 Nothing is playing right now");

        h.server.sessions.lock().push(SessionInfo {
            user_name: Some("bob".to_string()),
            device_name: Some("iPad".to_string()),
            now_playing_item: Some(MediaItem {
                name: "Pilot".to_string(),
                series_name: Some("Severance".to_string()),
                run_time_ticks: Some(100),
                ..Default::default()
            }),
            ..Default::default()
        });
        let unit = h.router.respond(&Command::Now).await;
        assert_eq!(unit.headline, "🟢 Now playing (1)");
        assert!(unit.lines.contains(&"📺 Severance - Pilot".to_string()));
        assert!(unit.lines.contains(&"🔄 Progress: 0%".to_string()));
    }

    #[tokio::test]
    async fn test_recent_plays() {
        let h = harness(true);
        h.server.add_user("u1", "alice");
        h.stats.plays.lock().push(PlayRecord {
            user_id: "u1".to_string(),
            item_name: "Dune".to_string(),
            item_type: Some("Movie".to_string()),
            device_name: None,
            client_name: None,
            played_at: "2026-03-01T20:15:00".to_string(),
        });

        let unit = h.router.respond(&Command::Recent).await;
        assert_eq!(unit.lines, vec!["⏰ 03-01 20:15 | alice", "🎬 Dune"]);
    }

    #[tokio::test]
    async fn test_check_reports_addresses() {
        let h = harness(true);
        *h.server.info.lock() = SystemInfo {
            server_name: "home".to_string(),
            version: "4.8.0".to_string(),
            local_addresses: vec!["http://192.168.1.2:8096".to_string()],
            ..Default::default()
        };

        let unit = h.router.respond(&Command::Check).await;
        assert!(unit.lines.contains(&"🖥️ Emby: home (4.8.0)".to_string()));
        assert!(unit.lines.contains(&"🏠 LAN: http://192.168.1.2:8096".to_string()));
        assert!(unit.lines.contains(&"🌍 WAN: unknown".to_string()));
    }

    #[tokio::test]
    async fn test_server_error_becomes_failure_reply() {
        let h = harness(true);
        h.server.go_offline();
        let unit = h.router.respond(&Command::Check).await;
        assert_eq!(unit.headline, "❌ Request failed");
        assert_eq!(unit.lines, vec!["/check could not be completed, please try again later."]);
    }

    #[tokio::test]
    async fn test_menu_click_replies_on_wecom() {
        let h = harness(true);
        let result = h.router.handle_menu_click("help", "zhangsan").await.unwrap();

        assert!(result.success);
        assert!(h.telegram.sent().is_empty());
        let sent = h.wecom.sent();
        assert_eq!(sent[0].recipient, "zhangsan");
        assert!(sent[0].text().contains("/stats"));
    }
}
