//! Read-only access to playback statistics.
//!
//! The tables belong to the Playback Reporting plugin (`PlaybackActivity`) and to the
//! dashboard (`users_meta`); this module only queries them.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::Result;

/// One day of playback activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyDigest {
    pub date: Option<NaiveDate>,
    pub play_count: u64,
    /// User ids with at least one play that day.
    pub active_users: Vec<String>,
    /// Most played items, `(name, plays)`.
    pub top_items: Vec<(String, u64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlayRecord {
    pub user_id: String,
    pub item_name: String,
    pub item_type: Option<String>,
    pub device_name: Option<String>,
    pub client_name: Option<String>,
    /// Raw `DateCreated` text as stored by the plugin.
    pub played_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExpiredAccount {
    pub user_id: String,
    pub expire_date: String,
}

#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn daily_digest(&self, day: NaiveDate) -> Result<DailyDigest>;

    async fn recent_plays(&self, limit: u32) -> Result<Vec<PlayRecord>>;

    /// Accounts whose expiry date is strictly before `today`.
    async fn expired_accounts(&self, today: NaiveDate) -> Result<Vec<ExpiredAccount>>;
}

/// SQLite implementation of [`StatsStore`].
pub struct SqliteStatsStore {
    pool: SqlitePool,
}

impl SqliteStatsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open `database_url` read-only.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .read_only(true)
            .busy_timeout(Duration::from_secs(20));
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl StatsStore for SqliteStatsStore {
    async fn daily_digest(&self, day: NaiveDate) -> Result<DailyDigest> {
        let day_str = day.format("%Y-%m-%d").to_string();

        let (play_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM PlaybackActivity WHERE substr(DateCreated, 1, 10) = ?",
        )
        .bind(&day_str)
        .fetch_one(&self.pool)
        .await?;

        let users: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT UserId FROM PlaybackActivity
            WHERE substr(DateCreated, 1, 10) = ? AND UserId IS NOT NULL AND UserId != ''
            ORDER BY UserId
            "#,
        )
        .bind(&day_str)
        .fetch_all(&self.pool)
        .await?;

        let top: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT ItemName, COUNT(*) AS plays FROM PlaybackActivity
            WHERE substr(DateCreated, 1, 10) = ? AND ItemName IS NOT NULL
            GROUP BY ItemName
            ORDER BY plays DESC, ItemName
            LIMIT 3
            "#,
        )
        .bind(&day_str)
        .fetch_all(&self.pool)
        .await?;

        Ok(DailyDigest {
            date: Some(day),
            play_count: play_count.max(0) as u64,
            active_users: users.into_iter().map(|(id,)| id).collect(),
            top_items: top
                .into_iter()
                .map(|(name, plays)| (name, plays.max(0) as u64))
                .collect(),
        })
    }

    async fn recent_plays(&self, limit: u32) -> Result<Vec<PlayRecord>> {
        let rows = sqlx::query_as::<_, PlayRecord>(
            r#"
            SELECT
                UserId AS user_id,
                ItemName AS item_name,
                ItemType AS item_type,
                DeviceName AS device_name,
                ClientName AS client_name,
                DateCreated AS played_at
            FROM PlaybackActivity
            ORDER BY DateCreated DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn expired_accounts(&self, today: NaiveDate) -> Result<Vec<ExpiredAccount>> {
        let rows = sqlx::query_as::<_, ExpiredAccount>(
            r#"
            SELECT user_id, expire_date FROM users_meta
            WHERE expire_date IS NOT NULL AND expire_date != '' AND substr(expire_date, 1, 10) < ?
            ORDER BY user_id
            "#,
        )
        .bind(today.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
