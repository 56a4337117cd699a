use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

use crate::db::models::{Entitlement, Feature, PaymentTransaction, Plan};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn init(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (\
                user_id INTEGER PRIMARY KEY,\
                is_premium INTEGER NOT NULL DEFAULT 0,\
                plan TEXT NOT NULL DEFAULT 'free',\
                daily_limit INTEGER NOT NULL DEFAULT 3,\
                created_at TEXT NOT NULL\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS usage_events (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                user_id INTEGER NOT NULL,\
                feature TEXT NOT NULL,\
                used_at TEXT NOT NULL\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_usage_events_user_feature_date \
             ON usage_events(user_id, feature, used_at);",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS payment_transactions (\
                tx_hash TEXT PRIMARY KEY,\
                user_id INTEGER NOT NULL,\
                amount REAL NOT NULL,\
                recorded_at TEXT NOT NULL\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_payment_transactions_user_id \
             ON payment_transactions(user_id);",
        )
        .execute(&pool)
        .await?;

        info!("Database tables created successfully");

        Ok(Database { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn find_user(&self, user_id: i64) -> Result<Option<Entitlement>> {
        let row = sqlx::query_as::<_, Entitlement>(
            "SELECT user_id, is_premium, plan, daily_limit, created_at \
             FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Lookup-or-insert for first-ever inbound messages. The insert uses
    /// ON CONFLICT DO NOTHING so a concurrent bootstrap for the same user
    /// settles on whichever row landed first.
    pub async fn find_or_create_user(
        &self,
        user_id: i64,
        free_daily_limit: i64,
    ) -> Result<Entitlement> {
        if let Some(existing) = self.find_user(user_id).await? {
            return Ok(existing);
        }

        sqlx::query(
            "INSERT INTO users (user_id, is_premium, plan, daily_limit, created_at) \
             VALUES (?, 0, 'free', ?, ?) \
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(free_daily_limit)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.find_user(user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("User {user_id} missing after insert"))
    }

    pub async fn upgrade_user(&self, user_id: i64, daily_limit: i64) -> Result<Entitlement> {
        sqlx::query(
            "UPDATE users SET is_premium = 1, plan = ?, daily_limit = ? WHERE user_id = ?",
        )
        .bind(Plan::Premium)
        .bind(daily_limit)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        self.find_user(user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("User {user_id} missing after upgrade"))
    }

    pub async fn count_usage_events(
        &self,
        user_id: i64,
        feature: Feature,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM usage_events \
             WHERE user_id = ? AND feature = ? AND used_at >= ? AND used_at < ?",
        )
        .bind(user_id)
        .bind(feature.as_str())
        .bind(window_start)
        .bind(window_end)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    pub async fn insert_usage_event(
        &self,
        user_id: i64,
        feature: Feature,
        used_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO usage_events (user_id, feature, used_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(feature.as_str())
            .bind(used_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn find_payment(&self, tx_hash: &str) -> Result<Option<PaymentTransaction>> {
        let row = sqlx::query_as::<_, PaymentTransaction>(
            "SELECT tx_hash, user_id, amount, recorded_at \
             FROM payment_transactions WHERE tx_hash = ?",
        )
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// The primary key on tx_hash is the authoritative at-most-once
    /// redemption point; a race-induced duplicate surfaces here as an error.
    pub async fn insert_payment(
        &self,
        tx_hash: &str,
        user_id: i64,
        amount: f64,
        recorded_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO payment_transactions (tx_hash, user_id, amount, recorded_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(tx_hash)
        .bind(user_id)
        .bind(amount)
        .bind(recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[allow(dead_code)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
