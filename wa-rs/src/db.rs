//! SQLite-backed store for users, sessions and the API usage log.
//!
//! All quota mutations are single SQL statements so the database provides the
//! atomicity: the per-call charge is an in-place `api_calls_used + 1` and the
//! monthly rollover writes counter and reset date in one `UPDATE`.

use crate::error::Result;
use chrono::{Datelike, NaiveDate};
use sqlx::SqlitePool;
use tracing::info;

/// Lifecycle status of a session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Inactive,
    Terminated,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Terminated => "terminated",
        }
    }
}

/// Identity and quota record for one user.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub password_hash: String,
    pub api_calls_used: i64,
    pub api_calls_limit: i64,
    pub limit_reset_date: Option<String>,
    pub created_at: String,
}

/// Ownership record for one automation session, decoupled from the live
/// client handle in the pool.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WaSession {
    pub id: i64,
    pub user_id: i64,
    pub session_id: String,
    pub name: Option<String>,
    pub status: String,
    pub created_at: String,
    pub last_active: Option<String>,
}

/// One append-only audit entry for a charged API call.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct UsageEntry {
    pub endpoint: Option<String>,
    pub method: Option<String>,
    pub timestamp: String,
}

/// First calendar day of the month after `date`. Quota periods are aligned to
/// calendar-month boundaries starting the 1st.
pub fn first_of_next_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).expect("valid calendar date")
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect and create the schema if it does not exist yet.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT,
                password_hash TEXT NOT NULL,
                api_calls_used INTEGER NOT NULL DEFAULT 0,
                api_calls_limit INTEGER NOT NULL DEFAULT 1000,
                limit_reset_date TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS whatsapp_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                session_id TEXT NOT NULL UNIQUE,
                name TEXT,
                status TEXT NOT NULL DEFAULT 'inactive',
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                last_active TEXT,
                FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_user_status \
             ON whatsapp_sessions (user_id, status)",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS api_usage_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                endpoint TEXT,
                method TEXT,
                timestamp TEXT NOT NULL DEFAULT (datetime('now')),
                FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_usage_user_time \
             ON api_usage_log (user_id, timestamp)",
        )
        .execute(&pool)
        .await?;

        info!("Database tables initialized");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Health check - verify database connectivity
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ----- users -----

    pub async fn insert_user(
        &self,
        username: &str,
        password_hash: &str,
        email: Option<&str>,
        api_calls_limit: i64,
        limit_reset_date: &str,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (username, password_hash, email, api_calls_used, api_calls_limit, limit_reset_date)
            VALUES (?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(username)
        .bind(password_hash)
        .bind(email)
        .bind(api_calls_limit)
        .bind(limit_reset_date)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    pub async fn find_user_by_id(&self, id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    /// Charge one API call. In-place increment so concurrent charges are
    /// never lost to a read-modify-write race.
    pub async fn increment_api_calls(&self, user_id: i64) -> Result<()> {
        sqlx::query("UPDATE users SET api_calls_used = api_calls_used + 1 WHERE id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Start a new billing period: zero the counter and move the reset date,
    /// as a single update.
    pub async fn reset_api_usage(&self, user_id: i64, reset_date: &str) -> Result<()> {
        sqlx::query("UPDATE users SET api_calls_used = 0, limit_reset_date = ? WHERE id = ?")
            .bind(reset_date)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ----- sessions -----

    /// Sessions counting against the per-user ceiling. Terminated records
    /// keep their row but free their slot.
    pub async fn count_live_sessions(&self, user_id: i64) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM whatsapp_sessions \
             WHERE user_id = ? AND status IN ('active', 'inactive')",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0)
    }

    /// Session identifiers are a global namespace, not per-user.
    pub async fn session_exists(&self, session_id: &str) -> Result<bool> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM whatsapp_sessions WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count.0 > 0)
    }

    pub async fn insert_session(
        &self,
        user_id: i64,
        session_id: &str,
        name: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO whatsapp_sessions (user_id, session_id, name, status)
            VALUES (?, ?, ?, 'inactive')
            "#,
        )
        .bind(user_id)
        .bind(session_id)
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_session(&self, session_id: &str) -> Result<Option<WaSession>> {
        let session =
            sqlx::query_as::<_, WaSession>("SELECT * FROM whatsapp_sessions WHERE session_id = ?")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(session)
    }

    pub async fn list_sessions(&self, user_id: i64) -> Result<Vec<WaSession>> {
        let sessions = sqlx::query_as::<_, WaSession>(
            "SELECT * FROM whatsapp_sessions WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    pub async fn list_sessions_by_status(&self, status: SessionStatus) -> Result<Vec<WaSession>> {
        let sessions =
            sqlx::query_as::<_, WaSession>("SELECT * FROM whatsapp_sessions WHERE status = ?")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?;

        Ok(sessions)
    }

    pub async fn set_session_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        sqlx::query("UPDATE whatsapp_sessions SET status = ? WHERE session_id = ?")
            .bind(status.as_str())
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Flip a session to active and stamp its last-active time.
    pub async fn mark_session_active(&self, session_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE whatsapp_sessions \
             SET status = 'active', last_active = datetime('now') \
             WHERE session_id = ?",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ----- usage log -----

    pub async fn log_api_call(&self, user_id: i64, endpoint: &str, method: &str) -> Result<()> {
        sqlx::query("INSERT INTO api_usage_log (user_id, endpoint, method) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(endpoint)
            .bind(method)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn recent_api_calls(&self, user_id: i64, limit: i64) -> Result<Vec<UsageEntry>> {
        let entries = sqlx::query_as::<_, UsageEntry>(
            "SELECT endpoint, method, timestamp FROM api_usage_log \
             WHERE user_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        Database::connect("sqlite::memory:").await.unwrap()
    }

    async fn add_user(db: &Database, username: &str) -> i64 {
        db.insert_user(username, "hash", None, 1000, "2099-01-01")
            .await
            .unwrap()
    }

    #[test]
    fn test_first_of_next_month() {
        let mid = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(
            first_of_next_month(mid),
            NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()
        );

        // December rolls into the next year
        let dec = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        assert_eq!(
            first_of_next_month(dec),
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
        );

        let first = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert_eq!(
            first_of_next_month(first),
            NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()
        );
    }

    #[tokio::test]
    async fn test_insert_and_find_user() {
        let db = test_db().await;
        let id = add_user(&db, "alice").await;

        let user = db.find_user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.api_calls_used, 0);
        assert_eq!(user.api_calls_limit, 1000);

        assert!(db.find_user_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_increment_and_reset_usage() {
        let db = test_db().await;
        let id = add_user(&db, "alice").await;

        db.increment_api_calls(id).await.unwrap();
        db.increment_api_calls(id).await.unwrap();
        let user = db.find_user_by_id(id).await.unwrap().unwrap();
        assert_eq!(user.api_calls_used, 2);

        db.reset_api_usage(id, "2024-07-01").await.unwrap();
        let user = db.find_user_by_id(id).await.unwrap().unwrap();
        assert_eq!(user.api_calls_used, 0);
        assert_eq!(user.limit_reset_date.as_deref(), Some("2024-07-01"));
    }

    #[tokio::test]
    async fn test_terminated_sessions_do_not_count() {
        let db = test_db().await;
        let id = add_user(&db, "alice").await;

        db.insert_session(id, "s1", "one").await.unwrap();
        db.insert_session(id, "s2", "two").await.unwrap();
        assert_eq!(db.count_live_sessions(id).await.unwrap(), 2);

        db.set_session_status("s1", SessionStatus::Terminated)
            .await
            .unwrap();
        assert_eq!(db.count_live_sessions(id).await.unwrap(), 1);

        // Record survives termination
        let session = db.find_session("s1").await.unwrap().unwrap();
        assert_eq!(session.status, "terminated");
    }

    #[tokio::test]
    async fn test_session_identifier_is_global() {
        let db = test_db().await;
        let alice = add_user(&db, "alice").await;
        let bob = add_user(&db, "bob").await;

        db.insert_session(alice, "shared", "mine").await.unwrap();
        assert!(db.session_exists("shared").await.unwrap());

        // Unique constraint holds across users
        let err = db.insert_session(bob, "shared", "theirs").await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_usage_log_append_and_recent() {
        let db = test_db().await;
        let id = add_user(&db, "alice").await;

        for i in 0..12 {
            db.log_api_call(id, &format!("/sessions/s/{}", i), "GET")
                .await
                .unwrap();
        }

        let recent = db.recent_api_calls(id, 10).await.unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].endpoint.as_deref(), Some("/sessions/s/11"));
    }
}
