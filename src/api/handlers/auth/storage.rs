//! Outbound storage seams and their Postgres implementations.
//!
//! The access-control core only talks to these traits. `PgStore` backs all of
//! them with a single pool; `memory` provides in-process versions for tests.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use std::{future::Future, pin::Pin, time::Duration};
use tracing::Instrument;
use uuid::Uuid;

use super::{
    authorize::ResourceType,
    lockout::LockoutState,
    principal::{AccountStatus, Principal, Role},
    utils::hash_session_id,
};

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Principal plus the stored password hash, only used by the login flow.
#[derive(Clone, Debug)]
pub struct UserCredentials {
    pub principal: Principal,
    pub password_hash: String,
}

/// Server-side session keyed by an opaque id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub principal_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub ttl_seconds: i64,
    pub remember_me: bool,
}

impl Session {
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + chrono::Duration::seconds(self.ttl_seconds)
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() <= now
    }
}

/// Counter value after an increment and the time left in its window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateCount {
    pub count: u64,
    pub ttl: Duration,
}

pub trait UserStore: Send + Sync {
    fn find_by_id(&self, id: Uuid) -> StoreFuture<'_, Option<Principal>>;

    fn find_by_username<'a>(&'a self, username: &'a str)
    -> StoreFuture<'a, Option<UserCredentials>>;

    /// Write `next` only if the stored lockout pair still equals `expected`.
    fn compare_and_set_lockout<'a>(
        &'a self,
        id: Uuid,
        expected: &'a LockoutState,
        next: &'a LockoutState,
    ) -> StoreFuture<'a, bool>;

    /// Clear lockout counters and stamp `last_login`.
    fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreFuture<'_, ()>;

    /// Clear lockout counters. Returns `false` when the user does not exist.
    fn reset_lockout(&self, id: Uuid) -> StoreFuture<'_, bool>;

    /// Owning ministry of a directory resource, `None` when it does not exist.
    fn resource_tenant(&self, kind: ResourceType, id: Uuid) -> StoreFuture<'_, Option<Uuid>>;
}

pub trait SessionStore: Send + Sync {
    fn get<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, Option<Session>>;

    fn set<'a>(&'a self, session: &'a Session) -> StoreFuture<'a, ()>;

    fn touch<'a>(&'a self, session_id: &'a str, at: DateTime<Utc>) -> StoreFuture<'a, ()>;

    /// Deleting a missing session is not an error.
    fn delete<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, ()>;

    /// Drop every session that expired at or before `now`; returns how many.
    fn purge_expired(&self, now: DateTime<Utc>) -> StoreFuture<'_, u64>;
}

pub trait RateCache: Send + Sync {
    /// Atomically increment `key`, opening a fresh window of `window` if none is live.
    fn increment<'a>(&'a self, key: &'a str, window: Duration) -> StoreFuture<'a, RateCount>;

    /// Drop windows that have closed; returns how many.
    fn purge_expired(&self) -> StoreFuture<'_, u64>;
}

/// Run a store call under a deadline.
///
/// # Errors
/// Returns the store error, or a timeout error naming `what`.
pub async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("{what} timed out after {}ms", limit.as_millis())),
    }
}

fn db_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn count_to_db(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn principal_from_row(row: &PgRow) -> Result<Principal> {
    let role: String = row.get("role");
    let status: String = row.get("status");
    let failed_attempts: i32 = row.get("failed_attempts");
    Ok(Principal {
        id: row.get("id"),
        username: row.get("username"),
        role: role.parse::<Role>()?,
        tenant_id: row.get("ministry_id"),
        status: status.parse::<AccountStatus>()?,
        lockout: LockoutState {
            failed_attempts: u32::try_from(failed_attempts).unwrap_or(0),
            locked_until: row.get("locked_until"),
        },
        last_login: row.get("last_login"),
    })
}

const PRINCIPAL_COLUMNS: &str = "id, username, role, ministry_id, status, failed_attempts, locked_until, last_login";

/// Postgres-backed implementation of every store trait.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl UserStore for PgStore {
    fn find_by_id(&self, id: Uuid) -> StoreFuture<'_, Option<Principal>> {
        Box::pin(async move {
            let query = format!("SELECT {PRINCIPAL_COLUMNS} FROM users WHERE id = $1");
            let row = sqlx::query(&query)
                .bind(id)
                .fetch_optional(&self.pool)
                .instrument(db_span("SELECT", "SELECT ... FROM users WHERE id = $1"))
                .await
                .context("failed to lookup user by id")?;
            row.as_ref().map(principal_from_row).transpose()
        })
    }

    fn find_by_username<'a>(
        &'a self,
        username: &'a str,
    ) -> StoreFuture<'a, Option<UserCredentials>> {
        Box::pin(async move {
            let query = format!(
                "SELECT {PRINCIPAL_COLUMNS}, password_hash FROM users WHERE username = $1"
            );
            let row = sqlx::query(&query)
                .bind(username)
                .fetch_optional(&self.pool)
                .instrument(db_span("SELECT", "SELECT ... FROM users WHERE username = $1"))
                .await
                .context("failed to lookup user by username")?;
            let Some(row) = row else {
                return Ok(None);
            };
            Ok(Some(UserCredentials {
                principal: principal_from_row(&row)?,
                password_hash: row.get("password_hash"),
            }))
        })
    }

    fn compare_and_set_lockout<'a>(
        &'a self,
        id: Uuid,
        expected: &'a LockoutState,
        next: &'a LockoutState,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let query = r"
                UPDATE users
                SET failed_attempts = $4, locked_until = $5
                WHERE id = $1
                  AND failed_attempts = $2
                  AND locked_until IS NOT DISTINCT FROM $3
            ";
            let result = sqlx::query(query)
                .bind(id)
                .bind(count_to_db(expected.failed_attempts))
                .bind(expected.locked_until)
                .bind(count_to_db(next.failed_attempts))
                .bind(next.locked_until)
                .execute(&self.pool)
                .instrument(db_span("UPDATE", query))
                .await
                .context("failed to update lockout state")?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let query = r"
                UPDATE users
                SET failed_attempts = 0, locked_until = NULL, last_login = $2
                WHERE id = $1
            ";
            sqlx::query(query)
                .bind(id)
                .bind(at)
                .execute(&self.pool)
                .instrument(db_span("UPDATE", query))
                .await
                .context("failed to record login")?;
            Ok(())
        })
    }

    fn reset_lockout(&self, id: Uuid) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let query = "UPDATE users SET failed_attempts = 0, locked_until = NULL WHERE id = $1";
            let result = sqlx::query(query)
                .bind(id)
                .execute(&self.pool)
                .instrument(db_span("UPDATE", query))
                .await
                .context("failed to reset lockout")?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn resource_tenant(&self, kind: ResourceType, id: Uuid) -> StoreFuture<'_, Option<Uuid>> {
        Box::pin(async move {
            let query = match kind {
                ResourceType::Position => "SELECT ministry_id FROM positions WHERE id = $1",
                ResourceType::Employee => "SELECT ministry_id FROM employees WHERE id = $1",
            };
            let row = sqlx::query(query)
                .bind(id)
                .fetch_optional(&self.pool)
                .instrument(db_span("SELECT", query))
                .await
                .with_context(|| format!("failed to lookup {} owner", kind.as_str()))?;
            Ok(row.map(|row| row.get("ministry_id")))
        })
    }
}

impl SessionStore for PgStore {
    fn get<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, Option<Session>> {
        Box::pin(async move {
            let query = r"
                SELECT user_id, issued_at, last_accessed_at, ttl_seconds, remember_me
                FROM user_sessions
                WHERE session_hash = $1
            ";
            let row = sqlx::query(query)
                .bind(hash_session_id(session_id))
                .fetch_optional(&self.pool)
                .instrument(db_span("SELECT", query))
                .await
                .context("failed to lookup session")?;
            Ok(row.map(|row| Session {
                session_id: session_id.to_string(),
                principal_id: row.get("user_id"),
                issued_at: row.get("issued_at"),
                last_accessed_at: row.get("last_accessed_at"),
                ttl_seconds: row.get("ttl_seconds"),
                remember_me: row.get("remember_me"),
            }))
        })
    }

    fn set<'a>(&'a self, session: &'a Session) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let query = r"
                INSERT INTO user_sessions
                    (session_hash, user_id, issued_at, last_accessed_at, ttl_seconds, remember_me, expires_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (session_hash) DO UPDATE
                SET last_accessed_at = EXCLUDED.last_accessed_at,
                    ttl_seconds = EXCLUDED.ttl_seconds,
                    expires_at = EXCLUDED.expires_at
            ";
            sqlx::query(query)
                .bind(hash_session_id(&session.session_id))
                .bind(session.principal_id)
                .bind(session.issued_at)
                .bind(session.last_accessed_at)
                .bind(session.ttl_seconds)
                .bind(session.remember_me)
                .bind(session.expires_at())
                .execute(&self.pool)
                .instrument(db_span("INSERT", query))
                .await
                .context("failed to store session")?;
            Ok(())
        })
    }

    fn touch<'a>(&'a self, session_id: &'a str, at: DateTime<Utc>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let query = "UPDATE user_sessions SET last_accessed_at = $2 WHERE session_hash = $1";
            sqlx::query(query)
                .bind(hash_session_id(session_id))
                .bind(at)
                .execute(&self.pool)
                .instrument(db_span("UPDATE", query))
                .await
                .context("failed to touch session")?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let query = "DELETE FROM user_sessions WHERE session_hash = $1";
            sqlx::query(query)
                .bind(hash_session_id(session_id))
                .execute(&self.pool)
                .instrument(db_span("DELETE", query))
                .await
                .context("failed to delete session")?;
            Ok(())
        })
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let query = "DELETE FROM user_sessions WHERE expires_at <= $1";
            let result = sqlx::query(query)
                .bind(now)
                .execute(&self.pool)
                .instrument(db_span("DELETE", query))
                .await
                .context("failed to purge expired sessions")?;
            Ok(result.rows_affected())
        })
    }
}

impl RateCache for PgStore {
    fn increment<'a>(&'a self, key: &'a str, window: Duration) -> StoreFuture<'a, RateCount> {
        Box::pin(async move {
            // Single statement so concurrent increments never lose a count.
            let query = r"
                INSERT INTO rate_limit_windows (key, count, expires_at)
                VALUES ($1, 1, NOW() + ($2 * INTERVAL '1 millisecond'))
                ON CONFLICT (key) DO UPDATE
                SET count = CASE
                        WHEN rate_limit_windows.expires_at <= NOW() THEN 1
                        ELSE rate_limit_windows.count + 1
                    END,
                    expires_at = CASE
                        WHEN rate_limit_windows.expires_at <= NOW() THEN EXCLUDED.expires_at
                        ELSE rate_limit_windows.expires_at
                    END
                RETURNING count,
                    GREATEST(0, CEIL(EXTRACT(EPOCH FROM (expires_at - NOW())) * 1000))::BIGINT AS ttl_ms
            ";
            let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
            let row = sqlx::query(query)
                .bind(key)
                .bind(window_ms)
                .fetch_one(&self.pool)
                .instrument(db_span("INSERT", query))
                .await
                .context("failed to increment rate counter")?;
            let count: i64 = row.get("count");
            let ttl_ms: i64 = row.get("ttl_ms");
            Ok(RateCount {
                count: u64::try_from(count).unwrap_or(0),
                ttl: Duration::from_millis(u64::try_from(ttl_ms).unwrap_or(0)),
            })
        })
    }

    fn purge_expired(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let query = "DELETE FROM rate_limit_windows WHERE expires_at <= NOW()";
            let result = sqlx::query(query)
                .execute(&self.pool)
                .instrument(db_span("DELETE", query))
                .await
                .context("failed to purge expired rate windows")?;
            Ok(result.rows_affected())
        })
    }
}

/// Cheap liveness check used by `/health`.
///
/// # Errors
/// Returns an error if the database does not answer.
pub async fn ping(pool: &PgPool) -> Result<()> {
    let query = "SELECT 1";
    sqlx::query(query)
        .execute(pool)
        .instrument(db_span("SELECT", query))
        .await
        .context("database ping failed")?;
    Ok(())
}
