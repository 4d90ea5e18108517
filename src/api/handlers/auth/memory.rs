//! In-process store implementations.
//!
//! Used by the test suites. They honour the same atomicity contracts as the
//! Postgres stores: each operation holds the map lock for its whole
//! read-modify-write.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    audit::{AuditRecord, AuditSink},
    authorize::ResourceType,
    lockout::LockoutState,
    principal::{AccountStatus, Principal, Role},
    storage::{RateCache, RateCount, Session, SessionStore, StoreFuture, UserCredentials, UserStore},
};

struct StoredUser {
    principal: Principal,
    password_hash: String,
}

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, StoredUser>>,
    resources: Mutex<HashMap<(ResourceType, Uuid), Uuid>>,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(
        &self,
        username: &str,
        password_hash: &str,
        role: Role,
        tenant_id: Option<Uuid>,
    ) -> Principal {
        let principal = Principal {
            id: Uuid::new_v4(),
            username: username.to_string(),
            role,
            tenant_id,
            status: AccountStatus::Active,
            lockout: LockoutState::default(),
            last_login: None,
        };
        self.users.lock().await.insert(
            principal.id,
            StoredUser {
                principal: principal.clone(),
                password_hash: password_hash.to_string(),
            },
        );
        principal
    }

    pub async fn principal(&self, id: Uuid) -> Option<Principal> {
        self.users
            .lock()
            .await
            .get(&id)
            .map(|user| user.principal.clone())
    }

    pub async fn set_lockout(&self, id: Uuid, lockout: LockoutState) {
        if let Some(user) = self.users.lock().await.get_mut(&id) {
            user.principal.lockout = lockout;
        }
    }

    pub async fn set_status(&self, id: Uuid, status: AccountStatus) {
        if let Some(user) = self.users.lock().await.get_mut(&id) {
            user.principal.status = status;
        }
    }

    pub async fn remove_user(&self, id: Uuid) {
        self.users.lock().await.remove(&id);
    }

    /// Register a directory resource owned by `ministry_id`.
    pub async fn add_resource(&self, kind: ResourceType, id: Uuid, ministry_id: Uuid) {
        self.resources
            .lock()
            .await
            .insert((kind, id), ministry_id);
    }
}

impl UserStore for MemoryUserStore {
    fn find_by_id(&self, id: Uuid) -> StoreFuture<'_, Option<Principal>> {
        Box::pin(async move { Ok(self.principal(id).await) })
    }

    fn find_by_username<'a>(
        &'a self,
        username: &'a str,
    ) -> StoreFuture<'a, Option<UserCredentials>> {
        Box::pin(async move {
            let users = self.users.lock().await;
            Ok(users
                .values()
                .find(|user| user.principal.username == username)
                .map(|user| UserCredentials {
                    principal: user.principal.clone(),
                    password_hash: user.password_hash.clone(),
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
            let mut users = self.users.lock().await;
            let Some(user) = users.get_mut(&id) else {
                return Ok(false);
            };
            if user.principal.lockout != *expected {
                return Ok(false);
            }
            user.principal.lockout = next.clone();
            Ok(true)
        })
    }

    fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut users = self.users.lock().await;
            let user = users
                .get_mut(&id)
                .ok_or_else(|| anyhow!("user {id} not found"))?;
            user.principal.lockout = LockoutState::default();
            user.principal.last_login = Some(at);
            Ok(())
        })
    }

    fn reset_lockout(&self, id: Uuid) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut users = self.users.lock().await;
            Ok(users.get_mut(&id).is_some_and(|user| {
                user.principal.lockout = LockoutState::default();
                true
            }))
        })
    }

    fn resource_tenant(&self, kind: ResourceType, id: Uuid) -> StoreFuture<'_, Option<Uuid>> {
        Box::pin(async move { Ok(self.resources.lock().await.get(&(kind, id)).copied()) })
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.lock().await.contains_key(session_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

impl SessionStore for MemorySessionStore {
    fn get<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, Option<Session>> {
        Box::pin(async move { Ok(self.sessions.lock().await.get(session_id).cloned()) })
    }

    fn set<'a>(&'a self, session: &'a Session) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.sessions
                .lock()
                .await
                .insert(session.session_id.clone(), session.clone());
            Ok(())
        })
    }

    fn touch<'a>(&'a self, session_id: &'a str, at: DateTime<Utc>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            if let Some(session) = self.sessions.lock().await.get_mut(session_id) {
                session.last_accessed_at = at;
            }
            Ok(())
        })
    }

    fn delete<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.sessions.lock().await.remove(session_id);
            Ok(())
        })
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut sessions = self.sessions.lock().await;
            let before = sessions.len();
            sessions.retain(|_, session| !session.is_expired(now));
            Ok(u64::try_from(before - sessions.len()).unwrap_or(u64::MAX))
        })
    }
}

/// Fixed-window counters with switches for simulating backend faults.
#[derive(Default)]
pub struct MemoryRateCache {
    windows: Mutex<HashMap<String, (u64, Instant)>>,
    unavailable: AtomicBool,
    stalled: AtomicBool,
}

impl MemoryRateCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every increment fail immediately.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every increment hang until the caller's deadline fires.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub async fn window_count(&self) -> usize {
        self.windows.lock().await.len()
    }
}

impl RateCache for MemoryRateCache {
    fn increment<'a>(&'a self, key: &'a str, window: Duration) -> StoreFuture<'a, RateCount> {
        Box::pin(async move {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(anyhow!("rate cache unavailable"));
            }
            if self.stalled.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }

            let now = Instant::now();
            let mut windows = self.windows.lock().await;
            let entry = windows
                .entry(key.to_string())
                .or_insert((0, now + window));
            if entry.1 <= now {
                *entry = (0, now + window);
            }
            entry.0 += 1;
            Ok(RateCount {
                count: entry.0,
                ttl: entry.1.saturating_duration_since(now),
            })
        })
    }

    fn purge_expired(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(anyhow!("rate cache unavailable"));
            }
            let now = Instant::now();
            let mut windows = self.windows.lock().await;
            let before = windows.len();
            windows.retain(|_, (_, expires_at)| *expires_at > now);
            Ok(u64::try_from(before - windows.len()).unwrap_or(u64::MAX))
        })
    }
}

#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records appended so far, after letting pending appends run.
    pub async fn records(&self) -> Vec<AuditRecord> {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        self.records.lock().await.clone()
    }

    pub async fn events(&self) -> Vec<String> {
        self.records()
            .await
            .into_iter()
            .map(|record| record.event)
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append<'a>(&'a self, record: &'a AuditRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.records.lock().await.push(record.clone());
            Result::<()>::Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_window_counts_then_resets() -> Result<()> {
        let cache = MemoryRateCache::new();
        let window = Duration::from_millis(50);
        assert_eq!(cache.increment("k", window).await?.count, 1);
        assert_eq!(cache.increment("k", window).await?.count, 2);
        assert_eq!(cache.increment("other", window).await?.count, 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let fresh = cache.increment("k", window).await?;
        assert_eq!(fresh.count, 1);
        assert!(fresh.ttl <= window);
        Ok(())
    }

    #[tokio::test]
    async fn unavailable_cache_errors() {
        let cache = MemoryRateCache::new();
        cache.set_unavailable(true);
        assert!(cache.increment("k", Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn compare_and_set_rejects_stale_expectations() -> Result<()> {
        let users = MemoryUserStore::new();
        let alice = users.add_user("alice", "hash", Role::Viewer, None).await;
        let one = LockoutState {
            failed_attempts: 1,
            locked_until: None,
        };
        assert!(
            users
                .compare_and_set_lockout(alice.id, &LockoutState::default(), &one)
                .await?
        );
        assert!(
            !users
                .compare_and_set_lockout(alice.id, &LockoutState::default(), &one)
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn session_delete_is_idempotent() -> Result<()> {
        let sessions = MemorySessionStore::new();
        sessions.delete("missing").await?;
        assert_eq!(sessions.len().await, 0);
        Ok(())
    }
}
