//! Account lockout after consecutive failed logins.
//!
//! Flow Overview:
//! 1) A failed password check feeds the current `(failed_attempts, locked_until)`
//!    pair through `LockoutPolicy::on_failure`.
//! 2) The resulting state is written with a compare-and-set against the pair we
//!    read, retried on contention, so concurrent failures are never lost.
//! 3) A successful login, or an administrative unlock, resets the pair.
//!
//! A failure while the account is already locked is a no-op: repeated guesses
//! can never push the unlock time further out.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    audit::{self, AuditRecord, Auditor, Outcome, Severity},
    principal::Principal,
    storage::{UserStore, bounded},
};

const DEFAULT_THRESHOLD: u32 = 5;
const DEFAULT_LOCK_SECONDS: i64 = 15 * 60;
const CAS_ATTEMPTS: usize = 3;

/// Persisted lockout counters for a principal.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LockoutState {
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LockoutState {
    /// Unlock time if the lock is still in force at `now`.
    #[must_use]
    pub fn active_lock(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.locked_until.filter(|until| *until > now)
    }

    #[must_use]
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.active_lock(now).is_some()
    }

    #[must_use]
    pub fn is_clear(&self) -> bool {
        self.failed_attempts == 0 && self.locked_until.is_none()
    }
}

/// Result of applying one failed attempt to a lockout state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LockoutTransition {
    /// Failure counted, still below the threshold.
    Counted(LockoutState),
    /// Threshold reached.
    Locked(LockoutState),
    /// Already locked; the stored state must not change.
    Unchanged { locked_until: DateTime<Utc> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockoutPolicy {
    threshold: u32,
    lock_seconds: i64,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            lock_seconds: DEFAULT_LOCK_SECONDS,
        }
    }
}

impl LockoutPolicy {
    #[must_use]
    pub fn new(threshold: u32, lock_seconds: i64) -> Self {
        Self {
            threshold: threshold.max(1),
            lock_seconds,
        }
    }

    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    #[must_use]
    pub fn lock_duration(&self) -> Duration {
        Duration::seconds(self.lock_seconds)
    }

    /// Apply one failed attempt at `now`.
    ///
    /// An expired lock counts as unlocked and the counter starts over.
    #[must_use]
    pub fn on_failure(&self, current: &LockoutState, now: DateTime<Utc>) -> LockoutTransition {
        if let Some(locked_until) = current.active_lock(now) {
            return LockoutTransition::Unchanged { locked_until };
        }

        let previous = if current.locked_until.is_some() {
            0
        } else {
            current.failed_attempts
        };
        let failed_attempts = previous.saturating_add(1);

        if failed_attempts >= self.threshold {
            LockoutTransition::Locked(LockoutState {
                failed_attempts,
                locked_until: Some(now + self.lock_duration()),
            })
        } else {
            LockoutTransition::Counted(LockoutState {
                failed_attempts,
                locked_until: None,
            })
        }
    }
}

/// What a recorded failure did to the account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureOutcome {
    Counted { failed_attempts: u32 },
    Locked { until: DateTime<Utc> },
    AlreadyLocked { until: DateTime<Utc> },
}

/// Lockout policy bound to the user store and audit sink.
#[derive(Clone)]
pub struct Lockout {
    policy: LockoutPolicy,
    users: Arc<dyn UserStore>,
    auditor: Auditor,
    timeout: std::time::Duration,
}

impl Lockout {
    #[must_use]
    pub fn new(
        policy: LockoutPolicy,
        users: Arc<dyn UserStore>,
        auditor: Auditor,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            policy,
            users,
            auditor,
            timeout,
        }
    }

    /// Record a failed password check.
    ///
    /// # Errors
    /// Returns an error if the store is unreachable or the compare-and-set keeps
    /// losing to concurrent writers.
    pub async fn record_failure(
        &self,
        principal: &Principal,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome> {
        let mut current = principal.lockout.clone();

        for _ in 0..CAS_ATTEMPTS {
            let next = match self.policy.on_failure(&current, now) {
                LockoutTransition::Unchanged { locked_until } => {
                    debug!(principal_id = %principal.id, "failure while locked ignored");
                    return Ok(FailureOutcome::AlreadyLocked {
                        until: locked_until,
                    });
                }
                LockoutTransition::Counted(next) | LockoutTransition::Locked(next) => next,
            };

            let swapped = bounded(
                self.timeout,
                "lockout compare-and-set",
                self.users
                    .compare_and_set_lockout(principal.id, &current, &next),
            )
            .await?;

            if swapped {
                return Ok(self.audit_failure(principal, &next, now));
            }

            // Another request moved the counters; re-read and try again.
            let reloaded = bounded(
                self.timeout,
                "principal reload",
                self.users.find_by_id(principal.id),
            )
            .await?
            .ok_or_else(|| anyhow!("principal {} disappeared during lockout", principal.id))?;
            current = reloaded.lockout;
        }

        warn!(principal_id = %principal.id, "lockout update lost to concurrent writers");
        Err(anyhow!("lockout update contention for {}", principal.id))
    }

    fn audit_failure(
        &self,
        principal: &Principal,
        next: &LockoutState,
        now: DateTime<Utc>,
    ) -> FailureOutcome {
        if let Some(until) = next.active_lock(now) {
            self.auditor.record(
                AuditRecord::new(audit::EVENT_ACCOUNT_LOCKED, Outcome::Denied, Severity::High)
                    .with_principal(principal.id)
                    .with_resource("account")
                    .with_action("lock")
                    .with_context(json!({
                        "username": principal.username,
                        "failed_attempts": next.failed_attempts,
                        "locked_until": until,
                    })),
            );
            FailureOutcome::Locked { until }
        } else {
            self.auditor.record(
                AuditRecord::new(
                    audit::EVENT_FAILED_ATTEMPT,
                    Outcome::Failure,
                    Severity::Medium,
                )
                .with_principal(principal.id)
                .with_resource("account")
                .with_action("count_failure")
                .with_context(json!({
                    "username": principal.username,
                    "failed_attempts": next.failed_attempts,
                    "threshold": self.policy.threshold,
                })),
            );
            FailureOutcome::Counted {
                failed_attempts: next.failed_attempts,
            }
        }
    }

    /// Clear counters after a successful login and stamp `last_login`.
    ///
    /// # Errors
    /// Returns an error if the store write fails.
    pub async fn record_success(&self, principal: &Principal, now: DateTime<Utc>) -> Result<()> {
        bounded(
            self.timeout,
            "record login",
            self.users.record_login(principal.id, now),
        )
        .await?;

        if !principal.lockout.is_clear() {
            self.auditor.record(
                AuditRecord::new(audit::EVENT_LOCKOUT_RESET, Outcome::Success, Severity::Low)
                    .with_principal(principal.id)
                    .with_resource("account")
                    .with_action("reset")
                    .with_context(json!({
                        "previous_failed_attempts": principal.lockout.failed_attempts,
                        "was_locked": principal.lockout.is_locked(now),
                    })),
            );
        }
        Ok(())
    }

    /// Administrative unlock. Returns `false` when the target does not exist.
    ///
    /// # Errors
    /// Returns an error if the store write fails.
    pub async fn unlock(&self, target: Uuid, actor: &Principal) -> Result<bool> {
        let found = bounded(self.timeout, "reset lockout", self.users.reset_lockout(target)).await?;
        if found {
            self.auditor.record(
                AuditRecord::new(audit::EVENT_ACCOUNT_UNLOCKED, Outcome::Success, Severity::Medium)
                    .with_principal(actor.id)
                    .with_resource("account")
                    .with_action("unlock")
                    .with_context(json!({ "target_principal_id": target })),
            );
        }
        Ok(found)
    }
}
