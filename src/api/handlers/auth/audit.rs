//! Security audit trail.
//!
//! Every record is mirrored to `tracing` under the `audit` target and then
//! appended to the configured sink on a detached task. A sink failure is logged
//! and dropped; it never changes the outcome of the request that produced it.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use super::storage::StoreFuture;

pub const EVENT_CREDENTIAL_ACCEPTED: &str = "auth.credential_accepted";
pub const EVENT_CREDENTIAL_REJECTED: &str = "auth.credential_rejected";
pub const EVENT_LOGIN_SUCCEEDED: &str = "auth.login_succeeded";
pub const EVENT_LOGIN_FAILED: &str = "auth.login_failed";
pub const EVENT_FAILED_ATTEMPT: &str = "auth.failed_attempt";
pub const EVENT_ACCOUNT_LOCKED: &str = "auth.account_locked";
pub const EVENT_LOCKOUT_RESET: &str = "auth.lockout_reset";
pub const EVENT_ACCOUNT_UNLOCKED: &str = "auth.account_unlocked";
pub const EVENT_LOGOUT: &str = "auth.logout";
pub const EVENT_AUTHZ_DENIED: &str = "authz.denied";
pub const EVENT_RATE_LIMITED: &str = "rate_limit.exceeded";
pub const EVENT_RATE_LIMIT_BACKEND: &str = "rate_limit.backend_unavailable";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Denied,
}

impl Outcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Denied => "denied",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditRecord {
    pub event: String,
    pub principal_id: Option<Uuid>,
    pub outcome: Outcome,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub context: Value,
}

impl AuditRecord {
    #[must_use]
    pub fn new(event: &str, outcome: Outcome, severity: Severity) -> Self {
        Self {
            event: event.to_string(),
            principal_id: None,
            outcome,
            resource: None,
            action: None,
            severity,
            timestamp: Utc::now(),
            context: Value::Null,
        }
    }

    #[must_use]
    pub fn with_principal(mut self, principal_id: Uuid) -> Self {
        self.principal_id = Some(principal_id);
        self
    }

    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn append<'a>(&'a self, record: &'a AuditRecord) -> StoreFuture<'a, ()>;
}

/// Fire-and-forget front end for an `AuditSink`.
#[derive(Clone)]
pub struct Auditor {
    sink: Arc<dyn AuditSink>,
}

impl Auditor {
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub fn record(&self, record: AuditRecord) {
        emit(&record);

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(target: "audit", event = %record.event, "no runtime; audit record not persisted");
            return;
        };
        let sink = Arc::clone(&self.sink);
        handle.spawn(async move {
            if let Err(err) = sink.append(&record).await {
                error!(target: "audit", event = %record.event, "Failed to persist audit record: {err:#}");
            }
        });
    }
}

fn emit(record: &AuditRecord) {
    let principal_id = record
        .principal_id
        .map_or_else(String::new, |id| id.to_string());
    let resource = record.resource.as_deref().unwrap_or_default();
    let action = record.action.as_deref().unwrap_or_default();
    let context = record.context.to_string();

    match record.severity {
        Severity::Low => info!(
            target: "audit",
            event = %record.event,
            outcome = record.outcome.as_str(),
            severity = record.severity.as_str(),
            principal_id = %principal_id,
            resource,
            action,
            context = %context,
        ),
        Severity::Medium => warn!(
            target: "audit",
            event = %record.event,
            outcome = record.outcome.as_str(),
            severity = record.severity.as_str(),
            principal_id = %principal_id,
            resource,
            action,
            context = %context,
        ),
        Severity::High => error!(
            target: "audit",
            event = %record.event,
            outcome = record.outcome.as_str(),
            severity = record.severity.as_str(),
            principal_id = %principal_id,
            resource,
            action,
            context = %context,
        ),
    }
}

/// Appends audit records to the `audit_log` table.
#[derive(Clone, Debug)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AuditSink for PgAuditSink {
    fn append<'a>(&'a self, record: &'a AuditRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let query = r"
                INSERT INTO audit_log
                    (event, principal_id, outcome, resource, action, severity, occurred_at, context)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT",
                db.statement = query
            );
            sqlx::query(query)
                .bind(&record.event)
                .bind(record.principal_id)
                .bind(record.outcome.as_str())
                .bind(record.resource.as_deref())
                .bind(record.action.as_deref())
                .bind(record.severity.as_str())
                .bind(record.timestamp)
                .bind(sqlx::types::Json(&record.context))
                .execute(&self.pool)
                .instrument(span)
                .await
                .context("failed to insert audit record")?;
            Ok(())
        })
    }
}
