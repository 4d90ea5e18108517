//! Fixed-window rate limiting.
//!
//! Flow Overview:
//! 1) Build a key for the operation class (`login:<ip>:<username>` or
//!    `api:user:<id>` / `api:ip:<ip>`).
//! 2) Atomically increment the counter in the `RateCache` under a deadline.
//! 3) Allow while `count <= limit`; every response carries the `X-RateLimit-*`
//!    headers, denials add `Retry-After`.
//!
//! A backend fault is resolved by the limiter's `FailurePolicy`: `Open` lets the
//! request through with a full quota, `Closed` answers 503. Both report the
//! full quota in the headers.

use axum::{
    extract::{Extension, Request},
    http::{HeaderMap, HeaderName, HeaderValue, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tracing::{debug, error};

use super::{
    audit::{self, AuditRecord, Auditor, Outcome, Severity},
    error::RateLimitError,
    state::AuthState,
    storage::{RateCache, bounded},
    utils::ClientIp,
};

pub const HEADER_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const HEADER_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const HEADER_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

const LOGIN_LIMIT: u64 = 5;
const LOGIN_WINDOW_SECONDS: u64 = 15 * 60;
const API_LIMIT: u64 = 100;
const API_WINDOW_SECONDS: u64 = 60;

/// What to do when the counter backend cannot answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePolicy {
    Open,
    Closed,
}

impl std::str::FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(anyhow::anyhow!("unknown failure policy: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    name: String,
    limit: u64,
    window: Duration,
    failure_policy: FailurePolicy,
}

impl RateLimitConfig {
    #[must_use]
    pub fn new(name: &str, limit: u64, window: Duration) -> Self {
        Self {
            name: name.to_string(),
            limit,
            window,
            failure_policy: FailurePolicy::Open,
        }
    }

    /// Five attempts per IP and username per 15 minutes.
    #[must_use]
    pub fn login() -> Self {
        Self::new(
            "login",
            LOGIN_LIMIT,
            Duration::from_secs(LOGIN_WINDOW_SECONDS),
        )
    }

    /// 100 requests per principal (or IP when anonymous) per minute.
    #[must_use]
    pub fn api() -> Self {
        Self::new("api", API_LIMIT, Duration::from_secs(API_WINDOW_SECONDS))
    }

    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    #[must_use]
    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    #[must_use]
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }
}

/// Outcome of one counted request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    pub retry_after_seconds: Option<u64>,
}

impl RateLimitDecision {
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(HEADER_LIMIT, HeaderValue::from(self.limit));
        headers.insert(HEADER_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(HEADER_RESET, HeaderValue::from(self.reset_at.timestamp()));
        if let Some(seconds) = self.retry_after_seconds {
            headers.insert(RETRY_AFTER, HeaderValue::from(seconds));
        }
    }

    /// 429 response for a denied decision, headers included.
    #[must_use]
    pub fn into_denial(self) -> Response {
        let retry_after_seconds = self.retry_after_seconds.unwrap_or(1);
        let mut response = RateLimitError::Exceeded {
            retry_after_seconds,
        }
        .into_response();
        self.apply_headers(response.headers_mut());
        response
    }
}

fn ceil_seconds(ttl: Duration) -> u64 {
    let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    millis.div_ceil(1000).max(1)
}

fn chrono_duration(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero())
}

/// One configured limiter bound to a counter backend.
#[derive(Clone)]
pub struct RateLimitGate {
    config: RateLimitConfig,
    cache: Arc<dyn RateCache>,
    auditor: Auditor,
    timeout: Duration,
}

impl RateLimitGate {
    #[must_use]
    pub fn new(
        config: RateLimitConfig,
        cache: Arc<dyn RateCache>,
        auditor: Auditor,
        timeout: Duration,
    ) -> Self {
        Self {
            config,
            cache,
            auditor,
            timeout,
        }
    }

    #[must_use]
    pub fn login_key(&self, ip: &str, username: &str) -> String {
        format!("{}:{ip}:{username}", self.config.name)
    }

    #[must_use]
    pub fn api_key(&self, principal_id: Option<&str>, ip: &str) -> String {
        match principal_id {
            Some(id) => format!("{}:user:{id}", self.config.name),
            None => format!("{}:ip:{ip}", self.config.name),
        }
    }

    /// Headers reported when the backend could not count the request.
    fn full_quota(&self, now: DateTime<Utc>) -> RateLimitDecision {
        RateLimitDecision {
            allowed: true,
            limit: self.config.limit,
            remaining: self.config.limit,
            reset_at: now + chrono_duration(self.config.window),
            retry_after_seconds: None,
        }
    }

    /// Render a limiter error with this limiter's quota headers.
    #[must_use]
    pub fn reject(&self, err: RateLimitError, now: DateTime<Utc>) -> Response {
        let mut response = err.into_response();
        self.full_quota(now).apply_headers(response.headers_mut());
        response
    }

    /// Count one request against `key`.
    ///
    /// Denials are audited here; callers only need to render them.
    ///
    /// # Errors
    /// Returns `RateLimitError::Unavailable` when the backend fails and the
    /// limiter fails closed.
    pub async fn check(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let limit = self.config.limit;
        let counted = bounded(
            self.timeout,
            "rate limit increment",
            self.cache.increment(key, self.config.window),
        )
        .await;

        let counted = match counted {
            Ok(counted) => counted,
            Err(err) => return self.on_backend_fault(key, now, &err),
        };

        let allowed = counted.count <= limit;
        let decision = RateLimitDecision {
            allowed,
            limit,
            remaining: limit.saturating_sub(counted.count),
            reset_at: now + chrono_duration(counted.ttl),
            retry_after_seconds: (!allowed).then(|| ceil_seconds(counted.ttl)),
        };

        if allowed {
            debug!(limiter = %self.config.name, key, count = counted.count, "rate limit check passed");
        } else {
            self.auditor.record(
                AuditRecord::new(audit::EVENT_RATE_LIMITED, Outcome::Denied, Severity::Medium)
                    .with_resource("rate_limit")
                    .with_action(self.config.name.clone())
                    .with_context(json!({
                        "key": key,
                        "count": counted.count,
                        "limit": limit,
                        "retry_after": decision.retry_after_seconds,
                    })),
            );
        }
        Ok(decision)
    }

    fn on_backend_fault(
        &self,
        key: &str,
        now: DateTime<Utc>,
        err: &anyhow::Error,
    ) -> Result<RateLimitDecision, RateLimitError> {
        error!(limiter = %self.config.name, key, "Rate limit backend failure: {err:#}");
        self.auditor.record(
            AuditRecord::new(
                audit::EVENT_RATE_LIMIT_BACKEND,
                Outcome::Failure,
                Severity::High,
            )
            .with_resource("rate_limit")
            .with_action(self.config.name.clone())
            .with_context(json!({
                "key": key,
                "policy": match self.config.failure_policy {
                    FailurePolicy::Open => "open",
                    FailurePolicy::Closed => "closed",
                },
            })),
        );

        match self.config.failure_policy {
            FailurePolicy::Open => Ok(self.full_quota(now)),
            FailurePolicy::Closed => Err(RateLimitError::Unavailable),
        }
    }
}

/// Middleware applying the general API limiter.
///
/// Runs before authentication, so the principal is taken from a token that
/// merely verifies; anything else is keyed by client IP.
pub async fn rate_limit(
    Extension(state): Extension<Arc<AuthState>>,
    ClientIp(ip): ClientIp,
    request: Request,
    next: Next,
) -> Response {
    let now = Utc::now();
    let gate = state.api_gate();
    let subject = state
        .peek_token_subject(request.headers(), now)
        .map(|id| id.to_string());
    let key = gate.api_key(subject.as_deref(), &ip);

    let decision = match gate.check(&key, now).await {
        Ok(decision) => decision,
        Err(err) => return gate.reject(err, now),
    };
    if !decision.allowed {
        return decision.into_denial();
    }

    let mut response = next.run(request).await;
    decision.apply_headers(response.headers_mut());
    response
}
