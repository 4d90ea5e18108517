//! Auth state and configuration.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use uuid::Uuid;

use super::{
    audit::{AuditSink, Auditor},
    lockout::{Lockout, LockoutPolicy},
    rate_limit::{RateLimitConfig, RateLimitGate},
    session::TOKEN_COOKIE_NAME,
    storage::{RateCache, SessionStore, UserStore},
    token::{TokenCodec, TokenError},
    utils::{extract_bearer_token, extract_cookie},
};

const DEFAULT_TOKEN_TTL_SECONDS: i64 = 8 * 60 * 60;
const DEFAULT_SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_REMEMBER_ME_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 5 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    token_secret: SecretString,
    token_ttl_seconds: i64,
    session_ttl_seconds: i64,
    remember_me_ttl_seconds: i64,
    lockout: LockoutPolicy,
    store_timeout: Duration,
    login_rate_limit: RateLimitConfig,
    api_rate_limit: RateLimitConfig,
    trust_forwarded_for: bool,
    sweep_interval: Duration,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String, token_secret: SecretString) -> Self {
        Self {
            frontend_base_url,
            token_secret,
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            remember_me_ttl_seconds: DEFAULT_REMEMBER_ME_TTL_SECONDS,
            lockout: LockoutPolicy::default(),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            login_rate_limit: RateLimitConfig::login(),
            api_rate_limit: RateLimitConfig::api(),
            trust_forwarded_for: false,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECONDS),
        }
    }

    #[must_use]
    pub fn with_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_remember_me_ttl_seconds(mut self, seconds: i64) -> Self {
        self.remember_me_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_lockout(mut self, lockout: LockoutPolicy) -> Self {
        self.lockout = lockout;
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_login_rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.login_rate_limit = config;
        self
    }

    #[must_use]
    pub fn with_api_rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.api_rate_limit = config;
        self
    }

    /// Key clients by the nearest `X-Forwarded-For` hop instead of the socket
    /// peer. Only enable behind a proxy that overwrites the header.
    #[must_use]
    pub fn with_trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_ttl_seconds)
    }

    #[must_use]
    pub fn token_ttl_seconds(&self) -> i64 {
        self.token_ttl_seconds
    }

    /// Session lifetime, extended when the user asked to be remembered.
    #[must_use]
    pub fn session_ttl_seconds(&self, remember_me: bool) -> i64 {
        if remember_me {
            self.remember_me_ttl_seconds
        } else {
            self.session_ttl_seconds
        }
    }

    #[must_use]
    pub fn lockout(&self) -> LockoutPolicy {
        self.lockout
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    #[must_use]
    pub fn login_rate_limit(&self) -> &RateLimitConfig {
        &self.login_rate_limit
    }

    #[must_use]
    pub fn api_rate_limit(&self) -> &RateLimitConfig {
        &self.api_rate_limit
    }

    #[must_use]
    pub fn trust_forwarded_for(&self) -> bool {
        self.trust_forwarded_for
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Only mark cookies secure when the frontend is served over HTTPS.
    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

/// Backends the auth core talks to.
#[derive(Clone)]
pub struct AuthStores {
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub rates: Arc<dyn RateCache>,
    pub audit: Arc<dyn AuditSink>,
}

pub struct AuthState {
    config: AuthConfig,
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    codec: TokenCodec,
    auditor: Auditor,
    lockout: Lockout,
    login_gate: RateLimitGate,
    api_gate: RateLimitGate,
}

impl AuthState {
    /// # Errors
    /// Returns an error if the token secret is too weak.
    pub fn new(config: AuthConfig, stores: AuthStores) -> Result<Self, TokenError> {
        let codec = TokenCodec::new(config.token_secret.clone())?;
        let auditor = Auditor::new(stores.audit);
        let timeout = config.store_timeout;
        let lockout = Lockout::new(
            config.lockout,
            Arc::clone(&stores.users),
            auditor.clone(),
            timeout,
        );
        let login_gate = RateLimitGate::new(
            config.login_rate_limit.clone(),
            Arc::clone(&stores.rates),
            auditor.clone(),
            timeout,
        );
        let api_gate = RateLimitGate::new(
            config.api_rate_limit.clone(),
            stores.rates,
            auditor.clone(),
            timeout,
        );

        Ok(Self {
            config,
            users: stores.users,
            sessions: stores.sessions,
            codec,
            auditor,
            lockout,
            login_gate,
            api_gate,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn users(&self) -> &dyn UserStore {
        self.users.as_ref()
    }

    #[must_use]
    pub fn sessions(&self) -> &dyn SessionStore {
        self.sessions.as_ref()
    }

    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    #[must_use]
    pub fn auditor(&self) -> &Auditor {
        &self.auditor
    }

    #[must_use]
    pub fn lockout(&self) -> &Lockout {
        &self.lockout
    }

    #[must_use]
    pub fn login_gate(&self) -> &RateLimitGate {
        &self.login_gate
    }

    #[must_use]
    pub fn api_gate(&self) -> &RateLimitGate {
        &self.api_gate
    }

    /// Subject of a bearer or cookie token that verifies, without touching storage.
    #[must_use]
    pub fn peek_token_subject(&self, headers: &HeaderMap, now: DateTime<Utc>) -> Option<Uuid> {
        let token = extract_bearer_token(headers)
            .or_else(|| extract_cookie(headers, TOKEN_COOKIE_NAME))?;
        self.codec.validate(&token, now).ok().map(|claims| claims.sub)
    }
}
