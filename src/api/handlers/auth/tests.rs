//! Auth module tests.
//!
//! These drive the documented router end to end against the in-process stores.

use super::audit;
use super::lockout::LockoutState;
use super::memory::{MemoryAuditSink, MemoryRateCache, MemorySessionStore, MemoryUserStore};
use super::password::hash_password;
use super::principal::{AccountStatus, Principal, Role};
use super::rate_limit::{FailurePolicy, RateLimitConfig};
use super::session::{SESSION_COOKIE_NAME, TOKEN_COOKIE_NAME};
use super::storage::{Session, SessionStore};
use super::sweep::sweep_expired;
use super::{AuthConfig, AuthState, AuthStores, ResourceType};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::{Body, to_bytes},
    extract::ConnectInfo,
    http::{
        Method, Request, Response, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, RETRY_AFTER, SET_COOKIE},
    },
};
use chrono::{Duration as ChronoDuration, Utc};
use secrecy::SecretString;
use serde_json::{Value, json};
use std::{net::SocketAddr, sync::Arc};
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "orgdir-test-secret-0123456789abcdef";
const PASSWORD: &str = "correct horse battery staple";
const PEER: ([u8; 4], u16) = ([203, 0, 113, 9], 50_000);

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

struct Harness {
    app: Router,
    state: Arc<AuthState>,
    users: Arc<MemoryUserStore>,
    sessions: Arc<MemorySessionStore>,
    rates: Arc<MemoryRateCache>,
    audit: Arc<MemoryAuditSink>,
    password_hash: String,
}

impl Harness {
    fn new() -> Result<Self> {
        Self::with_config(|config| config)
    }

    fn with_config(customize: impl FnOnce(AuthConfig) -> AuthConfig) -> Result<Self> {
        let config = customize(AuthConfig::new(
            "http://localhost:5173".to_string(),
            SecretString::from(SECRET.to_string()),
        ));
        let users = Arc::new(MemoryUserStore::new());
        let sessions = Arc::new(MemorySessionStore::new());
        let rates = Arc::new(MemoryRateCache::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let stores = AuthStores {
            users: users.clone(),
            sessions: sessions.clone(),
            rates: rates.clone(),
            audit: audit.clone(),
        };
        let state = Arc::new(AuthState::new(config, stores)?);

        let (router, _openapi) = crate::api::router().split_for_parts();
        let app = router.layer(Extension(state.clone()));

        Ok(Self {
            app,
            state,
            users,
            sessions,
            rates,
            audit,
            password_hash: hash_password(PASSWORD)?,
        })
    }

    async fn user(&self, username: &str, role: Role, tenant: Option<Uuid>) -> Principal {
        self.users
            .add_user(username, &self.password_hash, role, tenant)
            .await
    }

    fn bearer(&self, principal: &Principal) -> Result<String> {
        let issued = self
            .state
            .codec()
            .issue(principal, self.state.config().token_ttl(), Utc::now())?;
        Ok(format!("Bearer {}", issued.token))
    }

    async fn send(&self, request: Request<Body>) -> Result<Response<Body>> {
        Ok(self.app.clone().oneshot(request).await?)
    }

    async fn login(&self, username: &str, password: &str) -> Result<Response<Body>> {
        self.login_via(username, password, None).await
    }

    /// Login from the fixed test peer, optionally through a proxy header.
    async fn login_via(
        &self,
        username: &str,
        password: &str,
        forwarded_for: Option<&str>,
    ) -> Result<Response<Body>> {
        let body = json!({ "username": username, "password": password });
        let mut request = Request::builder()
            .method(Method::POST)
            .uri("/v1/auth/login")
            .header(CONTENT_TYPE, "application/json")
            .extension(ConnectInfo(SocketAddr::from(PEER)));
        if let Some(forwarded_for) = forwarded_for {
            request = request.header("x-forwarded-for", forwarded_for);
        }
        self.send(request.body(Body::from(body.to_string()))?).await
    }

    async fn get_as(&self, uri: &str, principal: &Principal) -> Result<Response<Body>> {
        self.send(
            Request::get(uri)
                .header(AUTHORIZATION, self.bearer(principal)?)
                .body(Body::empty())?,
        )
        .await
    }
}

async fn json_body(response: Response<Body>) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_string)
        .collect()
}

fn cookie_value(response: &Response<Body>, name: &str) -> Result<String> {
    let prefix = format!("{name}=");
    set_cookies(response)
        .iter()
        .find_map(|cookie| {
            cookie
                .strip_prefix(&prefix)
                .and_then(|rest| rest.split(';').next())
                .map(str::to_string)
        })
        .ok_or_else(|| anyhow!("missing {name} cookie"))
}

async fn assert_error(response: Response<Body>, status: StatusCode, code: &str) -> Result<Value> {
    assert_eq!(response.status(), status);
    let body = json_body(response).await?;
    assert_eq!(body["error"], code);
    Ok(body)
}

#[tokio::test]
async fn login_sets_cookies_and_token_authenticates() -> Result<()> {
    let harness = Harness::new()?;
    let alice = harness.user("alice", Role::Editor, Some(Uuid::new_v4())).await;

    let response = harness.login("  alice ", PASSWORD).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("x-ratelimit-limit")
            .and_then(|value| value.to_str().ok()),
        Some("5")
    );
    let session_id = cookie_value(&response, SESSION_COOKIE_NAME)?;
    let cookie_token = cookie_value(&response, TOKEN_COOKIE_NAME)?;
    assert!(
        set_cookies(&response)
            .iter()
            .all(|cookie| cookie.contains("HttpOnly"))
    );
    assert!(harness.sessions.contains(&session_id).await);

    let body = json_body(response).await?;
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["principal"]["id"], alice.id.to_string());
    assert_eq!(body["access_token"], cookie_token);

    let me = harness
        .send(
            Request::get("/v1/auth/me")
                .header(AUTHORIZATION, format!("Bearer {cookie_token}"))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(me.status(), StatusCode::OK);
    assert!(me.headers().contains_key("x-ratelimit-remaining"));
    let me = json_body(me).await?;
    assert_eq!(me["principal"]["username"], "alice");
    assert_eq!(me["carrier"], "bearer_header");

    let stored = harness
        .users
        .principal(alice.id)
        .await
        .context("alice should exist")?;
    assert!(stored.last_login.is_some());

    let events = harness.audit.events().await;
    assert!(events.iter().any(|event| event == audit::EVENT_LOGIN_SUCCEEDED));
    assert!(events.iter().any(|event| event == audit::EVENT_CREDENTIAL_ACCEPTED));
    Ok(())
}

#[tokio::test]
async fn unknown_and_inactive_users_look_like_wrong_passwords() -> Result<()> {
    let harness = Harness::new()?;
    let dormant = harness.user("dormant", Role::Viewer, None).await;
    harness
        .users
        .set_status(dormant.id, AccountStatus::Inactive)
        .await;

    let response = harness.login("ghost", PASSWORD).await?;
    assert_error(response, StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS").await?;

    let response = harness.login("dormant", PASSWORD).await?;
    assert_error(response, StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS").await?;

    let response = harness.login("not a valid name!", PASSWORD).await?;
    assert_error(response, StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS").await?;
    assert_eq!(harness.sessions.len().await, 0);
    Ok(())
}

#[tokio::test]
async fn fifth_wrong_password_locks_the_account() -> Result<()> {
    let harness = Harness::new()?;
    let bob = harness.user("bob", Role::Editor, None).await;

    for _ in 0..4 {
        let response = harness.login("bob", "wrong").await?;
        assert_error(response, StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS").await?;
    }
    let response = harness.login("bob", "wrong").await?;
    let body = assert_error(response, StatusCode::LOCKED, "ACCOUNT_LOCKED").await?;
    assert!(body["locked_until"].is_string());

    let stored = harness
        .users
        .principal(bob.id)
        .await
        .context("bob should exist")?;
    assert_eq!(stored.lockout.failed_attempts, 5);
    assert!(stored.lockout.is_locked(Utc::now()));

    let events = harness.audit.events().await;
    assert!(events.iter().any(|event| event == audit::EVENT_ACCOUNT_LOCKED));
    Ok(())
}

#[tokio::test]
async fn locked_account_rejects_correct_password_without_extending_lock() -> Result<()> {
    let harness = Harness::new()?;
    let carol = harness.user("carol", Role::Editor, None).await;
    let until = Utc::now() + ChronoDuration::minutes(10);
    let locked = LockoutState {
        failed_attempts: 5,
        locked_until: Some(until),
    };
    harness.users.set_lockout(carol.id, locked.clone()).await;

    let response = harness.login("carol", PASSWORD).await?;
    assert_error(response, StatusCode::LOCKED, "ACCOUNT_LOCKED").await?;

    let stored = harness
        .users
        .principal(carol.id)
        .await
        .context("carol should exist")?;
    assert_eq!(stored.lockout, locked);
    assert_eq!(harness.sessions.len().await, 0);

    // Existing tokens stop working while the lock holds.
    let response = harness.get_as("/v1/auth/me", &carol).await?;
    assert_error(response, StatusCode::LOCKED, "ACCOUNT_LOCKED").await?;
    Ok(())
}

#[tokio::test]
async fn expired_lock_allows_login_and_resets_counter() -> Result<()> {
    let harness = Harness::new()?;
    let dave = harness.user("dave", Role::Viewer, None).await;
    harness
        .users
        .set_lockout(
            dave.id,
            LockoutState {
                failed_attempts: 5,
                locked_until: Some(Utc::now() - ChronoDuration::seconds(1)),
            },
        )
        .await;

    let response = harness.login("dave", PASSWORD).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let stored = harness
        .users
        .principal(dave.id)
        .await
        .context("dave should exist")?;
    assert!(stored.lockout.is_clear());
    Ok(())
}

#[tokio::test]
async fn sixth_login_attempt_is_rate_limited() -> Result<()> {
    let harness = Harness::new()?;

    for _ in 0..5 {
        let response = harness.login("ghost", "wrong").await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = harness.login("ghost", "wrong").await?;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .context("Retry-After header")?;
    assert!(retry_after > 0 && retry_after <= 900);
    let body = assert_error(response, StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED").await?;
    assert_eq!(body["retry_after"], retry_after);

    let events = harness.audit.events().await;
    assert!(events.iter().any(|event| event == audit::EVENT_RATE_LIMITED));
    Ok(())
}

#[tokio::test]
async fn forged_forwarded_for_does_not_reset_login_limit() -> Result<()> {
    let harness = Harness::new()?;

    for i in 0..5 {
        let forged = format!("198.51.100.{i}");
        let response = harness.login_via("ghost", "wrong", Some(&forged)).await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = harness
        .login_via("ghost", "wrong", Some("198.51.100.99"))
        .await?;
    assert_error(response, StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED").await?;
    Ok(())
}

#[tokio::test]
async fn forged_forwarded_for_does_not_reset_anonymous_api_limit() -> Result<()> {
    let harness = Harness::with_config(|config| {
        config.with_api_rate_limit(RateLimitConfig::api().with_limit(2))
    })?;

    let me = |forged: String| -> Result<Request<Body>> {
        Ok(Request::get("/v1/auth/me")
            .header("x-forwarded-for", forged)
            .extension(ConnectInfo(SocketAddr::from(PEER)))
            .body(Body::empty())?)
    };
    for i in 0..2 {
        let response = harness.send(me(format!("198.51.100.{i}"))?).await?;
        assert_error(response, StatusCode::UNAUTHORIZED, "NO_TOKEN").await?;
    }
    let response = harness.send(me("198.51.100.77".to_string())?).await?;
    assert_error(response, StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED").await?;
    Ok(())
}

#[tokio::test]
async fn trusted_proxy_keys_by_nearest_forwarded_hop() -> Result<()> {
    let harness = Harness::with_config(|config| config.with_trust_forwarded_for(true))?;

    // Entries left of the proxy's own are client-controlled and ignored.
    for i in 0..5 {
        let chain = format!("10.9.9.{i}, 192.0.2.40");
        let response = harness.login_via("ghost", "wrong", Some(&chain)).await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    let response = harness
        .login_via("ghost", "wrong", Some("10.9.9.200, 192.0.2.40"))
        .await?;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let response = harness
        .login_via("ghost", "wrong", Some("192.0.2.41"))
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn login_fails_open_when_rate_cache_is_down() -> Result<()> {
    let harness = Harness::new()?;
    harness.user("erin", Role::Viewer, None).await;
    harness.rates.set_unavailable(true);

    let response = harness.login("erin", PASSWORD).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let records = harness.audit.records().await;
    let fault = records
        .iter()
        .find(|record| record.event == audit::EVENT_RATE_LIMIT_BACKEND)
        .context("backend fault should be audited")?;
    assert_eq!(fault.severity, audit::Severity::High);
    Ok(())
}

#[tokio::test]
async fn login_fails_closed_when_configured() -> Result<()> {
    let harness = Harness::with_config(|config| {
        config.with_login_rate_limit(
            RateLimitConfig::login().with_failure_policy(FailurePolicy::Closed),
        )
    })?;
    harness.user("frank", Role::Viewer, None).await;
    harness.rates.set_unavailable(true);

    let response = harness.login("frank", PASSWORD).await?;
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    assert_eq!(header("x-ratelimit-limit").as_deref(), Some("5"));
    assert_eq!(header("x-ratelimit-remaining").as_deref(), Some("5"));
    assert!(header("x-ratelimit-reset").is_some());
    assert_error(
        response,
        StatusCode::SERVICE_UNAVAILABLE,
        "RATE_LIMIT_UNAVAILABLE",
    )
    .await?;
    assert_eq!(harness.sessions.len().await, 0);
    Ok(())
}

#[tokio::test]
async fn stalled_rate_cache_is_treated_as_unavailable() -> Result<()> {
    let harness = Harness::with_config(|config| {
        config.with_store_timeout(std::time::Duration::from_millis(50))
    })?;
    let grace = harness.user("grace", Role::Viewer, None).await;
    harness.rates.set_stalled(true);

    let response = harness.get_as("/v1/auth/me", &grace).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn missing_credentials_answer_no_token() -> Result<()> {
    let harness = Harness::new()?;
    let response = harness
        .send(Request::get("/v1/auth/me").body(Body::empty())?)
        .await?;
    assert_error(response, StatusCode::UNAUTHORIZED, "NO_TOKEN").await?;
    Ok(())
}

#[tokio::test]
async fn bearer_header_wins_over_session_cookie() -> Result<()> {
    let harness = Harness::new()?;
    harness.user("alice", Role::Editor, None).await;
    let bob = harness.user("bob", Role::Viewer, None).await;

    let login = harness.login("alice", PASSWORD).await?;
    let session_id = cookie_value(&login, SESSION_COOKIE_NAME)?;

    let response = harness
        .send(
            Request::get("/v1/auth/me")
                .header(AUTHORIZATION, harness.bearer(&bob)?)
                .header(COOKIE, format!("{SESSION_COOKIE_NAME}={session_id}"))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["principal"]["username"], "bob");
    assert_eq!(body["carrier"], "bearer_header");
    Ok(())
}

#[tokio::test]
async fn session_cookie_authenticates_without_token() -> Result<()> {
    let harness = Harness::new()?;
    harness.user("alice", Role::Editor, None).await;

    let login = harness.login("alice", PASSWORD).await?;
    let session_id = cookie_value(&login, SESSION_COOKIE_NAME)?;

    let response = harness
        .send(
            Request::get("/v1/auth/me")
                .header(COOKIE, format!("theme=dark; {SESSION_COOKIE_NAME}={session_id}"))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["carrier"], "session");
    Ok(())
}

#[tokio::test]
async fn invalid_bearer_does_not_fall_back_to_session() -> Result<()> {
    let harness = Harness::new()?;
    harness.user("alice", Role::Editor, None).await;

    let login = harness.login("alice", PASSWORD).await?;
    let session_id = cookie_value(&login, SESSION_COOKIE_NAME)?;

    let response = harness
        .send(
            Request::get("/v1/auth/me")
                .header(AUTHORIZATION, "Bearer not.a.token")
                .header(COOKIE, format!("{SESSION_COOKIE_NAME}={session_id}"))
                .body(Body::empty())?,
        )
        .await?;
    assert_error(response, StatusCode::UNAUTHORIZED, "INVALID_TOKEN").await?;

    let events = harness.audit.events().await;
    assert!(events.iter().any(|event| event == audit::EVENT_CREDENTIAL_REJECTED));
    Ok(())
}

#[tokio::test]
async fn expired_token_is_reported_as_expired() -> Result<()> {
    let harness = Harness::new()?;
    let alice = harness.user("alice", Role::Editor, None).await;
    let issued = harness.state.codec().issue(
        &alice,
        ChronoDuration::minutes(5),
        Utc::now() - ChronoDuration::hours(1),
    )?;

    let response = harness
        .send(
            Request::get("/v1/auth/me")
                .header(AUTHORIZATION, format!("Bearer {}", issued.token))
                .body(Body::empty())?,
        )
        .await?;
    assert_error(response, StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED").await?;
    Ok(())
}

#[tokio::test]
async fn expired_sessions_are_reported_then_swept() -> Result<()> {
    let harness = Harness::new()?;
    let alice = harness.user("alice", Role::Editor, None).await;
    let issued_at = Utc::now() - ChronoDuration::hours(2);
    for id in ["presented", "abandoned"] {
        harness
            .sessions
            .set(&Session {
                session_id: id.to_string(),
                principal_id: alice.id,
                issued_at,
                last_accessed_at: issued_at,
                ttl_seconds: 3600,
                remember_me: false,
            })
            .await?;
    }

    let response = harness
        .send(
            Request::get("/v1/auth/me")
                .header(COOKIE, format!("{SESSION_COOKIE_NAME}=presented"))
                .body(Body::empty())?,
        )
        .await?;
    assert_error(response, StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED").await?;
    assert!(!harness.sessions.contains("presented").await);
    assert!(harness.sessions.contains("abandoned").await);

    let report = sweep_expired(
        harness.sessions.as_ref(),
        harness.rates.as_ref(),
        harness.state.config().store_timeout(),
        Utc::now(),
    )
    .await?;
    assert_eq!(report.sessions, 1);
    assert_eq!(harness.sessions.len().await, 0);
    Ok(())
}

#[tokio::test]
async fn session_of_deactivated_principal_is_revoked() -> Result<()> {
    let harness = Harness::new()?;
    let alice = harness.user("alice", Role::Editor, None).await;

    let login = harness.login("alice", PASSWORD).await?;
    let session_id = cookie_value(&login, SESSION_COOKIE_NAME)?;
    harness
        .users
        .set_status(alice.id, AccountStatus::Suspended)
        .await;

    let response = harness
        .send(
            Request::get("/v1/auth/me")
                .header(COOKIE, format!("{SESSION_COOKIE_NAME}={session_id}"))
                .body(Body::empty())?,
        )
        .await?;
    assert_error(response, StatusCode::UNAUTHORIZED, "INVALID_USER").await?;
    assert!(!harness.sessions.contains(&session_id).await);
    Ok(())
}

#[tokio::test]
async fn token_of_deleted_principal_is_rejected() -> Result<()> {
    let harness = Harness::new()?;
    let alice = harness.user("alice", Role::Editor, None).await;
    let bearer = harness.bearer(&alice)?;
    harness.users.remove_user(alice.id).await;

    let response = harness
        .send(
            Request::get("/v1/auth/me")
                .header(AUTHORIZATION, bearer)
                .body(Body::empty())?,
        )
        .await?;
    assert_error(response, StatusCode::UNAUTHORIZED, "INVALID_USER").await?;
    Ok(())
}

#[tokio::test]
async fn position_owned_by_other_ministry_is_denied() -> Result<()> {
    let harness = Harness::new()?;
    let ministry_a = Uuid::new_v4();
    let ministry_b = Uuid::new_v4();
    let position = Uuid::new_v4();
    harness
        .users
        .add_resource(ResourceType::Position, position, ministry_a)
        .await;

    let outsider = harness.user("outsider", Role::Editor, Some(ministry_b)).await;
    let insider = harness.user("insider", Role::Editor, Some(ministry_a)).await;
    let root = harness.user("root", Role::SuperAdmin, None).await;
    let uri = format!("/v1/positions/{position}/access");

    let response = harness.get_as(&uri, &outsider).await?;
    assert_error(response, StatusCode::FORBIDDEN, "RESOURCE_ACCESS_DENIED").await?;

    let response = harness.get_as(&uri, &insider).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = harness.get_as(&uri, &root).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let records = harness.audit.records().await;
    let denial = records
        .iter()
        .find(|record| record.event == audit::EVENT_AUTHZ_DENIED)
        .context("denial should be audited")?;
    assert_eq!(denial.principal_id, Some(outsider.id));
    Ok(())
}

#[tokio::test]
async fn missing_resource_is_not_found() -> Result<()> {
    let harness = Harness::new()?;
    let editor = harness
        .user("editor", Role::Editor, Some(Uuid::new_v4()))
        .await;

    let uri = format!("/v1/employees/{}/access", Uuid::new_v4());
    let response = harness.get_as(&uri, &editor).await?;
    assert_error(response, StatusCode::NOT_FOUND, "RESOURCE_NOT_FOUND").await?;

    let response = harness
        .get_as("/v1/employees/not-a-uuid/access", &editor)
        .await?;
    assert_error(response, StatusCode::NOT_FOUND, "RESOURCE_NOT_FOUND").await?;
    Ok(())
}

#[tokio::test]
async fn viewer_cannot_modify_positions() -> Result<()> {
    let harness = Harness::new()?;
    let ministry = Uuid::new_v4();
    let position = Uuid::new_v4();
    harness
        .users
        .add_resource(ResourceType::Position, position, ministry)
        .await;
    let viewer = harness.user("viewer", Role::Viewer, Some(ministry)).await;

    let response = harness
        .get_as(&format!("/v1/positions/{position}/access"), &viewer)
        .await?;
    assert_error(response, StatusCode::FORBIDDEN, "INSUFFICIENT_PERMISSIONS").await?;
    Ok(())
}

#[tokio::test]
async fn ministry_scope_follows_principal_tenant() -> Result<()> {
    let harness = Harness::new()?;
    let home = Uuid::new_v4();
    let viewer = harness.user("viewer", Role::Viewer, Some(home)).await;
    let root = harness.user("root", Role::SuperAdmin, None).await;

    let response = harness
        .get_as(&format!("/v1/ministries/{home}/access"), &viewer)
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let foreign = format!("/v1/ministries/{}/access", Uuid::new_v4());
    let response = harness.get_as(&foreign, &viewer).await?;
    assert_error(response, StatusCode::FORBIDDEN, "MINISTRY_ACCESS_DENIED").await?;

    let response = harness.get_as(&foreign, &root).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn unlock_requires_super_admin() -> Result<()> {
    let harness = Harness::new()?;
    let ministry = Uuid::new_v4();
    let admin = harness
        .user("ministry-admin", Role::MinistryAdmin, Some(ministry))
        .await;
    let root = harness.user("root", Role::SuperAdmin, None).await;
    let victim = harness.user("victim", Role::Editor, Some(ministry)).await;
    harness
        .users
        .set_lockout(
            victim.id,
            LockoutState {
                failed_attempts: 5,
                locked_until: Some(Utc::now() + ChronoDuration::minutes(15)),
            },
        )
        .await;
    let uri = format!("/v1/admin/users/{}/unlock", victim.id);

    let response = harness
        .send(
            Request::post(uri.as_str())
                .header(AUTHORIZATION, harness.bearer(&admin)?)
                .body(Body::empty())?,
        )
        .await?;
    assert_error(response, StatusCode::FORBIDDEN, "INSUFFICIENT_PERMISSIONS").await?;

    let response = harness
        .send(
            Request::post(uri.as_str())
                .header(AUTHORIZATION, harness.bearer(&root)?)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["unlocked"], true);

    let stored = harness
        .users
        .principal(victim.id)
        .await
        .context("victim should exist")?;
    assert!(stored.lockout.is_clear());

    let response = harness
        .send(
            Request::post(format!("/v1/admin/users/{}/unlock", Uuid::new_v4()))
                .header(AUTHORIZATION, harness.bearer(&root)?)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let events = harness.audit.events().await;
    assert!(events.iter().any(|event| event == audit::EVENT_ACCOUNT_UNLOCKED));
    Ok(())
}

#[tokio::test]
async fn logout_is_idempotent() -> Result<()> {
    let harness = Harness::new()?;
    harness.user("alice", Role::Editor, None).await;

    let login = harness.login("alice", PASSWORD).await?;
    let session_id = cookie_value(&login, SESSION_COOKIE_NAME)?;
    let logout = || -> Result<Request<Body>> {
        Ok(Request::post("/v1/auth/logout")
            .header(COOKIE, format!("{SESSION_COOKIE_NAME}={session_id}"))
            .body(Body::empty())?)
    };

    let response = harness.send(logout()?).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let cleared = set_cookies(&response);
    assert_eq!(cleared.len(), 2);
    assert!(cleared.iter().all(|cookie| cookie.contains("Max-Age=0")));
    assert!(!harness.sessions.contains(&session_id).await);

    let response = harness.send(logout()?).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = harness
        .send(Request::post("/v1/auth/logout").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let events = harness.audit.events().await;
    assert_eq!(
        events
            .iter()
            .filter(|event| *event == audit::EVENT_LOGOUT)
            .count(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn api_limiter_keys_by_token_subject() -> Result<()> {
    let harness = Harness::with_config(|config| {
        config.with_api_rate_limit(RateLimitConfig::api().with_limit(2))
    })?;
    let alice = harness.user("alice", Role::Editor, None).await;
    let bob = harness.user("bob", Role::Editor, None).await;

    for _ in 0..2 {
        let response = harness.get_as("/v1/auth/me", &alice).await?;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = harness.get_as("/v1/auth/me", &alice).await?;
    assert_error(response, StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED").await?;

    let response = harness.get_as("/v1/auth/me", &bob).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[test]
fn schema_defines_every_table_the_stores_query() {
    for table in [
        "users",
        "ministries",
        "positions",
        "employees",
        "user_sessions",
        "rate_limit_windows",
        "audit_log",
    ] {
        assert!(
            SCHEMA_SQL.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
            "missing table {table}"
        );
    }
}
