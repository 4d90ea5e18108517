//! Session and token cookies plus the logout and `me` endpoints.

use axum::{
    Json,
    extract::Extension,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{InvalidHeaderValue, SET_COOKIE},
    },
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use super::{
    audit::{self, AuditRecord, Outcome, Severity},
    principal::{AuthContext, Principal},
    state::{AuthConfig, AuthState},
    storage::{Session, bounded},
    types::{ErrorBody, MeResponse, PrincipalResponse},
    utils::{extract_cookie, generate_session_id},
};

pub const SESSION_COOKIE_NAME: &str = "orgdir_session";
pub const TOKEN_COOKIE_NAME: &str = "orgdir_token";

impl From<&Principal> for PrincipalResponse {
    fn from(principal: &Principal) -> Self {
        Self {
            id: principal.id,
            username: principal.username.clone(),
            role: principal.role,
            ministry_id: principal.tenant_id,
            last_login: principal.last_login,
        }
    }
}

/// Build a new session for `principal_id` without storing it.
///
/// # Errors
/// Returns an error if the random source fails.
pub(super) fn new_session(
    config: &AuthConfig,
    principal_id: Uuid,
    remember_me: bool,
    now: DateTime<Utc>,
) -> anyhow::Result<Session> {
    Ok(Session {
        session_id: generate_session_id()?,
        principal_id,
        issued_at: now,
        last_accessed_at: now,
        ttl_seconds: config.session_ttl_seconds(remember_me),
        remember_me,
    })
}

fn cookie(
    config: &AuthConfig,
    name: &str,
    value: &str,
    max_age: i64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Build a `HttpOnly` cookie carrying the session id.
pub(super) fn session_cookie(
    config: &AuthConfig,
    session: &Session,
) -> Result<HeaderValue, InvalidHeaderValue> {
    cookie(
        config,
        SESSION_COOKIE_NAME,
        &session.session_id,
        session.ttl_seconds,
    )
}

/// Build a `HttpOnly` cookie carrying the bearer token.
pub(super) fn token_cookie(
    config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    cookie(
        config,
        TOKEN_COOKIE_NAME,
        token,
        config.token_ttl_seconds(),
    )
}

fn clear_cookies(config: &AuthConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in [SESSION_COOKIE_NAME, TOKEN_COOKIE_NAME] {
        if let Ok(value) = cookie(config, name, "", 0) {
            headers.append(SET_COOKIE, value);
        }
    }
    headers
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Some(session_id) = extract_cookie(&headers, SESSION_COOKIE_NAME) {
        let timeout = auth_state.config().store_timeout();
        let sessions = auth_state.sessions();
        match bounded(timeout, "session lookup", sessions.get(&session_id)).await {
            Ok(Some(session)) => {
                auth_state.auditor().record(
                    AuditRecord::new(audit::EVENT_LOGOUT, Outcome::Success, Severity::Low)
                        .with_principal(session.principal_id)
                        .with_resource("session")
                        .with_action("delete"),
                );
            }
            Ok(None) => {}
            Err(err) => error!("Failed to lookup session on logout: {err:#}"),
        }
        if let Err(err) = bounded(timeout, "session delete", sessions.delete(&session_id)).await {
            error!("Failed to delete session: {err:#}");
        }
    }

    // Always clear the cookies, even if the session record was missing.
    (StatusCode::NO_CONTENT, clear_cookies(auth_state.config())).into_response()
}

#[utoipa::path(
    get,
    path = "/v1/auth/me",
    responses(
        (status = 200, description = "Authenticated principal", body = MeResponse),
        (status = 401, description = "No valid credential", body = ErrorBody),
        (status = 423, description = "Account locked", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn me(auth: AuthContext) -> impl IntoResponse {
    let response = MeResponse {
        principal: PrincipalResponse::from(auth.principal()),
        carrier: auth.carrier(),
    };
    (StatusCode::OK, Json(response))
}

/// Audit helper shared with the login handler.
pub(super) fn audit_login_success(state: &AuthState, principal: &Principal, remember_me: bool) {
    state.auditor().record(
        AuditRecord::new(audit::EVENT_LOGIN_SUCCEEDED, Outcome::Success, Severity::Low)
            .with_principal(principal.id)
            .with_resource("session")
            .with_action("create")
            .with_context(json!({
                "username": principal.username,
                "remember_me": remember_me,
            })),
    );
}
