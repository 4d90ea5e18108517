//! Password login.
//!
//! Flow Overview:
//! 1) Count the attempt against the login limiter (`login:<ip>:<username>`).
//! 2) Look the user up; unknown users, inactive users and wrong passwords all
//!    answer `INVALID_CREDENTIALS` and all pay for one Argon2 verification, so
//!    usernames cannot be enumerated by status or timing.
//! 3) A locked account answers 423 before the password is checked.
//! 4) A wrong password feeds the lockout counter; a correct one resets it,
//!    stores a session, issues a token, and sets both cookies.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

use super::{
    audit::{self, AuditRecord, Outcome, Severity},
    error::AuthError,
    lockout::FailureOutcome,
    password::{verify_decoy, verify_password},
    principal::Principal,
    session::{audit_login_success, new_session, session_cookie, token_cookie},
    state::AuthState,
    storage::{UserCredentials, bounded},
    types::{ErrorBody, LoginRequest, LoginResponse, PrincipalResponse},
    utils::{ClientIp, normalize_username, valid_username},
};

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in; session and token cookies set", body = LoginResponse),
        (status = 401, description = "Invalid username or password", body = ErrorBody),
        (status = 423, description = "Account locked", body = ErrorBody),
        (status = 429, description = "Too many login attempts", body = ErrorBody),
        (status = 503, description = "Rate limiting unavailable", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    auth_state: Extension<Arc<AuthState>>,
    ClientIp(ip): ClientIp,
    Json(request): Json<LoginRequest>,
) -> Response {
    let now = Utc::now();
    let username = normalize_username(&request.username);

    let gate = auth_state.login_gate();
    let decision = match gate.check(&gate.login_key(&ip, &username), now).await {
        Ok(decision) => decision,
        Err(err) => return gate.reject(err, now),
    };
    if !decision.allowed {
        return decision.into_denial();
    }

    let mut response = match attempt(&auth_state, &username, &request, &ip).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    };
    decision.apply_headers(response.headers_mut());
    response
}

async fn attempt(
    state: &AuthState,
    username: &str,
    request: &LoginRequest,
    ip: &str,
) -> Result<Response, AuthError> {
    let now = Utc::now();
    if !valid_username(username) {
        verify(&request.password, None).await?;
        audit_failure(state, None, username, ip, "malformed username");
        return Err(AuthError::InvalidCredentials);
    }

    let timeout = state.config().store_timeout();
    let found = bounded(
        timeout,
        "credential lookup",
        state.users().find_by_username(username),
    )
    .await?;

    let Some(UserCredentials {
        principal,
        password_hash,
    }) = found
    else {
        verify(&request.password, None).await?;
        audit_failure(state, None, username, ip, "unknown user");
        return Err(AuthError::InvalidCredentials);
    };

    if let Some(until) = principal.locked_until(now) {
        audit_failure(state, Some(&principal), username, ip, "account locked");
        return Err(AuthError::AccountLocked(until));
    }
    if !principal.is_active() {
        verify(&request.password, None).await?;
        audit_failure(state, Some(&principal), username, ip, "account inactive");
        return Err(AuthError::InvalidCredentials);
    }

    let verified = verify(&request.password, Some(password_hash)).await?;

    if !verified {
        audit_failure(state, Some(&principal), username, ip, "wrong password");
        return match state.lockout().record_failure(&principal, now).await? {
            FailureOutcome::Locked { until } => {
                info!(principal_id = %principal.id, %until, "account locked after failed logins");
                Err(AuthError::AccountLocked(until))
            }
            FailureOutcome::AlreadyLocked { until } => Err(AuthError::AccountLocked(until)),
            FailureOutcome::Counted { .. } => Err(AuthError::InvalidCredentials),
        };
    }

    state.lockout().record_success(&principal, now).await?;

    let session = new_session(state.config(), principal.id, request.remember_me, now)?;
    bounded(timeout, "session store", state.sessions().set(&session)).await?;

    let issued = state
        .codec()
        .issue(&principal, state.config().token_ttl(), now)
        .map_err(|err| AuthError::Internal(anyhow::anyhow!("failed to issue token: {err}")))?;

    let mut headers = HeaderMap::new();
    match (
        session_cookie(state.config(), &session),
        token_cookie(state.config(), &issued.token),
    ) {
        (Ok(session_value), Ok(token_value)) => {
            headers.append(SET_COOKIE, session_value);
            headers.append(SET_COOKIE, token_value);
        }
        (Err(err), _) | (_, Err(err)) => {
            error!("Failed to build auth cookies: {err}");
            return Err(AuthError::Internal(anyhow::anyhow!("invalid cookie value")));
        }
    }

    audit_login_success(state, &principal, request.remember_me);

    let mut principal = principal;
    principal.last_login = Some(now);
    let body = LoginResponse {
        access_token: issued.token,
        token_type: "Bearer".to_string(),
        expires_at: issued.expires_at,
        principal: PrincipalResponse::from(&principal),
    };
    Ok((StatusCode::OK, headers, Json(body)).into_response())
}

/// Run one Argon2 verification off the async workers. Without a stored hash
/// the decoy is verified instead and the result is `false`.
async fn verify(password: &str, stored_hash: Option<String>) -> Result<bool, AuthError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || match stored_hash {
        Some(hash) => verify_password(&password, &hash),
        None => {
            verify_decoy(&password);
            false
        }
    })
    .await
    .map_err(|err| AuthError::Internal(anyhow::anyhow!("password verification panicked: {err}")))
}

fn audit_failure(
    state: &AuthState,
    principal: Option<&Principal>,
    username: &str,
    ip: &str,
    reason: &str,
) {
    let mut record = AuditRecord::new(audit::EVENT_LOGIN_FAILED, Outcome::Failure, Severity::Medium)
        .with_resource("session")
        .with_action("create")
        .with_context(json!({
            "username": username,
            "ip": ip,
            "reason": reason,
        }));
    if let Some(principal) = principal {
        record = record.with_principal(principal.id);
    }
    state.auditor().record(record);
}
