//! Credential resolution.
//!
//! Flow Overview:
//! 1) Pick the first carrier present: `Authorization: Bearer`, then the token
//!    cookie, then the session cookie. A carrier that is present but invalid
//!    fails the request; later carriers are not consulted.
//! 2) Token carriers are verified statelessly, session carriers are looked up in
//!    the session store.
//! 3) Either way the principal is re-read from the user store so that
//!    deactivation and lockout take effect immediately.

use axum::{
    extract::{Extension, FromRequestParts, Request},
    http::{HeaderMap, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use super::{
    audit::{self, AuditRecord, Outcome, Severity},
    error::{AuthError, AuthzError},
    principal::{AuthContext, CredentialCarrier, Principal},
    session::{SESSION_COOKIE_NAME, TOKEN_COOKIE_NAME},
    state::AuthState,
    storage::bounded,
    token::TokenError,
    utils::{extract_bearer_token, extract_cookie},
};

/// Resolve the request's credentials into an `AuthContext`.
///
/// # Errors
/// Returns the `AuthError` describing why no identity could be established.
pub async fn authenticate(
    state: &AuthState,
    headers: &HeaderMap,
    now: DateTime<Utc>,
) -> Result<AuthContext, AuthError> {
    if let Some(token) = extract_bearer_token(headers) {
        return from_token(state, &token, CredentialCarrier::BearerHeader, now).await;
    }
    if let Some(token) = extract_cookie(headers, TOKEN_COOKIE_NAME) {
        return from_token(state, &token, CredentialCarrier::TokenCookie, now).await;
    }
    if let Some(session_id) = extract_cookie(headers, SESSION_COOKIE_NAME) {
        return from_session(state, &session_id, now).await;
    }
    Err(AuthError::NoToken)
}

async fn from_token(
    state: &AuthState,
    token: &str,
    carrier: CredentialCarrier,
    now: DateTime<Utc>,
) -> Result<AuthContext, AuthError> {
    let claims = match state.codec().validate(token, now) {
        Ok(claims) => claims,
        Err(err) => {
            let failure = match err {
                TokenError::Expired => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            };
            reject(state, carrier, None, &failure, &err.to_string());
            return Err(failure);
        }
    };

    let principal = load_active(state, claims.sub, carrier, now).await?;
    Ok(accept(state, principal, carrier))
}

async fn from_session(
    state: &AuthState,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<AuthContext, AuthError> {
    let carrier = CredentialCarrier::Session;
    let timeout = state.config().store_timeout();
    let session = bounded(timeout, "session lookup", state.sessions().get(session_id)).await?;

    let Some(session) = session else {
        reject(state, carrier, None, &AuthError::InvalidToken, "unknown session");
        return Err(AuthError::InvalidToken);
    };
    if session.is_expired(now) {
        bounded(timeout, "session delete", state.sessions().delete(session_id)).await?;
        reject(
            state,
            carrier,
            Some(session.principal_id),
            &AuthError::TokenExpired,
            "session expired",
        );
        return Err(AuthError::TokenExpired);
    }

    let principal = match load_active(state, session.principal_id, carrier, now).await {
        Ok(principal) => principal,
        Err(AuthError::InvalidPrincipal) => {
            // The session outlived its principal; drop it.
            bounded(timeout, "session delete", state.sessions().delete(session_id)).await?;
            return Err(AuthError::InvalidPrincipal);
        }
        Err(err) => return Err(err),
    };

    if let Err(err) = bounded(
        timeout,
        "session touch",
        state.sessions().touch(session_id, now),
    )
    .await
    {
        warn!(principal_id = %principal.id, "Failed to touch session: {err:#}");
    }

    Ok(accept(state, principal, carrier))
}

async fn load_active(
    state: &AuthState,
    principal_id: uuid::Uuid,
    carrier: CredentialCarrier,
    now: DateTime<Utc>,
) -> Result<Principal, AuthError> {
    let principal = bounded(
        state.config().store_timeout(),
        "principal lookup",
        state.users().find_by_id(principal_id),
    )
    .await?;

    let Some(principal) = principal.filter(Principal::is_active) else {
        reject(
            state,
            carrier,
            Some(principal_id),
            &AuthError::InvalidPrincipal,
            "principal missing or inactive",
        );
        return Err(AuthError::InvalidPrincipal);
    };

    if let Some(until) = principal.locked_until(now) {
        let failure = AuthError::AccountLocked(until);
        reject(state, carrier, Some(principal.id), &failure, "account locked");
        return Err(failure);
    }
    Ok(principal)
}

fn accept(state: &AuthState, principal: Principal, carrier: CredentialCarrier) -> AuthContext {
    state.auditor().record(
        AuditRecord::new(
            audit::EVENT_CREDENTIAL_ACCEPTED,
            Outcome::Success,
            Severity::Low,
        )
        .with_principal(principal.id)
        .with_resource("credential")
        .with_action("authenticate")
        .with_context(json!({ "carrier": carrier.as_str() })),
    );
    AuthContext::new(principal, carrier)
}

fn reject(
    state: &AuthState,
    carrier: CredentialCarrier,
    principal_id: Option<uuid::Uuid>,
    failure: &AuthError,
    reason: &str,
) {
    let mut record = AuditRecord::new(
        audit::EVENT_CREDENTIAL_REJECTED,
        Outcome::Failure,
        Severity::Medium,
    )
    .with_resource("credential")
    .with_action("authenticate")
    .with_context(json!({
        "carrier": carrier.as_str(),
        "error": failure.code(),
        "reason": reason,
    }));
    if let Some(id) = principal_id {
        record = record.with_principal(id);
    }
    state.auditor().record(record);
}

/// Middleware requiring an authenticated caller.
pub async fn require_auth(
    Extension(state): Extension<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticate(&state, request.headers(), Utc::now()).await {
        Ok(context) => {
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AuthzError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AuthzError::NotAuthenticated)
    }
}
