//! Error kinds for the request pipeline and their HTTP rendering.
//!
//! Every failure is rendered as `{ "error": CODE, "message": ... }` with a
//! stable machine-readable code. Internal faults never leak their cause.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::error;

use super::types::ErrorBody;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication required")]
    NoToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    TokenExpired,
    #[error("account locked until {0}")]
    AccountLocked(DateTime<Utc>),
    #[error("user not found or inactive")]
    InvalidPrincipal,
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

impl AuthError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoToken => "NO_TOKEN",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::AccountLocked(_) => "ACCOUNT_LOCKED",
            Self::InvalidPrincipal => "INVALID_USER",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NoToken
            | Self::InvalidToken
            | Self::TokenExpired
            | Self::InvalidPrincipal
            | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::AccountLocked(_) => StatusCode::LOCKED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let mut body = ErrorBody::new(self.code(), &self.to_string());
        match &self {
            Self::AccountLocked(until) => body.locked_until = Some(*until),
            Self::Internal(err) => {
                error!("Auth pipeline failure: {err:#}");
                body.message = "internal error".to_string();
            }
            _ => {}
        }
        (self.status(), Json(body)).into_response()
    }
}

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("authentication required")]
    NotAuthenticated,
    #[error("insufficient permissions")]
    InsufficientPermissions,
    #[error("access to this ministry is denied")]
    TenantAccessDenied,
    #[error("access to this resource is denied")]
    ResourceAccessDenied,
    #[error("resource not found")]
    ResourceNotFound,
    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

impl AuthzError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
            Self::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            Self::TenantAccessDenied => "MINISTRY_ACCESS_DENIED",
            Self::ResourceAccessDenied => "RESOURCE_ACCESS_DENIED",
            Self::ResourceNotFound => "RESOURCE_NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotAuthenticated => StatusCode::UNAUTHORIZED,
            Self::InsufficientPermissions
            | Self::TenantAccessDenied
            | Self::ResourceAccessDenied => StatusCode::FORBIDDEN,
            Self::ResourceNotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for AuthzError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        let mut body = ErrorBody::new(self.code(), &self.to_string());
        if let Self::Internal(err) = &self {
            error!("Authorization failure: {err:#}");
            body.message = "internal error".to_string();
        }
        (self.status(), Json(body)).into_response()
    }
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("too many requests")]
    Exceeded { retry_after_seconds: u64 },
    #[error("rate limiting is temporarily unavailable")]
    Unavailable,
}

impl RateLimitError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Exceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::Unavailable => "RATE_LIMIT_UNAVAILABLE",
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Exceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let mut body = ErrorBody::new(self.code(), &self.to_string());
        let retry_after = match &self {
            Self::Exceeded {
                retry_after_seconds,
            } => Some(*retry_after_seconds),
            Self::Unavailable => None,
        };
        body.retry_after = retry_after;

        let mut response = (self.status(), Json(body)).into_response();
        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}
