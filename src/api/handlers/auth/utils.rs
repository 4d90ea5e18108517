//! Small helpers for credential extraction and session id handling.

use anyhow::{Context, Result};
use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{RngCore, rngs::OsRng};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use super::state::AuthState;

const UNKNOWN_CLIENT: &str = "unknown";

/// Trim a submitted username for lookup.
pub(super) fn normalize_username(username: &str) -> String {
    username.trim().to_string()
}

/// Usernames are short, printable and free of separators used in rate-limit keys.
pub(super) fn valid_username(username: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9._@-]{1,64}$").is_ok_and(|regex| regex.is_match(username))
}

/// Create a new opaque session id for the session cookie.
/// The raw value is only returned to set the cookie; Postgres stores a hash.
pub(crate) fn generate_session_id() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session id")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Hash a session id so raw values never touch the database.
pub(crate) fn hash_session_id(session_id: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.finalize().to_vec()
}

/// Value of `Authorization: Bearer <token>`, if present and non-empty.
pub(super) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Value of the named cookie, if present and non-empty.
pub(super) fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(axum::http::header::COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == name).then(|| val.trim().to_string())
        })
        .find(|val| !val.is_empty())
}

/// Right-most `X-Forwarded-For` entry, the hop appended by the nearest proxy.
///
/// Entries that are not IP addresses are ignored so a forged value can never
/// smuggle separators into a rate-limit key.
pub(super) fn forwarded_client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .last()
        .and_then(|value| value.parse::<IpAddr>().ok())
        .map(|ip| ip.to_string())
}

/// Client address used for rate-limit keys.
///
/// The socket peer, unless the deployment sits behind a proxy and enabled
/// `--trust-forwarded-for`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let trust_forwarded_for = parts
            .extensions
            .get::<Arc<AuthState>>()
            .is_some_and(|state| state.config().trust_forwarded_for());
        Ok(Self(client_ip(parts, trust_forwarded_for)))
    }
}

pub(super) fn client_ip(parts: &Parts, trust_forwarded_for: bool) -> String {
    trust_forwarded_for
        .then(|| forwarded_client_ip(&parts.headers))
        .flatten()
        .or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
