//! Access control for the directory API.
//!
//! This module owns authentication (bearer token, token cookie, server-side
//! session), account lockout, rate limiting, the authorization chain, and the
//! audit trail that records every decision.
//!
//! ## Account Lockout
//!
//! - **Threshold:** 5 consecutive failed logins.
//! - **Lock duration:** 15 minutes. Failures while locked do not extend it.
//! - **Reset:** any successful login, or `POST /v1/admin/users/{user_id}/unlock`.
//!
//! ## Rate Limiting
//!
//! - **Login:** 5 attempts per IP + username within 15 minutes.
//! - **API:** 100 requests per principal (or IP when anonymous) per minute.
//! - **Degradation:** when the counter backend is unreachable both limiters fail
//!   open unless configured otherwise.
//! - **Client address:** the socket peer. `X-Forwarded-For` is only honoured
//!   with `--trust-forwarded-for`, and then only its right-most entry.
//! - **Retention:** expired sessions and closed windows are purged by a
//!   background sweep.
//!
//! > **Warning:** Bearer tokens are stateless. Rotating the signing secret is the
//! > only way to revoke tokens that have not expired yet.

pub(crate) mod access;
pub(crate) mod admin;
pub mod audit;
pub mod authorize;
pub mod error;
pub mod lockout;
pub(crate) mod login;
#[cfg(test)]
pub mod memory;
pub mod password;
pub mod principal;
pub mod rate_limit;
pub mod resolver;
pub(crate) mod session;
mod state;
pub mod storage;
mod sweep;
pub mod token;
pub(crate) mod types;
mod utils;

pub use audit::PgAuditSink;
pub use authorize::{
    AuthorizationChain, Check, ResourceType, authorize, authorize_resource, authorize_tenant,
    enforce,
};
pub use lockout::LockoutPolicy;
pub use principal::Role;
pub use rate_limit::{FailurePolicy, RateLimitConfig, rate_limit};
pub use resolver::require_auth;
pub use state::{AuthConfig, AuthState, AuthStores};
pub use storage::PgStore;
pub use sweep::spawn_expiry_sweeper;

#[cfg(test)]
mod tests;
