//! # orgdir-access (Access Control for the Organization Directory API)
//!
//! `orgdir-access` decides who may call the multi-tenant organization-directory API
//! and records every security decision it makes.
//!
//! ## Request Pipeline
//!
//! 1. **Rate limiting:** fixed-window counters keyed per operation class. Login
//!    attempts are limited per IP + username, general traffic per principal or IP.
//!    When the counting backend is unreachable the gate fails open.
//! 2. **Authentication:** a bearer token in the `Authorization` header, then a token
//!    cookie, then a server-side session cookie. The first carrier present wins.
//! 3. **Authorization:** role, tenant (ministry), and resource-ownership checks,
//!    composed per route. The `super_admin` role bypasses tenant scoping.
//!
//! ## Account Lockout
//!
//! Consecutive failed logins lock an account for a configured duration. Failures
//! while locked never extend the lock, and any successful login resets the counter.
//!
//! ## Audit Trail
//!
//! Every terminal outcome (accepted credential, denial, lockout, rate limit) is
//! appended to the audit sink. Audit writes are fire-and-forget and never fail a
//! request.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
