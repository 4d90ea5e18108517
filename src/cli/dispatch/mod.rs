//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the server action and its configuration.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{auth, rate_limit};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;
    let rate_opts = rate_limit::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_base_url: auth_opts.frontend_base_url,
        token_secret: auth_opts.token_secret,
        token_ttl_seconds: auth_opts.token_ttl_seconds,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        remember_me_ttl_seconds: auth_opts.remember_me_ttl_seconds,
        lockout_threshold: auth_opts.lockout_threshold,
        lockout_seconds: auth_opts.lockout_seconds,
        store_timeout_ms: auth_opts.store_timeout_ms,
        sweep_interval_seconds: auth_opts.sweep_interval_seconds,
        login_rate_limit: rate_opts.login_limit,
        login_rate_window_seconds: rate_opts.login_window_seconds,
        api_rate_limit: rate_opts.api_limit,
        api_rate_window_seconds: rate_opts.api_window_seconds,
        rate_limit_failure_policy: rate_opts.failure_policy,
        trust_forwarded_for: rate_opts.trust_forwarded_for,
    }))
}
