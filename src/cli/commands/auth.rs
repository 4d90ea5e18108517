use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_TOKEN_TTL_SECONDS: &str = "token-ttl-seconds";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_REMEMBER_ME_TTL_SECONDS: &str = "remember-me-ttl-seconds";
pub const ARG_LOCKOUT_THRESHOLD: &str = "lockout-threshold";
pub const ARG_LOCKOUT_SECONDS: &str = "lockout-seconds";
pub const ARG_STORE_TIMEOUT_MS: &str = "store-timeout-ms";
pub const ARG_SWEEP_INTERVAL_SECONDS: &str = "sweep-interval-seconds";

#[derive(Debug)]
pub struct Options {
    pub frontend_base_url: String,
    pub token_secret: SecretString,
    pub token_ttl_seconds: i64,
    pub session_ttl_seconds: i64,
    pub remember_me_ttl_seconds: i64,
    pub lockout_threshold: u32,
    pub lockout_seconds: i64,
    pub store_timeout_ms: u64,
    pub sweep_interval_seconds: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let frontend_base_url = matches
            .get_one::<String>(ARG_FRONTEND_BASE_URL)
            .cloned()
            .context("missing required argument: --frontend-base-url")?;
        let token_secret = matches
            .get_one::<String>(ARG_TOKEN_SECRET)
            .cloned()
            .map(SecretString::from)
            .context("missing required argument: --token-secret")?;

        Ok(Self {
            frontend_base_url,
            token_secret,
            token_ttl_seconds: required(matches, ARG_TOKEN_TTL_SECONDS)?,
            session_ttl_seconds: required(matches, ARG_SESSION_TTL_SECONDS)?,
            remember_me_ttl_seconds: required(matches, ARG_REMEMBER_ME_TTL_SECONDS)?,
            lockout_threshold: required(matches, ARG_LOCKOUT_THRESHOLD)?,
            lockout_seconds: required(matches, ARG_LOCKOUT_SECONDS)?,
            store_timeout_ms: required(matches, ARG_STORE_TIMEOUT_MS)?,
            sweep_interval_seconds: required(matches, ARG_SWEEP_INTERVAL_SECONDS)?,
        })
    }
}

/// Fetch a defaulted numeric argument.
pub(super) fn required<T>(matches: &ArgMatches, name: &str) -> Result<T>
where
    T: Clone + Send + Sync + 'static,
{
    matches
        .get_one::<T>(name)
        .cloned()
        .with_context(|| format!("missing required argument: --{name}"))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_credential_args(command);
    with_lockout_args(command)
}

fn with_credential_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL, used for the CORS origin and secure cookies")
                .env("ORGDIR_FRONTEND_BASE_URL")
                .default_value("http://localhost:5173"),
        )
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("HMAC secret for bearer tokens (at least 32 bytes)")
                .long_help(
                    "HMAC secret for bearer tokens (at least 32 bytes). Rotating it revokes every outstanding token.",
                )
                .env("ORGDIR_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_TTL_SECONDS)
                .long(ARG_TOKEN_TTL_SECONDS)
                .help("Bearer token TTL in seconds")
                .env("ORGDIR_TOKEN_TTL_SECONDS")
                .default_value("28800")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session TTL in seconds")
                .env("ORGDIR_SESSION_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REMEMBER_ME_TTL_SECONDS)
                .long(ARG_REMEMBER_ME_TTL_SECONDS)
                .help("Session TTL in seconds when remember-me is requested")
                .env("ORGDIR_REMEMBER_ME_TTL_SECONDS")
                .default_value("2592000")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
}

fn with_lockout_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOCKOUT_THRESHOLD)
                .long(ARG_LOCKOUT_THRESHOLD)
                .help("Consecutive failed logins before the account locks")
                .env("ORGDIR_LOCKOUT_THRESHOLD")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOCKOUT_SECONDS)
                .long(ARG_LOCKOUT_SECONDS)
                .help("Lock duration in seconds")
                .env("ORGDIR_LOCKOUT_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT_MS)
                .long(ARG_STORE_TIMEOUT_MS)
                .help("Deadline for each store call in milliseconds")
                .env("ORGDIR_STORE_TIMEOUT_MS")
                .default_value("2000")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL_SECONDS)
                .long(ARG_SWEEP_INTERVAL_SECONDS)
                .help("Seconds between purges of expired sessions and rate-limit windows")
                .env("ORGDIR_SWEEP_INTERVAL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
