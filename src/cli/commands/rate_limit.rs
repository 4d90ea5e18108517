use super::auth::required;
use crate::api::handlers::auth::FailurePolicy;
use anyhow::{Result, anyhow};
use clap::{Arg, ArgAction, ArgMatches, Command, builder::PossibleValuesParser};

pub const ARG_LOGIN_RATE_LIMIT: &str = "login-rate-limit";
pub const ARG_LOGIN_RATE_WINDOW_SECONDS: &str = "login-rate-window-seconds";
pub const ARG_API_RATE_LIMIT: &str = "api-rate-limit";
pub const ARG_API_RATE_WINDOW_SECONDS: &str = "api-rate-window-seconds";
pub const ARG_RATE_LIMIT_FAILURE_POLICY: &str = "rate-limit-failure-policy";
pub const ARG_TRUST_FORWARDED_FOR: &str = "trust-forwarded-for";

#[derive(Debug)]
pub struct Options {
    pub login_limit: u64,
    pub login_window_seconds: u64,
    pub api_limit: u64,
    pub api_window_seconds: u64,
    pub failure_policy: FailurePolicy,
    pub trust_forwarded_for: bool,
}

impl Options {
    /// # Errors
    /// Returns an error if an argument is missing or the failure policy is unknown.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let failure_policy = matches
            .get_one::<String>(ARG_RATE_LIMIT_FAILURE_POLICY)
            .ok_or_else(|| anyhow!("missing required argument: --{ARG_RATE_LIMIT_FAILURE_POLICY}"))?
            .parse::<FailurePolicy>()?;

        Ok(Self {
            login_limit: required(matches, ARG_LOGIN_RATE_LIMIT)?,
            login_window_seconds: required(matches, ARG_LOGIN_RATE_WINDOW_SECONDS)?,
            api_limit: required(matches, ARG_API_RATE_LIMIT)?,
            api_window_seconds: required(matches, ARG_API_RATE_WINDOW_SECONDS)?,
            failure_policy,
            trust_forwarded_for: matches.get_flag(ARG_TRUST_FORWARDED_FOR),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOGIN_RATE_LIMIT)
                .long(ARG_LOGIN_RATE_LIMIT)
                .help("Login attempts allowed per IP and username per window")
                .env("ORGDIR_LOGIN_RATE_LIMIT")
                .default_value("5")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOGIN_RATE_WINDOW_SECONDS)
                .long(ARG_LOGIN_RATE_WINDOW_SECONDS)
                .help("Login rate-limit window in seconds")
                .env("ORGDIR_LOGIN_RATE_WINDOW_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_API_RATE_LIMIT)
                .long(ARG_API_RATE_LIMIT)
                .help("API requests allowed per principal (or IP) per window")
                .env("ORGDIR_API_RATE_LIMIT")
                .default_value("100")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_API_RATE_WINDOW_SECONDS)
                .long(ARG_API_RATE_WINDOW_SECONDS)
                .help("API rate-limit window in seconds")
                .env("ORGDIR_API_RATE_WINDOW_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_FAILURE_POLICY)
                .long(ARG_RATE_LIMIT_FAILURE_POLICY)
                .help("Behaviour when the rate-limit backend is unreachable")
                .env("ORGDIR_RATE_LIMIT_FAILURE_POLICY")
                .default_value("open")
                .value_parser(PossibleValuesParser::new(["open", "closed"])),
        )
        .arg(
            Arg::new(ARG_TRUST_FORWARDED_FOR)
                .long(ARG_TRUST_FORWARDED_FOR)
                .help("Key clients by the right-most X-Forwarded-For entry instead of the socket peer")
                .long_help(
                    "Key clients by the right-most X-Forwarded-For entry instead of the socket peer. Only enable behind a reverse proxy that appends the header; otherwise callers choose their own rate-limit key.",
                )
                .env("ORGDIR_TRUST_FORWARDED_FOR")
                .action(ArgAction::SetTrue),
        )
}
