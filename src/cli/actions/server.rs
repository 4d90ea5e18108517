use crate::api::{
    self,
    handlers::auth::{AuthConfig, FailurePolicy, LockoutPolicy, RateLimitConfig},
};
use anyhow::Result;
use secrecy::SecretString;
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub frontend_base_url: String,
    pub token_secret: SecretString,
    pub token_ttl_seconds: i64,
    pub session_ttl_seconds: i64,
    pub remember_me_ttl_seconds: i64,
    pub lockout_threshold: u32,
    pub lockout_seconds: i64,
    pub store_timeout_ms: u64,
    pub sweep_interval_seconds: u64,
    pub login_rate_limit: u64,
    pub login_rate_window_seconds: u64,
    pub api_rate_limit: u64,
    pub api_rate_window_seconds: u64,
    pub rate_limit_failure_policy: FailurePolicy,
    pub trust_forwarded_for: bool,
}

impl Args {
    /// Fold the parsed flags into the auth configuration.
    #[must_use]
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(self.frontend_base_url.clone(), self.token_secret.clone())
            .with_token_ttl_seconds(self.token_ttl_seconds)
            .with_session_ttl_seconds(self.session_ttl_seconds)
            .with_remember_me_ttl_seconds(self.remember_me_ttl_seconds)
            .with_lockout(LockoutPolicy::new(
                self.lockout_threshold,
                self.lockout_seconds,
            ))
            .with_store_timeout(Duration::from_millis(self.store_timeout_ms))
            .with_sweep_interval(Duration::from_secs(self.sweep_interval_seconds))
            .with_trust_forwarded_for(self.trust_forwarded_for)
            .with_login_rate_limit(
                RateLimitConfig::login()
                    .with_limit(self.login_rate_limit)
                    .with_window(Duration::from_secs(self.login_rate_window_seconds))
                    .with_failure_policy(self.rate_limit_failure_policy),
            )
            .with_api_rate_limit(
                RateLimitConfig::api()
                    .with_limit(self.api_rate_limit)
                    .with_window(Duration::from_secs(self.api_rate_window_seconds))
                    .with_failure_policy(self.rate_limit_failure_policy),
            )
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let auth_config = args.auth_config();
    debug!(
        port = args.port,
        lockout_threshold = auth_config.lockout().threshold(),
        login_limit = auth_config.login_rate_limit().limit(),
        api_limit = auth_config.api_rate_limit().limit(),
        trust_forwarded_for = auth_config.trust_forwarded_for(),
        "starting server"
    );

    api::new(args.port, args.dsn, auth_config).await
}
