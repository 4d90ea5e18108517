use crate::cli::{
    actions::{Action, server},
    telemetry,
};
use anyhow::Result;

/// Execute the provided action and flush pending spans afterwards.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    let result = match action {
        Action::Server(args) => server::execute(args).await,
    };
    telemetry::shutdown_tracer();
    result
}
