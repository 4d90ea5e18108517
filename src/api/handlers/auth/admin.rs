//! Administrative account endpoints.
//!
//! Routed behind `require_auth` and a `super_admin` role check.

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{
    error::AuthError,
    principal::AuthContext,
    state::AuthState,
    types::{ErrorBody, UnlockResponse},
};

#[utoipa::path(
    post,
    path = "/v1/admin/users/{user_id}/unlock",
    params(
        ("user_id" = Uuid, Path, description = "Account to unlock")
    ),
    responses(
        (status = 200, description = "Lockout counters cleared", body = UnlockResponse),
        (status = 401, description = "No valid credential", body = ErrorBody),
        (status = 403, description = "Caller is not a super admin", body = ErrorBody),
        (status = 404, description = "No such user", body = UnlockResponse)
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn unlock_user(
    auth: AuthContext,
    auth_state: Extension<Arc<AuthState>>,
    Path(user_id): Path<Uuid>,
) -> Response {
    match auth_state.lockout().unlock(user_id, auth.principal()).await {
        Ok(unlocked) => {
            let status = if unlocked {
                info!(actor = %auth.principal().id, %user_id, "account unlocked");
                StatusCode::OK
            } else {
                StatusCode::NOT_FOUND
            };
            (status, Json(UnlockResponse { user_id, unlocked })).into_response()
        }
        Err(err) => AuthError::Internal(err).into_response(),
    }
}
