//! Access checks.
//!
//! The handlers do nothing themselves: the authorization chain attached to each
//! route decides, and reaching the handler means access is granted. The
//! frontend uses them to decide which edit controls to show.

use axum::http::StatusCode;

use super::types::ErrorBody;

#[utoipa::path(
    get,
    path = "/v1/ministries/{ministry_id}/access",
    params(
        ("ministry_id" = uuid::Uuid, Path, description = "Ministry to check")
    ),
    responses(
        (status = 204, description = "Caller may act within this ministry"),
        (status = 401, description = "No valid credential", body = ErrorBody),
        (status = 403, description = "Ministry access denied", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "access"
)]
pub async fn ministry_access() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[utoipa::path(
    get,
    path = "/v1/positions/{id}/access",
    params(
        ("id" = uuid::Uuid, Path, description = "Position to check")
    ),
    responses(
        (status = 204, description = "Caller may modify this position"),
        (status = 401, description = "No valid credential", body = ErrorBody),
        (status = 403, description = "Resource access denied", body = ErrorBody),
        (status = 404, description = "Position not found", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "access"
)]
pub async fn position_access() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[utoipa::path(
    get,
    path = "/v1/employees/{id}/access",
    params(
        ("id" = uuid::Uuid, Path, description = "Employee to check")
    ),
    responses(
        (status = 204, description = "Caller may modify this employee"),
        (status = 401, description = "No valid credential", body = ErrorBody),
        (status = 403, description = "Resource access denied", body = ErrorBody),
        (status = 404, description = "Employee not found", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "access"
)]
pub async fn employee_access() -> StatusCode {
    StatusCode::NO_CONTENT
}
