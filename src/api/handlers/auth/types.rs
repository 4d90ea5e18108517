//! Request/response types for auth endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::principal::{CredentialCarrier, Role};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorBody {
    #[must_use]
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            error: code.to_string(),
            message: message.to_string(),
            locked_until: None,
            retry_after: None,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub principal: PrincipalResponse,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
pub struct PrincipalResponse {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub ministry_id: Option<Uuid>,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MeResponse {
    pub principal: PrincipalResponse,
    pub carrier: CredentialCarrier,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UnlockResponse {
    pub user_id: Uuid,
    pub unlocked: bool,
}
