//! Authenticated principal and the read-only request context built from it.
//!
//! Flow Overview: the resolver loads a principal from the user store, checks that
//! it is active and not locked, and then wraps it in an `AuthContext` that is
//! inserted into request extensions. Nothing downstream mutates it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;
use uuid::Uuid;

use super::lockout::LockoutState;

/// Directory roles, ordered from most to least privileged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Cross-ministry operator; bypasses tenant and ownership checks.
    SuperAdmin,
    MinistryAdmin,
    Editor,
    Viewer,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::MinistryAdmin => "ministry_admin",
            Self::Editor => "editor",
            Self::Viewer => "viewer",
        }
    }

    #[must_use]
    pub const fn is_super(self) -> bool {
        matches!(self, Self::SuperAdmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "super_admin" => Ok(Self::SuperAdmin),
            "ministry_admin" => Ok(Self::MinistryAdmin),
            "editor" => Ok(Self::Editor),
            "viewer" => Ok(Self::Viewer),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Inactive,
    Suspended,
}

impl AccountStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Suspended => "suspended",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "suspended" => Ok(Self::Suspended),
            other => Err(anyhow::anyhow!("unknown account status: {other}")),
        }
    }
}

/// A user as seen by the access-control core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    /// Owning ministry; `None` means the principal is not tenant-scoped.
    pub tenant_id: Option<Uuid>,
    pub status: AccountStatus,
    pub lockout: LockoutState,
    pub last_login: Option<DateTime<Utc>>,
}

impl Principal {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    #[must_use]
    pub fn is_super(&self) -> bool {
        self.role.is_super()
    }

    /// Unlock time if the account is locked at `now`.
    #[must_use]
    pub fn locked_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.lockout.active_lock(now)
    }
}

/// Which credential carrier produced the identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CredentialCarrier {
    BearerHeader,
    TokenCookie,
    Session,
}

impl CredentialCarrier {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BearerHeader => "bearer_header",
            Self::TokenCookie => "token_cookie",
            Self::Session => "session",
        }
    }
}

/// Read-only identity attached to a request after authentication.
#[derive(Clone, Debug)]
pub struct AuthContext {
    principal: Principal,
    carrier: CredentialCarrier,
}

impl AuthContext {
    #[must_use]
    pub fn new(principal: Principal, carrier: CredentialCarrier) -> Self {
        Self { principal, carrier }
    }

    #[must_use]
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    #[must_use]
    pub fn carrier(&self) -> CredentialCarrier {
        self.carrier
    }
}
