//! Authorization chain: role, tenant and resource-ownership checks.
//!
//! Checks run in the order they were composed and the first failure wins. A
//! `super_admin` passes every check and, once its role check passes, skips the
//! rest of the chain.

use axum::{
    extract::{Extension, FromRequestParts, RawPathParams, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

use super::{
    audit::{self, AuditRecord, Outcome, Severity},
    error::AuthzError,
    principal::{AuthContext, Principal, Role},
    state::AuthState,
    storage::bounded,
};

const TENANT_PARAM: &str = "ministry_id";
const RESOURCE_PARAM: &str = "id";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Position,
    Employee,
}

impl ResourceType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Position => "position",
            Self::Employee => "employee",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Check {
    Role(Vec<Role>),
    Tenant,
    Resource(ResourceType),
}

#[must_use]
pub fn authorize(roles: &[Role]) -> Check {
    Check::Role(roles.to_vec())
}

#[must_use]
pub fn authorize_tenant() -> Check {
    Check::Tenant
}

#[must_use]
pub fn authorize_resource(kind: ResourceType) -> Check {
    Check::Resource(kind)
}

/// Tenant and resource identifiers implied by the request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestTarget {
    pub tenant: Option<String>,
    pub resource_id: Option<String>,
}

impl RequestTarget {
    /// Path parameters win over the query string for the tenant.
    #[must_use]
    pub fn new(path_params: &[(String, String)], query: Option<&str>) -> Self {
        let path = |name: &str| {
            path_params
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
        };
        let tenant = path(TENANT_PARAM).or_else(|| {
            query.and_then(|query| {
                url::form_urlencoded::parse(query.as_bytes())
                    .find(|(key, _)| key == TENANT_PARAM)
                    .map(|(_, value)| value.into_owned())
            })
        });
        Self {
            tenant: tenant.filter(|value| !value.is_empty()),
            resource_id: path(RESOURCE_PARAM),
        }
    }
}

enum Step {
    Continue,
    Bypass,
}

/// An ordered list of checks evaluated for one route.
#[derive(Clone, Debug)]
pub struct AuthorizationChain {
    checks: Vec<Check>,
}

impl AuthorizationChain {
    #[must_use]
    pub fn new(checks: Vec<Check>) -> Self {
        Self { checks }
    }

    /// Evaluate every check against `context`.
    ///
    /// # Errors
    /// Returns the first failing check's `AuthzError`; failures are audited.
    pub async fn evaluate(
        &self,
        state: &AuthState,
        context: Option<&AuthContext>,
        target: &RequestTarget,
    ) -> Result<(), AuthzError> {
        let Some(context) = context else {
            deny_anonymous(state, target);
            return Err(AuthzError::NotAuthenticated);
        };
        let principal = context.principal();

        for check in &self.checks {
            match self.run(state, principal, check, target).await {
                Ok(Step::Continue) => {}
                Ok(Step::Bypass) => return Ok(()),
                Err((err, detail)) => {
                    if !matches!(err, AuthzError::Internal(_)) {
                        deny(state, principal, check, target, &err, detail);
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    async fn run(
        &self,
        state: &AuthState,
        principal: &Principal,
        check: &Check,
        target: &RequestTarget,
    ) -> Result<Step, (AuthzError, Value)> {
        match check {
            Check::Role(allowed) => {
                if principal.is_super() {
                    Ok(Step::Bypass)
                } else if allowed.contains(&principal.role) {
                    Ok(Step::Continue)
                } else {
                    Err((
                        AuthzError::InsufficientPermissions,
                        json!({
                            "required_roles": allowed.iter().map(|role| role.as_str()).collect::<Vec<_>>(),
                            "actual_role": principal.role.as_str(),
                        }),
                    ))
                }
            }
            Check::Tenant => tenant_check(principal, target).map(|()| Step::Continue),
            Check::Resource(kind) => resource_check(state, principal, *kind, target)
                .await
                .map(|()| Step::Continue),
        }
    }
}

fn tenant_check(principal: &Principal, target: &RequestTarget) -> Result<(), (AuthzError, Value)> {
    if principal.is_super() {
        return Ok(());
    }
    let (Some(own), Some(implied)) = (principal.tenant_id, target.tenant.as_deref()) else {
        return Ok(());
    };
    if implied.parse::<Uuid>().ok() == Some(own) {
        return Ok(());
    }
    Err((
        AuthzError::TenantAccessDenied,
        json!({
            "required_tenant": implied,
            "actual_tenant": own,
        }),
    ))
}

async fn resource_check(
    state: &AuthState,
    principal: &Principal,
    kind: ResourceType,
    target: &RequestTarget,
) -> Result<(), (AuthzError, Value)> {
    if principal.is_super() {
        return Ok(());
    }
    let not_found = || {
        (
            AuthzError::ResourceNotFound,
            json!({ "resource_type": kind.as_str(), "resource_id": target.resource_id }),
        )
    };
    let id = target
        .resource_id
        .as_deref()
        .and_then(|raw| raw.parse::<Uuid>().ok())
        .ok_or_else(not_found)?;

    let owner = bounded(
        state.config().store_timeout(),
        "resource owner lookup",
        state.users().resource_tenant(kind, id),
    )
    .await
    .map_err(|err| (AuthzError::Internal(err), Value::Null))?
    .ok_or_else(not_found)?;

    match principal.tenant_id {
        Some(own) if own != owner => Err((
            AuthzError::ResourceAccessDenied,
            json!({
                "resource_type": kind.as_str(),
                "resource_id": id,
                "owner_tenant": owner,
                "actual_tenant": own,
            }),
        )),
        _ => Ok(()),
    }
}

fn deny(
    state: &AuthState,
    principal: &Principal,
    check: &Check,
    target: &RequestTarget,
    err: &AuthzError,
    detail: Value,
) {
    let check_name = match check {
        Check::Role(_) => "role",
        Check::Tenant => "tenant",
        Check::Resource(_) => "resource",
    };
    state.auditor().record(
        AuditRecord::new(audit::EVENT_AUTHZ_DENIED, Outcome::Denied, Severity::Medium)
            .with_principal(principal.id)
            .with_resource(target.resource_id.clone().unwrap_or_else(|| check_name.to_string()))
            .with_action(check_name)
            .with_context(json!({
                "error": err.code(),
                "role": principal.role.as_str(),
                "tenant": principal.tenant_id,
                "implied_tenant": target.tenant,
                "detail": detail,
            })),
    );
}

fn deny_anonymous(state: &AuthState, target: &RequestTarget) {
    state.auditor().record(
        AuditRecord::new(audit::EVENT_AUTHZ_DENIED, Outcome::Denied, Severity::Medium)
            .with_resource(target.resource_id.clone().unwrap_or_else(|| "route".to_string()))
            .with_action("authenticate")
            .with_context(json!({
                "error": AuthzError::NotAuthenticated.code(),
                "implied_tenant": target.tenant,
            })),
    );
}

/// Middleware running an `AuthorizationChain` after `require_auth`.
pub async fn enforce(
    State(chain): State<Arc<AuthorizationChain>>,
    Extension(state): Extension<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let params: Vec<(String, String)> = match RawPathParams::from_request_parts(&mut parts, &()).await
    {
        Ok(params) => params
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
        Err(_) => Vec::new(),
    };
    let target = RequestTarget::new(&params, parts.uri.query());
    let context = parts.extensions.get::<AuthContext>();

    if let Err(err) = chain.evaluate(&state, context, &target).await {
        return err.into_response();
    }
    next.run(Request::from_parts(parts, body)).await
}
