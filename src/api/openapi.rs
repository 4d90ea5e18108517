use super::handlers::{
    auth::{
        self, AuthorizationChain, ResourceType, Role, access, admin, authorize,
        authorize_resource, authorize_tenant, enforce, login, session,
    },
    health,
};
use axum::middleware::{from_fn, from_fn_with_state};
use std::sync::Arc;
use utoipa::openapi::{
    Contact, InfoBuilder, License, OpenApiBuilder, Tag,
    security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI spec.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

fn chain(checks: Vec<auth::Check>) -> Arc<AuthorizationChain> {
    Arc::new(AuthorizationChain::new(checks))
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Route layers run outermost-last: the API limiter first, then `require_auth`,
/// then the route's authorization chain.
pub(crate) fn api_router() -> OpenApiRouter {
    let me = OpenApiRouter::new()
        .routes(routes!(session::me))
        .route_layer(from_fn(auth::require_auth));

    let admin = OpenApiRouter::new()
        .routes(routes!(admin::unlock_user))
        .route_layer(from_fn_with_state(
            chain(vec![authorize(&[Role::SuperAdmin])]),
            enforce,
        ))
        .route_layer(from_fn(auth::require_auth));

    let ministries = OpenApiRouter::new()
        .routes(routes!(access::ministry_access))
        .route_layer(from_fn_with_state(
            chain(vec![
                authorize(&[Role::MinistryAdmin, Role::Editor, Role::Viewer]),
                authorize_tenant(),
            ]),
            enforce,
        ))
        .route_layer(from_fn(auth::require_auth));

    let positions = OpenApiRouter::new()
        .routes(routes!(access::position_access))
        .route_layer(from_fn_with_state(
            chain(vec![
                authorize(&[Role::MinistryAdmin, Role::Editor]),
                authorize_resource(ResourceType::Position),
            ]),
            enforce,
        ))
        .route_layer(from_fn(auth::require_auth));

    let employees = OpenApiRouter::new()
        .routes(routes!(access::employee_access))
        .route_layer(from_fn_with_state(
            chain(vec![
                authorize(&[Role::MinistryAdmin, Role::Editor]),
                authorize_resource(ResourceType::Employee),
            ]),
            enforce,
        ))
        .route_layer(from_fn(auth::require_auth));

    // The login route applies its own limiter keyed by IP and username.
    let limited = OpenApiRouter::new()
        .routes(routes!(session::logout))
        .merge(me)
        .merge(admin)
        .merge(ministries)
        .merge(positions)
        .merge(employees)
        .route_layer(from_fn(auth::rate_limit));

    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(login::login))
        .merge(limited);

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Login, logout and the current principal".to_string());

    let mut admin_tag = Tag::new("admin");
    admin_tag.description = Some("Account administration for super admins".to_string());

    let mut access_tag = Tag::new("access");
    access_tag.description = Some("Authorization checks for directory resources".to_string());

    let openapi = router.get_openapi_mut();
    openapi.tags = Some(vec![auth_tag, admin_tag, access_tag]);
    openapi
        .components
        .get_or_insert_with(Default::default)
        .add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.split_once('<') {
        Some((name, email)) => (
            non_empty(name.trim()),
            non_empty(email.trim_end_matches('>').trim()),
        ),
        None => (non_empty(author.trim()), None),
    }
}
