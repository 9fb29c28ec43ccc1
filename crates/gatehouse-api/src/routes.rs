//! API route definitions

use axum::{
    routing::{any, delete, get, patch, post},
    Router,
};

use crate::handlers;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .merge(oauth_routes(state.clone()))
        .merge(scim_routes(state.clone()))
        .merge(federation_routes(state.clone()))
        .nest("/api/v1", api_v1_routes(state))
}

fn oauth_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/oauth/authorize", get(handlers::oauth::authorize))
        .route("/api/oauth/saml", post(handlers::oauth::saml_response))
        .route("/api/oauth/oidc", get(handlers::oauth::oidc_callback))
        .route("/api/oauth/token", post(handlers::oauth::token))
        .route("/api/oauth/userinfo", get(handlers::oauth::userinfo))
        .with_state(state)
}

fn scim_routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/scim/v2.0/{directory_id}/Users",
            any(handlers::scim::users_collection),
        )
        .route(
            "/api/scim/v2.0/{directory_id}/Users/{resource_id}",
            any(handlers::scim::users_resource),
        )
        .route(
            "/api/scim/v2.0/{directory_id}/Groups",
            any(handlers::scim::groups_collection),
        )
        .route(
            "/api/scim/v2.0/{directory_id}/Groups/{resource_id}",
            any(handlers::scim::groups_resource),
        )
        .with_state(state)
}

fn federation_routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/federated-saml/{id}/metadata",
            get(handlers::federation::metadata),
        )
        .route("/federated-saml/sso", get(handlers::federation::sso))
        .with_state(state)
}

fn api_v1_routes(state: AppState) -> Router {
    Router::new()
        .nest("/connections", connection_routes(state.clone()))
        .nest("/setup-links", setup_link_routes(state.clone()))
        .nest("/dsync", dsync_routes(state.clone()))
        .nest("/federated-saml", federation_app_routes(state))
}

fn connection_routes(state: AppState) -> Router {
    Router::new()
        .route("/", post(handlers::connections::create))
        .route("/", get(handlers::connections::get))
        .route("/", patch(handlers::connections::update))
        .route("/", delete(handlers::connections::remove))
        .with_state(state)
}

fn setup_link_routes(state: AppState) -> Router {
    Router::new()
        .route("/", post(handlers::setup_links::create))
        .route("/", get(handlers::setup_links::filter))
        .route("/{id}", get(handlers::setup_links::get_by_token))
        .route("/{id}", delete(handlers::setup_links::remove))
        .with_state(state)
}

fn dsync_routes(state: AppState) -> Router {
    Router::new()
        .route("/", post(handlers::directories::create))
        .route("/", get(handlers::directories::list))
        .route("/{id}", get(handlers::directories::get))
        .route("/{id}", patch(handlers::directories::update))
        .route("/{id}", delete(handlers::directories::remove))
        .route("/{id}/events", get(handlers::directories::list_events))
        .route("/{id}/events", delete(handlers::directories::clear_events))
        .with_state(state)
}

fn federation_app_routes(state: AppState) -> Router {
    Router::new()
        .route("/", post(handlers::federation::create))
        .route("/", get(handlers::federation::list))
        .route("/{id}", get(handlers::federation::get))
        .route("/{id}", patch(handlers::federation::update))
        .route("/{id}", delete(handlers::federation::remove))
        .with_state(state)
}
