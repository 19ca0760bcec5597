//! HTTP surface (spec.md §6): request/response shaping around the core
//! contracts. Each submodule owns one resource family.

pub mod audit;
pub mod health;
pub mod secrets;
pub mod users;

use std::sync::Arc;

use axum::middleware as axum_mw;
use axum::routing::{get, post};
use axum::Router;

use crate::middleware::auth_middleware;
use crate::state::AppState;

/// Builds the full `/api/v1` router: unauthenticated routes (`/ping`,
/// `/sign-up`, `/login`) plus the bearer-authenticated routes behind
/// [`auth_middleware`].
pub fn router(state: Arc<AppState>) -> Router {
    let public = Router::new()
        .route("/ping", get(health::ping))
        .route("/sign-up", post(users::sign_up))
        .route("/login", post(users::login));

    let authenticated = Router::new()
        .route("/audit", get(audit::list))
        .route("/secrets/", post(secrets::create_secret))
        .route(
            "/secrets/{*path}",
            get(secrets::get_secret).put(secrets::update_secret),
        )
        .route("/secrets/rollback/{*path}", post(secrets::rollback_secret))
        .route("/secrets/share", post(secrets::share_secret))
        .route_layer(axum_mw::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ));

    Router::new()
        .nest("/api/v1", public.merge(authenticated))
        .with_state(state)
}
