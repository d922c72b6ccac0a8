//! Router assembly.
//!
//! Gate ordering per route group (outermost first): authenticate, then the
//! capability gate, then the per-instance ownership gate. Route layers are
//! added innermost-first below because the last layer added runs first.

use crate::auth::{
    api as auth_api,
    middleware::{authenticate, require_roles},
    models::UserRole,
    ownership,
    rbac::{self, Action, ResourceKind},
    AuthState,
};
use crate::middleware::{rate_limit::rate_limit_middleware, request_logging, LoginRateLimiter};
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub fn build_router(state: AuthState, limiter: Arc<dyn LoginRateLimiter>) -> Router {
    // Login is the only route behind the IP throttle; the per-account
    // lockout stays the authoritative defense.
    let login_routes = Router::new()
        .route("/api/auth/login", post(auth_api::login))
        .route_layer(middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ))
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/api/auth/register", post(auth_api::register))
        .route("/api/auth/refresh", post(auth_api::refresh))
        .with_state(state.clone());

    let session_routes = Router::new()
        .route("/api/auth/logout", post(auth_api::logout))
        .route(
            "/api/auth/me",
            get(auth_api::get_profile).put(auth_api::update_profile),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .with_state(state.clone());

    let resource_list_routes = Router::new()
        .route("/api/resources/:kind", get(auth_api::list_resources))
        .route_layer(middleware::from_fn(rbac::authorize_resource))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .with_state(state.clone());

    let resource_detail_routes = Router::new()
        .route("/api/resources/:kind/:id", get(auth_api::get_resource))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            ownership::verify_ownership,
        ))
        .route_layer(middleware::from_fn(rbac::authorize_resource))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .with_state(state.clone());

    let admin_list_routes = Router::new()
        .route("/api/admin/users", get(auth_api::list_users))
        .route_layer(middleware::from_fn(rbac::require_capability(
            ResourceKind::User,
            Action::Read,
        )))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .with_state(state.clone());

    let admin_deactivate_routes = Router::new()
        .route("/api/admin/users/:id", delete(auth_api::deactivate_user))
        .route_layer(middleware::from_fn(require_roles(&[UserRole::Admin])))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .with_state(state);

    Router::new()
        .merge(login_routes)
        .merge(public_routes)
        .merge(session_routes)
        .merge(resource_list_routes)
        .merge(resource_detail_routes)
        .merge(admin_list_routes)
        .merge(admin_deactivate_routes)
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(request_logging))
}
