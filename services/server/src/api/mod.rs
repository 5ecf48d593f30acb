//! HTTP API handlers and routing.

mod admin;
pub mod error;
mod events;
pub mod extract;
mod health;
mod runtime;
mod system;

use axum::{
    http::{header, HeaderName, Method},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

/// Create the main API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(extract::API_KEY_HEADER),
            HeaderName::from_static(extract::REQUEST_ID_HEADER),
        ])
        .allow_origin(Any);

    Router::new()
        // Health endpoints (no auth required)
        .merge(health::routes())
        // Basic-Auth admin surface
        .nest("/admin", admin::routes())
        // Access-key surface
        .merge(events::routes())
        .merge(system::routes())
        .merge(runtime::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
