//! HTTP route handlers for meshnode.

use axum::{
    Router,
    routing::get,
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod admin;
mod health;
mod mesh;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Peer endpoint
        .route("/", get(mesh::mesh_get).post(mesh::mesh_post))

        // Health & Status
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))

        // Operator endpoints
        .nest("/admin", admin::routes(state.clone()))

        .layer(TraceLayer::new_for_http())

        // Add shared state
        .with_state(state)
}
