//! HTTP route handlers for Gatehouse.

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod admin;
mod challenge;
mod config;
mod health;
mod stats;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        // Challenge configuration (dashboard-facing)
        .route(
            "/challenge/config",
            get(config::get_global)
                .put(config::put_global)
                .delete(config::delete_global),
        )
        .route(
            "/hosts/{host_id}/challenge/config",
            get(config::get_host)
                .put(config::put_host)
                .delete(config::delete_host),
        )
        // Challenge flow
        .route("/challenge/verify", post(challenge::verify))
        .route("/challenge/validate", get(challenge::validate))
        .route("/challenge/page", get(challenge::page))
        .route("/challenge/stats", get(stats::stats))
        // Admin endpoints (token lifecycle)
        .nest("/admin", admin_routes())
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(std::time::Duration::from_secs(30)))
        // Add shared state
        .with_state(state)
}

/// Admin routes (token revocation, active counts)
fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/tokens/{token_id}", delete(admin::revoke_token))
        .route("/tokens/revoke-by-ip", post(admin::revoke_by_ip))
        .route("/tokens/active", get(admin::active_count))
}
