//! Route configuration.

use crate::auth::service_auth_middleware;
use crate::gateway::agent_connect;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let rpc_routes = Router::new()
        .route(
            "/v1/users/{user_id}/stats",
            post(handlers::setup_user_stats).get(handlers::get_crawl_stats),
        )
        .route(
            "/v1/users/{user_id}/online",
            put(handlers::update_online_status),
        )
        .route(
            "/v1/users/{user_id}/chunks",
            post(handlers::get_chunks_from_user),
        )
        .route("/v1/streams/chunks", get(handlers::read_chunks))
        .route("/v1/streams/signals", post(handlers::append_signal))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            service_auth_middleware,
        ));

    // Agents authenticate with their certificate subject, not the service token.
    let mut router = Router::new()
        .route("/v1/health", get(handlers::health_check))
        .route("/v1/agent/connect", get(agent_connect))
        .merge(rpc_routes);

    // SECURITY: When enabled, this endpoint MUST be network-restricted
    // to authorized Prometheus scraper IPs only.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
