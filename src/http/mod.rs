//! HTTP/WS surface: router assembly, REST handlers, the WebSocket realtime
//! endpoint, and the rate-limiting middleware.

pub mod rate_limit;
pub mod rest;
pub mod ws;

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use rate_limit::RateLimit;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Build the full router, grounded on the teacher's layered
/// `Router::new().route(...).layer(...)` composition in its top-level app
/// assembly.
pub fn build_router(state: AppState) -> Router {
    let rate_limit = RateLimit::new(
        state.config.rate_limit_per_user_rpm,
        state.config.rate_limit_per_ip_rpm,
        state.config.rate_limit_window_secs,
        state.verifier.clone(),
    );

    let api = Router::new()
        .route("/operations/{type}", post(rest::enqueue_operation))
        .route("/operations/{job_id}", get(rest::get_operation))
        .route("/operations/{job_id}/cancel", post(rest::cancel_operation))
        .route("/sync/intervals", get(rest::list_sync_intervals))
        .route("/sync/intervals/{type}", post(rest::set_sync_interval))
        .route("/sync/monitoring/status", get(rest::monitoring_status))
        .layer(axum::middleware::from_fn_with_state(rate_limit, RateLimit::middleware));

    Router::new()
        .nest("/api", api)
        .route("/ws/realtime", get(ws::realtime_handshake))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
