use axum::{
    http::HeaderName,
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::middleware::track_http_metrics;
use crate::idempotency::{CacheStats, IdempotencyCoordinator};
use crate::observability::HealthChecker;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<IdempotencyCoordinator>,
    pub metrics_handle: Option<PrometheusHandle>,
    pub health_checker: Option<Arc<HealthChecker>>,
    pub cache_stats: Option<Arc<CacheStats>>,
}

impl AppState {
    pub fn new(coordinator: Arc<IdempotencyCoordinator>) -> Self {
        Self {
            coordinator,
            metrics_handle: None,
            health_checker: None,
            cache_stats: None,
        }
    }

    /// Adds metrics handle to the state.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Adds health checker to the state.
    pub fn with_health_checker(mut self, checker: Arc<HealthChecker>) -> Self {
        self.health_checker = Some(checker);
        self
    }

    /// Exposes the record cache counters at `/idempotency/stats`.
    pub fn with_cache_stats(mut self, stats: Arc<CacheStats>) -> Self {
        self.cache_stats = Some(stats);
        self
    }
}

/// Creates the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    let request_id = HeaderName::from_static("x-request-id");

    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/health/detailed", get(handlers::detailed_health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check))
        // Metrics endpoints
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/idempotency/stats", get(handlers::idempotency_stats))
        // Idempotent endpoints
        .route("/api/v1/investments", post(handlers::accept_investment))
        .route_layer(middleware::from_fn(track_http_metrics))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .with_state(state)
}
