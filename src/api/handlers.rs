use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use uuid::Uuid;

use crate::api::extract::IdempotencyContext;
use crate::api::headers::idempotent_response;
use crate::api::requests::{describe_errors, CreateInvestmentRequest};
use crate::api::responses::{
    ApiResponse, HealthResponse, IdempotencyStatsResponse, InvestmentReceipt,
};
use crate::error::AppError;
use crate::observability::AggregatedHealth;

use super::routes::AppState;

/// Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let response = match &state.health_checker {
        Some(checker) => HealthResponse::from(&checker.check_all().await),
        None => HealthResponse::unchecked(),
    };

    Json(ApiResponse::success(response))
}

/// Detailed health check with per-dependency latency.
pub async fn detailed_health_check(State(state): State<AppState>) -> Response {
    let Some(checker) = &state.health_checker else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let health: AggregatedHealth = checker.check_all().await;
    let status = if health.status.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(ApiResponse::success(health))).into_response()
}

/// Readiness check endpoint.
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    let ready = match &state.health_checker {
        Some(checker) => checker.is_ready().await,
        None => true,
    };

    if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Liveness check endpoint.
pub async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

/// Prometheus scrape endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Coordinator and record cache counters for this process.
pub async fn idempotency_stats(
    State(state): State<AppState>,
) -> Json<ApiResponse<IdempotencyStatsResponse>> {
    let coordinator = state.coordinator.stats().snapshot();

    Json(ApiResponse::success(IdempotencyStatsResponse {
        duplicate_rate: coordinator.duplicate_rate(),
        coordinator,
        cache: state.cache_stats.as_ref().map(|stats| stats.snapshot()),
    }))
}

/// Accepts an investment commitment exactly once per idempotency scope.
///
/// Retries with the same key, or the same payload within the TTL, receive
/// the original receipt with `200 OK` instead of a second commitment.
pub async fn accept_investment(
    State(state): State<AppState>,
    ctx: IdempotencyContext,
    Json(request): Json<CreateInvestmentRequest>,
) -> Result<Response, AppError> {
    request
        .validate()
        .map_err(|errors| AppError::Validation(describe_errors(&errors)))?;

    let idempotency_request = ctx.into_request(serde_json::to_value(&request)?);

    let response = state
        .coordinator
        .process(&idempotency_request, || async move {
            let receipt = InvestmentReceipt {
                receipt_id: Uuid::new_v4(),
                project_id: request.project_id,
                investor_id: request.investor_id,
                amount_cents: request.amount_cents,
                currency: request.currency,
                status: "accepted".to_string(),
                received_at: Utc::now(),
            };
            tracing::info!(receipt_id = %receipt.receipt_id, "Investment accepted");
            Ok(ApiResponse::success(receipt))
        })
        .await?;

    idempotent_response(response)
}
