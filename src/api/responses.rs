use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::idempotency::{CacheStatsSnapshot, StatsSnapshot};
use crate::observability::{AggregatedHealth, HealthStatus};

/// Standard API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorResponse>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: ErrorResponse) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Error response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Maps an error onto its HTTP status.
pub fn status_for(error: &AppError) -> StatusCode {
    match error {
        AppError::InvalidKeyFormat(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
        AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::RequestInProgress(_) => StatusCode::CONFLICT,
        AppError::KeyConflict(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self);

        // Server-side details stay in the logs.
        let message = if status.is_server_error() && status != StatusCode::GATEWAY_TIMEOUT {
            tracing::error!(code = self.code(), "Request failed: {}", self);
            "An internal error occurred".to_string()
        } else {
            tracing::debug!(code = self.code(), "Request rejected: {}", self);
            self.to_string()
        };

        let body = ApiResponse::<()>::error(ErrorResponse::new(self.code(), message));
        (status, Json(body)).into_response()
    }
}

/// Acknowledgement returned by the investment intake route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentReceipt {
    pub receipt_id: Uuid,
    pub project_id: String,
    pub investor_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub received_at: DateTime<Utc>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub services: ServiceHealth,
}

impl HealthResponse {
    /// Response for a process without a configured health checker.
    pub fn unchecked() -> Self {
        Self {
            status: HealthStatus::Healthy.as_str().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            services: ServiceHealth::default(),
        }
    }
}

/// Per-service status; `None` when the service is not probed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub idempotency_store: Option<HealthStatus>,
    pub database: Option<HealthStatus>,
    pub cache: Option<HealthStatus>,
}

impl From<&AggregatedHealth> for HealthResponse {
    fn from(health: &AggregatedHealth) -> Self {
        let status_of = |name: &str| health.dependency(name).map(|d| d.status);

        Self {
            status: health.status.as_str().to_string(),
            version: health.version.clone(),
            timestamp: Utc::now(),
            services: ServiceHealth {
                idempotency_store: status_of("idempotency_store"),
                database: status_of("database"),
                cache: status_of("cache"),
            },
        }
    }
}

/// Body of `/idempotency/stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyStatsResponse {
    pub coordinator: StatsSnapshot,
    pub duplicate_rate: f64,
    /// Present when completed records are served through the Redis cache.
    pub cache: Option<CacheStatsSnapshot>,
}
