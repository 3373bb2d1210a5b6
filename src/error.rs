use crate::idempotency::IdempotencyStatus;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the idempotency engine and its HTTP shim.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Invalid idempotency key format: {0}")]
    InvalidKeyFormat(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: IdempotencyStatus,
        to: IdempotencyStatus,
    },

    #[error("Request with idempotency key {0} is currently being processed")]
    RequestInProgress(String),

    #[error("Idempotency key {0} reused with different request parameters")]
    KeyConflict(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Operation failed: {0}")]
    Operation(anyhow::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code used in API error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Redis(_) => "CACHE_ERROR",
            AppError::InvalidKeyFormat(_) => "INVALID_IDEMPOTENCY_KEY",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidTransition { .. } => "INVALID_STATUS_TRANSITION",
            AppError::RequestInProgress(_) => "REQUEST_IN_PROGRESS",
            AppError::KeyConflict(_) => "IDEMPOTENCY_KEY_CONFLICT",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Timeout(_) => "OPERATION_TIMEOUT",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Operation(_) => "OPERATION_FAILED",
            AppError::Config(_) => "CONFIGURATION_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
