use crate::api::headers::{idempotency_key_from_headers, table_name_from_path, USER_ID};
use crate::error::AppError;
use crate::idempotency::IdempotencyRequest;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

/// Idempotency inputs taken from an inbound request.
///
/// The caller identity is read from `X-User-Id`, which the authentication
/// layer in front of this service sets after verifying the bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyContext {
    pub user_id: String,
    pub endpoint: String,
    pub table_name: String,
    pub idempotency_key: Option<String>,
}

impl IdempotencyContext {
    pub fn from_parts(parts: &Parts) -> Result<Self, AppError> {
        let user_id = parts
            .headers
            .get(&USER_ID)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AppError::Unauthorized("missing caller identity".to_string()))?
            .to_string();

        let idempotency_key = idempotency_key_from_headers(&parts.headers)?;
        let path = parts.uri.path();

        Ok(Self {
            user_id,
            endpoint: path.to_string(),
            table_name: table_name_from_path(path).to_string(),
            idempotency_key,
        })
    }

    /// Builds the coordinator input for `data`.
    pub fn into_request(self, data: serde_json::Value) -> IdempotencyRequest {
        IdempotencyRequest::new(self.user_id, self.endpoint, self.table_name, data)
            .with_optional_key(self.idempotency_key)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for IdempotencyContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_parts(parts)
    }
}
