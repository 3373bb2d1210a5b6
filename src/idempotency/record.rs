use crate::error::{AppError, Result};
use crate::idempotency::key_codec::DecodedKey;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an idempotency record.
///
/// `Pending` moves exactly once to `Completed` or `Failed`; both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "UPPERCASE")]
#[serde(rename_all = "lowercase")]
pub enum IdempotencyStatus {
    Pending,
    Completed,
    Failed,
}

impl IdempotencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyStatus::Pending => "pending",
            IdempotencyStatus::Completed => "completed",
            IdempotencyStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, IdempotencyStatus::Pending)
    }

    pub fn can_transition_to(&self, next: IdempotencyStatus) -> bool {
        matches!(self, IdempotencyStatus::Pending) && next.is_terminal()
    }
}

impl fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable idempotency record, one row per key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct IdempotencyRecord {
    pub id: String,
    pub user_id: String,
    pub endpoint: String,
    pub request_hash: String,
    pub status: IdempotencyStatus,
    pub response_data: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub sequence_number: i64,
    pub table_name: String,
    pub random_suffix: String,
}

impl IdempotencyRecord {
    /// Builds a fresh `Pending` record for `id`. A non-positive TTL is raised
    /// to one second so `expires_at` always lies after `created_at`.
    pub fn pending(
        id: impl Into<String>,
        decoded: DecodedKey,
        user_id: impl Into<String>,
        endpoint: impl Into<String>,
        request_hash: impl Into<String>,
        ttl_seconds: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            endpoint: endpoint.into(),
            request_hash: request_hash.into(),
            status: IdempotencyStatus::Pending,
            response_data: None,
            created_at: now,
            expires_at: now + Duration::seconds(ttl_seconds.max(1)),
            sequence_number: decoded.sequence_number,
            table_name: decoded.table_name,
            random_suffix: decoded.random_suffix,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    pub fn is_pending(&self) -> bool {
        self.status == IdempotencyStatus::Pending
    }

    pub fn is_completed(&self) -> bool {
        self.status == IdempotencyStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == IdempotencyStatus::Failed
    }

    /// True when this record was written for the same caller, endpoint and payload.
    pub fn matches(&self, user_id: &str, endpoint: &str, request_hash: &str) -> bool {
        self.user_id == user_id && self.endpoint == endpoint && self.request_hash == request_hash
    }
}

/// Transient input to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRequest {
    pub user_id: String,
    pub endpoint: String,
    pub table_name: String,
    pub data: serde_json::Value,
    pub idempotency_key: Option<String>,
}

impl IdempotencyRequest {
    pub fn new(
        user_id: impl Into<String>,
        endpoint: impl Into<String>,
        table_name: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            endpoint: endpoint.into(),
            table_name: table_name.into(),
            data,
            idempotency_key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_optional_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }
}

/// Transient output of the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyResponse {
    pub id: String,
    pub status: IdempotencyStatus,
    pub response_data: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_duplicate: bool,
}

impl IdempotencyResponse {
    /// Builds a response from a `Completed` record.
    pub fn from_completed(record: &IdempotencyRecord, is_duplicate: bool) -> Result<Self> {
        if !record.is_completed() {
            return Err(AppError::Internal(anyhow::anyhow!(
                "Idempotency record {} is {}, not completed",
                record.id,
                record.status
            )));
        }

        let response_data = record.response_data.clone().ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!(
                "Completed idempotency record {} has no response data",
                record.id
            ))
        })?;

        Ok(Self {
            id: record.id.clone(),
            status: record.status,
            response_data,
            created_at: record.created_at,
            expires_at: record.expires_at,
            is_duplicate,
        })
    }

    /// Deserializes the cached response payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.response_data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded() -> DecodedKey {
        DecodedKey {
            created_at: Utc::now(),
            sequence_number: 12,
            table_name: "investment".to_string(),
            random_suffix: "AbC12".to_string(),
        }
    }

    #[test]
    fn test_status_transitions() {
        use IdempotencyStatus::*;

        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Pending));
        assert!(Completed.is_terminal() && Failed.is_terminal() && !Pending.is_terminal());
    }

    #[test]
    fn test_pending_record_invariants() {
        let record = IdempotencyRecord::pending(
            "key",
            decoded(),
            "user-1",
            "/api/v1/investments",
            "hash",
            60,
        );

        assert!(record.is_pending());
        assert!(record.response_data.is_none());
        assert!(record.expires_at > record.created_at);
        assert!(!record.is_expired());
        assert_eq!(record.sequence_number, 12);
        assert_eq!(record.table_name, "investment");
        assert!(record.matches("user-1", "/api/v1/investments", "hash"));
        assert!(!record.matches("user-2", "/api/v1/investments", "hash"));
    }

    #[test]
    fn test_non_positive_ttl_still_expires_after_creation() {
        let record = IdempotencyRecord::pending("key", decoded(), "u", "/e", "h", 0);
        assert!(record.expires_at > record.created_at);
    }

    #[test]
    fn test_response_requires_completed_record_with_data() {
        let mut record = IdempotencyRecord::pending("key", decoded(), "u", "/e", "h", 60);
        assert!(IdempotencyResponse::from_completed(&record, false).is_err());

        record.status = IdempotencyStatus::Completed;
        assert!(IdempotencyResponse::from_completed(&record, false).is_err());

        record.response_data = Some(br#"{"ok":true}"#.to_vec());
        let response = IdempotencyResponse::from_completed(&record, true).unwrap();
        assert!(response.is_duplicate);
        assert_eq!(response.response_data, br#"{"ok":true}"#.to_vec());

        let value: serde_json::Value = response.decode().unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(IdempotencyStatus::Completed.to_string(), "completed");
        assert_eq!(
            serde_json::to_string(&IdempotencyStatus::Failed).unwrap(),
            "\"failed\""
        );
    }
}
