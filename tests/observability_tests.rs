mod common;

use async_trait::async_trait;
use common::{fast_config, in_memory_coordinator, investment_request};
use coop_idempotency::error::{AppError, Result};
use coop_idempotency::idempotency::{
    CreateOutcome, IdempotencyRecord, IdempotencyStatus, IdempotencyStore,
    InMemoryIdempotencyStore,
};
use coop_idempotency::observability::{
    health, init_logging, init_metrics, mask_user_id, HealthChecker, HealthStatus, LogConfig,
    LogFormat,
};
use serde_json::json;
use std::sync::Arc;

/// Store whose every call fails, standing in for a lost database.
struct OfflineStore;

fn offline() -> AppError {
    AppError::Internal(anyhow::anyhow!("connection refused"))
}

#[async_trait]
impl IdempotencyStore for OfflineStore {
    async fn create(&self, _record: &IdempotencyRecord) -> Result<CreateOutcome> {
        Err(offline())
    }

    async fn reclaim_failed(&self, _record: &IdempotencyRecord) -> Result<CreateOutcome> {
        Err(offline())
    }

    async fn get(&self, _id: &str) -> Result<Option<IdempotencyRecord>> {
        Err(offline())
    }

    async fn update_status(
        &self,
        _id: &str,
        _status: IdempotencyStatus,
        _response_data: Option<Vec<u8>>,
    ) -> Result<IdempotencyRecord> {
        Err(offline())
    }

    async fn check_duplicate(
        &self,
        _user_id: &str,
        _endpoint: &str,
        _request_hash: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        Err(offline())
    }

    async fn next_sequence_number(&self) -> Result<i64> {
        Err(offline())
    }

    async fn delete_expired(&self) -> Result<u64> {
        Err(offline())
    }
}

#[test]
fn test_log_format_from_settings_value() {
    assert_eq!(LogFormat::from("json"), LogFormat::Json);
    assert_eq!(LogFormat::from("COMPACT"), LogFormat::Compact);
    assert_eq!(LogFormat::from("pretty"), LogFormat::Pretty);
    assert_eq!(LogFormat::from("syslog"), LogFormat::Pretty);
}

#[test]
fn test_second_logging_init_is_refused() {
    let config = LogConfig {
        format: LogFormat::Compact,
        ..LogConfig::default()
    };
    assert!(init_logging(&config));
    assert!(!init_logging(&config));
}

#[test]
fn test_user_ids_are_masked_for_logs() {
    assert_eq!(mask_user_id("member-12345"), "me********45");
    assert_eq!(mask_user_id("coop-admin"), "co******in");
    assert_eq!(mask_user_id("abcd"), "****");
    assert!(!mask_user_id("member-12345").contains("12345"));
}

#[tokio::test]
async fn test_health_reports_offline_store() {
    let checker = HealthChecker::new(Arc::new(OfflineStore));

    let report = checker.check_all().await;
    assert_eq!(report.status, HealthStatus::Unhealthy);

    let store = report.dependency("idempotency_store").unwrap();
    assert!(store.latency_ms.is_none());
    assert!(store.message.as_deref().unwrap().contains("connection refused"));
    assert!(!checker.is_ready().await);
}

#[tokio::test]
async fn test_health_probe_does_not_touch_records() {
    let store = Arc::new(InMemoryIdempotencyStore::new());
    let checker = HealthChecker::new(store.clone());

    for _ in 0..3 {
        assert_eq!(checker.check_store().await.status, HealthStatus::Healthy);
    }
    assert!(store.is_empty().await);
    assert!(store.get(health::PROBE_KEY).await.unwrap().is_none());
}

#[tokio::test]
async fn test_health_report_serializes_lowercase_status() {
    let checker = HealthChecker::new(Arc::new(InMemoryIdempotencyStore::new()));
    let report = serde_json::to_value(checker.check_all().await).unwrap();

    assert_eq!(report["status"], json!("healthy"));
    assert_eq!(report["dependencies"][0]["name"], json!("idempotency_store"));
    assert_eq!(report["version"], json!(env!("CARGO_PKG_VERSION")));
}

#[tokio::test]
async fn test_coordinator_metrics_are_exported() {
    let handle = init_metrics().unwrap();
    let (_store, coordinator) = in_memory_coordinator(fast_config());
    let request = investment_request("member-31", 8_800);

    for _ in 0..2 {
        coordinator
            .process(&request, || async { Ok(json!({"receipt": 31})) })
            .await
            .unwrap();
    }

    let rendered = handle.render();
    let sample = |name: &str, label: &str| {
        rendered
            .lines()
            .any(|line| line.starts_with(name) && line.contains(label))
    };
    assert!(sample("idempotency_requests_total{", "endpoint=\"/api/v1/investments\""));
    assert!(sample("idempotency_duplicates_total{", "source=\"hash\""));
    assert!(sample("idempotency_executions_total{", "outcome=\"completed\""));
}
