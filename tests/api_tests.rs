mod common;

use axum::body::{to_bytes, Body};
use axum::extract::{FromRequestParts, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use common::{fast_config, in_memory_coordinator};
use coop_idempotency::api::handlers;
use coop_idempotency::api::headers::{
    IDEMPOTENCY_DUPLICATE, IDEMPOTENCY_EXPIRES_AT, IDEMPOTENCY_KEY, IDEMPOTENCY_STATUS, USER_ID,
};
use coop_idempotency::api::requests::CreateInvestmentRequest;
use coop_idempotency::api::responses::{ApiResponse, InvestmentReceipt};
use coop_idempotency::api::{create_router, AppState, IdempotencyContext};
use coop_idempotency::error::AppError;
use coop_idempotency::idempotency::{key_codec, CacheStats};
use coop_idempotency::observability::{init_metrics, HealthChecker, HealthStatus};
use std::sync::Arc;
use tower::ServiceExt;

fn state() -> AppState {
    let (_store, coordinator) = in_memory_coordinator(fast_config());
    AppState::new(Arc::new(coordinator))
}

fn context(user_id: &str, key: Option<&str>) -> IdempotencyContext {
    let mut builder = Request::post("/api/v1/investments").header(USER_ID, user_id);
    if let Some(key) = key {
        builder = builder.header(IDEMPOTENCY_KEY, key);
    }
    let (parts, _) = builder.body(()).unwrap().into_parts();
    IdempotencyContext::from_parts(&parts).unwrap()
}

fn investment(amount_cents: i64) -> CreateInvestmentRequest {
    CreateInvestmentRequest {
        project_id: "borehole-3".to_string(),
        investor_id: "member-5".to_string(),
        amount_cents,
        currency: "KES".to_string(),
        note: Some("first tranche".to_string()),
    }
}

#[tokio::test]
async fn test_accept_investment_fresh_then_duplicate() {
    let state = state();

    let first = handlers::accept_investment(
        State(state.clone()),
        context("member-5", None),
        Json(investment(120_000)),
    )
    .await
    .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    assert!(first.headers().get(&IDEMPOTENCY_DUPLICATE).is_none());
    assert_eq!(first.headers()[&IDEMPOTENCY_STATUS], "completed");
    assert!(first.headers().contains_key(&IDEMPOTENCY_EXPIRES_AT));
    let first_key = first.headers()[&IDEMPOTENCY_KEY].to_str().unwrap().to_string();
    assert!(key_codec::validate(&first_key).is_ok());
    let first_body = to_bytes(first.into_body(), usize::MAX).await.unwrap();

    let second = handlers::accept_investment(
        State(state.clone()),
        context("member-5", None),
        Json(investment(120_000)),
    )
    .await
    .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers()[&IDEMPOTENCY_DUPLICATE], "true");
    assert_eq!(second.headers()[&IDEMPOTENCY_KEY], first_key.as_str());
    let second_body = to_bytes(second.into_body(), usize::MAX).await.unwrap();

    assert_eq!(first_body, second_body);
    let receipt: ApiResponse<InvestmentReceipt> = serde_json::from_slice(&second_body).unwrap();
    let receipt = receipt.data.unwrap();
    assert_eq!(receipt.amount_cents, 120_000);
    assert_eq!(receipt.status, "accepted");
}

#[tokio::test]
async fn test_accept_investment_with_explicit_key() {
    let state = state();
    let key = key_codec::encode("investments", 31).unwrap();

    let response = handlers::accept_investment(
        State(state.clone()),
        context("member-5", Some(&key)),
        Json(investment(5_000)),
    )
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()[&IDEMPOTENCY_KEY], key.as_str());
}

#[tokio::test]
async fn test_explicit_key_with_changed_payload_is_unprocessable() {
    let state = state();
    let key = key_codec::encode("investments", 32).unwrap();

    handlers::accept_investment(
        State(state.clone()),
        context("member-5", Some(&key)),
        Json(investment(5_000)),
    )
    .await
    .unwrap();

    let Err(error) = handlers::accept_investment(
        State(state.clone()),
        context("member-5", Some(&key)),
        Json(investment(9_000)),
    )
    .await
    else {
        panic!("expected a key conflict");
    };

    assert!(matches!(error, AppError::KeyConflict(_)));
    assert_eq!(error.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_invalid_investment_is_bad_request() {
    let state = state();

    let Err(error) = handlers::accept_investment(
        State(state.clone()),
        context("member-5", None),
        Json(investment(-1)),
    )
    .await
    else {
        panic!("expected a validation error");
    };

    assert!(matches!(error, AppError::Validation(_)));
    assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
    assert_eq!(state.coordinator.stats().snapshot().total_requests, 0);
}

#[tokio::test]
async fn test_extractor_rejects_malformed_key() {
    let (mut parts, _) = Request::post("/api/v1/investments")
        .header(USER_ID, "member-5")
        .header(IDEMPOTENCY_KEY, "202601181234")
        .body(())
        .unwrap()
        .into_parts();

    let rejection = IdempotencyContext::from_request_parts(&mut parts, &())
        .await
        .unwrap_err();
    assert_eq!(rejection.into_response().status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_extractor_requires_user() {
    let (mut parts, _) = Request::post("/api/v1/profit-sharing/run")
        .body(())
        .unwrap()
        .into_parts();

    let rejection = IdempotencyContext::from_request_parts(&mut parts, &())
        .await
        .unwrap_err();
    assert_eq!(rejection.into_response().status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_extractor_maps_profit_sharing_table() {
    let (parts, _) = Request::post("/api/v1/profit-sharing/run")
        .header(USER_ID, "admin-1")
        .body(())
        .unwrap()
        .into_parts();

    let ctx = IdempotencyContext::from_parts(&parts).unwrap();
    assert_eq!(ctx.table_name, "profit_sharing");
    assert_eq!(ctx.endpoint, "/api/v1/profit-sharing/run");
}

#[tokio::test]
async fn test_health_endpoints_without_backends() {
    let state = state();

    let Json(health) = handlers::health_check(State(state.clone())).await;
    assert!(health.success);
    assert_eq!(health.data.unwrap().status, "healthy");

    assert_eq!(handlers::readiness_check(State(state.clone())).await, StatusCode::OK);
    assert_eq!(handlers::liveness_check().await, StatusCode::OK);

    let detailed = handlers::detailed_health_check(State(state.clone())).await;
    assert_eq!(detailed.status(), StatusCode::NOT_FOUND);

    let metrics = handlers::metrics_endpoint(State(state)).await;
    assert_eq!(metrics.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stats_endpoint_reports_duplicates() {
    let state = state();
    for _ in 0..2 {
        handlers::accept_investment(
            State(state.clone()),
            context("member-5", None),
            Json(investment(700)),
        )
        .await
        .unwrap();
    }

    let Json(stats) = handlers::idempotency_stats(State(state)).await;
    let stats = stats.data.unwrap();
    assert_eq!(stats.coordinator.total_requests, 2);
    assert_eq!(stats.coordinator.duplicate_requests, 1);
    assert_eq!(stats.duplicate_rate, 0.5);
    assert!(stats.cache.is_none());
}

#[tokio::test]
async fn test_stats_endpoint_reports_cache_counters() {
    let stats = Arc::new(CacheStats::default());
    stats.record_hit();
    stats.record_miss();
    let state = state().with_cache_stats(Arc::clone(&stats));

    let Json(body) = handlers::idempotency_stats(State(state)).await;
    let cache = body.data.unwrap().cache.unwrap();
    assert_eq!(cache.hits, 1);
    assert_eq!(cache.misses, 1);
    assert_eq!(cache.hit_rate, 0.5);
}

#[tokio::test]
async fn test_detailed_health_probes_in_memory_store() {
    let (store, coordinator) = in_memory_coordinator(fast_config());
    let checker = HealthChecker::new(store);
    let state = AppState::new(Arc::new(coordinator)).with_health_checker(Arc::new(checker));

    let detailed = handlers::detailed_health_check(State(state.clone())).await;
    assert_eq!(detailed.status(), StatusCode::OK);

    let Json(health) = handlers::health_check(State(state.clone())).await;
    let health = health.data.unwrap();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.services.idempotency_store, Some(HealthStatus::Healthy));
    assert!(health.services.cache.is_none());

    assert_eq!(handlers::readiness_check(State(state)).await, StatusCode::OK);
}

#[tokio::test]
async fn test_router_records_http_metrics_per_route() {
    let handle = init_metrics().unwrap();
    let app = create_router(state().with_metrics(handle.clone()));

    let request = Request::post("/api/v1/investments")
        .header(USER_ID, "member-8")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&investment(3_300)).unwrap()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(response.headers().contains_key("x-request-id"));

    let rendered = handle.render();
    let line = rendered
        .lines()
        .find(|line| {
            line.starts_with("http_requests_total{")
                && line.contains("path=\"/api/v1/investments\"")
                && line.contains("status=\"201\"")
        })
        .unwrap_or_else(|| panic!("no http_requests_total sample in:\n{}", rendered));
    assert!(line.contains("method=\"POST\""));
    assert!(rendered.contains("idempotency_requests_total"));
}
