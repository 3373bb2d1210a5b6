use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;

use crate::observability::{get_metrics, LatencyTimer};

const UNMATCHED_PATH: &str = "unmatched";
const SLOW_REQUEST_MS: f64 = 1000.0;

/// Route template for the `path` label, never the concrete URI.
pub fn path_label(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| UNMATCHED_PATH.to_string(), |path| path.as_str().to_string())
}

/// Records `http_requests_total` and `http_request_duration_ms` per route.
pub async fn track_http_metrics(request: Request, next: Next) -> Response {
    let timer = LatencyTimer::new();
    let method = request.method().to_string();
    let path = path_label(&request);

    let response = next.run(request).await;

    let elapsed_ms = timer.elapsed_ms();
    let status = response.status().as_u16();
    get_metrics().record_http_request(&method, &path, status, elapsed_ms);

    if elapsed_ms > SLOW_REQUEST_MS {
        tracing::warn!(%method, %path, status, elapsed_ms, "Slow request");
    }

    response
}
