use crate::error::{AppError, Result};
use crate::idempotency::key_codec;
use crate::idempotency::IdempotencyResponse;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;

pub const IDEMPOTENCY_KEY: HeaderName = HeaderName::from_static("idempotency-key");
pub const IDEMPOTENCY_STATUS: HeaderName = HeaderName::from_static("idempotency-status");
pub const IDEMPOTENCY_EXPIRES_AT: HeaderName = HeaderName::from_static("idempotency-expires-at");
pub const IDEMPOTENCY_DUPLICATE: HeaderName = HeaderName::from_static("idempotency-duplicate");
pub const USER_ID: HeaderName = HeaderName::from_static("x-user-id");

pub const EXPIRES_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
pub const UNKNOWN_TABLE: &str = "unknown";

/// Path segments that never name a resource.
const SKIPPED_SEGMENTS: [&str; 3] = ["api", "v1", "admin"];

/// Resource path segments and the table names they map to.
const RESOURCE_TABLES: [(&str, &str); 9] = [
    ("users", "users"),
    ("cooperatives", "cooperatives"),
    ("businesses", "businesses"),
    ("projects", "projects"),
    ("investments", "investments"),
    ("profit-sharing", "profit_sharing"),
    ("disbursements", "disbursements"),
    ("members", "members"),
    ("documents", "documents"),
];

/// Derives the logical table name from a request path; the first recognized
/// resource segment wins.
pub fn table_name_from_path(path: &str) -> &'static str {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .filter(|segment| !SKIPPED_SEGMENTS.contains(segment))
        .find_map(|segment| {
            RESOURCE_TABLES
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(segment))
                .map(|(_, table)| *table)
        })
        .unwrap_or(UNKNOWN_TABLE)
}

/// Reads and validates the optional `Idempotency-Key` header.
pub fn idempotency_key_from_headers(headers: &HeaderMap) -> Result<Option<String>> {
    let Some(value) = headers.get(&IDEMPOTENCY_KEY) else {
        return Ok(None);
    };

    let key = value
        .to_str()
        .map_err(|_| AppError::InvalidKeyFormat("header is not valid ASCII".to_string()))?
        .trim();

    key_codec::validate(key)?;
    Ok(Some(key.to_string()))
}

/// Adds the `Idempotency-*` headers describing `response`.
pub fn apply_idempotency_headers(
    headers: &mut HeaderMap,
    response: &IdempotencyResponse,
) -> Result<()> {
    let invalid = |e: axum::http::header::InvalidHeaderValue| {
        AppError::Internal(anyhow::anyhow!("Invalid idempotency header value: {}", e))
    };

    headers.insert(IDEMPOTENCY_KEY, HeaderValue::from_str(&response.id).map_err(invalid)?);
    headers.insert(
        IDEMPOTENCY_STATUS,
        HeaderValue::from_static(response.status.as_str()),
    );
    headers.insert(
        IDEMPOTENCY_EXPIRES_AT,
        HeaderValue::from_str(&response.expires_at.format(EXPIRES_AT_FORMAT).to_string())
            .map_err(invalid)?,
    );
    if response.is_duplicate {
        headers.insert(IDEMPOTENCY_DUPLICATE, HeaderValue::from_static("true"));
    }
    Ok(())
}

/// Builds the HTTP response for a coordinator result. The body is the stored
/// response bytes, unchanged.
pub fn idempotent_response(response: IdempotencyResponse) -> Result<Response> {
    let status = if response.is_duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };

    let mut headers = HeaderMap::new();
    apply_idempotency_headers(&mut headers, &response)?;
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let mut http_response = Response::new(Body::from(response.response_data));
    *http_response.status_mut() = status;
    http_response.headers_mut().extend(headers);
    Ok(http_response)
}
