use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Metrics collector for the idempotency engine.
///
/// Until a recorder is installed with [`init_metrics`] every call is a no-op.
#[derive(Debug, Clone, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    pub fn record_request(&self, endpoint: &str) {
        counter!("idempotency_requests_total", "endpoint" => endpoint.to_string()).increment(1);
    }

    /// `source` is `hash` for fingerprint matches and `key` for explicit keys.
    pub fn record_duplicate(&self, endpoint: &str, source: &'static str) {
        counter!(
            "idempotency_duplicates_total",
            "endpoint" => endpoint.to_string(),
            "source" => source
        )
        .increment(1);
    }

    pub fn record_execution(&self, endpoint: &str, outcome: &'static str, duration_ms: f64) {
        counter!(
            "idempotency_executions_total",
            "endpoint" => endpoint.to_string(),
            "outcome" => outcome
        )
        .increment(1);
        histogram!(
            "idempotency_operation_duration_ms",
            "endpoint" => endpoint.to_string()
        )
        .record(duration_ms);
    }

    pub fn record_pending_wait(&self, outcome: &'static str) {
        counter!("idempotency_pending_waits_total", "outcome" => outcome).increment(1);
    }

    pub fn record_sweep(&self, removed: u64) {
        counter!("idempotency_swept_records_total").increment(removed);
    }

    pub fn record_store_operation(
        &self,
        operation: &'static str,
        duration_ms: f64,
        success: bool,
    ) {
        counter!(
            "idempotency_store_operations_total",
            "operation" => operation,
            "success" => success.to_string()
        )
        .increment(1);
        histogram!(
            "idempotency_store_operation_duration_ms",
            "operation" => operation
        )
        .record(duration_ms);
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_ms: f64) {
        counter!(
            "http_requests_total",
            "method" => method.to_string(),
            "path" => path.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        histogram!(
            "http_request_duration_ms",
            "method" => method.to_string(),
            "path" => path.to_string()
        )
        .record(duration_ms);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the Prometheus recorder once and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();

    METRICS.get_or_init(Metrics::new);
    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

fn describe_metrics() {
    describe_counter!("idempotency_requests_total", Unit::Count, "Idempotent requests received");
    describe_counter!(
        "idempotency_duplicates_total",
        Unit::Count,
        "Requests answered from a stored response"
    );
    describe_counter!(
        "idempotency_executions_total",
        Unit::Count,
        "Wrapped operations executed, by outcome"
    );
    describe_histogram!(
        "idempotency_operation_duration_ms",
        Unit::Milliseconds,
        "Wrapped operation latency in milliseconds"
    );
    describe_counter!(
        "idempotency_pending_waits_total",
        Unit::Count,
        "Waits on pending records, by outcome"
    );
    describe_counter!(
        "idempotency_swept_records_total",
        Unit::Count,
        "Expired idempotency records deleted"
    );

    describe_counter!(
        "idempotency_store_operations_total",
        Unit::Count,
        "Idempotency store operations"
    );
    describe_histogram!(
        "idempotency_store_operation_duration_ms",
        Unit::Milliseconds,
        "Idempotency store latency in milliseconds"
    );

    describe_counter!("http_requests_total", Unit::Count, "Total HTTP requests");
    describe_histogram!(
        "http_request_duration_ms",
        Unit::Milliseconds,
        "HTTP request latency in milliseconds"
    );
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
