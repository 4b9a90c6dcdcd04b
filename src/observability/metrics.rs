use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Metrics collector for the order service and its idempotency layer.
#[derive(Debug, Clone)]
pub struct Metrics {
    initialized: bool,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self { initialized: true }
    }

    /// `outcome` is one of executed, replayed, in_flight, captured, released,
    /// handler_failed, store_error.
    pub fn record_idempotency_outcome(&self, outcome: &str) {
        counter!("idempotency_requests_total", "outcome" => outcome.to_string()).increment(1);
    }

    pub fn record_store_operation(&self, backend: &str, operation: &str, duration_ms: f64, success: bool) {
        counter!("idempotency_store_operations_total", "backend" => backend.to_string(), "operation" => operation.to_string(), "success" => success.to_string()).increment(1);
        histogram!("idempotency_store_operation_duration_ms", "backend" => backend.to_string(), "operation" => operation.to_string()).record(duration_ms);
    }

    pub fn set_store_entries(&self, count: u64) {
        gauge!("idempotency_store_entries").set(count as f64);
    }

    pub fn record_order_created(&self, product_id: i64) {
        counter!("orders_created_total", "product_id" => product_id.to_string()).increment(1);
    }

    pub fn record_order_rejected(&self, reason: &str) {
        counter!("orders_rejected_total", "reason" => reason.to_string()).increment(1);
    }

    pub fn record_product_written(&self, operation: &str) {
        counter!("products_written_total", "operation" => operation.to_string()).increment(1);
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_ms: f64) {
        counter!("http_requests_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status.to_string()).increment(1);
        histogram!("http_request_duration_ms", "method" => method.to_string(), "path" => path.to_string()).record(duration_ms);
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

/// Initializes the metrics system and returns the Prometheus handle.
///
/// Safe to call more than once; only the first call installs the recorder.
pub fn init_metrics() -> PrometheusHandle {
    let handle = METRICS_HANDLE.get_or_init(|| {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Prometheus recorder not installed; another recorder is already active");
        }

        describe_metrics();
        handle
    });

    METRICS.get_or_init(Metrics::new);

    handle.clone()
}

fn describe_metrics() {
    describe_counter!("idempotency_requests_total", Unit::Count, "Idempotent requests by pipeline outcome");
    describe_counter!("idempotency_store_operations_total", Unit::Count, "Idempotency store operations");
    describe_histogram!("idempotency_store_operation_duration_ms", Unit::Milliseconds, "Idempotency store operation latency in milliseconds");
    describe_gauge!("idempotency_store_entries", Unit::Count, "Entries currently held by the idempotency store");

    describe_counter!("orders_created_total", Unit::Count, "Total number of orders created");
    describe_counter!("orders_rejected_total", Unit::Count, "Total number of rejected orders");
    describe_counter!("products_written_total", Unit::Count, "Product creations and updates");

    describe_counter!("http_requests_total", Unit::Count, "Total HTTP requests");
    describe_histogram!("http_request_duration_ms", Unit::Milliseconds, "HTTP request latency in milliseconds");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
