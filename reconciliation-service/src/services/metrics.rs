//! Prometheus metrics for reconciliation-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Counter for HTTP requests by method, matched route and status.
pub static HTTP_REQUESTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciliation_http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .expect("Failed to register HTTP_REQUESTS")
});

/// Histogram for HTTP request duration by method and matched route.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "reconciliation_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register HTTP_REQUEST_DURATION")
});

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "reconciliation_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for checkpoint operations.
pub static CHECKPOINT_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciliation_checkpoint_operations_total",
        "Total number of checkpoint operations",
        &["operation", "status"]
    )
    .expect("Failed to register CHECKPOINT_OPERATIONS")
});

/// Counter for checkpoints visited by a cascade, split by whether they changed.
pub static RECALCULATED_CHECKPOINTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciliation_recalculated_checkpoints_total",
        "Total number of checkpoints recalculated",
        &["changed"]
    )
    .expect("Failed to register RECALCULATED_CHECKPOINTS")
});

/// Counter for statement imports and rollbacks.
pub static IMPORT_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciliation_import_operations_total",
        "Total number of statement import operations",
        &["operation", "status"]
    )
    .expect("Failed to register IMPORT_OPERATIONS")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciliation_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&HTTP_REQUESTS);
    Lazy::force(&HTTP_REQUEST_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&CHECKPOINT_OPERATIONS);
    Lazy::force(&RECALCULATED_CHECKPOINTS);
    Lazy::force(&IMPORT_OPERATIONS);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

pub fn record_http_request(method: &str, path: &str, status: &str, duration_secs: f64) {
    HTTP_REQUESTS.with_label_values(&[method, path, status]).inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[method, path])
        .observe(duration_secs);
}

pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}

pub fn record_checkpoint_operation(operation: &str, status: &str) {
    CHECKPOINT_OPERATIONS
        .with_label_values(&[operation, status])
        .inc();
}

pub fn record_recalculated(changed: usize, unchanged: usize) {
    RECALCULATED_CHECKPOINTS
        .with_label_values(&["true"])
        .inc_by(changed as f64);
    RECALCULATED_CHECKPOINTS
        .with_label_values(&["false"])
        .inc_by(unchanged as f64);
}

pub fn record_import_operation(operation: &str, status: &str) {
    IMPORT_OPERATIONS.with_label_values(&[operation, status]).inc();
}
