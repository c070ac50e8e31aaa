//! Prometheus metrics for fee-ledger-service.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Collections by outcome (no student/staff labels to keep cardinality flat).
pub static COLLECTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fee_ledger_collections_total",
        "Total number of fee collections attempted",
        &["status"] // ok, rejected, rolled_back
    )
    .expect("Failed to register collections_total")
});

/// Receipt numbers that collided and had to be re-allocated.
pub static RECEIPT_RETRIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fee_ledger_receipt_retries_total",
        "Receipt number allocations retried after a collision",
        &["outcome"] // retried, exhausted
    )
    .expect("Failed to register receipt_retries_total")
});

pub static WITHDRAWALS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fee_ledger_withdrawals_total",
        "Total number of wallet withdrawals",
        &["kind", "status"] // partial|clear, ok|insufficient|error
    )
    .expect("Failed to register withdrawals_total")
});

pub static ASSIGNMENTS_CREATED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fee_ledger_assignments_created_total",
        "Student fee assignments created",
        &["trigger"] // enrollment, grade_change, structure_created, collection
    )
    .expect("Failed to register assignments_created")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fee_ledger_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "fee_ledger_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Recorder behind the `metrics` facade, which the HTTP middleware in
/// service-core reports to. Installed once per process.
static HTTP_RECORDER: OnceCell<Option<PrometheusHandle>> = OnceCell::new();

/// Initialize all metrics (forces lazy initialization) and install the HTTP
/// recorder.
pub fn init_metrics() {
    Lazy::force(&COLLECTIONS_TOTAL);
    Lazy::force(&RECEIPT_RETRIES_TOTAL);
    Lazy::force(&WITHDRAWALS_TOTAL);
    Lazy::force(&ASSIGNMENTS_CREATED);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);

    HTTP_RECORDER.get_or_init(|| match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "HTTP metrics recorder not installed");
            None
        }
    });
}

/// Get metrics in Prometheus text format: service metrics first, then the
/// HTTP request metrics.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut text = encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default();

    if let Some(handle) = HTTP_RECORDER.get().and_then(Option::as_ref) {
        text.push_str(&handle.render());
    }
    text
}
