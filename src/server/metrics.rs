use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all Replay metrics
const PREFIX: &str = "replay";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Import Metrics
    pub static ref IMPORT_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_import_runs_total"), "Import runs by outcome"),
        &["source", "status"]
    ).expect("Failed to create import_runs_total metric");

    pub static ref IMPORTED_PLAYS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_imported_plays_total"),
        "Play events persisted by imports"
    ).expect("Failed to create imported_plays_total metric");

    pub static ref SKIPPED_PLAYS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_skipped_plays_total"),
        "Duplicate play events skipped by imports"
    ).expect("Failed to create skipped_plays_total metric");

    // Provider Metrics
    pub static ref PROVIDER_THROTTLE_HITS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_provider_throttle_hits_total"),
        "429 responses received from the provider"
    ).expect("Failed to create provider_throttle_hits_total metric");

    // Recommendation Metrics
    pub static ref RECOMMENDATION_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_recommendation_runs_total"), "Recommendation requests by outcome"),
        &["outcome"]
    ).expect("Failed to create recommendation_runs_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(IMPORT_RUNS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(IMPORTED_PLAYS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SKIPPED_PLAYS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROVIDER_THROTTLE_HITS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RECOMMENDATION_RUNS_TOTAL.clone()));
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

pub fn record_import_run(source: &str, status: &str) {
    IMPORT_RUNS_TOTAL.with_label_values(&[source, status]).inc();
}

pub fn record_imported_plays(imported: i64, skipped: i64) {
    IMPORTED_PLAYS_TOTAL.inc_by(imported as f64);
    SKIPPED_PLAYS_TOTAL.inc_by(skipped as f64);
}

pub fn record_provider_throttle() {
    PROVIDER_THROTTLE_HITS_TOTAL.inc();
}

pub fn record_recommendation(outcome: &str) {
    RECOMMENDATION_RUNS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
