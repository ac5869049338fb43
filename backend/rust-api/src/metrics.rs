use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter_vec, CounterVec, Encoder,
    HistogramVec, IntCounterVec, TextEncoder,
};

use crate::error::StoreError;

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Database Metrics (MongoDB)
    pub static ref DB_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "db_operations_total",
        "Total number of database operations",
        &["operation", "collection", "status"]
    )
    .unwrap();

    pub static ref DB_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "db_operation_duration_seconds",
        "Database operation duration in seconds",
        &["operation", "collection"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // Cache Metrics (Redis)
    pub static ref CACHE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_operations_total",
        "Total number of cache operations",
        &["operation", "status"]
    )
    .unwrap();

    pub static ref CACHE_HIT_RATIO: CounterVec = register_counter_vec!(
        "cache_hit_ratio",
        "Cache hit/miss ratio",
        &["result"]
    )
    .unwrap();

    pub static ref CACHE_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "cache_operation_duration_seconds",
        "Cache operation duration in seconds",
        &["operation"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1]
    )
    .unwrap();

    // Retry flow
    pub static ref QUIZ_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_attempts_total",
        "Quiz attempt submissions by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref RETRY_ELIGIBILITY_CHECKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "retry_eligibility_checks_total",
        "Retry eligibility evaluations by result",
        &["result"]
    )
    .unwrap();

    pub static ref RETRY_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "retry_requests_total",
        "Retry request transitions by resulting status",
        &["status"]
    )
    .unwrap();

    pub static ref GRADING_NOTIFICATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "grading_notifications_total",
        "Grading notification deliveries",
        &["status"]
    )
    .unwrap();

    pub static ref RETRY_EXPIRY_WORKER_TICKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "retry_expiry_worker_ticks_total",
        "Total number of retry expiry worker ticks",
        &["status"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track database operation with metrics
pub async fn track_db_operation<F, T>(
    operation: &str,
    collection: &str,
    future: F,
) -> Result<T, StoreError>
where
    F: std::future::Future<Output = Result<T, StoreError>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    DB_OPERATIONS_TOTAL
        .with_label_values(&[operation, collection, status])
        .inc();

    DB_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, collection])
        .observe(duration);

    result
}

/// Helper: track cache operation with metrics
pub async fn track_cache_operation<F, T>(operation: &str, future: F) -> Result<T, StoreError>
where
    F: std::future::Future<Output = Result<T, StoreError>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    CACHE_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();

    CACHE_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration);

    result
}

/// Record cache hit
pub fn record_cache_hit() {
    CACHE_HIT_RATIO.with_label_values(&["hit"]).inc();
}

/// Record cache miss
pub fn record_cache_miss() {
    CACHE_HIT_RATIO.with_label_values(&["miss"]).inc();
}

pub fn record_attempt(outcome: &str) {
    QUIZ_ATTEMPTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_eligibility_check(result: &str) {
    RETRY_ELIGIBILITY_CHECKS_TOTAL
        .with_label_values(&[result])
        .inc();
}

pub fn record_retry_request(status: &str) {
    RETRY_REQUESTS_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_notification(status: &str) {
    GRADING_NOTIFICATIONS_TOTAL.with_label_values(&[status]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        let _ = HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/health", "200"])
            .get();
        let _ = QUIZ_ATTEMPTS_TOTAL.with_label_values(&["recorded"]).get();
    }

    #[test]
    fn test_render_metrics() {
        record_eligibility_check("eligible");

        let output = render_metrics().unwrap();
        assert!(output.contains("retry_eligibility_checks_total"));
    }

    #[tokio::test]
    async fn db_tracking_passes_result_through() {
        let ok = track_db_operation("find", "quiz_attempts", async { Ok::<_, StoreError>(3) })
            .await
            .unwrap();
        assert_eq!(ok, 3);

        let err = track_cache_operation("get", async {
            Err::<(), _>(StoreError::Unavailable("down".into()))
        })
        .await;
        assert!(err.is_err());
    }
}
