use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "cqlkit_request_duration_seconds",
        "Statement execution duration in seconds, retries included",
        &["operation", "status"]
    ).expect("request duration histogram registers once");

    pub static ref REQUEST_COUNTER: IntCounterVec = register_int_counter_vec!(
        "cqlkit_requests_total",
        "Total number of submitted statements and batches",
        &["operation", "status"]
    ).expect("request counter registers once");

    pub static ref RETRY_COUNTER: IntCounterVec = register_int_counter_vec!(
        "cqlkit_retries_total",
        "Retries decided by the retry policy",
        &["reason"]
    ).expect("retry counter registers once");

    pub static ref CALLBACK_ERRORS: IntCounter = register_int_counter!(
        "cqlkit_callback_errors_total",
        "Callbacks that panicked and were ignored"
    ).expect("callback error counter registers once");

    pub static ref IN_FLIGHT: IntGauge = register_int_gauge!(
        "cqlkit_in_flight_requests",
        "Asynchronous requests not yet completed"
    ).expect("in-flight gauge registers once");
}

pub fn record_operation(operation: &str, status: &str, duration: f64) {
    REQUEST_DURATION
        .with_label_values(&[operation, status])
        .observe(duration);
    REQUEST_COUNTER
        .with_label_values(&[operation, status])
        .inc();
}

pub fn record_retry(reason: &str) {
    RETRY_COUNTER.with_label_values(&[reason]).inc();
}

pub fn record_callback_error() {
    CALLBACK_ERRORS.inc();
}

/// Renders every registered metric in the text exposition format
pub fn gather_text() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_operation_exposed() {
        record_operation("execute", "success", 0.01);
        record_retry("timeout");
        let text = gather_text();
        assert!(text.contains("cqlkit_requests_total"));
        assert!(text.contains("cqlkit_retries_total"));
    }
}
