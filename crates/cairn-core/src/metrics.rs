//! Metrics collection for Cairn
//!
//! TigerStyle: Explicit metric names with units, type-safe recording.
//!
//! Instruments are created lazily on the global meter and exported through
//! Prometheus when the `otel` feature is enabled. Without it every recorder
//! is a no-op.

#[cfg(feature = "otel")]
use crate::constants::*;
#[cfg(feature = "otel")]
use once_cell::sync::Lazy;
#[cfg(feature = "otel")]
use opentelemetry::metrics::{Counter, Histogram};
#[cfg(feature = "otel")]
use opentelemetry::{global, KeyValue};

#[cfg(feature = "otel")]
static PROVISIONS_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("cairn")
        .u64_counter(METRIC_NAME_PROVISIONS_TOTAL)
        .with_description("Total number of provision attempts")
        .init()
});

#[cfg(feature = "otel")]
static RESERVATIONS_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("cairn")
        .u64_counter(METRIC_NAME_RESERVATIONS_TOTAL)
        .with_description("Total number of reservation operations")
        .init()
});

#[cfg(feature = "otel")]
static ASSIGNMENTS_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("cairn")
        .u64_counter(METRIC_NAME_ASSIGNMENTS_TOTAL)
        .with_description("Total number of finished assignments")
        .init()
});

#[cfg(feature = "otel")]
static ASSIGNMENT_DURATION_HISTOGRAM: Lazy<Histogram<f64>> = Lazy::new(|| {
    global::meter("cairn")
        .f64_histogram(METRIC_NAME_ASSIGNMENT_DURATION_SECONDS)
        .with_description("Assignment duration in seconds")
        .init()
});

/// Record a provision attempt
///
/// # Arguments
/// * `status` - "success" or "error"
#[cfg(feature = "otel")]
pub fn record_provision(status: &str) {
    PROVISIONS_COUNTER.add(1, &[KeyValue::new("status", status.to_string())]);
}

/// Record a reservation operation
///
/// # Arguments
/// * `operation` - "reserve" or "unreserve"
/// * `status` - "success" or "error"
#[cfg(feature = "otel")]
pub fn record_reservation(operation: &str, status: &str) {
    RESERVATIONS_COUNTER.add(
        1,
        &[
            KeyValue::new("operation", operation.to_string()),
            KeyValue::new("status", status.to_string()),
        ],
    );
}

/// Record a finished assignment
///
/// # Arguments
/// * `status` - "done", "critical", "cancelled" or "panicked"
/// * `duration_seconds` - Wall time from start to finish
#[cfg(feature = "otel")]
pub fn record_assignment(status: &str, duration_seconds: f64) {
    ASSIGNMENTS_COUNTER.add(1, &[KeyValue::new("status", status.to_string())]);
    ASSIGNMENT_DURATION_HISTOGRAM.record(
        duration_seconds,
        &[KeyValue::new("status", status.to_string())],
    );
}

#[cfg(not(feature = "otel"))]
pub fn record_provision(_status: &str) {}

#[cfg(not(feature = "otel"))]
pub fn record_reservation(_operation: &str, _status: &str) {}

#[cfg(not(feature = "otel"))]
pub fn record_assignment(_status: &str, _duration_seconds: f64) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_functions_dont_panic() {
        record_provision("success");
        record_reservation("reserve", "error");
        record_assignment("done", 0.25);
    }
}
