//! Integration tests for telemetry initialization and span helpers.

use opentelemetry::KeyValue;

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process; a second
    // attempt returns Err, which is acceptable here.
    let config = kennel::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "kennel-test".to_string(),
        log_level: "debug".to_string(),
    };
    let _guard = kennel::telemetry::init_telemetry(config);
}

#[test]
fn update_span_records_transition() {
    let span = kennel::telemetry::submission::start_update_span("sub1");
    kennel::telemetry::submission::record_workflow_transition(&span, "abc12345", "Pending", "Running");
    span.record("log.lines", 3u64);
}

#[test]
fn counters_accept_labels_without_a_provider() {
    use kennel::telemetry::metrics;

    metrics::log_lines().add(10, &[]);
    metrics::log_events().add(1, &[KeyValue::new("kind", "started")]);
    metrics::remote_failures().add(1, &[KeyValue::new("operation", "status")]);
    metrics::cost_estimates().add(1, &[KeyValue::new("path", "fast")]);
}
