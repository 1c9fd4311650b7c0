//! Integration tests for telemetry initialization and span helpers.

use uuid::Uuid;

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    // Using try_init() in the implementation avoids panics if another
    // test already initialized a subscriber.
    let config = crawlq::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "crawlq-test".to_string(),
    };
    // This may return Err if a global subscriber was already set by
    // another test in this process; that is acceptable.
    let _guard = crawlq::telemetry::init_telemetry(config);
}

#[test]
fn crawl_span_creates_and_records_transition() {
    let id = Uuid::new_v4();
    let span = crawlq::telemetry::crawl::start_crawl_span("fetch", &id);
    crawlq::telemetry::crawl::record_state_transition(&span, "queued", "processing");
}

#[test]
fn crawl_span_accepts_staged_types() {
    let id = Uuid::new_v4();
    let span = crawlq::telemetry::crawl::start_crawl_span("process:scancode", &id);
    crawlq::telemetry::crawl::record_state_transition(&span, "processing", "complete");
}
