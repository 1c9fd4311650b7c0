//! Smoke tests for the full observability stack.
//!
//! These tests require an OTel collector stack (Tempo, Prometheus, Loki)
//! listening on localhost.
//!
//! Run with:
//! ```sh
//! cargo test --test telemetry_smoke_test -- --ignored --nocapture
//! ```

use std::sync::OnceLock;
use std::time::Duration;

use opentelemetry::KeyValue;

static TELEMETRY: OnceLock<crawlq::telemetry::TelemetryGuard> = OnceLock::new();

fn ensure_telemetry() -> &'static crawlq::telemetry::TelemetryGuard {
    TELEMETRY.get_or_init(|| {
        crawlq::telemetry::init_telemetry(crawlq::telemetry::TelemetryConfig {
            endpoint: Some("http://localhost:4317".to_string()),
            service_name: "crawlq-smoke-test".to_string(),
        })
        .expect("failed to init telemetry")
    })
}

/// Force-flush all providers and give backends time to ingest.
async fn flush_and_wait(guard: &crawlq::telemetry::TelemetryGuard) {
    guard.force_flush();
    // Give batch exporters and backends time to process.
    tokio::time::sleep(Duration::from_secs(8)).await;
}

// ---------------------------------------------------------------------------
// Traces
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn smoke_traces() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = ensure_telemetry();

        // Generate trace data — spans must be entered to be exported.
        {
            let span =
                crawlq::telemetry::crawl::start_crawl_span("fetch", &uuid::Uuid::new_v4());
            let _enter = span.enter();
            crawlq::telemetry::crawl::record_state_transition(&span, "queued", "processing");
            crawlq::telemetry::crawl::record_state_transition(&span, "processing", "complete");
        }

        flush_and_wait(guard).await;

        // Query Tempo for traces from our service.
        let client = reqwest::Client::new();
        let resp = client
            .get("http://localhost:3200/api/search")
            .query(&[("tags", "service.name=crawlq-smoke-test"), ("limit", "5")])
            .send()
            .await
            .expect("failed to query Tempo");

        assert!(
            resp.status().is_success(),
            "Tempo query failed: {}",
            resp.status()
        );

        let body: serde_json::Value = resp.json().await.expect("failed to parse Tempo response");
        let traces = body["traces"].as_array();
        assert!(
            traces.is_some_and(|t| !t.is_empty()),
            "expected traces in Tempo, got: {body}"
        );
        println!("Tempo: found {} trace(s)", traces.unwrap().len());
    });
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn smoke_metrics() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = ensure_telemetry();

        // Emit metric data.
        let counter = crawlq::telemetry::metrics::requests_processed();
        counter.add(
            1,
            &[
                KeyValue::new("stage", "fetch"),
                KeyValue::new("outcome", "completed"),
            ],
        );
        counter.add(
            1,
            &[
                KeyValue::new("stage", "fetch"),
                KeyValue::new("outcome", "requeued"),
            ],
        );

        let histogram = crawlq::telemetry::metrics::request_duration_ms();
        histogram.record(42.5, &[KeyValue::new("stage", "fetch")]);

        flush_and_wait(guard).await;

        // Query Prometheus for our metric.
        let client = reqwest::Client::new();
        let resp = client
            .get("http://localhost:9090/api/v1/query")
            .query(&[("query", "crawlq_requests_processed_total")])
            .send()
            .await
            .expect("failed to query Prometheus");

        assert!(
            resp.status().is_success(),
            "Prometheus query failed: {}",
            resp.status()
        );

        let body: serde_json::Value = resp
            .json()
            .await
            .expect("failed to parse Prometheus response");
        let results = body["data"]["result"].as_array();
        assert!(
            results.is_some_and(|r| !r.is_empty()),
            "expected metric results in Prometheus, got: {body}"
        );
        println!(
            "Prometheus: found {} series for crawlq_requests_processed_total",
            results.unwrap().len()
        );
    });
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn smoke_logs() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = ensure_telemetry();

        // Emit log data via tracing macros (bridged to OTel logs).
        tracing::info!(component = "smoke-test", "smoke test info log");
        tracing::warn!(component = "smoke-test", "smoke test warning log");

        flush_and_wait(guard).await;

        // Query Loki for logs from our service.
        let client = reqwest::Client::new();
        let resp = client
            .get("http://localhost:3100/loki/api/v1/query_range")
            .query(&[
                ("query", r#"{service_name="crawlq-smoke-test"}"#),
                ("limit", "10"),
            ])
            .send()
            .await
            .expect("failed to query Loki");

        assert!(
            resp.status().is_success(),
            "Loki query failed: {}",
            resp.status()
        );

        let body: serde_json::Value = resp.json().await.expect("failed to parse Loki response");
        let streams = body["data"]["result"].as_array();
        assert!(
            streams.is_some_and(|s| !s.is_empty()),
            "expected log streams in Loki, got: {body}"
        );
        println!("Loki: found {} stream(s)", streams.unwrap().len());
    });
}

// ---------------------------------------------------------------------------
// Full lifecycle
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn smoke_full_lifecycle() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = ensure_telemetry();

        // Simulate a full crawl lifecycle generating all signal types.
        let request_id = uuid::Uuid::new_v4();

        // Traces: fetch + process spans — enter spans so they are exported.
        {
            let fetch_span = crawlq::telemetry::crawl::start_crawl_span("fetch", &request_id);
            let _fetch_enter = fetch_span.enter();
            crawlq::telemetry::crawl::record_state_transition(&fetch_span, "queued", "processing");

            {
                let process_span =
                    crawlq::telemetry::crawl::start_crawl_span("process:scancode", &request_id);
                let _process_enter = process_span.enter();
                crawlq::telemetry::crawl::record_state_transition(
                    &process_span,
                    "processing",
                    "complete",
                );
            }

            crawlq::telemetry::crawl::record_state_transition(
                &fetch_span,
                "processing",
                "complete",
            );
        }

        // Metrics: counters + histogram
        let queue_ops = crawlq::telemetry::metrics::queue_operations();
        queue_ops.add(
            1,
            &[
                KeyValue::new("queue", "crawl_normal"),
                KeyValue::new("operation", "send"),
            ],
        );
        queue_ops.add(
            1,
            &[
                KeyValue::new("queue", "crawl_normal"),
                KeyValue::new("operation", "read"),
            ],
        );

        let processed = crawlq::telemetry::metrics::requests_processed();
        for stage in ["fetch", "process:scancode"] {
            processed.add(
                1,
                &[
                    KeyValue::new("stage", stage),
                    KeyValue::new("outcome", "completed"),
                ],
            );
        }

        let duration = crawlq::telemetry::metrics::request_duration_ms();
        duration.record(150.0, &[KeyValue::new("stage", "fetch")]);
        duration.record(2500.0, &[KeyValue::new("stage", "process:scancode")]);

        let harvest_bytes = crawlq::telemetry::metrics::harvest_bytes();
        harvest_bytes.add(311_000, &[KeyValue::new("provider", "npm")]);
        let harvest_files = crawlq::telemetry::metrics::harvest_files();
        harvest_files.add(1054, &[KeyValue::new("provider", "scancode")]);

        let suppressions = crawlq::telemetry::metrics::attenuation_suppressions();
        suppressions.add(1, &[KeyValue::new("outcome", "suppressed")]);

        // Logs: various levels
        tracing::info!(request_id = %request_id, stage = "fetch", "request completed");
        tracing::info!(request_id = %request_id, "state transition: queued -> complete");
        tracing::warn!(request_id = %request_id, "simulated warning during lifecycle");

        flush_and_wait(guard).await;

        // Verify all three backends have data.
        let client = reqwest::Client::new();

        // Tempo
        let resp = client
            .get("http://localhost:3200/api/search")
            .query(&[("tags", "service.name=crawlq-smoke-test"), ("limit", "5")])
            .send()
            .await
            .expect("failed to query Tempo");
        let body: serde_json::Value = resp.json().await.unwrap();
        let trace_count = body["traces"].as_array().map_or(0, |t| t.len());
        println!("Full lifecycle — Tempo: {trace_count} trace(s)");
        assert!(trace_count > 0, "expected traces in Tempo");

        // Prometheus
        let resp = client
            .get("http://localhost:9090/api/v1/query")
            .query(&[("query", "crawlq_requests_processed_total")])
            .send()
            .await
            .expect("failed to query Prometheus");
        let body: serde_json::Value = resp.json().await.unwrap();
        let metric_count = body["data"]["result"].as_array().map_or(0, |r| r.len());
        println!("Full lifecycle — Prometheus: {metric_count} series");
        assert!(metric_count > 0, "expected metrics in Prometheus");

        // Loki
        let resp = client
            .get("http://localhost:3100/loki/api/v1/query_range")
            .query(&[
                ("query", r#"{service_name="crawlq-smoke-test"}"#),
                ("limit", "10"),
            ])
            .send()
            .await
            .expect("failed to query Loki");
        let body: serde_json::Value = resp.json().await.unwrap();
        let log_count = body["data"]["result"].as_array().map_or(0, |s| s.len());
        println!("Full lifecycle — Loki: {log_count} stream(s)");
        assert!(log_count > 0, "expected logs in Loki");

        println!("Full lifecycle smoke test passed!");
    });
}
