//! Metric instrument factories for crawlq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"crawlq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for crawlq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("crawlq")
}

/// Counter: queue-level operations (send, read, requeue, archive, delete).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("crawlq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: requests resolved by the worker pool.
/// Labels: `stage`, `outcome` ("completed" | "requeued" | "deadlettered").
pub fn requests_processed() -> Counter<u64> {
    meter()
        .u64_counter("crawlq.requests.processed")
        .with_description("Number of requests resolved")
        .build()
}

/// Histogram: handler execution duration in milliseconds.
/// Labels: `stage`.
pub fn request_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("crawlq.request.duration_ms")
        .with_description("Handler execution duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: requests routed to the deadletter sink.
/// Labels: `kind`.
pub fn deadletters() -> Counter<u64> {
    meter()
        .u64_counter("crawlq.deadletters")
        .with_description("Requests routed to the deadletter sink")
        .build()
}

/// Counter: enqueue attempts dropped by the attenuator.
/// Labels: `outcome`.
pub fn attenuation_suppressions() -> Counter<u64> {
    meter()
        .u64_counter("crawlq.attenuation.suppressions")
        .with_description("Enqueue attempts dropped as duplicates")
        .build()
}

/// Counter: bytes harvested by fetch/process providers.
/// Labels: `provider`.
pub fn harvest_bytes() -> Counter<u64> {
    meter()
        .u64_counter("crawlq.harvest.bytes")
        .with_description("Bytes of content harvested")
        .build()
}

/// Counter: files harvested by fetch/process providers.
/// Labels: `provider`.
pub fn harvest_files() -> Counter<u64> {
    meter()
        .u64_counter("crawlq.harvest.files")
        .with_description("Files of content harvested")
        .build()
}
