//! Request execution span helpers.
//!
//! Provides span creation and state-transition recording for requests
//! flowing through the worker pool.

use tracing::Span;
use uuid::Uuid;

/// Start a span for request execution.
///
/// The `crawl.state` field is declared empty and can be updated via
/// [`record_state_transition`].
pub fn start_crawl_span(request_type: &str, request_id: &Uuid) -> Span {
    tracing::info_span!(
        "crawl.execute",
        "crawl.request_type" = request_type,
        "crawl.request_id" = %request_id,
        "crawl.state" = tracing::field::Empty,
    )
}

/// Record a state transition event on the current span.
///
/// Emits a tracing `info` event scoped to the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
