//! # crawlq
//!
//! Queue-driven crawl orchestration engine.
//!
//! Requests describe a component to harvest; handlers claim them by type
//! and move them through fetch, process, and store stages. A weighted
//! scheduler drains four priority queues (memory or pgmq-backed), an
//! attenuator suppresses duplicate enqueues, and a deadletter sink records
//! requests that fail permanently or exhaust their deliveries. Observability
//! runs through tracing and OpenTelemetry.

pub mod attenuator;
pub mod config;
pub mod deadletter;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod providers;
pub mod queue;
pub mod sched;
pub mod telemetry;
pub mod worker;
