//! Handler registry and dispatch.
//!
//! Fetch, process, and store providers plug in behind one contract:
//! `can_handle` is a fast, side-effect-free routing predicate; `handle` does
//! the actual work and may be slow. The registry keeps an ordered sequence
//! of handlers per stage and the first whose `can_handle` accepts the
//! request wins — registration order is the tiebreak. The dispatcher never
//! retries; failures go back to the worker loop, which owns retry policy.

use crate::error::{Error, Result};
use crate::model::Request;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

// ---------------------------------------------------------------------------
// Handler contract
// ---------------------------------------------------------------------------

/// A pluggable fetch/process/store provider.
///
/// Side effects (temp files, subprocess handles) are the handler's own
/// responsibility to clean up via scoped acquisition, success or not.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Short name for logs and metrics.
    fn name(&self) -> &str;

    /// May this handler claim the request? Must be side-effect-free and
    /// cheap; used purely for routing.
    fn can_handle(&self, request: &Request) -> bool;

    /// Run the stage. On success the returned request carries the new
    /// stage's type and document. A request returned in the dead state
    /// counts as a permanent failure.
    async fn handle(&self, request: Request) -> Result<Request>;
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Pipeline stage, parsed from the request type's prefix
/// ("process:scancode" belongs to Process).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetch,
    Process,
    Store,
}

impl Stage {
    /// Stage of a request type, or None for an unrecognized prefix.
    pub fn of(request_type: &str) -> Option<Stage> {
        let prefix = request_type.split(':').next().unwrap_or(request_type);
        match prefix {
            "fetch" => Some(Stage::Fetch),
            "process" => Some(Stage::Process),
            "store" => Some(Stage::Store),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Fetch => "fetch",
            Stage::Process => "process",
            Stage::Store => "store",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Ordered handler sequences per stage.
#[derive(Default)]
pub struct HandlerRegistry {
    fetch: Vec<Arc<dyn Handler>>,
    process: Vec<Arc<dyn Handler>>,
    store: Vec<Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to a stage's sequence. Earlier registrations are
    /// consulted first.
    pub fn register(&mut self, stage: Stage, handler: Arc<dyn Handler>) {
        self.handlers_mut(stage).push(handler);
    }

    pub fn handlers(&self, stage: Stage) -> &[Arc<dyn Handler>] {
        match stage {
            Stage::Fetch => &self.fetch,
            Stage::Process => &self.process,
            Stage::Store => &self.store,
        }
    }

    fn handlers_mut(&mut self, stage: Stage) -> &mut Vec<Arc<dyn Handler>> {
        match stage {
            Stage::Fetch => &mut self.fetch,
            Stage::Process => &mut self.process,
            Stage::Store => &mut self.store,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Routes one request to the first handler that claims it.
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    /// Select and run the handler for this request. No handler claiming it
    /// is fatal for the request; handler failures pass through untouched
    /// for the worker loop to route.
    pub async fn dispatch(&self, request: Request) -> Result<Request> {
        let unroutable = || Error::UnroutableRequest {
            request_type: request.request_type.clone(),
            spec: request.spec.to_url(),
        };

        let stage = Stage::of(&request.request_type).ok_or_else(unroutable)?;
        let handler = self
            .registry
            .handlers(stage)
            .iter()
            .find(|h| h.can_handle(&request))
            .ok_or_else(unroutable)?;

        debug!(
            handler = handler.name(),
            request_id = %request.id,
            request_type = %request.request_type,
            "dispatching"
        );
        handler.handle(request).await
    }
}
