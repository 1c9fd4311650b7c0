//! Core data model.
//!
//! A request is one unit of crawl work. It has identity (stage type + source
//! spec), a document payload produced by the current stage, an append-only
//! history of prior stage outcomes, and lifecycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A unit of crawl work moving through fetch → process → store stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique identifier for tracing. Not part of the logical identity;
    /// two requests for the same artifact carry different ids.
    pub id: RequestId,

    /// Stage discriminator (e.g., "fetch", "process:scancode", "store").
    /// Determines which handler subset may claim the request.
    pub request_type: String,

    /// Canonical identity of the target artifact.
    pub spec: SourceSpec,

    /// Output payload of the stage that last ran. Owned by the request
    /// until handed to the next stage.
    pub document: Option<Document>,

    /// Ordered outcomes of prior stages. Append-only.
    pub history: Vec<HistoryEntry>,

    /// Facts attached by handlers (file counts, sizes, tool versions).
    /// Union-merged; an existing key is never overwritten.
    pub meta: serde_json::Map<String, serde_json::Value>,

    /// Current lifecycle state.
    pub state: RequestState,

    /// Where the produced content came from (e.g., "origin" for a download
    /// straight from the registry). Set by fetch handlers.
    pub content_origin: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Request {
    pub fn new(request_type: impl Into<String>, spec: SourceSpec) -> Self {
        let now = Utc::now();
        Self {
            id: RequestId::new(),
            request_type: request_type.into(),
            spec,
            document: None,
            history: Vec::new(),
            meta: serde_json::Map::new(),
            state: RequestState::Queued,
            content_origin: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Normalized identity used for attenuation dedup: stage type plus the
    /// canonical spec url, so different spellings of one artifact collapse.
    pub fn fingerprint(&self) -> String {
        format!("{}:{}", self.request_type, self.spec.to_url())
    }

    /// Resolve an ambiguous revision to a concrete one (e.g., "latest" to an
    /// actual version). Allowed exactly once per stage: a revision that is
    /// already concrete stays as it is and `false` is returned.
    pub fn resolve_revision(&mut self, revision: impl Into<String>) -> bool {
        if self.spec.revision.is_some() {
            return false;
        }
        self.spec.revision = Some(revision.into());
        self.touch();
        true
    }

    /// Attach a fact to `meta`. First write wins; later writers for the
    /// same key are ignored.
    pub fn add_meta(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.meta.entry(key.into()).or_insert(value);
        self.touch();
    }

    /// Union-merge a map of facts into `meta`. Existing keys keep their
    /// original values.
    pub fn merge_meta(&mut self, facts: serde_json::Map<String, serde_json::Value>) {
        for (key, value) in facts {
            self.meta.entry(key).or_insert(value);
        }
        self.touch();
    }

    /// Append a stage outcome to the history.
    pub fn record(&mut self, disposition: Disposition, message: Option<String>) {
        self.history.push(HistoryEntry {
            stage: self.request_type.clone(),
            disposition,
            message,
            timestamp: Utc::now(),
        });
        self.touch();
    }

    /// Transition the lifecycle state, enforcing the transition matrix.
    pub fn transition(&mut self, to: RequestState) -> Result<(), (RequestState, RequestState)> {
        if !self.state.can_transition_to(to) {
            return Err((self.state, to));
        }
        self.state = to;
        self.touch();
        Ok(())
    }

    /// Mark the request permanently failed. Used by handlers that determine
    /// the failure is not worth retrying (e.g., confirmed-absent upstream
    /// resource, unrecoverable tool error).
    pub fn mark_dead(&mut self, reason: impl Into<String>) {
        self.state = RequestState::Dead;
        self.record(Disposition::Deadlettered, Some(reason.into()));
    }

    pub fn is_dead(&self) -> bool {
        self.state == RequestState::Dead
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Newtype for request IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Source Spec
// ---------------------------------------------------------------------------

/// Canonical identity of a target artifact: which registry family, which
/// provider instance, and the artifact coordinates within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Artifact family (e.g., "npm", "git", "maven").
    pub artifact_type: String,

    /// Provider instance (e.g., "npmjs", "github").
    pub provider: String,

    /// Namespace / scope / group. None renders as "-" in the canonical url.
    pub namespace: Option<String>,

    /// Artifact name.
    pub name: String,

    /// Concrete revision. None means "whatever is latest", to be resolved
    /// exactly once by the fetch stage.
    pub revision: Option<String>,
}

impl SourceSpec {
    pub fn new(
        artifact_type: impl Into<String>,
        provider: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            artifact_type: artifact_type.into(),
            provider: provider.into(),
            namespace: None,
            name: name.into(),
            revision: None,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Registry-facing name: `namespace/name` for scoped artifacts,
    /// plain `name` otherwise.
    pub fn full_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}/{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Canonical url form, e.g. `cd:/npm/npmjs/-/lodash/4.17.21`.
    pub fn to_url(&self) -> String {
        let ns = self.namespace.as_deref().unwrap_or("-");
        match &self.revision {
            Some(rev) => format!(
                "cd:/{}/{}/{}/{}/{}",
                self.artifact_type, self.provider, ns, self.name, rev
            ),
            None => format!(
                "cd:/{}/{}/{}/{}",
                self.artifact_type, self.provider, ns, self.name
            ),
        }
    }
}

impl std::fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_url())
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Enqueued, waiting for a worker.
    Queued,
    /// Dequeued, handler running.
    Processing,
    /// Failed transiently, going back on the queue with a delay.
    Requeue,
    /// Terminally failed. Lives on only in the deadletter sink.
    Dead,
    /// Stage finished successfully. Terminal for this request; the next
    /// stage runs as a fresh request.
    Complete,
}

impl RequestState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, to),
            (Queued, Processing)
                | (Queued, Dead)        // cancelled before dispatch
                | (Processing, Complete)
                | (Processing, Requeue)
                | (Processing, Dead)
                | (Requeue, Queued) // redelivered
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Dead | RequestState::Complete)
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RequestState::Queued => "queued",
            RequestState::Processing => "processing",
            RequestState::Requeue => "requeue",
            RequestState::Dead => "dead",
            RequestState::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Output payload of a stage: where harvested content landed plus any
/// extracted metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Filesystem location of the harvested content, if the stage
    /// produced files.
    pub location: Option<String>,

    /// MIME-ish content type of the harvest.
    pub content_type: Option<String>,

    /// Upstream release date of the artifact revision, if known.
    pub release_date: Option<DateTime<Utc>>,

    /// Provider-specific payload (registry data, scan summary). The engine
    /// doesn't interpret this.
    pub data: serde_json::Value,
}

impl Document {
    pub fn at_location(location: impl Into<String>) -> Self {
        Self {
            location: Some(location.into()),
            content_type: None,
            release_date: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn release_date(mut self, date: DateTime<Utc>) -> Self {
        self.release_date = Some(date);
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// One stage outcome in a request's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Stage type at the time of the entry.
    pub stage: String,
    pub disposition: Disposition,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// What happened to a request at a stage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Handed to a handler.
    Dispatched,
    /// Handler finished, stage output accepted.
    Completed,
    /// Failed transiently, sent back to the queue.
    Requeued,
    /// Routed to the deadletter sink.
    Deadlettered,
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Disposition::Dispatched => "dispatched",
            Disposition::Completed => "completed",
            Disposition::Requeued => "requeued",
            Disposition::Deadlettered => "deadlettered",
        };
        write!(f, "{s}")
    }
}
