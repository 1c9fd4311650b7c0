//! Error types for crawlq.
//!
//! The taxonomy matters to the outcome router: transient failures are
//! requeued with backoff until the delivery ceiling, permanent failures and
//! unroutable requests go straight to the deadletter sink, and backend
//! failures back off the backend operation itself rather than the request.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No registered handler claims the request at its stage. Fatal for
    /// that request.
    #[error("no handler for request type '{request_type}' ({spec})")]
    UnroutableRequest { request_type: String, spec: String },

    /// Network error, timeout, or subprocess failure. Retryable up to the
    /// backend's max delivery count.
    #[error("transient provider error: {0}")]
    TransientProvider(String),

    /// The handler determined the failure is unrecoverable (malformed
    /// artifact, confirmed-absent upstream resource). Never retried.
    #[error("permanent provider error: {0}")]
    PermanentProvider(String),

    /// Queue or deadletter backend connectivity failure. The operation is
    /// retried at the adapter boundary; the request itself is untouched.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::model::RequestState,
        to: crate::model::RequestState,
    },

    #[error("queue error: {0}")]
    Queue(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Should the outcome router requeue the request for another attempt?
    ///
    /// Backend errors are deliberately not transient here: they mean the
    /// queue operation failed, not the request, and are retried at the
    /// adapter boundary instead.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientProvider(_))
    }

    /// Does this error end the request for good?
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::PermanentProvider(_) | Error::UnroutableRequest { .. }
        )
    }

    /// Short stable label for metrics and deadletter records.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UnroutableRequest { .. } => "unroutable",
            Error::TransientProvider(_) => "transient",
            Error::PermanentProvider(_) => "permanent",
            Error::BackendUnavailable(_) => "backend_unavailable",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::Queue(_) => "queue",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Config(_) => "config",
            Error::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
