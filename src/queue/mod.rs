//! Queue backend adapter.
//!
//! One uniform push/pop/ack/requeue/deadletter contract over transports with
//! different delivery semantics. A popped entry is owned by the worker until
//! it is explicitly settled (ack, requeue, or deadletter); if the backend's
//! visibility window elapses first, the message is redelivered automatically.
//! Settling an entry the backend has already reclaimed is a no-op, never an
//! error — at-least-once delivery makes that race unavoidable.

pub mod memory;
pub mod pg;

use crate::error::Result;
use crate::model::Request;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// The four named priority channels. Each is a separate queue on the
/// backend; the scheduler decides dequeue order across them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Immediate,
    Soon,
    Normal,
    Later,
}

impl Priority {
    /// All priorities in the scheduler's fixed scan order.
    pub const ALL: [Priority; 4] = [
        Priority::Immediate,
        Priority::Soon,
        Priority::Normal,
        Priority::Later,
    ];

    pub fn channel(&self) -> &'static str {
        match self {
            Priority::Immediate => "immediate",
            Priority::Soon => "soon",
            Priority::Normal => "normal",
            Priority::Later => "later",
        }
    }

    /// Backend queue name for this channel.
    pub fn queue_name(&self) -> String {
        format!("crawl_{}", self.channel())
    }
}

impl std::str::FromStr for Priority {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "immediate" => Ok(Priority::Immediate),
            "soon" => Ok(Priority::Soon),
            "normal" => Ok(Priority::Normal),
            "later" => Ok(Priority::Later),
            other => Err(crate::error::Error::Config(format!(
                "unknown priority '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.channel())
    }
}

// ---------------------------------------------------------------------------
// Queue Entry
// ---------------------------------------------------------------------------

/// A request in flight from a queue: the payload plus the backend's
/// delivery metadata. Owned by the worker until settled.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub request: Request,
    pub priority: Priority,
    pub delivery: DeliveryTag,
}

/// Backend-held delivery state for one in-flight message.
#[derive(Debug, Clone)]
pub struct DeliveryTag {
    /// Backend message id. Settle operations address the message with it.
    pub message_id: i64,

    /// How many times this message has been delivered, this delivery
    /// included. Approximate on backends that only track it best-effort.
    pub delivery_count: u32,

    /// When the backend will consider the message abandoned and make it
    /// visible again.
    pub visible_deadline: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Queue trait
// ---------------------------------------------------------------------------

/// Uniform contract over queue transports.
///
/// Implementations normalize their transport's semantics to this surface:
/// a server-held lock becomes `visible_deadline` plus `renew`, a
/// visibility-timeout queue becomes the same thing with `requeue` shortening
/// the window instead of re-sending.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Enqueue a request on a priority channel. `delay` holds the message
    /// invisible before its first delivery; zero means immediately visible.
    async fn push(&self, request: &Request, priority: Priority, delay: Duration) -> Result<()>;

    /// Dequeue the next visible message from one channel, locking it for
    /// the backend's visibility window. None if the channel is empty.
    async fn pop(&self, priority: Priority) -> Result<Option<QueueEntry>>;

    /// Settle a delivered entry as done. Idempotent.
    async fn ack(&self, entry: &QueueEntry) -> Result<()>;

    /// Return a delivered entry to its channel, visible again after
    /// `delay`. Idempotent.
    async fn requeue(&self, entry: &QueueEntry, delay: Duration) -> Result<()>;

    /// Settle a delivered entry as terminally failed and remove it from
    /// live delivery. The deadletter record itself is written by the
    /// router, not the queue. Idempotent.
    async fn deadletter(&self, entry: &QueueEntry) -> Result<()>;

    /// Extend the visibility window of a delivered entry. Used by the
    /// lock-renewal loop for handlers that outlive the lock duration.
    async fn renew(&self, entry: &QueueEntry, extension: Duration) -> Result<()>;

    /// Approximate number of messages waiting on a channel.
    async fn depth(&self, priority: Priority) -> Result<u64>;

    /// Block until new work may have arrived or `timeout` elapses.
    /// Poll-only backends just sleep.
    async fn wait_for_work(&self, timeout: Duration);
}
