//! Process-local queue backend.
//!
//! FIFO per priority channel, no persistence, no redelivery on crash.
//! In-flight messages still get visibility deadlines and delivery counts so
//! the full adapter contract — including automatic redelivery of abandoned
//! messages — behaves the same as on a durable backend. Reclaim is lazy:
//! expired in-flight messages return to their channel on the next pop, no
//! background sweep.

use super::{DeliveryTag, Priority, Queue, QueueEntry};
use crate::error::Result;
use crate::model::Request;
use crate::telemetry::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

struct StoredMessage {
    id: i64,
    request: Request,
    deliveries: u32,
    visible_at: DateTime<Utc>,
}

struct Inflight {
    message: StoredMessage,
    priority: Priority,
    deadline: DateTime<Utc>,
}

struct Channels {
    waiting: HashMap<Priority, VecDeque<StoredMessage>>,
    inflight: HashMap<i64, Inflight>,
    next_id: i64,
}

pub struct MemoryQueue {
    channels: Mutex<Channels>,
    arrivals: Notify,
    visibility: Duration,
}

impl MemoryQueue {
    /// `visibility` is the lock window applied to every pop.
    pub fn new(visibility: Duration) -> Self {
        let mut waiting = HashMap::new();
        for priority in Priority::ALL {
            waiting.insert(priority, VecDeque::new());
        }
        Self {
            channels: Mutex::new(Channels {
                waiting,
                inflight: HashMap::new(),
                next_id: 0,
            }),
            arrivals: Notify::new(),
            visibility,
        }
    }

    /// Move expired in-flight messages back to their channels. Preserves
    /// the delivery count so redelivered messages keep counting up.
    fn reclaim_expired(channels: &mut Channels, now: DateTime<Utc>) {
        let expired: Vec<i64> = channels
            .inflight
            .iter()
            .filter(|(_, inflight)| inflight.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(inflight) = channels.inflight.remove(&id) {
                debug!(message_id = id, priority = %inflight.priority, "redelivering abandoned message");
                let mut message = inflight.message;
                message.visible_at = now;
                if let Some(q) = channels.waiting.get_mut(&inflight.priority) {
                    q.push_back(message);
                }
            }
        }
    }

    fn record_op(priority: Priority, operation: &'static str) {
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", priority.queue_name()),
                KeyValue::new("operation", operation),
            ],
        );
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn push(&self, request: &Request, priority: Priority, delay: Duration) -> Result<()> {
        {
            let mut channels = self.channels.lock();
            let id = channels.next_id;
            channels.next_id += 1;
            let visible_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            if let Some(q) = channels.waiting.get_mut(&priority) {
                q.push_back(StoredMessage {
                    id,
                    request: request.clone(),
                    deliveries: 0,
                    visible_at,
                });
            }
        }
        Self::record_op(priority, "send");
        self.arrivals.notify_waiters();
        Ok(())
    }

    async fn pop(&self, priority: Priority) -> Result<Option<QueueEntry>> {
        let now = Utc::now();
        let entry = {
            let mut channels = self.channels.lock();
            Self::reclaim_expired(&mut channels, now);

            let message = channels.waiting.get_mut(&priority).and_then(|q| {
                let idx = q.iter().position(|m| m.visible_at <= now)?;
                q.remove(idx)
            });
            match message {
                Some(mut message) => {
                    message.deliveries += 1;
                    let deadline = now
                        + chrono::Duration::from_std(self.visibility)
                            .unwrap_or_else(|_| chrono::Duration::zero());
                    let entry = QueueEntry {
                        request: message.request.clone(),
                        priority,
                        delivery: DeliveryTag {
                            message_id: message.id,
                            delivery_count: message.deliveries,
                            visible_deadline: deadline,
                        },
                    };
                    channels.inflight.insert(
                        message.id,
                        Inflight {
                            message,
                            priority,
                            deadline,
                        },
                    );
                    Some(entry)
                }
                None => None,
            }
        };
        Self::record_op(priority, if entry.is_some() { "read" } else { "read_empty" });
        Ok(entry)
    }

    async fn ack(&self, entry: &QueueEntry) -> Result<()> {
        let removed = {
            let mut channels = self.channels.lock();
            channels.inflight.remove(&entry.delivery.message_id)
        };
        if removed.is_none() {
            debug!(
                message_id = entry.delivery.message_id,
                "ack for message no longer in flight"
            );
        }
        Self::record_op(entry.priority, "delete");
        Ok(())
    }

    async fn requeue(&self, entry: &QueueEntry, delay: Duration) -> Result<()> {
        let returned = {
            let mut channels = self.channels.lock();
            match channels.inflight.remove(&entry.delivery.message_id) {
                Some(inflight) => {
                    let mut message = inflight.message;
                    message.visible_at = Utc::now()
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::zero());
                    if let Some(q) = channels.waiting.get_mut(&inflight.priority) {
                        q.push_back(message);
                    }
                    true
                }
                None => false,
            }
        };
        if returned {
            self.arrivals.notify_waiters();
        } else {
            debug!(
                message_id = entry.delivery.message_id,
                "requeue for message no longer in flight"
            );
        }
        Self::record_op(entry.priority, "requeue");
        Ok(())
    }

    async fn deadletter(&self, entry: &QueueEntry) -> Result<()> {
        let removed = {
            let mut channels = self.channels.lock();
            channels.inflight.remove(&entry.delivery.message_id)
        };
        if removed.is_none() {
            debug!(
                message_id = entry.delivery.message_id,
                "deadletter for message no longer in flight"
            );
        }
        Self::record_op(entry.priority, "archive");
        Ok(())
    }

    async fn renew(&self, entry: &QueueEntry, extension: Duration) -> Result<()> {
        let mut channels = self.channels.lock();
        match channels.inflight.get_mut(&entry.delivery.message_id) {
            Some(inflight) => {
                inflight.deadline = Utc::now()
                    + chrono::Duration::from_std(extension)
                        .unwrap_or_else(|_| chrono::Duration::zero());
            }
            None => {
                debug!(
                    message_id = entry.delivery.message_id,
                    "renew for message no longer in flight"
                );
            }
        }
        Ok(())
    }

    async fn depth(&self, priority: Priority) -> Result<u64> {
        let channels = self.channels.lock();
        Ok(channels
            .waiting
            .get(&priority)
            .map(|q| q.len() as u64)
            .unwrap_or(0))
    }

    async fn wait_for_work(&self, timeout: Duration) {
        tokio::select! {
            _ = self.arrivals.notified() => {}
            _ = tokio::time::sleep(timeout) => {}
        }
    }
}
