//! Durable queue backend over the pgmq Postgres extension, via direct SQLx.
//!
//! Calls pgmq's SQL functions: pgmq.create, pgmq.send, pgmq.read,
//! pgmq.set_vt, pgmq.archive, pgmq.delete. One pgmq queue per priority
//! channel. The mapping to the adapter contract:
//!
//! - pop        = pgmq.read with the configured visibility window
//! - ack        = pgmq.delete
//! - requeue    = pgmq.set_vt to now + delay (shortens or extends visibility;
//!                the message is never re-sent, so read_ct keeps counting)
//! - deadletter = pgmq.archive (kept in the archive table for audit)
//! - renew      = pgmq.set_vt to now + extension
//! - delivery count = read_ct

use super::{DeliveryTag, Priority, Queue, QueueEntry};
use crate::error::{Error, Result};
use crate::model::Request;
use crate::telemetry::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::debug;

pub struct PgQueue {
    pool: PgPool,
    visibility: Duration,
}

impl PgQueue {
    /// Connect to Postgres. `visibility` is the lock window applied to
    /// every pop.
    pub async fn connect(url: &str, visibility: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|e| Error::BackendUnavailable(format!("postgres connect: {e}")))?;
        Ok(Self { pool, visibility })
    }

    /// Install the pgmq extension and create the four priority queues.
    /// Idempotent; run once at startup.
    pub async fn init(&self) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS pgmq CASCADE")
            .execute(&self.pool)
            .await?;
        for priority in Priority::ALL {
            sqlx::query("SELECT pgmq.create($1)")
                .bind(priority.queue_name())
                .execute(&self.pool)
                .await?;
            Self::record_op(priority, "create");
        }
        Ok(())
    }

    /// Simple health check — run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
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

    fn vt_seconds(duration: Duration) -> i32 {
        duration.as_secs().min(i32::MAX as u64) as i32
    }
}

#[async_trait]
impl Queue for PgQueue {
    async fn push(&self, request: &Request, priority: Priority, delay: Duration) -> Result<()> {
        let payload = serde_json::to_value(request)?;
        let _row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, $3)")
            .bind(priority.queue_name())
            .bind(&payload)
            .bind(Self::vt_seconds(delay))
            .fetch_one(&self.pool)
            .await?;
        Self::record_op(priority, "send");
        Ok(())
    }

    async fn pop(&self, priority: Priority) -> Result<Option<QueueEntry>> {
        let row = sqlx::query_as::<
            _,
            (
                i64,
                i32,
                DateTime<Utc>,
                DateTime<Utc>,
                serde_json::Value,
            ),
        >(
            "SELECT msg_id, read_ct, enqueued_at, vt, message FROM pgmq.read($1, $2, 1)",
        )
        .bind(priority.queue_name())
        .bind(Self::vt_seconds(self.visibility))
        .fetch_optional(&self.pool)
        .await?;

        Self::record_op(priority, if row.is_some() { "read" } else { "read_empty" });

        let entry = match row {
            Some((msg_id, read_ct, _enqueued_at, vt, message)) => {
                let request: Request = serde_json::from_value(message)?;
                Some(QueueEntry {
                    request,
                    priority,
                    delivery: DeliveryTag {
                        message_id: msg_id,
                        delivery_count: read_ct.max(0) as u32,
                        visible_deadline: vt,
                    },
                })
            }
            None => None,
        };
        Ok(entry)
    }

    async fn ack(&self, entry: &QueueEntry) -> Result<()> {
        sqlx::query("SELECT pgmq.delete($1, $2)")
            .bind(entry.priority.queue_name())
            .bind(entry.delivery.message_id)
            .execute(&self.pool)
            .await?;
        Self::record_op(entry.priority, "delete");
        Ok(())
    }

    async fn requeue(&self, entry: &QueueEntry, delay: Duration) -> Result<()> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT msg_id FROM pgmq.set_vt($1, $2, $3)")
            .bind(entry.priority.queue_name())
            .bind(entry.delivery.message_id)
            .bind(Self::vt_seconds(delay))
            .fetch_optional(&self.pool)
            .await?;
        if row.is_none() {
            debug!(
                message_id = entry.delivery.message_id,
                "requeue for message no longer in queue"
            );
        }
        Self::record_op(entry.priority, "requeue");
        Ok(())
    }

    async fn deadletter(&self, entry: &QueueEntry) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(entry.priority.queue_name())
            .bind(entry.delivery.message_id)
            .execute(&self.pool)
            .await?;
        Self::record_op(entry.priority, "archive");
        Ok(())
    }

    async fn renew(&self, entry: &QueueEntry, extension: Duration) -> Result<()> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT msg_id FROM pgmq.set_vt($1, $2, $3)")
            .bind(entry.priority.queue_name())
            .bind(entry.delivery.message_id)
            .bind(Self::vt_seconds(extension))
            .fetch_optional(&self.pool)
            .await?;
        if row.is_none() {
            debug!(
                message_id = entry.delivery.message_id,
                "renew for message no longer in queue"
            );
        }
        Ok(())
    }

    async fn depth(&self, priority: Priority) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT queue_length FROM pgmq.metrics($1)")
            .bind(priority.queue_name())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0.max(0) as u64)
    }

    async fn wait_for_work(&self, timeout: Duration) {
        // pgmq has no arrival signal; poll with the caller's backoff.
        tokio::time::sleep(timeout).await;
    }
}
