//! Deadletter records and sinks.
//!
//! A deadletter record is written exactly once when a request terminally
//! fails; nothing in the engine ever mutates or deletes one. The routing
//! decision (permanent vs transient vs delivery ceiling) belongs to the
//! worker loop; this module only defines the record and where it lands.
//! Sinks are selected independently of the work queue backend.

use crate::error::Result;
use crate::model::Request;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A terminally-failed request plus the failure context at time of death.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadletterRecord {
    pub request: Request,

    /// Stable failure classification (e.g., "permanent", "transient",
    /// "unroutable").
    pub error_kind: String,

    /// Human-readable failure description.
    pub message: String,

    /// How many deliveries the request had consumed when it died.
    pub delivery_count: u32,

    pub deadlettered_at: DateTime<Utc>,
}

impl DeadletterRecord {
    pub fn new(
        request: Request,
        error_kind: impl Into<String>,
        message: impl Into<String>,
        delivery_count: u32,
    ) -> Self {
        Self {
            request,
            error_kind: error_kind.into(),
            message: message.into(),
            delivery_count,
            deadlettered_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sink trait
// ---------------------------------------------------------------------------

/// Durable, append-only storage for deadletter records. Records leave a
/// sink only through operator action, never through the engine.
#[async_trait]
pub trait DeadletterSink: Send + Sync {
    /// Append one record.
    async fn write(&self, record: &DeadletterRecord) -> Result<()>;

    /// All recorded deaths, oldest first.
    async fn list(&self) -> Result<Vec<DeadletterRecord>>;
}

// ---------------------------------------------------------------------------
// Memory sink
// ---------------------------------------------------------------------------

/// Process-local sink. No persistence; useful for tests and single-shot
/// runs.
#[derive(Default)]
pub struct MemoryDeadletterSink {
    records: Mutex<Vec<DeadletterRecord>>,
}

impl MemoryDeadletterSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadletterSink for MemoryDeadletterSink {
    async fn write(&self, record: &DeadletterRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DeadletterRecord>> {
        Ok(self.records.lock().clone())
    }
}

// ---------------------------------------------------------------------------
// File sink
// ---------------------------------------------------------------------------

/// Blob-style sink: one JSON file per record under a directory. A fresh
/// file per death keeps the store append-only without any index.
pub struct FileDeadletterSink {
    dir: PathBuf,
}

impl FileDeadletterSink {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }
}

#[async_trait]
impl DeadletterSink for FileDeadletterSink {
    async fn write(&self, record: &DeadletterRecord) -> Result<()> {
        let name = format!(
            "{}-{}.json",
            record.request.id.0,
            record.deadlettered_at.timestamp_millis()
        );
        let path = self.dir.join(name);
        let body = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&path, body).await?;
        debug!(path = %path.display(), "deadletter record written");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DeadletterRecord>> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let content = tokio::fs::read_to_string(&path).await?;
                match serde_json::from_str(&content) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "skipping unreadable deadletter file");
                    }
                }
            }
        }
        records.sort_by_key(|r: &DeadletterRecord| r.deadlettered_at);
        Ok(records)
    }
}
