//! Typed configuration from environment variables plus an optional TOML
//! tuning file.
//!
//! Operational settings (backend selection, connection strings, telemetry)
//! come from the environment and fail fast if required vars are missing.
//! Functional tuning (scheduler weights, TTLs, delivery ceilings, provider
//! options) carries defaults and can be overridden from a TOML file; the
//! scheduler and attenuator honor these values exactly as configured.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use crate::error::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug)]
pub struct CrawlerConfig {
    /// Which queue backend holds the four priority channels.
    pub queue_backend: QueueBackendKind,

    /// Which sink receives deadletter records. Selected independently of
    /// the work queue.
    pub deadletter_sink: DeadletterSinkKind,

    /// Postgres connection string. Required when either the queue backend
    /// or the deadletter sink is postgres-backed.
    pub database_url: Option<SecretString>,

    /// Directory for the file deadletter sink.
    pub deadletter_dir: Option<String>,

    pub otel_endpoint: Option<String>,
    pub log_level: String,

    /// Functional tuning. Defaults match the production crawler; override
    /// via TOML file.
    pub tuning: Tuning,
}

impl CrawlerConfig {
    /// Load configuration from environment variables, with default tuning.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        let queue_backend: QueueBackendKind = std::env::var("CRAWLQ_QUEUE_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .parse()?;
        let deadletter_sink: DeadletterSinkKind = std::env::var("CRAWLQ_DEADLETTER_SINK")
            .unwrap_or_else(|_| "memory".to_string())
            .parse()?;

        let database_url = match queue_backend {
            QueueBackendKind::Postgres => Some(SecretString::from(required_var("DATABASE_URL")?)),
            QueueBackendKind::Memory => std::env::var("DATABASE_URL").ok().map(SecretString::from),
        };

        Ok(Self {
            queue_backend,
            deadletter_sink,
            database_url,
            deadletter_dir: std::env::var("CRAWLQ_DEADLETTER_DIR").ok(),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            tuning: Tuning::default(),
        })
    }

    /// Replace the default tuning with values from a TOML file. Fields
    /// absent from the file keep their defaults.
    pub fn with_tuning_file(mut self, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read tuning file {}: {e}", path.display())))?;
        self.tuning = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad tuning file {}: {e}", path.display())))?;
        Ok(self)
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

// ---------------------------------------------------------------------------
// Backend selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackendKind {
    Memory,
    Postgres,
}

impl std::str::FromStr for QueueBackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            other => Err(Error::Config(format!("unknown queue backend '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadletterSinkKind {
    Memory,
    File,
}

impl std::str::FromStr for DeadletterSinkKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            other => Err(Error::Config(format!("unknown deadletter sink '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tuning
// ---------------------------------------------------------------------------

/// Functional parameters of the orchestration core. Every value here is
/// honored exactly; nothing is advisory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Weighted-round-robin weights per priority channel.
    pub weights: Weights,

    /// How long a fingerprint suppresses duplicate enqueues.
    pub attenuation_ttl_ms: u64,

    /// Concurrent workers in the pool.
    pub worker_count: usize,

    /// Deliveries after which a transiently-failing request is deadlettered.
    pub max_delivery_count: u32,

    /// Server-held lock window for a dequeued message.
    pub lock_duration_secs: u64,

    /// How often the renewal loop extends the lock. Slightly under the
    /// lock duration so renewal lands before expiry.
    pub lock_renewal_secs: u64,

    /// Visibility window for storage-style redelivery.
    pub visibility_timeout_secs: u64,

    /// Idle worker backoff bounds.
    pub idle_backoff_min_ms: u64,
    pub idle_backoff_max_ms: u64,

    /// Requeue backoff ladder: base doubles per delivery, capped.
    pub requeue_delay_base_secs: u64,
    pub requeue_delay_cap_secs: u64,

    pub scancode: ScanCodeOptions,
    pub npm: NpmOptions,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            weights: Weights::default(),
            attenuation_ttl_ms: 3000,
            worker_count: 2,
            max_delivery_count: 100,
            lock_duration_secs: 5 * 60,
            lock_renewal_secs: 4 * 60 + 45,
            visibility_timeout_secs: 3 * 60 * 60,
            idle_backoff_min_ms: 250,
            idle_backoff_max_ms: 5000,
            requeue_delay_base_secs: 30,
            requeue_delay_cap_secs: 900,
            scancode: ScanCodeOptions::default(),
            npm: NpmOptions::default(),
        }
    }
}

impl Tuning {
    pub fn attenuation_ttl(&self) -> Duration {
        Duration::from_millis(self.attenuation_ttl_ms)
    }

    pub fn lock_duration(&self) -> Duration {
        Duration::from_secs(self.lock_duration_secs)
    }

    pub fn lock_renewal(&self) -> Duration {
        Duration::from_secs(self.lock_renewal_secs)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    /// Backoff delay before the nth redelivery (1-based): doubles from the
    /// base, capped.
    pub fn requeue_delay(&self, delivery_count: u32) -> Duration {
        let exp = delivery_count.saturating_sub(1).min(31);
        let secs = self
            .requeue_delay_base_secs
            .saturating_mul(1u64 << exp)
            .min(self.requeue_delay_cap_secs);
        Duration::from_secs(secs)
    }
}

/// Per-priority integer weights for the scheduler's rotation window.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub immediate: u32,
    pub soon: u32,
    pub normal: u32,
    pub later: u32,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            immediate: 3,
            soon: 2,
            normal: 3,
            later: 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Provider options
// ---------------------------------------------------------------------------

/// ScanCode invocation options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanCodeOptions {
    /// Path or name of the scancode executable.
    pub command: String,

    /// Scan feature flags passed through unchanged.
    pub options: Vec<String>,

    /// Per-file timeout handed to the tool (seconds).
    pub timeout_secs: u64,

    /// Worker processes for the tool itself.
    pub processes: u32,

    /// Output format flag.
    pub format: String,

    /// Harvests above these bounds are rejected rather than scanned.
    pub max_count: u64,
    pub max_size_kb: u64,
}

impl Default for ScanCodeOptions {
    fn default() -> Self {
        Self {
            command: "scancode".to_string(),
            options: vec![
                "--copyright".to_string(),
                "--license".to_string(),
                "--info".to_string(),
                "--package".to_string(),
                "--license-diag".to_string(),
                "--only-findings".to_string(),
                "--strip-root".to_string(),
            ],
            timeout_secs: 1000,
            processes: 2,
            format: "--json-pp".to_string(),
            max_count: 1_000_000,
            max_size_kb: 50_000 * 1024,
        }
    }
}

/// npm registry options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NpmOptions {
    pub registry_base: String,

    /// Request type a harvested package is handed off to.
    pub process_type: String,
}

impl Default for NpmOptions {
    fn default() -> Self {
        Self {
            registry_base: "https://registry.npmjs.org".to_string(),
            process_type: "process:scancode".to_string(),
        }
    }
}
