//! crawler CLI — operator interface to the crawlq engine.

use clap::{Parser, Subcommand};
use crawlq::config::secrets::ExposeSecret;
use crawlq::config::{CrawlerConfig, DeadletterSinkKind, QueueBackendKind};
use crawlq::deadletter::{DeadletterSink, FileDeadletterSink, MemoryDeadletterSink};
use crawlq::dispatch::{HandlerRegistry, Stage};
use crawlq::model::{Request, SourceSpec};
use crawlq::providers::npm::NpmFetch;
use crawlq::providers::scancode::ScanCode;
use crawlq::queue::memory::MemoryQueue;
use crawlq::queue::pg::PgQueue;
use crawlq::queue::{Priority, Queue};
use crawlq::telemetry::{TelemetryConfig, init_telemetry};
use crawlq::worker::CrawlerPool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "crawler", about = "Queue-driven crawl orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the crawler daemon
    Serve {
        /// Worker count override
        #[arg(long)]
        workers: Option<usize>,
        /// TOML tuning file
        #[arg(long)]
        tuning: Option<PathBuf>,
    },
    /// Work queue operations
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Deadletter operations
    Deadletter {
        #[command(subcommand)]
        action: DeadletterAction,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Enqueue a crawl request
    Push {
        /// Request type (stage routing, e.g. "fetch")
        request_type: String,
        /// Artifact family (e.g. "npm")
        artifact_type: String,
        /// Artifact name
        name: String,
        /// Provider instance
        #[arg(long, default_value = "npmjs")]
        provider: String,
        /// Namespace / scope
        #[arg(long)]
        namespace: Option<String>,
        /// Concrete revision (omit to crawl latest)
        #[arg(long)]
        revision: Option<String>,
        /// Priority channel
        #[arg(long, default_value = "normal")]
        priority: String,
    },
    /// Per-priority queue depths
    Stats,
}

#[derive(Subcommand)]
enum DeadletterAction {
    /// List deadletter records
    List,
    /// Show one deadletter record
    Show {
        /// Request ID (full UUID or prefix)
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { workers, tuning } => cmd_serve(workers, tuning).await,
        Command::Queue { action } => {
            let config = CrawlerConfig::from_env()?;
            let queue = build_queue(&config).await?;

            match action {
                QueueAction::Push {
                    request_type,
                    artifact_type,
                    name,
                    provider,
                    namespace,
                    revision,
                    priority,
                } => {
                    if config.queue_backend == QueueBackendKind::Memory {
                        eprintln!(
                            "note: memory backend is process-local; pushed requests vanish when this command exits"
                        );
                    }
                    cmd_queue_push(
                        &queue,
                        request_type,
                        artifact_type,
                        name,
                        provider,
                        namespace,
                        revision,
                        priority,
                    )
                    .await
                }
                QueueAction::Stats => cmd_queue_stats(&queue).await,
            }
        }
        Command::Deadletter { action } => {
            let config = CrawlerConfig::from_env()?;
            let sink = build_sink(&config).await?;

            match action {
                DeadletterAction::List => cmd_deadletter_list(&sink).await,
                DeadletterAction::Show { id } => cmd_deadletter_show(&sink, id).await,
            }
        }
    }
}

async fn build_queue(config: &CrawlerConfig) -> anyhow::Result<Arc<dyn Queue>> {
    match config.queue_backend {
        QueueBackendKind::Memory => Ok(Arc::new(MemoryQueue::new(
            config.tuning.visibility_timeout(),
        ))),
        QueueBackendKind::Postgres => {
            let url = config
                .database_url
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("postgres backend needs DATABASE_URL"))?;
            let queue =
                PgQueue::connect(url.expose_secret(), config.tuning.visibility_timeout()).await?;
            queue.init().await?;
            Ok(Arc::new(queue))
        }
    }
}

async fn build_sink(config: &CrawlerConfig) -> anyhow::Result<Arc<dyn DeadletterSink>> {
    match config.deadletter_sink {
        DeadletterSinkKind::Memory => Ok(Arc::new(MemoryDeadletterSink::new())),
        DeadletterSinkKind::File => {
            let dir = config
                .deadletter_dir
                .clone()
                .unwrap_or_else(|| "deadletters".to_string());
            Ok(Arc::new(FileDeadletterSink::new(dir).await?))
        }
    }
}

async fn cmd_serve(workers: Option<usize>, tuning: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = CrawlerConfig::from_env()?;
    if let Some(path) = tuning {
        config = config.with_tuning_file(&path)?;
    }
    if let Some(count) = workers {
        config.tuning.worker_count = count;
    }

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "crawlq".to_string(),
    })?;

    let queue = build_queue(&config).await?;
    let sink = build_sink(&config).await?;

    let mut registry = HandlerRegistry::new();
    registry.register(
        Stage::Fetch,
        Arc::new(NpmFetch::new(config.tuning.npm.clone())),
    );
    registry.register(
        Stage::Process,
        Arc::new(ScanCode::new(config.tuning.scancode.clone())),
    );

    let pool = CrawlerPool::new(queue, Arc::new(registry), sink, config.tuning.clone());

    let ctrl = pool.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        ctrl.shutdown();
    });

    pool.run().await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_queue_push(
    queue: &Arc<dyn Queue>,
    request_type: String,
    artifact_type: String,
    name: String,
    provider: String,
    namespace: Option<String>,
    revision: Option<String>,
    priority: String,
) -> anyhow::Result<()> {
    let priority: Priority = priority
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid priority: {priority}"))?;

    let mut spec = SourceSpec::new(artifact_type, provider, name);
    if let Some(ns) = namespace {
        spec = spec.namespace(ns);
    }
    if let Some(rev) = revision {
        spec = spec.revision(rev);
    }

    let request = Request::new(request_type, spec);
    queue.push(&request, priority, Duration::ZERO).await?;

    println!("Enqueued: {} {} ({priority})", request.id.0, request.spec);
    Ok(())
}

async fn cmd_queue_stats(queue: &Arc<dyn Queue>) -> anyhow::Result<()> {
    println!("{:<10}  DEPTH", "PRIORITY");
    println!("{}", "-".repeat(20));

    let mut total = 0;
    for priority in Priority::ALL {
        let depth = queue.depth(priority).await?;
        total += depth;
        println!("{:<10}  {depth}", priority.channel());
    }

    println!("\n{total} message(s) waiting");
    Ok(())
}

async fn cmd_deadletter_list(sink: &Arc<dyn DeadletterSink>) -> anyhow::Result<()> {
    let records = sink.list().await?;

    if records.is_empty() {
        println!("No deadletter records.");
        return Ok(());
    }

    // Header
    println!(
        "{:<8}  {:<18}  {:<18}  {:<6}  {:<40}  DIED",
        "ID", "TYPE", "KIND", "DLVRS", "SPEC"
    );
    println!("{}", "-".repeat(110));

    for record in &records {
        let spec = record.request.spec.to_url();
        let spec_display = if spec.len() > 40 { &spec[..40] } else { &spec };
        println!(
            "{:<8}  {:<18}  {:<18}  {:<6}  {:<40}  {}",
            record.request.id,
            record.request.request_type,
            record.error_kind,
            record.delivery_count,
            spec_display,
            record.deadlettered_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} record(s)", records.len());
    Ok(())
}

async fn cmd_deadletter_show(sink: &Arc<dyn DeadletterSink>, id: String) -> anyhow::Result<()> {
    let records = sink.list().await?;
    let matches: Vec<_> = records
        .iter()
        .filter(|r| r.request.id.0.to_string().starts_with(&id))
        .collect();
    let record = match matches.len() {
        0 => anyhow::bail!("no deadletter record matching prefix '{id}'"),
        1 => matches[0],
        n => anyhow::bail!("{n} records match prefix '{id}' — be more specific"),
    };

    println!("ID:          {}", record.request.id.0);
    println!("Type:        {}", record.request.request_type);
    println!("Spec:        {}", record.request.spec);
    println!("State:       {}", record.request.state);
    println!("Error Kind:  {}", record.error_kind);
    println!("Message:     {}", record.message);
    println!("Deliveries:  {}", record.delivery_count);
    println!("Died:        {}", record.deadlettered_at);
    println!("Created:     {}", record.request.created_at);
    if let Some(ref origin) = record.request.content_origin {
        println!("Origin:      {origin}");
    }
    if !record.request.meta.is_empty() {
        println!(
            "Meta:        {}",
            serde_json::to_string_pretty(&record.request.meta)?
        );
    }
    if !record.request.history.is_empty() {
        println!("---");
        for entry in &record.request.history {
            println!(
                "{}  {:<12}  {:<18}  {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.disposition,
                entry.stage,
                entry.message.as_deref().unwrap_or("-")
            );
        }
    }

    Ok(())
}
