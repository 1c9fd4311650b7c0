//! Npm fetch handler. Tests that talk to registry.npmjs.org are ignored
//! by default.

use async_trait::async_trait;
use crawlq::config::{NpmOptions, Tuning};
use crawlq::deadletter::{DeadletterSink, MemoryDeadletterSink};
use crawlq::dispatch::{Handler, HandlerRegistry, Stage};
use crawlq::error::{Error, Result};
use crawlq::model::{Request, SourceSpec};
use crawlq::providers::npm::NpmFetch;
use crawlq::queue::memory::MemoryQueue;
use crawlq::queue::{Priority, Queue};
use crawlq::worker::CrawlerPool;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn fetch_request(spec: SourceSpec) -> Request {
    Request::new("fetch", spec)
}

#[test]
fn claims_npmjs_specs_only() {
    let handler = NpmFetch::new(NpmOptions::default());

    assert!(handler.can_handle(&fetch_request(SourceSpec::new("npm", "npmjs", "lodash"))));
    assert!(!handler.can_handle(&fetch_request(SourceSpec::new("git", "github", "lodash"))));
    assert!(!handler.can_handle(&fetch_request(SourceSpec::new("maven", "mavencentral", "junit"))));
}

#[tokio::test]
#[ignore] // Requires network access to registry.npmjs.org
async fn fetches_and_unpacks_lodash() {
    let handler = NpmFetch::new(NpmOptions::default());
    let request = fetch_request(SourceSpec::new("npm", "npmjs", "lodash").revision("4.17.21"));

    let returned = handler.handle(request).await.unwrap();

    // Handed off to the process stage with the harvest attached.
    assert_eq!(returned.request_type, "process:scancode");
    assert_eq!(returned.content_origin.as_deref(), Some("origin"));
    assert!(returned.meta.get("tarballBytes").is_some());

    let document = returned.document.expect("harvest document");
    assert!(document.release_date.is_some());
    assert_eq!(
        document
            .data
            .pointer("/registryData/manifest/name")
            .and_then(|v| v.as_str()),
        Some("lodash")
    );
    let harvest = document.location.expect("harvest on disk");
    assert!(
        std::path::Path::new(&harvest)
            .join("package")
            .join("package.json")
            .is_file()
    );
    std::fs::remove_dir_all(harvest).ok();
}

#[tokio::test]
#[ignore] // Requires network access to registry.npmjs.org
async fn ambiguous_revision_resolves_to_latest() {
    let handler = NpmFetch::new(NpmOptions::default());
    let request = fetch_request(SourceSpec::new("npm", "npmjs", "left-pad"));
    assert!(request.spec.revision.is_none());

    let returned = handler.handle(request).await.unwrap();

    assert!(returned.spec.revision.is_some());
    if let Some(harvest) = returned.document.and_then(|d| d.location) {
        std::fs::remove_dir_all(harvest).ok();
    }
}

#[tokio::test]
#[ignore] // Requires network access to registry.npmjs.org
async fn missing_package_is_permanent() {
    let handler = NpmFetch::new(NpmOptions::default());
    let name = format!("crawlq-no-such-package-{}", uuid::Uuid::new_v4().simple());
    let request = fetch_request(SourceSpec::new("npm", "npmjs", name));

    let err = handler.handle(request).await.unwrap_err();
    assert!(matches!(err, Error::PermanentProvider(_)));
    assert!(err.to_string().contains("not found"));
}

// ---------------------------------------------------------------------------
// Through the pool
// ---------------------------------------------------------------------------

/// Completes process-stage requests and keeps the last one it saw.
struct Capture {
    seen: Mutex<Option<Request>>,
}

#[async_trait]
impl Handler for Capture {
    fn name(&self) -> &str {
        "capture"
    }

    fn can_handle(&self, request: &Request) -> bool {
        request.request_type == "process:scancode"
    }

    async fn handle(&self, request: Request) -> Result<Request> {
        *self.seen.lock() = Some(request.clone());
        Ok(request)
    }
}

#[tokio::test]
#[ignore] // Requires network access to registry.npmjs.org
async fn enqueued_fetch_flows_to_the_process_stage() {
    let capture = Arc::new(Capture {
        seen: Mutex::new(None),
    });
    let mut registry = HandlerRegistry::new();
    registry.register(
        Stage::Fetch,
        Arc::new(NpmFetch::new(NpmOptions::default())) as Arc<dyn Handler>,
    );
    registry.register(Stage::Process, Arc::clone(&capture) as Arc<dyn Handler>);

    let mut tuning = Tuning::default();
    tuning.worker_count = 2;
    tuning.idle_backoff_min_ms = 5;
    tuning.idle_backoff_max_ms = 20;
    tuning.requeue_delay_base_secs = 0;

    let queue = Arc::new(MemoryQueue::new(Duration::from_secs(600)));
    let sink = Arc::new(MemoryDeadletterSink::new());
    let pool = CrawlerPool::new(
        Arc::clone(&queue) as Arc<dyn Queue>,
        Arc::new(registry),
        Arc::clone(&sink) as Arc<dyn DeadletterSink>,
        tuning,
    );

    let request = fetch_request(SourceSpec::new("npm", "npmjs", "lodash").revision("4.17.21"));
    assert!(pool.enqueue(request, Priority::Normal).await.unwrap());

    let runner = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.run().await.unwrap() })
    };

    // Fetch, hop, process. The window is generous for a cold registry.
    let deadline = Instant::now() + Duration::from_secs(60);
    while capture.seen.lock().is_none() {
        assert!(Instant::now() < deadline, "harvest never reached processing");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    pool.shutdown();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("pool should stop on shutdown")
        .unwrap();

    let processed = capture.seen.lock().take().expect("captured request");
    assert_eq!(processed.request_type, "process:scancode");
    assert_eq!(processed.content_origin.as_deref(), Some("origin"));
    assert!(processed.history.iter().any(|h| h.stage == "fetch"));
    let document = processed.document.expect("harvest document");
    let harvest = document.location.expect("harvest on disk");
    assert!(std::path::Path::new(&harvest).join("package").is_dir());

    assert!(sink.list().await.unwrap().is_empty());
    for priority in Priority::ALL {
        assert_eq!(queue.depth(priority).await.unwrap(), 0);
    }
    std::fs::remove_dir_all(harvest).ok();
}
