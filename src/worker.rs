//! Crawler worker pool: pull from the scheduler, dispatch, resolve outcomes.
//!
//! A fixed-size pool of workers shares one scheduler, one attenuator, and
//! one deadletter sink. Each worker repeatedly dequeues, dispatches to the
//! matching handler, and settles the entry as ack, requeue-with-backoff, or
//! deadletter. Outcome resolution is idempotent: if the backend already
//! reclaimed and redelivered the message, settling the stale delivery is a
//! no-op and the redelivered copy proceeds on its own.

use crate::attenuator::Attenuator;
use crate::config::Tuning;
use crate::deadletter::{DeadletterRecord, DeadletterSink};
use crate::dispatch::{Dispatcher, HandlerRegistry};
use crate::error::Result;
use crate::model::{Disposition, Request, RequestState};
use crate::queue::{Priority, Queue, QueueEntry};
use crate::sched::PriorityScheduler;
use crate::telemetry::crawl::{record_state_transition, start_crawl_span};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, warn};

/// The worker pool. Cheap to clone; clones share all state.
pub struct CrawlerPool {
    queue: Arc<dyn Queue>,
    scheduler: Arc<PriorityScheduler>,
    dispatcher: Arc<Dispatcher>,
    attenuator: Arc<Attenuator>,
    deadletters: Arc<dyn DeadletterSink>,
    tuning: Tuning,
    shutdown: Arc<Notify>,
    shutting_down: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

impl Clone for CrawlerPool {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            scheduler: Arc::clone(&self.scheduler),
            dispatcher: Arc::clone(&self.dispatcher),
            attenuator: Arc::clone(&self.attenuator),
            deadletters: Arc::clone(&self.deadletters),
            tuning: self.tuning.clone(),
            shutdown: Arc::clone(&self.shutdown),
            shutting_down: Arc::clone(&self.shutting_down),
            active: Arc::clone(&self.active),
        }
    }
}

impl CrawlerPool {
    pub fn new(
        queue: Arc<dyn Queue>,
        registry: Arc<HandlerRegistry>,
        deadletters: Arc<dyn DeadletterSink>,
        tuning: Tuning,
    ) -> Self {
        let scheduler = Arc::new(PriorityScheduler::new(Arc::clone(&queue), tuning.weights));
        let dispatcher = Arc::new(Dispatcher::new(registry));
        let attenuator = Arc::new(Attenuator::new(tuning.attenuation_ttl()));
        Self {
            queue,
            scheduler,
            dispatcher,
            attenuator,
            deadletters,
            tuning,
            shutdown: Arc::new(Notify::new()),
            shutting_down: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Signal all workers to stop after their current request.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        self.shutdown.notify_waiters();
    }

    /// Workers currently executing a handler.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Enqueue a request through the attenuator. Returns false if a live
    /// fingerprint suppressed the enqueue.
    pub async fn enqueue(&self, request: Request, priority: Priority) -> Result<bool> {
        if self.attenuator.should_suppress(&request.fingerprint()) {
            return Ok(false);
        }
        self.queue.push(&request, priority, Duration::ZERO).await?;
        info!(
            request_id = %request.id,
            request_type = %request.request_type,
            spec = %request.spec,
            priority = %priority,
            "request enqueued"
        );
        Ok(true)
    }

    /// Run the pool until shutdown.
    pub async fn run(&self) -> Result<()> {
        let count = self.tuning.worker_count;
        info!(workers = count, "crawler pool started");

        let mut workers = JoinSet::new();
        for worker_id in 0..count {
            let pool = self.clone();
            workers.spawn(async move { pool.worker_loop(worker_id).await });
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("worker task panicked: {e}");
            }
        }
        info!("crawler pool stopped");
        Ok(())
    }

    /// One worker: dequeue, dispatch, resolve, repeat.
    async fn worker_loop(&self, worker_id: usize) {
        let mut idle_backoff = Duration::from_millis(self.tuning.idle_backoff_min_ms);
        let idle_max = Duration::from_millis(self.tuning.idle_backoff_max_ms);

        while !self.shutting_down.load(Ordering::Relaxed) {
            let popped = tokio::select! {
                _ = self.shutdown.notified() => continue,
                popped = self.scheduler.next() => popped,
            };

            match popped {
                Ok(Some(entry)) => {
                    idle_backoff = Duration::from_millis(self.tuning.idle_backoff_min_ms);
                    if let Err(e) = self.process_entry(worker_id, entry).await {
                        error!(worker_id, "process error: {e}");
                    }
                }
                Ok(None) => {
                    // Every channel is empty. Bounded backoff; a push on the
                    // memory backend wakes us sooner.
                    self.scheduler.wait_for_work(idle_backoff).await;
                    idle_backoff = (idle_backoff * 2).min(idle_max);
                }
                Err(e) => {
                    // Backend trouble. Back off the pop itself; no request
                    // was dequeued, so nothing needs resolving.
                    warn!(worker_id, "queue pop failed, backing off: {e}");
                    tokio::time::sleep(idle_backoff).await;
                    idle_backoff = (idle_backoff * 2).min(idle_max);
                }
            }
        }
        debug!(worker_id, "worker stopped");
    }

    /// Dispatch one delivered entry and settle it.
    async fn process_entry(&self, worker_id: usize, entry: QueueEntry) -> Result<()> {
        let span = start_crawl_span(&entry.request.request_type, &entry.request.id.0);

        async {
            let mut request = entry.request.clone();
            record_state_transition(&span, "queued", "processing");
            if let Err((from, to)) = request.transition(RequestState::Processing) {
                // Delivered in a shape we cannot run (operator-edited or
                // corrupt payload). Poison; bury rather than loop forever.
                warn!(request_id = %request.id, %from, %to, "undeliverable state, deadlettering");
                return self
                    .bury(
                        request.clone(),
                        &entry,
                        "invalid_transition",
                        format!("cannot start processing from state {from}"),
                    )
                    .await;
            }
            request.record(Disposition::Dispatched, None);

            // Renewal keeps the backend lock alive for handlers that outlive
            // it. Canceled before settling so we never renew a message that
            // is already gone.
            let renewal = self.spawn_renewal(&entry);

            self.active.fetch_add(1, Ordering::Relaxed);
            let started = Instant::now();
            let outcome = self.dispatcher.dispatch(request).await;
            let elapsed = started.elapsed();
            self.active.fetch_sub(1, Ordering::Relaxed);

            renewal.abort();

            self.resolve(worker_id, entry, outcome, elapsed, &span).await
        }
        .instrument(span.clone())
        .await
    }

    fn spawn_renewal(&self, entry: &QueueEntry) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let entry = entry.clone();
        let every = self.tuning.lock_renewal();
        let extension = self.tuning.lock_duration();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                debug!(message_id = entry.delivery.message_id, "renewing lock");
                if let Err(e) = queue.renew(&entry, extension).await {
                    warn!(
                        message_id = entry.delivery.message_id,
                        "lock renewal failed: {e}"
                    );
                }
            }
        })
    }

    /// Route a handler outcome to ack, requeue, or deadletter.
    async fn resolve(
        &self,
        worker_id: usize,
        entry: QueueEntry,
        outcome: Result<Request>,
        elapsed: Duration,
        span: &tracing::Span,
    ) -> Result<()> {
        let stage = entry.request.request_type.clone();
        match outcome {
            Ok(returned) if returned.is_dead() => {
                // Handler marked the request dead: permanent by decree.
                record_state_transition(span, "processing", "dead");
                let reason = returned
                    .history
                    .last()
                    .and_then(|h| h.message.clone())
                    .unwrap_or_else(|| "marked dead by handler".to_string());
                self.bury(returned, &entry, "permanent", reason).await
            }
            Ok(mut returned) => {
                record_state_transition(span, "processing", "complete");
                let hop = returned.request_type != entry.request.request_type;
                if let Err((from, to)) = returned.transition(RequestState::Complete) {
                    // Handler returned a state that cannot complete. Poison.
                    warn!(request_id = %returned.id, %from, %to, "handler returned bad state, deadlettering");
                    return self
                        .bury(
                            returned,
                            &entry,
                            "invalid_transition",
                            format!("cannot complete from state {from}"),
                        )
                        .await;
                }
                returned.record(Disposition::Completed, None);

                // A type change is the handler handing off to the next
                // stage: enqueue the continuation before settling, so a
                // crash in between redelivers rather than drops it.
                if hop {
                    let mut continuation = returned.clone();
                    continuation.id = crate::model::RequestId::new();
                    continuation.state = RequestState::Queued;
                    self.enqueue(continuation, entry.priority).await?;
                }
                self.queue.ack(&entry).await?;

                metrics::requests_processed().add(
                    1,
                    &[
                        KeyValue::new("stage", stage.clone()),
                        KeyValue::new("outcome", "completed"),
                    ],
                );
                metrics::request_duration_ms().record(
                    elapsed.as_millis() as f64,
                    &[KeyValue::new("stage", stage)],
                );
                info!(
                    worker_id,
                    request_id = %returned.id,
                    duration_ms = elapsed.as_millis() as u64,
                    next_stage = hop,
                    "request completed"
                );
                Ok(())
            }
            Err(e) if e.is_permanent() => {
                record_state_transition(span, "processing", "dead");
                let kind = e.kind();
                self.bury(entry.request.clone(), &entry, kind, e.to_string())
                    .await
            }
            Err(e) => {
                // Transient by classification, and also the default for
                // anything unexpected: retrying is recoverable, burying is
                // not.
                let deliveries = entry.delivery.delivery_count;
                if deliveries > self.tuning.max_delivery_count {
                    record_state_transition(span, "processing", "dead");
                    self.bury(
                        entry.request.clone(),
                        &entry,
                        "retries_exhausted",
                        format!("{e} (after {deliveries} deliveries)"),
                    )
                    .await
                } else {
                    record_state_transition(span, "processing", "requeue");
                    let delay = self.tuning.requeue_delay(deliveries);
                    self.queue.requeue(&entry, delay).await?;
                    metrics::requests_processed().add(
                        1,
                        &[
                            KeyValue::new("stage", stage),
                            KeyValue::new("outcome", "requeued"),
                        ],
                    );
                    warn!(
                        worker_id,
                        request_id = %entry.request.id,
                        delivery_count = deliveries,
                        delay_secs = delay.as_secs(),
                        "transient failure, requeued: {e}"
                    );
                    Ok(())
                }
            }
        }
    }

    /// Write the deadletter record, then settle the queue entry. Sink
    /// first: if the write fails the entry stays live and redelivers, so
    /// no terminal failure is silently dropped.
    async fn bury(
        &self,
        mut request: Request,
        entry: &QueueEntry,
        error_kind: &str,
        message: String,
    ) -> Result<()> {
        if !request.is_dead() {
            request.mark_dead(message.clone());
        }
        let record = DeadletterRecord::new(
            request,
            error_kind,
            message.clone(),
            entry.delivery.delivery_count,
        );
        self.deadletters.write(&record).await?;
        self.queue.deadletter(entry).await?;

        metrics::deadletters().add(1, &[KeyValue::new("kind", error_kind.to_string())]);
        metrics::requests_processed().add(
            1,
            &[
                KeyValue::new("stage", entry.request.request_type.clone()),
                KeyValue::new("outcome", "deadlettered"),
            ],
        );
        warn!(
            request_id = %entry.request.id,
            error_kind,
            delivery_count = entry.delivery.delivery_count,
            "request deadlettered: {message}"
        );
        Ok(())
    }
}
