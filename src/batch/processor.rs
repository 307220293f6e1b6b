//! Bounded-concurrency batch processor with streaming progress events.
//!
//! Workers pull batch ids from a FIFO queue and classify each batch's
//! tickets sequentially in submission order, so per-ticket events arrive in
//! order. Subscribers receive events over bounded channels; a slow consumer
//! loses events rather than stalling classification.
//!
//! Only pending batches can be cancelled. Once a worker has dequeued a
//! batch there is no mid-batch abort; the batch runs to completion.
//! Ticket payloads exist only in the in-memory registry, so a failed batch
//! cannot be retried here — the transport layer owns re-submission.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batch::types::{
    BatchEvent, BatchJob, BatchStatus, BatchStatusReport, BatchSummary, ConfidenceComponents,
};
use crate::error::{Error, Result};
use crate::pipeline::{ClassificationPipeline, ClassifyRequest};

/// Capacity of each subscriber's event channel.
const SUBSCRIBER_BUFFER: usize = 256;
/// How long a worker waits on the queue before re-checking the run flag.
const QUEUE_POLL: Duration = Duration::from_secs(5);
/// Callback delivery timeout.
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);
/// Title snippet length carried in events.
const TITLE_SNIPPET: usize = 60;

type JobMap = Arc<Mutex<HashMap<String, BatchJob>>>;
type SubscriberMap = Arc<Mutex<HashMap<String, Vec<mpsc::Sender<BatchEvent>>>>>;

/// Batch processor for bulk ticket classification.
pub struct BatchProcessor {
    pipeline: Arc<ClassificationPipeline>,
    jobs: JobMap,
    queue_tx: mpsc::UnboundedSender<String>,
    queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    subscribers: SubscriberMap,
    max_batch_size: usize,
    worker_count: usize,
    workers_running: Arc<AtomicBool>,
    http: reqwest::Client,
}

impl BatchProcessor {
    pub fn new(pipeline: Arc<ClassificationPipeline>) -> Self {
        let config = pipeline.config();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        Self {
            max_batch_size: config.batch_max_size,
            worker_count: config.batch_worker_count,
            pipeline,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            queue_tx,
            queue_rx: Arc::new(Mutex::new(queue_rx)),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            workers_running: Arc::new(AtomicBool::new(false)),
            http: reqwest::Client::builder()
                .timeout(CALLBACK_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Start the worker pool. Idempotent; call once at startup.
    pub fn start(&self) {
        if self.workers_running.swap(true, Ordering::SeqCst) {
            return;
        }

        for i in 0..self.worker_count {
            let worker = Worker {
                worker_id: format!("worker-{}", i),
                pipeline: Arc::clone(&self.pipeline),
                jobs: Arc::clone(&self.jobs),
                queue_rx: Arc::clone(&self.queue_rx),
                subscribers: Arc::clone(&self.subscribers),
                running: Arc::clone(&self.workers_running),
                http: self.http.clone(),
            };
            tokio::spawn(async move { worker.run().await });
        }

        info!("Batch workers started: {}", self.worker_count);
    }

    /// Signal workers to stop after their current batch.
    pub fn stop(&self) {
        self.workers_running.store(false, Ordering::SeqCst);
        info!("Batch workers stopping");
    }

    /// Submit a batch of 1 to `batch_max_size` tickets.
    ///
    /// Returns the batch id (caller-provided or generated). The job is
    /// enqueued and this returns immediately; processing happens on the
    /// worker pool.
    pub async fn submit(
        &self,
        tickets: Vec<ClassifyRequest>,
        batch_id: Option<String>,
        callback_url: Option<String>,
    ) -> Result<String> {
        if tickets.is_empty() {
            return Err(Error::batch("batch must contain at least one ticket"));
        }
        if tickets.len() > self.max_batch_size {
            return Err(Error::batch(format!(
                "batch of {} tickets exceeds the maximum of {}",
                tickets.len(),
                self.max_batch_size
            )));
        }

        let batch_id =
            batch_id.unwrap_or_else(|| format!("batch_{}", &Uuid::new_v4().simple().to_string()[..12]));

        {
            let mut jobs = self.jobs.lock().await;
            if jobs.contains_key(&batch_id) {
                return Err(Error::batch(format!("batch id already exists: {}", batch_id)));
            }
            jobs.insert(
                batch_id.clone(),
                BatchJob::new(batch_id.clone(), tickets, callback_url),
            );
        }

        self.queue_tx
            .send(batch_id.clone())
            .map_err(|_| Error::batch("batch queue is closed"))?;

        info!("Batch submitted: {}", batch_id);
        Ok(batch_id)
    }

    /// Status snapshot for a batch, if known.
    pub async fn status(&self, batch_id: &str) -> Option<BatchStatusReport> {
        self.jobs
            .lock()
            .await
            .get(batch_id)
            .map(BatchStatusReport::from_job)
    }

    /// Result summary of a completed batch.
    pub async fn result(&self, batch_id: &str) -> Option<BatchSummary> {
        let jobs = self.jobs.lock().await;
        let job = jobs.get(batch_id)?;
        if job.status != BatchStatus::Completed {
            return None;
        }
        job.result.clone()
    }

    /// List known batches, newest first, optionally filtered by status.
    pub async fn list(&self, status: Option<BatchStatus>, limit: usize) -> Vec<BatchStatusReport> {
        let jobs = self.jobs.lock().await;
        let mut reports: Vec<BatchStatusReport> = jobs
            .values()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .map(BatchStatusReport::from_job)
            .collect();
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        reports.truncate(limit);
        reports
    }

    /// Cancel a batch. Only pending batches can be cancelled; a batch that
    /// a worker already dequeued runs to completion.
    pub async fn cancel(&self, batch_id: &str) -> bool {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(batch_id) {
            Some(job) if job.status == BatchStatus::Pending => {
                job.status = BatchStatus::Cancelled;
                job.completed_at = Some(chrono::Utc::now());
                info!("Batch cancelled: {}", batch_id);
                true
            }
            _ => false,
        }
    }

    /// Subscribe to a batch's event stream.
    ///
    /// Subscribing before submission is allowed (and is the race-free way
    /// to observe the `batch_started` event). Dropping the receiver
    /// unsubscribes.
    pub async fn subscribe(&self, batch_id: &str) -> mpsc::Receiver<BatchEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers
            .lock()
            .await
            .entry(batch_id.to_string())
            .or_default()
            .push(tx);
        rx
    }
}

/// One worker of the pool.
struct Worker {
    worker_id: String,
    pipeline: Arc<ClassificationPipeline>,
    jobs: JobMap,
    queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    subscribers: SubscriberMap,
    running: Arc<AtomicBool>,
    http: reqwest::Client,
}

impl Worker {
    async fn run(&self) {
        info!("Worker started: {}", self.worker_id);

        while self.running.load(Ordering::SeqCst) {
            // Hold the receiver lock only while polling; a timeout lets the
            // worker re-check the run flag.
            let next = {
                let mut rx = self.queue_rx.lock().await;
                tokio::time::timeout(QUEUE_POLL, rx.recv()).await
            };

            let batch_id = match next {
                Ok(Some(id)) => id,
                Ok(None) => break,
                Err(_) => continue,
            };

            let skip = {
                let jobs = self.jobs.lock().await;
                match jobs.get(&batch_id) {
                    Some(job) => job.status == BatchStatus::Cancelled,
                    None => true,
                }
            };
            if skip {
                debug!("Skipping batch {}", batch_id);
                continue;
            }

            if let Err(e) = self.process_batch(&batch_id).await {
                warn!("Batch {} failed: {}", batch_id, e);
                let error = e.to_string();
                {
                    let mut jobs = self.jobs.lock().await;
                    if let Some(job) = jobs.get_mut(&batch_id) {
                        job.status = BatchStatus::Failed;
                        job.error = Some(error.clone());
                        job.completed_at = Some(chrono::Utc::now());
                    }
                }
                self.emit(
                    &batch_id,
                    BatchEvent::BatchFailed {
                        batch_id: batch_id.clone(),
                        error,
                        timestamp: chrono::Utc::now(),
                    },
                )
                .await;
            }
        }

        info!("Worker stopped: {}", self.worker_id);
    }

    async fn process_batch(&self, batch_id: &str) -> Result<()> {
        let tickets = {
            let mut jobs = self.jobs.lock().await;
            let job = jobs
                .get_mut(batch_id)
                .ok_or_else(|| Error::batch(format!("unknown batch: {}", batch_id)))?;
            job.status = BatchStatus::Processing;
            job.started_at = Some(chrono::Utc::now());
            job.tickets.clone()
        };

        let total = tickets.len();
        let started = Instant::now();
        info!(
            "Processing batch {} ({} tickets) on {}",
            batch_id, total, self.worker_id
        );

        self.emit(
            batch_id,
            BatchEvent::BatchStarted {
                batch_id: batch_id.to_string(),
                total_tickets: total,
                worker_id: self.worker_id.clone(),
                timestamp: chrono::Utc::now(),
            },
        )
        .await;

        let mut auto_resolved = 0usize;
        let mut requires_hitl = 0usize;
        let mut failed = 0usize;

        // Tickets run sequentially in submission order, so per-ticket
        // events are naturally ordered.
        for (i, ticket) in tickets.into_iter().enumerate() {
            let index = i + 1;
            let ticket_started = Instant::now();
            let title = snippet(&ticket.title, TITLE_SNIPPET).to_string();

            self.emit(
                batch_id,
                BatchEvent::TicketProcessing {
                    batch_id: batch_id.to_string(),
                    ticket_index: index,
                    total,
                    title: title.clone(),
                    timestamp: chrono::Utc::now(),
                },
            )
            .await;

            let progress = ((index * 100) / total) as u8;

            match self.pipeline.classify(ticket).await {
                Ok(outcome) => {
                    if outcome.routing.auto_resolved {
                        auto_resolved += 1;
                    } else {
                        requires_hitl += 1;
                    }

                    self.emit(
                        batch_id,
                        BatchEvent::TicketClassified {
                            batch_id: batch_id.to_string(),
                            ticket_index: index,
                            total,
                            progress,
                            title,
                            classification: outcome.classification.clone(),
                            confidence: ConfidenceComponents {
                                graph: outcome.confidence.graph_confidence,
                                vector: outcome.confidence.vector_confidence,
                                llm: outcome.confidence.llm_confidence,
                                final_score: outcome.confidence.calibrated_score,
                            },
                            routing: outcome.routing.clone(),
                            processing_ms: ticket_started.elapsed().as_millis() as u64,
                            auto_resolved_so_far: auto_resolved,
                            hitl_so_far: requires_hitl,
                            timestamp: chrono::Utc::now(),
                        },
                    )
                    .await;
                }
                Err(e) => {
                    // A fatal error on one ticket never aborts the batch.
                    warn!("Ticket {} of batch {} failed: {}", index, batch_id, e);
                    failed += 1;
                    self.emit(
                        batch_id,
                        BatchEvent::TicketFailed {
                            batch_id: batch_id.to_string(),
                            ticket_index: index,
                            total,
                            error: e.to_string(),
                            timestamp: chrono::Utc::now(),
                        },
                    )
                    .await;
                }
            }

            let mut jobs = self.jobs.lock().await;
            if let Some(job) = jobs.get_mut(batch_id) {
                job.progress = progress;
            }
        }

        let processing_time_ms = started.elapsed().as_millis() as u64;
        let summary = BatchSummary {
            batch_id: batch_id.to_string(),
            total_tickets: total,
            successful: total - failed,
            failed,
            auto_resolved,
            requires_hitl,
            processing_time_ms,
        };

        let callback_url = {
            let mut jobs = self.jobs.lock().await;
            let job = jobs
                .get_mut(batch_id)
                .ok_or_else(|| Error::batch(format!("unknown batch: {}", batch_id)))?;
            job.status = BatchStatus::Completed;
            job.completed_at = Some(chrono::Utc::now());
            job.progress = 100;
            job.result = Some(summary.clone());
            job.callback_url.clone()
        };

        info!(
            "Batch {} completed: {} auto-resolved, {} HITL, {} failed",
            batch_id, auto_resolved, requires_hitl, failed
        );

        self.emit(
            batch_id,
            BatchEvent::BatchCompleted {
                batch_id: batch_id.to_string(),
                total_tickets: total,
                auto_resolved,
                requires_hitl,
                failed,
                processing_time_ms,
                timestamp: chrono::Utc::now(),
            },
        )
        .await;

        if let Some(url) = callback_url {
            self.deliver_callback(batch_id, &url, &summary).await;
        }

        Ok(())
    }

    /// Fan an event out to the batch's subscribers.
    ///
    /// Full channels drop the event for that subscriber; closed channels are
    /// pruned. Emission never blocks batch progress.
    async fn emit(&self, batch_id: &str, event: BatchEvent) {
        let mut subscribers = self.subscribers.lock().await;
        let Some(senders) = subscribers.get_mut(batch_id) else {
            return;
        };

        senders.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Dropping event for slow subscriber of {}", batch_id);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        if senders.is_empty() {
            subscribers.remove(batch_id);
        }
    }

    /// Fire-and-forget completion callback. Failures are logged only.
    async fn deliver_callback(&self, batch_id: &str, url: &str, summary: &BatchSummary) {
        let payload = serde_json::json!({
            "batch_id": batch_id,
            "status": BatchStatus::Completed.as_str(),
            "result": summary,
        });

        match self.http.post(url).json(&payload).send().await {
            Ok(response) => {
                info!(
                    "Callback sent for batch {}: {} -> {}",
                    batch_id,
                    url,
                    response.status()
                );
            }
            Err(e) => warn!("Callback failed for batch {}: {}", batch_id, e),
        }
    }
}

fn snippet(s: &str, max: usize) -> &str {
    let mut end = s.len().min(max);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
