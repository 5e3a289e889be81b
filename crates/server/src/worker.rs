//! Background processing of stored webhook events.
//!
//! `concurrency` workers share one queue fed by ingestion. A poller re-feeds
//! events whose backoff elapsed (or that never fit in the queue) and returns
//! stale processing claims to pending.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use vendabot_core::config::WorkerConfig;
use vendabot_core::domain::webhook_event::{ProcessingStatus, WebhookEventId};
use vendabot_db::repositories::{RepositoryError, WebhookEventRepository};

use crate::processor::EventProcessor;

const POLL_BATCH: u32 = 100;

pub struct WorkerPool {
    processor: Arc<EventProcessor>,
    events: Arc<dyn WebhookEventRepository>,
    sender: mpsc::Sender<WebhookEventId>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(
        processor: Arc<EventProcessor>,
        events: Arc<dyn WebhookEventRepository>,
        sender: mpsc::Sender<WebhookEventId>,
        config: WorkerConfig,
    ) -> Self {
        Self { processor, events, sender, config }
    }

    /// Starts the workers and the poller; all stop once `shutdown` flips to true.
    pub fn spawn(
        self,
        receiver: mpsc::Receiver<WebhookEventId>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let receiver = Arc::new(Mutex::new(receiver));
        let mut handles = Vec::new();

        for index in 0..self.config.concurrency.max(1) {
            let worker_id = format!("worker-{index}-{}", uuid::Uuid::new_v4().simple());
            let processor = self.processor.clone();
            let receiver = receiver.clone();
            let mut shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let next = tokio::select! {
                        next = async { receiver.lock().await.recv().await } => next,
                        _ = shutdown.changed() => None,
                    };
                    let Some(id) = next else { break };
                    if let Err(error) = processor.process(&id, &worker_id).await {
                        // Left in its current state; the poller retries it.
                        error!(
                            event_name = "worker.event.store_failed",
                            event_id = %id.0,
                            error = %error,
                            "could not record event outcome"
                        );
                    }
                }
                info!(event_name = "worker.pool.worker_stopped", worker_id = %worker_id, "worker stopped");
            }));
        }

        info!(event_name = "worker.pool.started", concurrency = self.config.concurrency.max(1), "worker pool started");
        let poller = Arc::new(self);
        let mut shutdown = shutdown;
        handles.push(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(poller.config.poll_interval_secs.max(1)));
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.changed() => break,
                }
                if let Err(error) = poller.poll_once(Utc::now()).await {
                    warn!(event_name = "worker.poller.failed", error = %error, "event poll failed");
                }
            }
        }));

        handles
    }

    /// Recovers stale claims, then enqueues due pending events. Returns how
    /// many ids were queued.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<u32, RepositoryError> {
        for stored in self.events.list_by_status(ProcessingStatus::Processing, POLL_BATCH).await? {
            for recovered in self.processor.engine().recover_stale(vec![stored.clone()], now) {
                if self.events.compare_and_swap(&stored, &recovered.event).await? {
                    info!(
                        event_name = "worker.event.claim_recovered",
                        event_id = %stored.id.0,
                        "stale claim returned to pending"
                    );
                }
            }
        }

        let mut queued = 0;
        for event in self.events.list_due(now, POLL_BATCH).await? {
            match self.sender.try_send(event.id) {
                Ok(()) => queued += 1,
                Err(_) => break,
            }
        }
        Ok(queued)
    }
}
