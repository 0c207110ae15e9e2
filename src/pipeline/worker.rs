//! Pull-based stage worker: reserves jobs from a `JobStore` queue and
//! drives them through a `StageHandler`, bounded by a semaphore and a
//! `CancellationToken` checkable without a channel read.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::error::Result;
use crate::job_store::JobStore;
use crate::schemas::job::JobEnvelope;

/// A stage's processing contract. `handle` receives the reserved
/// envelope's payload and returns `Ok(())` on success; any `Err` is
/// reported to the job store's `fail` path (retry or DLQ), except where
/// the handler has already absorbed the failure internally (normalize's
/// per-item errors, enrichment's best-effort steps).
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn handle(&self, envelope: &JobEnvelope, cancel: &CancellationToken) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct QueueWorkerConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for QueueWorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            poll_interval: Duration::from_millis(250),
            heartbeat_interval: Duration::from_secs(60),
        }
    }
}

pub struct StageWorker {
    queue: &'static str,
    worker_id: String,
    config: QueueWorkerConfig,
    store: Arc<dyn JobStore>,
    handler: Arc<dyn StageHandler>,
    cancel: CancellationToken,
}

impl StageWorker {
    pub fn new(
        queue: &'static str,
        config: QueueWorkerConfig,
        store: Arc<dyn JobStore>,
        handler: Arc<dyn StageHandler>,
        cancel: CancellationToken,
    ) -> Self {
        Self { queue, worker_id: format!("{queue}-{}", Uuid::new_v4()), config, store, handler, cancel }
    }

    /// Reservation/dispatch loop. Stops reserving new jobs once `cancel`
    /// fires, then waits for in-flight jobs up to the caller-provided
    /// grace period (enforced by the caller via `PipelineHandles::shutdown`).
    pub async fn run(self) {
        info!(queue = self.queue, concurrency = self.config.concurrency, "starting stage worker");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut in_flight = Vec::new();
        let mut ticker = tokio::time::interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(queue = self.queue, "stage worker received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                        continue;
                    };

                    match self.store.reserve(self.queue, &self.worker_id).await {
                        Ok(Some(envelope)) => {
                            let store = self.store.clone();
                            let handler = self.handler.clone();
                            let cancel = self.cancel.clone();
                            let worker_id = self.worker_id.clone();
                            let queue = self.queue;
                            let heartbeat_interval = self.config.heartbeat_interval;

                            let handle = tokio::spawn(
                                async move {
                                    run_one(store, handler, envelope, worker_id, heartbeat_interval, cancel).await;
                                    drop(permit);
                                }
                                .instrument(tracing::info_span!("stage_job", queue)),
                            );
                            in_flight.push(handle);
                        }
                        Ok(None) => drop(permit),
                        Err(err) => {
                            warn!(queue = self.queue, error = %err, "reserve failed");
                            drop(permit);
                        }
                    }

                    in_flight.retain(|h: &tokio::task::JoinHandle<()>| !h.is_finished());
                }
            }
        }

        for handle in in_flight {
            let _ = handle.await;
        }

        info!(queue = self.queue, "stage worker stopped");
    }
}

#[instrument(skip(store, handler, envelope, cancel), fields(job_id = %envelope.job_id, queue = %envelope.queue))]
async fn run_one(
    store: Arc<dyn JobStore>,
    handler: Arc<dyn StageHandler>,
    envelope: JobEnvelope,
    worker_id: String,
    heartbeat_interval: Duration,
    cancel: CancellationToken,
) {
    let job_id = envelope.job_id.clone();
    let heartbeat_store = store.clone();
    let heartbeat_job_id = job_id.clone();
    let heartbeat_worker_id = worker_id.clone();
    let heartbeat_cancel = cancel.clone();

    let heartbeat_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        loop {
            tokio::select! {
                _ = heartbeat_cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(err) = heartbeat_store.heartbeat(&heartbeat_job_id, &heartbeat_worker_id).await {
                        warn!(job_id = %heartbeat_job_id, error = %err, "heartbeat failed");
                    }
                }
            }
        }
    });

    let result = tokio::select! {
        _ = cancel.cancelled() => {
            debug!(job_id = %job_id, "job cancelled before completion, leaving lease to expire");
            heartbeat_handle.abort();
            return;
        }
        result = handler.handle(&envelope, &cancel) => result,
    };

    heartbeat_handle.abort();

    match result {
        Ok(()) => {
            if let Err(err) = store.complete(&job_id).await {
                error!(job_id = %job_id, error = %err, "failed to mark job complete");
            }
        }
        Err(err) => {
            warn!(job_id = %job_id, error = %err, "job failed");
            if let Err(store_err) = store.fail(&job_id, &err.to_string()).await {
                error!(job_id = %job_id, error = %store_err, "failed to record job failure");
            }
        }
    }
}
