//! Worker runtime: one pull-based worker per queue (fetch, normalize,
//! media, enrichment), each bounded by its own concurrency. The queue
//! topology is durable (Redis-backed) rather than in-process bounded
//! channels, so workers pull jobs instead of receiving them pushed.

pub mod enrichment_stage;
pub mod fetch_stage;
pub mod media_stage;
pub mod normalize_stage;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::job_store::JobStore;
use worker::{QueueWorkerConfig, StageHandler, StageWorker};

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub fetch_concurrency: usize,
    pub normalize_concurrency: usize,
    pub media_concurrency: usize,
    pub enrichment_concurrency: usize,
    pub poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: 5,
            normalize_concurrency: 5,
            media_concurrency: 2,
            enrichment_concurrency: 3,
            poll_interval: Duration::from_millis(250),
        }
    }
}

pub struct PipelineHandles {
    workers: Vec<tokio::task::JoinHandle<()>>,
    cancel: CancellationToken,
}

impl PipelineHandles {
    /// Stops reserving new jobs, waits up to `grace_period` for in-flight
    /// jobs, then returns regardless of whether they finished.
    pub async fn shutdown(self, grace_period: Duration) {
        info!("initiating pipeline shutdown");
        self.cancel.cancel();
        let _ = tokio::time::timeout(grace_period, futures::future::join_all(self.workers)).await;
        info!("pipeline shutdown complete");
    }
}

pub fn spawn_workers(
    store: Arc<dyn JobStore>,
    config: PipelineConfig,
    fetch: Arc<dyn StageHandler>,
    normalize: Arc<dyn StageHandler>,
    media: Arc<dyn StageHandler>,
    enrichment: Arc<dyn StageHandler>,
) -> PipelineHandles {
    let cancel = CancellationToken::new();
    let mut workers = Vec::new();

    let stages: [(&'static str, usize, Arc<dyn StageHandler>); 4] = [
        ("fetch", config.fetch_concurrency, fetch),
        ("normalize", config.normalize_concurrency, normalize),
        ("media", config.media_concurrency, media),
        ("enrichment", config.enrichment_concurrency, enrichment),
    ];

    for (queue, concurrency, handler) in stages {
        let worker_config = QueueWorkerConfig { concurrency, poll_interval: config.poll_interval, ..Default::default() };
        let worker = StageWorker::new(queue, worker_config, store.clone(), handler, cancel.clone());
        workers.push(tokio::spawn(worker.run()));
    }

    PipelineHandles { workers, cancel }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_concurrency_matches_resource_model() {
        let config = PipelineConfig::default();
        assert_eq!(config.fetch_concurrency, 5);
        assert_eq!(config.normalize_concurrency, 5);
        assert_eq!(config.media_concurrency, 2);
        assert_eq!(config.enrichment_concurrency, 3);
    }
}
