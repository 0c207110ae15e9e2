//! Durable job store & queue abstraction.
//!
//! A `JobStore` is the single durable handle every stage worker reserves
//! work from and reports outcomes to. The Redis-backed implementation in
//! `redis_store` is the only backend wired up (queue_store_url), but the
//! trait is kept narrow and swappable the way the message-bus trait in
//! the surrounding codebase separates its wire format from its callers.

pub mod redis_store;
pub mod scheduler;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IngestionError;
use crate::schemas::job::{Job, JobEnvelope, QueueCounts};

/// Backoff policy applied to a job's retries.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { base_delay_ms: 1_000, max_delay_ms: 5 * 60_000 }
    }
}

impl BackoffPolicy {
    /// Exponential backoff with a cap, `attempt` is 1-indexed.
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let exp = self.base_delay_ms.saturating_mul(1u64 << attempt.min(20));
        exp.min(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub job_id: Option<String>,
    pub priority: u8,
    pub delay_ms: u64,
    pub attempts_max: u32,
    pub backoff: Option<BackoffPolicy>,
}

impl EnqueueOptions {
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn with_attempts_max(mut self, attempts_max: u32) -> Self {
        self.attempts_max = attempts_max;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub original_queue: String,
    pub original_job_id: String,
    pub payload: Job,
    pub failure_reason: String,
    pub failed_at: chrono::DateTime<chrono::Utc>,
    pub attempts: u32,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn enqueue(&self, queue: &str, payload: Job, opts: EnqueueOptions) -> Result<String, IngestionError>;

    /// Atomically moves a job from WAITING to ACTIVE with a visibility
    /// lease. Returns `None` when no job is ready.
    async fn reserve(&self, queue: &str, worker_id: &str) -> Result<Option<JobEnvelope>, IngestionError>;

    async fn complete(&self, job_id: &str) -> Result<(), IngestionError>;

    /// Evaluates `attempt < attempts_max`: re-queues with the next backoff
    /// delay, or writes a `DeadLetter` record and marks the job FAILED.
    async fn fail(&self, job_id: &str, reason: &str) -> Result<(), IngestionError>;

    /// Renews the visibility lease for a job still being worked.
    async fn heartbeat(&self, job_id: &str, worker_id: &str) -> Result<(), IngestionError>;

    async fn counts(&self, queue: &str) -> Result<QueueCounts, IngestionError>;

    /// Reclaims jobs whose lease expired without a heartbeat, returning
    /// them to WAITING with an incremented attempt. Intended to be driven
    /// by a periodic maintenance task, not per-reserve.
    async fn reap_stalled(&self, queue: &str) -> Result<u64, IngestionError>;
}
