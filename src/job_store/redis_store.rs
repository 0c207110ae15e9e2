//! Redis-backed `JobStore`.
//!
//! Each queue keeps four sorted sets (`waiting`, `delayed`, `active`,
//! `completed`/`failed` for GC bookkeeping) plus one hash per live job
//! holding its payload and attempt state. This trades the simplicity of
//! a bare `XADD`/`XREADGROUP` stream for explicit per-job attempt
//! tracking, which `fail`/`complete`/visibility-lease reaping need and a
//! stream's consumer-group PEL doesn't expose directly.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, info, warn};

use super::{BackoffPolicy, DeadLetterRecord, EnqueueOptions, JobStore};
use crate::error::IngestionError;
use crate::schemas::job::{Job, JobEnvelope, JobState, QueueCounts};

const LEASE_MS: i64 = 5 * 60_000;
const COMPLETED_RETENTION_MS: i64 = 60 * 60_000;
const COMPLETED_MAX_COUNT: isize = 1_000;
const FAILED_RETENTION_MS: i64 = 24 * 60 * 60_000;
const PRIORITY_WEIGHT: i64 = 1_000_000_000_000;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn job_key(job_id: &str) -> String {
    format!("job:{job_id}")
}

fn waiting_key(queue: &str) -> String {
    format!("queue:{queue}:waiting")
}

fn delayed_key(queue: &str) -> String {
    format!("queue:{queue}:delayed")
}

fn active_key(queue: &str) -> String {
    format!("queue:{queue}:active")
}

fn completed_key(queue: &str) -> String {
    format!("queue:{queue}:completed")
}

fn failed_key(queue: &str) -> String {
    format!("queue:{queue}:failed")
}

fn dead_letter_key() -> String {
    "queue:dead_letter:records".to_string()
}

fn idempotency_key(queue: &str, job_id: &str) -> String {
    format!("jobid:{queue}:{job_id}")
}

pub struct RedisJobStore {
    conn: ConnectionManager,
}

impl RedisJobStore {
    pub async fn connect(url: &str) -> Result<Self, IngestionError> {
        let client = redis::Client::open(url).map_err(IngestionError::RedisError)?;
        let conn = ConnectionManager::new(client).await.map_err(IngestionError::RedisError)?;
        info!("connected job store to redis");
        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    async fn sweep_delayed(&self, queue: &str) -> Result<(), IngestionError> {
        let mut conn = self.conn();
        let now = now_ms();
        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(delayed_key(queue))
            .arg(0)
            .arg(now)
            .query_async(&mut conn)
            .await?;

        for job_id in due {
            let priority: i64 = redis::cmd("HGET")
                .arg(job_key(&job_id))
                .arg("priority")
                .query_async::<Option<i64>>(&mut conn)
                .await?
                .unwrap_or(0);
            let score = now - priority * PRIORITY_WEIGHT;

            redis::pipe()
                .atomic()
                .cmd("ZREM").arg(delayed_key(queue)).arg(&job_id).ignore()
                .cmd("ZADD").arg(waiting_key(queue)).arg(score).arg(&job_id).ignore()
                .cmd("HSET").arg(job_key(&job_id)).arg("state").arg("WAITING").ignore()
                .query_async::<()>(&mut conn)
                .await?;
        }
        Ok(())
    }

    async fn load_envelope(&self, job_id: &str) -> Result<Option<JobEnvelope>, IngestionError> {
        let mut conn = self.conn();
        let fields: Vec<(String, String)> = redis::cmd("HGETALL")
            .arg(job_key(job_id))
            .query_async(&mut conn)
            .await?;
        if fields.is_empty() {
            return Ok(None);
        }
        let map: std::collections::HashMap<String, String> = fields.into_iter().collect();

        let payload: Job = serde_json::from_str(map.get("payload").ok_or_else(|| {
            IngestionError::InternalError(format!("job {job_id} missing payload"))
        })?)?;
        let state = match map.get("state").map(String::as_str) {
            Some("WAITING") => JobState::Waiting,
            Some("DELAYED") => JobState::Delayed,
            Some("ACTIVE") => JobState::Active,
            Some("COMPLETED") => JobState::Completed,
            Some("FAILED") => JobState::Failed,
            _ => JobState::Waiting,
        };

        Ok(Some(JobEnvelope {
            job_id: job_id.to_string(),
            queue: map.get("queue").cloned().unwrap_or_default(),
            payload,
            attempt: map.get("attempt").and_then(|v| v.parse().ok()).unwrap_or(0),
            max_attempts: map.get("max_attempts").and_then(|v| v.parse().ok()).unwrap_or(1),
            earliest_run_at: map
                .get("earliest_run_at")
                .and_then(|v| v.parse::<i64>().ok())
                .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms))
                .unwrap_or_else(chrono::Utc::now),
            state,
            result: None,
            failure: map.get("failure").cloned(),
            created_at: map
                .get("created_at")
                .and_then(|v| v.parse::<i64>().ok())
                .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms))
                .unwrap_or_else(chrono::Utc::now),
            worker_id: map.get("worker_id").cloned(),
            correlation_id: map.get("correlation_id").cloned(),
        }))
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn enqueue(&self, queue: &str, payload: Job, opts: EnqueueOptions) -> Result<String, IngestionError> {
        let mut conn = self.conn();

        if let Some(ref job_id) = opts.job_id {
            let idem_key = idempotency_key(queue, job_id);
            let existing: Option<String> = redis::cmd("GET").arg(&idem_key).query_async(&mut conn).await?;
            if existing.is_some() {
                debug!(job_id, queue, "enqueue is a no-op, job already retained");
                return Ok(job_id.clone());
            }
        }

        let job_id = opts.job_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now = now_ms();
        let payload_json = serde_json::to_string(&payload)?;
        let backoff = opts.backoff.unwrap_or_default();

        redis::cmd("SET")
            .arg(idempotency_key(queue, &job_id))
            .arg(&job_id)
            .arg("EX")
            .arg(7 * 24 * 3600)
            .query_async::<()>(&mut conn)
            .await?;

        redis::pipe()
            .atomic()
            .cmd("HSET").arg(job_key(&job_id))
                .arg("queue").arg(queue)
                .arg("payload").arg(&payload_json)
                .arg("attempt").arg(0)
                .arg("max_attempts").arg(opts.attempts_max.max(1))
                .arg("priority").arg(opts.priority as i64)
                .arg("created_at").arg(now)
                .arg("base_delay_ms").arg(backoff.base_delay_ms)
                .arg("max_delay_ms").arg(backoff.max_delay_ms)
                .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        if opts.delay_ms > 0 {
            let run_at = now + opts.delay_ms as i64;
            redis::pipe()
                .atomic()
                .cmd("ZADD").arg(delayed_key(queue)).arg(run_at).arg(&job_id).ignore()
                .cmd("HSET").arg(job_key(&job_id))
                    .arg("state").arg("DELAYED")
                    .arg("earliest_run_at").arg(run_at)
                    .ignore()
                .query_async::<()>(&mut conn)
                .await?;
        } else {
            let score = now - (opts.priority as i64) * PRIORITY_WEIGHT;
            redis::pipe()
                .atomic()
                .cmd("ZADD").arg(waiting_key(queue)).arg(score).arg(&job_id).ignore()
                .cmd("HSET").arg(job_key(&job_id))
                    .arg("state").arg("WAITING")
                    .arg("earliest_run_at").arg(now)
                    .ignore()
                .query_async::<()>(&mut conn)
                .await?;
        }

        Ok(job_id)
    }

    async fn reserve(&self, queue: &str, worker_id: &str) -> Result<Option<JobEnvelope>, IngestionError> {
        self.sweep_delayed(queue).await?;
        let mut conn = self.conn();

        let popped: Vec<(String, f64)> = redis::cmd("ZPOPMIN")
            .arg(waiting_key(queue))
            .arg(1)
            .query_async(&mut conn)
            .await?;

        let Some((job_id, _)) = popped.into_iter().next() else {
            return Ok(None);
        };

        let lease_until = now_ms() + LEASE_MS;
        redis::pipe()
            .atomic()
            .cmd("ZADD").arg(active_key(queue)).arg(lease_until).arg(&job_id).ignore()
            .cmd("HSET").arg(job_key(&job_id))
                .arg("state").arg("ACTIVE")
                .arg("worker_id").arg(worker_id)
                .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        self.load_envelope(&job_id).await
    }

    async fn complete(&self, job_id: &str) -> Result<(), IngestionError> {
        let mut conn = self.conn();
        let queue: Option<String> = redis::cmd("HGET").arg(job_key(job_id)).arg("queue").query_async(&mut conn).await?;
        let Some(queue) = queue else {
            return Ok(());
        };
        let now = now_ms();

        redis::pipe()
            .atomic()
            .cmd("ZREM").arg(active_key(&queue)).arg(job_id).ignore()
            .cmd("ZADD").arg(completed_key(&queue)).arg(now).arg(job_id).ignore()
            .cmd("DEL").arg(job_key(job_id)).ignore()
            .query_async::<()>(&mut conn)
            .await?;

        self.gc_completed(&queue).await?;
        Ok(())
    }

    async fn fail(&self, job_id: &str, reason: &str) -> Result<(), IngestionError> {
        let mut conn = self.conn();
        let fields: Vec<(String, String)> = redis::cmd("HGETALL").arg(job_key(job_id)).query_async(&mut conn).await?;
        if fields.is_empty() {
            return Ok(());
        }
        let map: std::collections::HashMap<String, String> = fields.into_iter().collect();
        let queue = map.get("queue").cloned().unwrap_or_default();
        let attempt: u32 = map.get("attempt").and_then(|v| v.parse().ok()).unwrap_or(0);
        let max_attempts: u32 = map.get("max_attempts").and_then(|v| v.parse().ok()).unwrap_or(1);
        let next_attempt = attempt + 1;

        redis::cmd("ZREM").arg(active_key(&queue)).arg(job_id).query_async::<()>(&mut conn).await?;

        if next_attempt < max_attempts {
            let backoff = BackoffPolicy {
                base_delay_ms: map.get("base_delay_ms").and_then(|v| v.parse().ok()).unwrap_or(1_000),
                max_delay_ms: map.get("max_delay_ms").and_then(|v| v.parse().ok()).unwrap_or(300_000),
            };
            let delay = backoff.delay_for_attempt(next_attempt);
            let run_at = now_ms() + delay as i64;

            redis::pipe()
                .atomic()
                .cmd("ZADD").arg(delayed_key(&queue)).arg(run_at).arg(job_id).ignore()
                .cmd("HSET").arg(job_key(job_id))
                    .arg("attempt").arg(next_attempt)
                    .arg("state").arg("DELAYED")
                    .arg("earliest_run_at").arg(run_at)
                    .arg("failure").arg(reason)
                    .ignore()
                .query_async::<()>(&mut conn)
                .await?;
            warn!(job_id, queue, attempt = next_attempt, delay_ms = delay, "job failed, requeued with backoff");
        } else {
            let payload_json: String = map.get("payload").cloned().unwrap_or_default();
            let payload: Job = serde_json::from_str(&payload_json)?;
            let dead_letter = DeadLetterRecord {
                original_queue: queue.clone(),
                original_job_id: job_id.to_string(),
                payload,
                failure_reason: reason.to_string(),
                failed_at: chrono::Utc::now(),
                attempts: next_attempt,
            };
            let record_json = serde_json::to_string(&dead_letter)?;

            redis::pipe()
                .atomic()
                .cmd("LPUSH").arg(dead_letter_key()).arg(&record_json).ignore()
                .cmd("ZADD").arg(failed_key(&queue)).arg(now_ms()).arg(job_id).ignore()
                .cmd("DEL").arg(job_key(job_id)).ignore()
                .query_async::<()>(&mut conn)
                .await?;
            warn!(job_id, queue, attempts = next_attempt, "job exhausted retries, written to dead letter queue");

            self.gc_failed(&queue).await?;
        }
        Ok(())
    }

    async fn heartbeat(&self, job_id: &str, worker_id: &str) -> Result<(), IngestionError> {
        let mut conn = self.conn();
        let queue: Option<String> = redis::cmd("HGET").arg(job_key(job_id)).arg("queue").query_async(&mut conn).await?;
        let Some(queue) = queue else {
            return Err(IngestionError::InternalError(format!("unknown job {job_id}")));
        };
        let lease_until = now_ms() + LEASE_MS;
        redis::pipe()
            .atomic()
            .cmd("ZADD").arg(active_key(&queue)).arg(lease_until).arg(job_id).ignore()
            .cmd("HSET").arg(job_key(job_id)).arg("worker_id").arg(worker_id).ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn counts(&self, queue: &str) -> Result<QueueCounts, IngestionError> {
        let mut conn = self.conn();
        let (waiting, active, delayed, completed, failed): (u64, u64, u64, u64, u64) = redis::pipe()
            .cmd("ZCARD").arg(waiting_key(queue))
            .cmd("ZCARD").arg(active_key(queue))
            .cmd("ZCARD").arg(delayed_key(queue))
            .cmd("ZCARD").arg(completed_key(queue))
            .cmd("ZCARD").arg(failed_key(queue))
            .query_async(&mut conn)
            .await?;
        Ok(QueueCounts { waiting, active, delayed, completed, failed })
    }

    async fn reap_stalled(&self, queue: &str) -> Result<u64, IngestionError> {
        let mut conn = self.conn();
        let now = now_ms();
        let stalled: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(active_key(queue))
            .arg(0)
            .arg(now)
            .query_async(&mut conn)
            .await?;

        for job_id in &stalled {
            let attempt: u32 = redis::cmd("HINCRBY")
                .arg(job_key(job_id))
                .arg("attempt")
                .arg(1)
                .query_async(&mut conn)
                .await?;
            let priority: i64 = redis::cmd("HGET")
                .arg(job_key(job_id))
                .arg("priority")
                .query_async::<Option<i64>>(&mut conn)
                .await?
                .unwrap_or(0);
            let score = now_ms() - priority * PRIORITY_WEIGHT;

            warn!(job_id, queue, attempt, "reaped stalled job, returning to waiting");
            redis::pipe()
                .atomic()
                .cmd("ZREM").arg(active_key(queue)).arg(job_id).ignore()
                .cmd("ZADD").arg(waiting_key(queue)).arg(score).arg(job_id).ignore()
                .cmd("HSET").arg(job_key(job_id)).arg("state").arg("WAITING").ignore()
                .query_async::<()>(&mut conn)
                .await?;
        }
        Ok(stalled.len() as u64)
    }
}

impl RedisJobStore {
    async fn gc_completed(&self, queue: &str) -> Result<(), IngestionError> {
        let mut conn = self.conn();
        let cutoff = now_ms() - COMPLETED_RETENTION_MS;
        redis::cmd("ZREMRANGEBYSCORE").arg(completed_key(queue)).arg(0).arg(cutoff).query_async::<()>(&mut conn).await?;
        redis::cmd("ZREMRANGEBYRANK").arg(completed_key(queue)).arg(0).arg(-(COMPLETED_MAX_COUNT + 1)).query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn gc_failed(&self, queue: &str) -> Result<(), IngestionError> {
        let mut conn = self.conn();
        let cutoff = now_ms() - FAILED_RETENTION_MS;
        redis::cmd("ZREMRANGEBYSCORE").arg(failed_key(queue)).arg(0).arg(cutoff).query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_with_cap() {
        let policy = BackoffPolicy { base_delay_ms: 1_000, max_delay_ms: 10_000 };
        assert_eq!(policy.delay_for_attempt(1), 2_000);
        assert_eq!(policy.delay_for_attempt(2), 4_000);
        assert_eq!(policy.delay_for_attempt(10), 10_000);
    }
}
