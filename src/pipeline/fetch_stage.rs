//! Fetch stage: rate-limits and circuit-breaks a source poll, dispatches
//! to the matching adapter, and fans the result out into exactly one
//! `NormalizeJob` plus, for paginated sources, a continuation `FetchJob`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::error::{IngestionError, Result};
use crate::job_store::{EnqueueOptions, JobStore};
use crate::pipeline::worker::StageHandler;
use crate::rate_limiter::RateLimiter;
use crate::schemas::job::{Job, JobEnvelope};
use crate::schemas::source::SourceKind;
use crate::sources::{self, AdapterContext};

/// Minimum delay before a continuation fetch (same source, next page) is
/// reserved again, so pagination never hot-loops a queue.
const CONTINUATION_DELAY_MS: u64 = 1_000;

fn breaker_dependency(kind: SourceKind) -> Option<&'static str> {
    match kind {
        SourceKind::VideoChannel => Some("VIDEO_CHANNEL_API"),
        SourceKind::Forum => Some("FORUM_API"),
        SourceKind::Microblog => Some("MICROBLOG_API"),
        _ => None,
    }
}

pub struct FetchStageHandler {
    adapter_ctx: AdapterContext,
    store: Arc<dyn JobStore>,
    rate_limiter: Arc<RateLimiter>,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl FetchStageHandler {
    pub fn new(
        http: reqwest::Client,
        store: Arc<dyn JobStore>,
        rate_limiter: Arc<RateLimiter>,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        let adapter_ctx = AdapterContext { http, job_store: store.clone() };
        Self { adapter_ctx, store, rate_limiter, breakers }
    }
}

#[async_trait]
impl StageHandler for FetchStageHandler {
    async fn handle(&self, envelope: &JobEnvelope, _cancel: &CancellationToken) -> Result<()> {
        let Job::FetchJob { source_id, kind, settings, cursor, .. } = &envelope.payload else {
            return Err(IngestionError::InternalError(format!(
                "fetch worker received non-fetch job: {:?}",
                envelope.payload
            )));
        };

        let decision = self.rate_limiter.consume(kind.as_str(), source_id).await?;
        if !decision.allowed {
            debug!(source_id, kind = kind.as_str(), reset_ms = decision.reset_ms, "fetch rate limited, skipping poll");
            return Ok(());
        }

        let source = crate::schemas::source::SourceDescriptor {
            id: source_id.clone(),
            kind: *kind,
            display_name: source_id.clone(),
            endpoint: settings.get("endpoint").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            enabled: true,
            poll_interval_secs: 0,
            kind_specific_settings: settings.clone(),
        };

        let output = match breaker_dependency(*kind) {
            Some(dependency) => {
                let ctx = &self.adapter_ctx;
                let source_ref = &source;
                let cursor_clone = cursor.clone();
                self.breakers
                    .call(dependency, || async move { sources::dispatch(ctx, source_ref, cursor_clone).await })
                    .await?
            }
            None => sources::dispatch(&self.adapter_ctx, &source, cursor.clone()).await?,
        };

        info!(
            source_id,
            kind = kind.as_str(),
            fetched = output.counts.fetched,
            skipped = output.counts.skipped,
            more = output.more,
            "fetch stage pass complete"
        );

        if !output.items.is_empty() {
            let normalize_job = Job::NormalizeJob {
                source_id: source_id.clone(),
                kind: *kind,
                raw_items: output.items,
                source_settings: settings.clone(),
                parent_fetch_id: envelope.job_id.clone(),
            };
            self.store
                .enqueue("normalize", normalize_job, EnqueueOptions::default().with_priority(2))
                .await?;
        }

        if output.more {
            let continuation = Job::FetchJob {
                source_id: source_id.clone(),
                kind: *kind,
                settings: settings.clone(),
                cursor: output.next_cursor,
                triggered_by: crate::schemas::job::TriggeredBy::Schedule,
                triggered_at: chrono::Utc::now(),
            };
            if let Err(err) = self
                .store
                .enqueue(
                    "fetch",
                    continuation,
                    EnqueueOptions::default().with_delay_ms(CONTINUATION_DELAY_MS),
                )
                .await
            {
                warn!(source_id, error = %err, "failed to enqueue continuation fetch job");
            }
        }

        Ok(())
    }
}
