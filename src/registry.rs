//! Source registry & scheduler.
//!
//! Owns `SourceDescriptor`s and turns `schedule`/`trigger_now` calls into
//! repeating or one-shot `FetchJob`s on the job store. Disabled sources
//! are refused outright; `UPLOAD` sources are accepted but never
//! scheduled (they only ever arrive via `trigger_now`-style manual
//! submission).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::error::IngestionError;
use crate::job_store::scheduler::Scheduler;
use crate::job_store::{EnqueueOptions, JobStore};
use crate::schemas::job::{Job, TriggeredBy};
use crate::schemas::source::{SourceDescriptor, SourceKind};

const MANUAL_TRIGGER_PRIORITY: u8 = 9;

fn schedule_name(kind: &SourceKind, id: &str) -> String {
    format!("{}:{}", kind.as_str(), id)
}

fn fetch_job(source: &SourceDescriptor, triggered_by: TriggeredBy) -> Job {
    Job::FetchJob {
        source_id: source.id.clone(),
        kind: source.kind,
        settings: source.kind_specific_settings.clone(),
        cursor: None,
        triggered_by,
        triggered_at: chrono::Utc::now(),
    }
}

pub struct SourceRegistry {
    store: Arc<dyn JobStore>,
    scheduler: Arc<Scheduler>,
    sources: RwLock<HashMap<String, SourceDescriptor>>,
}

impl SourceRegistry {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            scheduler: Arc::new(Scheduler::new(store.clone())),
            store,
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a repeatable producer enqueuing a `FetchJob` every
    /// `poll_interval`. Refuses disabled sources; a no-op for `UPLOAD`.
    pub fn schedule(&self, source: SourceDescriptor) -> Result<(), IngestionError> {
        if !source.enabled {
            warn!(source_id = %source.id, "refusing to schedule a disabled source");
            return Err(IngestionError::InvalidData(format!(
                "source {} is disabled",
                source.id
            )));
        }

        let name = schedule_name(&source.kind, &source.id);

        if let Some(interval) = source.poll_interval() {
            let payload = fetch_job(&source, TriggeredBy::Schedule);
            self.scheduler.schedule_repeating(&name, "fetch", payload, interval);
        }

        self.sources.write().insert(source.id.clone(), source);
        Ok(())
    }

    /// Enqueues a high-priority one-shot `FetchJob` outside the regular
    /// polling cadence.
    pub async fn trigger_now(&self, source: &SourceDescriptor) -> Result<String, IngestionError> {
        let payload = fetch_job(source, TriggeredBy::Manual);
        self.store
            .enqueue(
                "fetch",
                payload,
                EnqueueOptions::default().with_priority(MANUAL_TRIGGER_PRIORITY),
            )
            .await
    }

    /// Removes the repeating schedule entry for `(id, kind)`. The source
    /// descriptor itself is left registered so a later `schedule` call
    /// can re-enable it.
    pub fn unschedule(&self, id: &str, kind: &SourceKind) {
        let name = schedule_name(kind, id);
        self.scheduler.cancel_repeating(&name);
    }

    pub fn get(&self, id: &str) -> Option<SourceDescriptor> {
        self.sources.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<SourceDescriptor> {
        self.sources.read().values().cloned().collect()
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_name_combines_kind_and_id() {
        assert_eq!(schedule_name(&SourceKind::Feed, "abc"), "FEED:abc");
    }
}
