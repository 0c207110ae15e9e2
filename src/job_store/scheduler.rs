//! `schedule_repeating`/`cancel_repeating` — periodic producers keyed by name.
//!
//! Re-registering the same name replaces the previous schedule. Each
//! registration owns a spawned task; cancellation aborts it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{EnqueueOptions, JobStore};
use crate::schemas::job::Job;

pub struct RepeatingSchedule {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

pub struct Scheduler {
    store: Arc<dyn JobStore>,
    schedules: Mutex<HashMap<String, RepeatingSchedule>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store, schedules: Mutex::new(HashMap::new()) }
    }

    /// Registers a repeatable producer that enqueues `payload` onto
    /// `queue` every `every`. Replaces any existing schedule with the
    /// same `name`.
    pub fn schedule_repeating(&self, name: &str, queue: &str, payload: Job, every: std::time::Duration) {
        self.cancel_repeating(name);

        let store = self.store.clone();
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let queue = queue.to_string();
        let schedule_name = name.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = child.cancelled() => {
                        info!(schedule = %schedule_name, "repeating schedule cancelled");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = store
                            .enqueue(&queue, payload.clone(), EnqueueOptions::default())
                            .await
                        {
                            warn!(schedule = %schedule_name, error = %err, "failed to enqueue scheduled job");
                        }
                    }
                }
            }
        });

        self.schedules.lock().insert(name.to_string(), RepeatingSchedule { handle, cancel });
    }

    pub fn cancel_repeating(&self, name: &str) {
        if let Some(schedule) = self.schedules.lock().remove(name) {
            schedule.cancel.cancel();
            schedule.handle.abort();
        }
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.schedules.lock().contains_key(name)
    }

    pub fn shutdown(&self) {
        let mut schedules = self.schedules.lock();
        for (_, schedule) in schedules.drain() {
            schedule.cancel.cancel();
            schedule.handle.abort();
        }
    }
}
