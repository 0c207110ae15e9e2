//! Podcast directory discovery adapter — backs `PODCAST_DISCOVERY`.
//! Fetches a directory listing of feed URLs and enqueues a `FetchJob`
//! for each newly discovered one; never itself produces items — a
//! discovery adapter emits further `FetchJob`s and always returns an
//! empty item list.

use chrono::Utc;
use serde::Deserialize;
use serde_json::Map;
use tracing::{debug, info};

use super::{AdapterContext, FetchCounts, FetchOutput};
use crate::error::{IngestionError, Result};
use crate::job_store::EnqueueOptions;
use crate::schemas::job::{Job, TriggeredBy};
use crate::schemas::source::{SourceDescriptor, SourceKind};

#[derive(Debug, Deserialize)]
struct DirectoryPage {
    feeds: Vec<DirectoryFeed>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectoryFeed {
    feed_url: String,
}

pub async fn fetch(ctx: &AdapterContext, source: &SourceDescriptor, cursor: Option<String>) -> Result<FetchOutput> {
    let mut request = ctx.http.get(&source.endpoint);
    if let Some(ref cursor) = cursor {
        request = request.query(&[("cursor", cursor.as_str())]);
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(IngestionError::UpstreamRejected {
            status: response.status().as_u16(),
            message: "podcast directory listing rejected".to_string(),
        });
    }

    let page: DirectoryPage = response.json().await?;
    let mut counts = FetchCounts::default();

    for feed in &page.feeds {
        let discovered_job = Job::FetchJob {
            source_id: format!("{}::{}", source.id, feed.feed_url),
            kind: SourceKind::PodcastFeed,
            settings: Map::new(),
            cursor: None,
            triggered_by: TriggeredBy::Schedule,
            triggered_at: Utc::now(),
        };

        let opts = EnqueueOptions::default().with_priority(1).with_attempts_max(5);
        match ctx.job_store.enqueue("fetch", discovered_job, opts).await {
            Ok(job_id) => {
                debug!(source_id = %source.id, feed_url = %feed.feed_url, job_id, "discovered podcast feed");
                counts.fetched += 1;
            }
            Err(err) => {
                counts.errors += 1;
                debug!(source_id = %source.id, feed_url = %feed.feed_url, error = %err, "failed to enqueue discovered feed");
            }
        }
    }

    info!(source_id = %source.id, discovered = counts.fetched, "podcast discovery pass complete");

    Ok(FetchOutput { items: vec![], next_cursor: page.next_cursor.clone(), more: page.next_cursor.is_some(), counts })
}
