//! RSS/Atom feed adapter — backs `FEED` and `PODCAST_FEED`. A feed entry
//! with an audio/video enclosure is marked `media_ready` so normalize can
//! skip the media stage entirely (spec fan-out rule for direct URLs).

use chrono::Utc;
use feed_rs::model::MediaContent;
use tracing::{debug, warn};

use super::{AdapterContext, FetchCounts, FetchOutput};
use crate::error::{IngestionError, Result};
use crate::schemas::raw_item::RawItem;
use crate::schemas::source::SourceDescriptor;

fn enclosure(entry: &feed_rs::model::Entry) -> Option<&MediaContent> {
    entry.media.iter().flat_map(|m| m.content.iter()).find(|c| c.url.is_some())
}

pub async fn fetch(ctx: &AdapterContext, source: &SourceDescriptor, _cursor: Option<String>) -> Result<FetchOutput> {
    let response = ctx.http.get(&source.endpoint).send().await?;
    if !response.status().is_success() {
        return Err(IngestionError::UpstreamRejected {
            status: response.status().as_u16(),
            message: format!("feed fetch failed for {}", source.endpoint),
        });
    }
    let bytes = response.bytes().await?;

    let feed = feed_rs::parser::parse(&bytes[..])
        .map_err(|e| IngestionError::InvalidData(format!("feed parse failed: {e}")))?;

    let mut counts = FetchCounts::default();
    let mut items = Vec::with_capacity(feed.entries.len());

    for entry in &feed.entries {
        let url = entry.links.first().map(|l| l.href.clone());
        let title = entry.title.as_ref().map(|t| t.content.clone());

        if url.is_none() && title.is_none() {
            counts.skipped += 1;
            continue;
        }

        let media = enclosure(entry);
        let media_url = media.and_then(|m| m.url.as_ref().map(|u| u.to_string()));
        let duration_seconds = media.and_then(|m| m.duration).map(|d| d.as_secs_f64());

        let mut attributes = serde_json::Map::new();
        if media_url.is_some() {
            attributes.insert("media_ready".to_string(), serde_json::json!(true));
        }

        items.push(RawItem {
            external_id: entry.id.clone(),
            kind: source.kind,
            url: media_url.clone().or_else(|| url.clone()),
            title,
            body: entry.content.as_ref().and_then(|c| c.body.clone()),
            excerpt: entry.summary.as_ref().map(|s| s.content.clone()),
            author: entry.authors.first().map(|a| a.name.clone()),
            published_at: entry.published.or(entry.updated),
            thumbnail_url: None,
            duration_seconds,
            engagement: None,
            attributes,
            fetched_at: Utc::now(),
        });
        counts.fetched += 1;
    }

    debug!(source_id = %source.id, fetched = counts.fetched, skipped = counts.skipped, "polled feed source");

    if items.is_empty() && counts.skipped == 0 {
        warn!(source_id = %source.id, "feed returned no entries");
    }

    Ok(FetchOutput { items, next_cursor: None, more: false, counts })
}
