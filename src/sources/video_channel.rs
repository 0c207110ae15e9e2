//! Video platform channel adapter — backs `VIDEO_CHANNEL`. Expects a
//! JSON listing endpoint returning paginated video metadata; the
//! provider API key is read from `kind_specific_settings.api_key` and
//! its absence disables the adapter.

use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use super::{AdapterContext, FetchCounts, FetchOutput};
use crate::error::{IngestionError, Result};
use crate::schemas::raw_item::RawItem;
use crate::schemas::source::SourceDescriptor;

#[derive(Debug, Deserialize)]
struct ChannelPage {
    videos: Vec<VideoEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoEntry {
    id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    url: String,
    #[serde(default)]
    thumbnail_url: Option<String>,
    #[serde(default)]
    published_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    duration_seconds: Option<f64>,
    #[serde(default)]
    view_count: Option<u64>,
    #[serde(default)]
    like_count: Option<u64>,
    #[serde(default)]
    comment_count: Option<u64>,
}

pub async fn fetch(ctx: &AdapterContext, source: &SourceDescriptor, cursor: Option<String>) -> Result<FetchOutput> {
    let Some(api_key) = source.setting_str("api_key") else {
        debug!(source_id = %source.id, "video channel source has no api_key configured, skipping");
        return Ok(FetchOutput::empty());
    };

    let mut request = ctx.http.get(&source.endpoint).bearer_auth(api_key);
    if let Some(ref cursor) = cursor {
        request = request.query(&[("page_token", cursor.as_str())]);
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(IngestionError::UpstreamRejected {
            status: response.status().as_u16(),
            message: "video channel listing rejected".to_string(),
        });
    }

    let page: ChannelPage = response.json().await?;
    let mut counts = FetchCounts::default();

    let items = page
        .videos
        .into_iter()
        .map(|video| {
            counts.fetched += 1;
            let engagement = crate::schemas::common::Engagement {
                likes: video.like_count.unwrap_or(0),
                shares: 0,
                comments: video.comment_count.unwrap_or(0),
                views: video.view_count.unwrap_or(0),
                score: 0.0,
            };
            RawItem {
                external_id: video.id,
                kind: source.kind,
                url: Some(video.url),
                title: Some(video.title),
                body: video.description.clone(),
                excerpt: video.description,
                author: None,
                published_at: video.published_at,
                thumbnail_url: video.thumbnail_url,
                duration_seconds: video.duration_seconds,
                engagement: Some(engagement),
                attributes: serde_json::Map::new(),
                fetched_at: Utc::now(),
            }
        })
        .collect();

    Ok(FetchOutput { items, next_cursor: page.next_page_token.clone(), more: page.next_page_token.is_some(), counts })
}
