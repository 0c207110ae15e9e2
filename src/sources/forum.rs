//! Forum/discussion-board adapter — backs `FORUM`. Expects a JSON
//! listing of recent posts; optional `api_key` setting, absence
//! disables the source.

use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use super::{AdapterContext, FetchCounts, FetchOutput};
use crate::error::{IngestionError, Result};
use crate::schemas::raw_item::RawItem;
use crate::schemas::source::SourceDescriptor;

#[derive(Debug, Deserialize)]
struct ForumPage {
    posts: Vec<ForumPost>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ForumPost {
    id: String,
    #[serde(default)]
    title: Option<String>,
    body: String,
    url: String,
    author: Option<String>,
    #[serde(default)]
    created_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    upvotes: Option<u64>,
    #[serde(default)]
    reply_count: Option<u64>,
}

pub async fn fetch(ctx: &AdapterContext, source: &SourceDescriptor, cursor: Option<String>) -> Result<FetchOutput> {
    let mut request = ctx.http.get(&source.endpoint);
    if let Some(api_key) = source.setting_str("api_key") {
        request = request.bearer_auth(api_key);
    } else if source.kind_specific_settings.get("requires_api_key").and_then(|v| v.as_bool()).unwrap_or(false) {
        debug!(source_id = %source.id, "forum source requires api_key and has none, skipping");
        return Ok(FetchOutput::empty());
    }
    if let Some(ref cursor) = cursor {
        request = request.query(&[("cursor", cursor.as_str())]);
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(IngestionError::UpstreamRejected {
            status: response.status().as_u16(),
            message: "forum listing rejected".to_string(),
        });
    }

    let page: ForumPage = response.json().await?;
    let mut counts = FetchCounts::default();

    let items = page
        .posts
        .into_iter()
        .map(|post| {
            counts.fetched += 1;
            let engagement = crate::schemas::common::Engagement {
                likes: post.upvotes.unwrap_or(0),
                shares: 0,
                comments: post.reply_count.unwrap_or(0),
                views: 0,
                score: 0.0,
            };
            RawItem {
                external_id: post.id,
                kind: source.kind,
                url: Some(post.url),
                title: post.title,
                body: Some(post.body),
                excerpt: None,
                author: post.author,
                published_at: post.created_at,
                thumbnail_url: None,
                duration_seconds: None,
                engagement: Some(engagement),
                attributes: serde_json::Map::new(),
                fetched_at: Utc::now(),
            }
        })
        .collect();

    Ok(FetchOutput { items, next_cursor: page.next_cursor.clone(), more: page.next_cursor.is_some(), counts })
}
