//! Microblog timeline adapter — backs `MICROBLOG`. Provider API key is
//! read from `kind_specific_settings.api_key`; its absence disables the
//! adapter.

use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use super::{AdapterContext, FetchCounts, FetchOutput};
use crate::error::{IngestionError, Result};
use crate::schemas::raw_item::RawItem;
use crate::schemas::source::SourceDescriptor;

#[derive(Debug, Deserialize)]
struct TimelinePage {
    posts: Vec<MicroblogPost>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MicroblogPost {
    id: String,
    text: String,
    url: String,
    #[serde(default)]
    author_handle: Option<String>,
    #[serde(default)]
    created_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    like_count: Option<u64>,
    #[serde(default)]
    repost_count: Option<u64>,
    #[serde(default)]
    reply_count: Option<u64>,
    #[serde(default)]
    view_count: Option<u64>,
}

pub async fn fetch(ctx: &AdapterContext, source: &SourceDescriptor, cursor: Option<String>) -> Result<FetchOutput> {
    let Some(api_key) = source.setting_str("api_key") else {
        debug!(source_id = %source.id, "microblog source has no api_key configured, skipping");
        return Ok(FetchOutput::empty());
    };

    let mut request = ctx.http.get(&source.endpoint).bearer_auth(api_key);
    if let Some(ref cursor) = cursor {
        request = request.query(&[("next_token", cursor.as_str())]);
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(IngestionError::UpstreamRejected {
            status: response.status().as_u16(),
            message: "microblog timeline rejected".to_string(),
        });
    }

    let page: TimelinePage = response.json().await?;
    let mut counts = FetchCounts::default();

    let items = page
        .posts
        .into_iter()
        .map(|post| {
            counts.fetched += 1;
            let engagement = crate::schemas::common::Engagement {
                likes: post.like_count.unwrap_or(0),
                shares: post.repost_count.unwrap_or(0),
                comments: post.reply_count.unwrap_or(0),
                views: post.view_count.unwrap_or(0),
                score: 0.0,
            };
            RawItem {
                external_id: post.id,
                kind: source.kind,
                url: Some(post.url),
                title: None,
                body: Some(post.text),
                excerpt: None,
                author: post.author_handle,
                published_at: post.created_at,
                thumbnail_url: None,
                duration_seconds: None,
                engagement: Some(engagement),
                attributes: serde_json::Map::new(),
                fetched_at: Utc::now(),
            }
        })
        .collect();

    Ok(FetchOutput { items, next_cursor: page.next_token.clone(), more: page.next_token.is_some(), counts })
}
