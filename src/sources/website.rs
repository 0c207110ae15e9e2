//! Single-page article scrape adapter — backs `WEBSITE`. Not paginated;
//! each poll re-reads the configured endpoint and produces at most one
//! `RawItem` keyed by the page URL, relying on downstream dedup to
//! collapse unchanged re-polls.

use chrono::Utc;
use scraper::{Html, Selector};
use tracing::debug;

use super::{AdapterContext, FetchCounts, FetchOutput};
use crate::error::{IngestionError, Result};
use crate::schemas::raw_item::RawItem;
use crate::schemas::source::SourceDescriptor;

fn first_text(doc: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    doc.select(&selector).next().map(|el| el.text().collect::<Vec<_>>().join(" ").trim().to_string()).filter(|s| !s.is_empty())
}

pub async fn fetch(ctx: &AdapterContext, source: &SourceDescriptor, _cursor: Option<String>) -> Result<FetchOutput> {
    let response = ctx.http.get(&source.endpoint).send().await?;
    if !response.status().is_success() {
        return Err(IngestionError::UpstreamRejected {
            status: response.status().as_u16(),
            message: format!("website fetch failed for {}", source.endpoint),
        });
    }
    let body = response.text().await?;
    let doc = Html::parse_document(&body);

    let title = first_text(&doc, "title").or_else(|| first_text(&doc, "h1"));
    let article_text = first_text(&doc, "article").or_else(|| first_text(&doc, "main")).or_else(|| first_text(&doc, "body"));

    let mut counts = FetchCounts::default();

    let Some(title) = title else {
        counts.skipped += 1;
        debug!(source_id = %source.id, "website page had no extractable title");
        return Ok(FetchOutput { items: vec![], next_cursor: None, more: false, counts });
    };

    let item = RawItem {
        external_id: source.endpoint.clone(),
        kind: source.kind,
        url: Some(source.endpoint.clone()),
        title: Some(title),
        body: article_text,
        excerpt: None,
        author: None,
        published_at: None,
        thumbnail_url: None,
        duration_seconds: None,
        engagement: None,
        attributes: serde_json::Map::new(),
        fetched_at: Utc::now(),
    };
    counts.fetched += 1;

    Ok(FetchOutput { items: vec![item], next_cursor: None, more: false, counts })
}
