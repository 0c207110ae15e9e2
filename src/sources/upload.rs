//! Manual submission adapter — backs `UPLOAD`. The submitted item's
//! fields travel inline in `kind_specific_settings` rather than being
//! fetched from a remote endpoint; this adapter only decodes them into
//! a `RawItem`. The user-supplied external id is canonicalized into an
//! idempotency key downstream in normalize, the same way a derived key
//! is, rather than special-cased here.

use chrono::Utc;

use super::{AdapterContext, FetchCounts, FetchOutput};
use crate::error::{IngestionError, Result};
use crate::schemas::raw_item::RawItem;
use crate::schemas::source::SourceDescriptor;

pub async fn fetch(_ctx: &AdapterContext, source: &SourceDescriptor, _cursor: Option<String>) -> Result<FetchOutput> {
    let settings = &source.kind_specific_settings;
    let mut counts = FetchCounts::default();

    let Some(external_id) = settings.get("external_id").and_then(|v| v.as_str()) else {
        return Err(IngestionError::InvalidData("upload source missing external_id".to_string()));
    };

    let title = settings.get("title").and_then(|v| v.as_str()).map(str::to_string);
    if title.is_none() {
        counts.skipped += 1;
        return Ok(FetchOutput { items: vec![], next_cursor: None, more: false, counts });
    }

    let published_at = settings
        .get("published_at")
        .and_then(|v| v.as_str())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let engagement = settings.get("engagement").and_then(|v| serde_json::from_value(v.clone()).ok());

    let item = RawItem {
        external_id: external_id.to_string(),
        kind: source.kind,
        url: settings.get("url").and_then(|v| v.as_str()).map(str::to_string),
        title,
        body: settings.get("body").and_then(|v| v.as_str()).map(str::to_string),
        excerpt: settings.get("excerpt").and_then(|v| v.as_str()).map(str::to_string),
        author: settings.get("author").and_then(|v| v.as_str()).map(str::to_string),
        published_at,
        thumbnail_url: settings.get("thumbnail_url").and_then(|v| v.as_str()).map(str::to_string),
        duration_seconds: settings.get("duration_seconds").and_then(|v| v.as_f64()),
        engagement,
        attributes: serde_json::Map::new(),
        fetched_at: Utc::now(),
    };
    counts.fetched += 1;

    Ok(FetchOutput { items: vec![item], next_cursor: None, more: false, counts })
}
