//! Normalize stage: raw items become canonical records. Applies source
//! filters, moderation, dedup, and fans new content out into media or
//! enrichment work. Per-item failures never fail the job; they are
//! absorbed into batch counters (spec's error propagation policy).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Map;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cms_client::CmsClient;
use crate::dedup::DedupStore;
use crate::error::{IngestionError, Result};
use crate::job_store::{EnqueueOptions, JobStore};
use crate::pipeline::worker::StageHandler;
use crate::schemas::canonical_item::{CanonicalItem, ContentStatus, ContentType};
use crate::schemas::job::{EnrichmentOperation, EnrichmentTextFields, Job, JobEnvelope, MediaOperation};
use crate::schemas::raw_item::RawItem;
use crate::schemas::source::SourceKind;

const DEFAULT_MIN_CONTENT_LENGTH: usize = 80;
const MIN_TITLE_LENGTH: usize = 8;
const MAX_TITLE_LENGTH: usize = 255;

#[derive(Debug, Default, Clone, Copy)]
struct BatchCounters {
    fetched: u64,
    skipped: u64,
    failed: u64,
    duplicates: u64,
    filtered: u64,
    moderation_auto_approved: u64,
    moderation_needs_review: u64,
    moderation_auto_rejected: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Moderation {
    AutoApproved,
    NeedsReview,
    AutoRejected,
}

fn content_type_for(kind: SourceKind, item: &RawItem) -> ContentType {
    if let Some(explicit) = item.attributes.get("type").and_then(|v| v.as_str()) {
        match explicit {
            "ARTICLE" => return ContentType::Article,
            "VIDEO" => return ContentType::Video,
            "TWEET" => return ContentType::Tweet,
            "COMMENT" => return ContentType::Comment,
            "PODCAST" => return ContentType::Podcast,
            _ => {}
        }
    }
    match kind {
        SourceKind::Feed | SourceKind::Website | SourceKind::Upload => ContentType::Article,
        SourceKind::VideoChannel => ContentType::Video,
        SourceKind::PodcastFeed => ContentType::Podcast,
        SourceKind::Forum => ContentType::Comment,
        SourceKind::Microblog => ContentType::Tweet,
        SourceKind::PodcastDiscovery => ContentType::Article,
    }
}

fn source_name_for(kind: SourceKind, item: &RawItem, source_id: &str) -> String {
    if let Some(url) = item.url.as_deref() {
        if let Ok(parsed) = url::Url::parse(url) {
            if let Some(host) = parsed.host_str() {
                return host.to_string();
            }
        }
    }
    match kind {
        SourceKind::VideoChannel | SourceKind::PodcastFeed => source_id.to_string(),
        _ => source_id.to_string(),
    }
}

fn truncate_title(title: &str) -> String {
    if title.chars().count() <= MAX_TITLE_LENGTH {
        title.to_string()
    } else {
        title.chars().take(MAX_TITLE_LENGTH).collect()
    }
}

fn keyword_list(settings: &Map<String, serde_json::Value>, key: &str) -> Vec<String> {
    settings
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(|s| s.to_lowercase())).collect())
        .unwrap_or_default()
}

fn passes_source_filters(item: &RawItem, settings: &Map<String, serde_json::Value>) -> bool {
    let combined = item.combined_text().to_lowercase();

    let include = keyword_list(settings, "include_keywords");
    if !include.is_empty() && !include.iter().any(|k| combined.contains(k.as_str())) {
        return false;
    }

    let exclude = keyword_list(settings, "exclude_keywords");
    if exclude.iter().any(|k| combined.contains(k.as_str())) {
        return false;
    }

    if let Some(min_engagement) = settings.get("min_engagement").and_then(|v| v.as_f64()) {
        let total = item
            .engagement
            .as_ref()
            .map(|e| e.likes as f64 + e.shares as f64 + e.comments as f64 + e.score)
            .unwrap_or(0.0);
        if total < min_engagement {
            return false;
        }
    }

    true
}

fn moderate(item: &RawItem, settings: &Map<String, serde_json::Value>, trusted: bool) -> Moderation {
    if trusted {
        return Moderation::AutoApproved;
    }

    let combined = item.combined_text().to_lowercase();
    let blocked = keyword_list(settings, "blocked_keywords");
    if blocked.iter().any(|k| combined.contains(k.as_str())) {
        return Moderation::AutoRejected;
    }

    let min_content_length = settings
        .get("min_content_length")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(DEFAULT_MIN_CONTENT_LENGTH);

    let title_len = item.title.as_deref().unwrap_or("").chars().count();
    if title_len < MIN_TITLE_LENGTH || combined.chars().count() < min_content_length {
        return Moderation::NeedsReview;
    }

    Moderation::AutoApproved
}

/// Article/Tweet/Comment have no media or enrichment follow-up, so an
/// approved item is already in its terminal state; Video/Podcast still
/// need the media/enrichment pipeline before they can be READY.
fn resolve_status(moderation: Moderation, item_type: ContentType) -> ContentStatus {
    match moderation {
        Moderation::AutoRejected => ContentStatus::Archived,
        Moderation::NeedsReview => ContentStatus::Pending,
        Moderation::AutoApproved => match item_type {
            ContentType::Article | ContentType::Tweet | ContentType::Comment => ContentStatus::Ready,
            ContentType::Video | ContentType::Podcast => ContentStatus::Pending,
        },
    }
}

pub struct NormalizeStageHandler {
    cms: Arc<CmsClient>,
    dedup: Arc<DedupStore>,
    store: Arc<dyn JobStore>,
}

impl NormalizeStageHandler {
    pub fn new(cms: Arc<CmsClient>, dedup: Arc<DedupStore>, store: Arc<dyn JobStore>) -> Self {
        Self { cms, dedup, store }
    }

    async fn process_item(
        &self,
        kind: SourceKind,
        source_id: &str,
        item: RawItem,
        source_settings: &Map<String, serde_json::Value>,
        counters: &mut BatchCounters,
        trusted: bool,
    ) {
        counters.fetched += 1;

        if item.url.is_none() && item.title.is_none() {
            counters.failed += 1;
            return;
        }

        if !passes_source_filters(&item, source_settings) {
            counters.filtered += 1;
            return;
        }

        let moderation = moderate(&item, source_settings, trusted);
        match moderation {
            Moderation::AutoApproved => counters.moderation_auto_approved += 1,
            Moderation::NeedsReview => counters.moderation_needs_review += 1,
            Moderation::AutoRejected => counters.moderation_auto_rejected += 1,
        }

        let dedup_key = crate::dedup::derive_key(
            item.url.as_deref(),
            item.title.as_deref(),
            item.published_at.map(|t| t.to_rfc3339()).as_deref(),
        );

        if self.dedup.check(&dedup_key).await.duplicate {
            counters.duplicates += 1;
            return;
        }

        let item_type = content_type_for(kind, &item);
        let status = resolve_status(moderation, item_type);

        let title = truncate_title(item.title.as_deref().unwrap_or("untitled"));
        let source_name = source_name_for(kind, &item, source_id);
        let media_ready = item.attribute_bool("media_ready") && item.url.is_some();

        let mut attributes = item.attributes.clone();
        attributes.insert(
            "moderation".to_string(),
            serde_json::json!({ "decision": moderation_wire(moderation), "reviewed": false }),
        );
        if media_ready {
            attributes.insert("media_ready".to_string(), serde_json::json!(true));
        }

        let canonical = CanonicalItem {
            idempotency_key: dedup_key.clone(),
            item_type,
            source_kind: kind,
            status,
            title,
            body_text: item.body.clone(),
            excerpt: item.excerpt.clone(),
            author: item.author.clone(),
            source_name,
            source_feed_url: Some(source_id.to_string()),
            media_url: if media_ready { item.url.clone() } else { None },
            thumbnail_url: item.thumbnail_url.clone(),
            original_url: item.url.clone().unwrap_or_default(),
            duration_seconds: item.duration_seconds,
            topic_tags: vec![],
            attributes,
            published_at: item.published_at,
        };

        let response = match self.cms.create_or_get(&canonical).await {
            Ok(response) => response,
            Err(err) => {
                warn!(source_id, dedup_key, error = %err, "create_or_get failed for item");
                counters.failed += 1;
                return;
            }
        };

        self.dedup.mark(&dedup_key, &response.id).await;

        if status == ContentStatus::Archived {
            return;
        }

        if let Err(err) = self.fan_out(&response.id, item_type, media_ready, item.url.as_deref(), &title_fields(&canonical)).await {
            warn!(content_id = response.id, error = %err, "failed to enqueue follow-up job");
        }
    }

    async fn fan_out(
        &self,
        content_id: &str,
        item_type: ContentType,
        media_ready: bool,
        source_url: Option<&str>,
        text_fields: &EnrichmentTextFields,
    ) -> Result<()> {
        match item_type {
            ContentType::Article | ContentType::Tweet | ContentType::Comment => Ok(()),
            ContentType::Video => {
                if media_ready {
                    self.enqueue_enrichment(content_id, item_type, text_fields, None, source_url, 2).await
                } else {
                    self.enqueue_media(content_id, item_type, source_url, 2).await
                }
            }
            ContentType::Podcast => {
                if media_ready {
                    self.enqueue_enrichment(content_id, item_type, text_fields, None, source_url, 2).await
                } else {
                    self.enqueue_media(content_id, item_type, source_url, 3).await
                }
            }
        }
    }

    async fn enqueue_media(&self, content_id: &str, item_type: ContentType, source_url: Option<&str>, priority: u8) -> Result<()> {
        let Some(source_url) = source_url else {
            return Err(IngestionError::InvalidData("media job requires a source url".to_string()));
        };
        let job = Job::MediaJob {
            content_id: content_id.to_string(),
            item_type,
            source_url: source_url.to_string(),
            operations: vec![MediaOperation::Download, MediaOperation::Transcode, MediaOperation::Thumbnail],
        };
        self.store.enqueue("media", job, EnqueueOptions::default().with_priority(priority)).await?;
        Ok(())
    }

    async fn enqueue_enrichment(
        &self,
        content_id: &str,
        item_type: ContentType,
        text_fields: &EnrichmentTextFields,
        media_path: Option<String>,
        media_url: Option<&str>,
        priority: u8,
    ) -> Result<()> {
        let job = Job::EnrichmentJob {
            content_id: content_id.to_string(),
            item_type,
            operations: vec![EnrichmentOperation::Transcript, EnrichmentOperation::Embedding],
            text_fields: text_fields.clone(),
            media_path,
            media_url: media_url.map(str::to_string),
        };
        self.store.enqueue("enrichment", job, EnqueueOptions::default().with_priority(priority)).await?;
        Ok(())
    }
}

fn moderation_wire(m: Moderation) -> &'static str {
    match m {
        Moderation::AutoApproved => "AUTO_APPROVED",
        Moderation::NeedsReview => "NEEDS_REVIEW",
        Moderation::AutoRejected => "AUTO_REJECTED",
    }
}

fn title_fields(item: &CanonicalItem) -> EnrichmentTextFields {
    EnrichmentTextFields { title: item.title.clone(), body: item.body_text.clone(), excerpt: item.excerpt.clone() }
}

#[async_trait]
impl StageHandler for NormalizeStageHandler {
    async fn handle(&self, envelope: &JobEnvelope, _cancel: &CancellationToken) -> Result<()> {
        let Job::NormalizeJob { source_id, kind, raw_items, source_settings, .. } = &envelope.payload else {
            return Err(IngestionError::InternalError(format!(
                "normalize worker received non-normalize job: {:?}",
                envelope.payload
            )));
        };

        let trusted = source_settings.get("trusted").and_then(|v| v.as_bool()).unwrap_or(false);
        let mut counters = BatchCounters::default();

        for item in raw_items.clone() {
            self.process_item(*kind, source_id, item, source_settings, &mut counters, trusted).await;
        }

        info!(
            source_id,
            kind = kind.as_str(),
            fetched = counters.fetched,
            skipped = counters.skipped,
            failed = counters.failed,
            duplicates = counters.duplicates,
            filtered = counters.filtered,
            moderation_auto_approved = counters.moderation_auto_approved,
            moderation_needs_review = counters.moderation_needs_review,
            moderation_auto_rejected = counters.moderation_auto_rejected,
            "normalize batch complete"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::raw_item::RawItem;

    fn raw_item(title: Option<&str>, body: Option<&str>) -> RawItem {
        RawItem {
            external_id: "ext-1".to_string(),
            kind: SourceKind::Feed,
            url: Some("https://example.com/a".to_string()),
            title: title.map(str::to_string),
            body: body.map(str::to_string),
            excerpt: None,
            author: None,
            published_at: None,
            thumbnail_url: None,
            duration_seconds: None,
            engagement: None,
            attributes: Map::new(),
            fetched_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn resolve_status_matches_moderation_and_item_type() {
        let cases = [
            (Moderation::AutoApproved, ContentType::Article, ContentStatus::Ready),
            (Moderation::AutoApproved, ContentType::Tweet, ContentStatus::Ready),
            (Moderation::AutoApproved, ContentType::Comment, ContentStatus::Ready),
            (Moderation::AutoApproved, ContentType::Video, ContentStatus::Pending),
            (Moderation::AutoApproved, ContentType::Podcast, ContentStatus::Pending),
            (Moderation::NeedsReview, ContentType::Article, ContentStatus::Pending),
            (Moderation::NeedsReview, ContentType::Video, ContentStatus::Pending),
            (Moderation::AutoRejected, ContentType::Article, ContentStatus::Archived),
            (Moderation::AutoRejected, ContentType::Video, ContentStatus::Archived),
        ];

        for (moderation, item_type, expected) in cases {
            assert_eq!(
                resolve_status(moderation, item_type),
                expected,
                "moderation={moderation:?} item_type={item_type:?}"
            );
        }
    }

    #[test]
    fn content_type_for_prefers_explicit_attribute_over_source_kind() {
        let mut item = raw_item(Some("title"), Some("body"));
        item.attributes.insert("type".to_string(), serde_json::json!("TWEET"));
        assert_eq!(content_type_for(SourceKind::Feed, &item), ContentType::Tweet);
    }

    #[test]
    fn content_type_for_falls_back_to_source_kind() {
        let item = raw_item(Some("title"), Some("body"));
        assert_eq!(content_type_for(SourceKind::VideoChannel, &item), ContentType::Video);
        assert_eq!(content_type_for(SourceKind::Forum, &item), ContentType::Comment);
        assert_eq!(content_type_for(SourceKind::Microblog, &item), ContentType::Tweet);
    }

    #[test]
    fn truncate_title_leaves_short_titles_untouched() {
        assert_eq!(truncate_title("short title"), "short title");
    }

    #[test]
    fn truncate_title_caps_long_titles_at_max_length() {
        let long = "a".repeat(MAX_TITLE_LENGTH + 50);
        assert_eq!(truncate_title(&long).chars().count(), MAX_TITLE_LENGTH);
    }

    #[test]
    fn moderate_auto_approves_trusted_sources_regardless_of_content() {
        let item = raw_item(Some("x"), None);
        let settings = Map::new();
        assert_eq!(moderate(&item, &settings, true), Moderation::AutoApproved);
    }

    #[test]
    fn moderate_needs_review_for_short_title_or_body() {
        let item = raw_item(Some("short"), Some("too brief"));
        let settings = Map::new();
        assert_eq!(moderate(&item, &settings, false), Moderation::NeedsReview);
    }

    #[test]
    fn moderate_auto_rejects_blocked_keywords() {
        let item = raw_item(Some("a fine long enough title"), Some(&"lorem ipsum ".repeat(10)));
        let mut settings = Map::new();
        settings.insert("blocked_keywords".to_string(), serde_json::json!(["lorem"]));
        assert_eq!(moderate(&item, &settings, false), Moderation::AutoRejected);
    }

    #[test]
    fn passes_source_filters_excludes_blocked_keywords() {
        let item = raw_item(Some("breaking news today"), Some("about politics and sports"));
        let mut settings = Map::new();
        settings.insert("exclude_keywords".to_string(), serde_json::json!(["politics"]));
        assert!(!passes_source_filters(&item, &settings));
    }

    #[test]
    fn passes_source_filters_requires_include_keyword_match() {
        let item = raw_item(Some("breaking news today"), Some("about sports"));
        let mut settings = Map::new();
        settings.insert("include_keywords".to_string(), serde_json::json!(["politics"]));
        assert!(!passes_source_filters(&item, &settings));
    }
}
