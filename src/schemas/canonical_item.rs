//! `CanonicalItem` — normalize output, the payload posted to the collaborator's
//! `create_or_get`. Ownership of the resulting record belongs to the
//! collaborator; the pipeline only ever issues declared update operations.

use serde::{Deserialize, Serialize};
use serde_json::Map;

use super::source::SourceKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentType {
    Article,
    Video,
    Tweet,
    Comment,
    Podcast,
}

impl ContentType {
    /// Types that never carry media and are never routed through the
    /// media stage (testable property #2).
    pub fn is_media_bearing(&self) -> bool {
        matches!(self, ContentType::Video | ContentType::Podcast)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentStatus {
    Pending,
    Processing,
    Ready,
    Failed,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalItem {
    pub idempotency_key: String,
    #[serde(rename = "type")]
    pub item_type: ContentType,
    pub source_kind: SourceKind,
    pub status: ContentStatus,
    pub title: String,
    #[serde(default)]
    pub body_text: Option<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    pub source_name: String,
    #[serde(default)]
    pub source_feed_url: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    pub original_url: String,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub topic_tags: Vec<String>,
    #[serde(default)]
    pub attributes: Map<String, serde_json::Value>,
    #[serde(default)]
    pub published_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl CanonicalItem {
    pub fn media_ready(&self) -> bool {
        self.attributes.get("media_ready").and_then(|v| v.as_bool()).unwrap_or(false)
    }
}
