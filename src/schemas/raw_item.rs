//! `RawItem` — fetcher output, ephemeral for the lifetime of one normalize job.

use serde::{Deserialize, Serialize};
use serde_json::Map;

use super::common::Engagement;
use super::source::SourceKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawItem {
    pub external_id: String,
    pub kind: SourceKind,
    pub url: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub published_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub engagement: Option<Engagement>,
    #[serde(default)]
    pub attributes: Map<String, serde_json::Value>,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
}

impl RawItem {
    /// Concatenation of title, excerpt, and body used for filter/moderation
    /// keyword matching.
    pub fn combined_text(&self) -> String {
        [self.title.as_deref(), self.excerpt.as_deref(), self.body.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn attribute_bool(&self, key: &str) -> bool {
        self.attributes.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }
}
