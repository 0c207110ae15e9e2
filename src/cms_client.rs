//! HTTP client for the CMS collaborator — the authority on canonical
//! record uniqueness and storage. The pipeline only ever issues the
//! declared operations below; it never writes to a database directly.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Map;
use tracing::instrument;
use uuid::Uuid;

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::error::{IngestionError, Result};
use crate::http_client::ResilientHttpClient;
use crate::schemas::canonical_item::{CanonicalItem, ContentStatus};

const BREAKER_NAME: &str = "CMS";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrGetRequest<'a> {
    idempotency_key: &'a str,
    #[serde(rename = "type")]
    item_type: &'a str,
    source: &'a str,
    status: &'a str,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    body_text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    excerpt: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<&'a str>,
    source_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_feed_url: Option<&'a str>,
    original_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    published_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thumbnail_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_sec: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    topic_tags: &'a [String],
    metadata: &'a Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrGetResponse {
    pub id: String,
    pub status: String,
    pub created: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItemSummary {
    pub title: String,
    #[serde(default)]
    pub body_text: Option<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateStatusRequest<'a> {
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_reason: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateArtifactsRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    media_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thumbnail_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_sec: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTranscriptRequest<'a> {
    content_item_id: &'a str,
    full_text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    word_timestamps: Option<&'a serde_json::Value>,
    language: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTranscriptResponse {
    pub id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct LinkTranscriptRequest<'a> {
    transcript_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateEmbeddingRequest<'a> {
    embedding: &'a [f32],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    topic_tags: &'a [String],
}

pub struct CmsClient {
    http: Arc<ResilientHttpClient>,
    breakers: Arc<CircuitBreakerRegistry>,
    base_url: String,
    service_token: String,
    service_name: String,
}

impl CmsClient {
    pub fn new(
        http: Arc<ResilientHttpClient>,
        breakers: Arc<CircuitBreakerRegistry>,
        base_url: String,
        service_token: String,
        service_name: String,
    ) -> Self {
        Self { http, breakers, base_url, service_token, service_name }
    }

    fn correlation_header(&self) -> String {
        Uuid::new_v4().to_string()
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .inner()
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.service_token)
            .header("X-Service-Name", &self.service_name)
            .header("X-Correlation-Id", self.correlation_header())
    }

    async fn send_json<T: Serialize>(&self, method: reqwest::Method, path: &str, body: &T) -> Result<reqwest::Response> {
        let request = self.request(method, path).json(body).build()?;
        let http = self.http.clone();
        self.breakers.call(BREAKER_NAME, || async move { http.execute(request).await }).await
    }

    #[instrument(skip(self, item))]
    pub async fn create_or_get(&self, item: &CanonicalItem) -> Result<CreateOrGetResponse> {
        let body = CreateOrGetRequest {
            idempotency_key: &item.idempotency_key,
            item_type: content_type_wire(item.item_type),
            source: item.source_kind.as_str(),
            status: content_status_wire(item.status),
            title: &item.title,
            body_text: item.body_text.as_deref(),
            excerpt: item.excerpt.as_deref(),
            author: item.author.as_deref(),
            source_name: &item.source_name,
            source_feed_url: item.source_feed_url.as_deref(),
            original_url: &item.original_url,
            published_at: item.published_at,
            media_url: item.media_url.as_deref(),
            thumbnail_url: item.thumbnail_url.as_deref(),
            duration_sec: item.duration_seconds,
            topic_tags: &item.topic_tags,
            metadata: &item.attributes,
        };
        let response = self.send_json(reqwest::Method::POST, "/internal/content-items", &body).await?;
        Ok(response.json().await?)
    }

    #[instrument(skip(self))]
    pub async fn update_status(&self, content_id: &str, status: ContentStatus, failure_reason: Option<&str>) -> Result<()> {
        let body = UpdateStatusRequest { status: content_status_wire(status), failure_reason };
        self.send_json(
            reqwest::Method::PATCH,
            &format!("/internal/content-items/{content_id}/status"),
            &body,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn update_artifacts(
        &self,
        content_id: &str,
        media_url: Option<&str>,
        thumbnail_url: Option<&str>,
        duration_sec: Option<f64>,
    ) -> Result<()> {
        let body = UpdateArtifactsRequest { media_url, thumbnail_url, duration_sec };
        self.send_json(
            reqwest::Method::PATCH,
            &format!("/internal/content-items/{content_id}/artifacts"),
            &body,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, full_text))]
    pub async fn create_transcript(&self, content_id: &str, full_text: &str, language: &str) -> Result<CreateTranscriptResponse> {
        let body = CreateTranscriptRequest {
            content_item_id: content_id,
            full_text,
            summary: None,
            word_timestamps: None,
            language,
        };
        let response = self.send_json(reqwest::Method::POST, "/internal/transcripts", &body).await?;
        Ok(response.json().await?)
    }

    #[instrument(skip(self))]
    pub async fn link_transcript(&self, content_id: &str, transcript_id: &str) -> Result<()> {
        let body = LinkTranscriptRequest { transcript_id };
        self.send_json(
            reqwest::Method::PATCH,
            &format!("/internal/content-items/{content_id}/transcript"),
            &body,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, embedding))]
    pub async fn update_embedding(&self, content_id: &str, embedding: &[f32], topic_tags: &[String]) -> Result<()> {
        let body = UpdateEmbeddingRequest { embedding, topic_tags };
        self.send_json(
            reqwest::Method::PATCH,
            &format!("/internal/content-items/{content_id}/embedding"),
            &body,
        )
        .await?;
        Ok(())
    }

    /// Fetches the title/body/excerpt recorded for `content_id`, used by
    /// enrichment when a job arrived via the media stage and so never
    /// carried the item's text fields directly.
    #[instrument(skip(self))]
    pub async fn get_item(&self, content_id: &str) -> Result<ContentItemSummary> {
        let request = self.request(reqwest::Method::GET, &format!("/internal/content-items/{content_id}")).build()?;
        let http = self.http.clone();
        let response = self.breakers.call(BREAKER_NAME, || async move { http.execute(request).await }).await?;
        Ok(response.json().await?)
    }

    pub async fn health(&self) -> bool {
        match self.request(reqwest::Method::GET, "/health").send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

fn content_type_wire(t: crate::schemas::canonical_item::ContentType) -> &'static str {
    use crate::schemas::canonical_item::ContentType::*;
    match t {
        Article => "ARTICLE",
        Video => "VIDEO",
        Tweet => "TWEET",
        Comment => "COMMENT",
        Podcast => "PODCAST",
    }
}

fn content_status_wire(s: ContentStatus) -> &'static str {
    match s {
        ContentStatus::Pending => "PENDING",
        ContentStatus::Processing => "PROCESSING",
        ContentStatus::Ready => "READY",
        ContentStatus::Failed => "FAILED",
        ContentStatus::Archived => "ARCHIVED",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_wire_matches_collaborator_vocabulary() {
        assert_eq!(content_type_wire(crate::schemas::canonical_item::ContentType::Video), "VIDEO");
    }
}
