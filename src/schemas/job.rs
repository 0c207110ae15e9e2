//! Job payloads and the queue-level envelope.
//!
//! `Job` is a closed, tagged-variant dispatch surface rather than an open
//! registry: every stage worker matches on it exhaustively, so adding a
//! new job kind is a compile error everywhere it isn't handled yet.

use serde::{Deserialize, Serialize};
use serde_json::Map;

use super::canonical_item::ContentType;
use super::raw_item::RawItem;
use super::source::SourceKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    Schedule,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaOperation {
    Download,
    Transcode,
    Thumbnail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentOperation {
    Transcript,
    Embedding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "job_type", rename_all = "snake_case")]
pub enum Job {
    FetchJob {
        source_id: String,
        kind: SourceKind,
        settings: Map<String, serde_json::Value>,
        #[serde(default)]
        cursor: Option<String>,
        triggered_by: TriggeredBy,
        triggered_at: chrono::DateTime<chrono::Utc>,
    },
    NormalizeJob {
        source_id: String,
        kind: SourceKind,
        raw_items: Vec<RawItem>,
        source_settings: Map<String, serde_json::Value>,
        parent_fetch_id: String,
    },
    MediaJob {
        content_id: String,
        #[serde(rename = "type")]
        item_type: ContentType,
        source_url: String,
        operations: Vec<MediaOperation>,
    },
    EnrichmentJob {
        content_id: String,
        #[serde(rename = "type")]
        item_type: ContentType,
        operations: Vec<EnrichmentOperation>,
        text_fields: EnrichmentTextFields,
        #[serde(default)]
        media_path: Option<String>,
        #[serde(default)]
        media_url: Option<String>,
    },
    DeadLetter {
        original_queue: String,
        original_job_id: String,
        payload: Box<Job>,
        failure_reason: String,
        failed_at: chrono::DateTime<chrono::Utc>,
        attempts: u32,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentTextFields {
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
}

impl Job {
    pub fn queue_name(&self) -> &'static str {
        match self {
            Job::FetchJob { .. } => "fetch",
            Job::NormalizeJob { .. } => "normalize",
            Job::MediaJob { .. } => "media",
            Job::EnrichmentJob { .. } => "enrichment",
            Job::DeadLetter { .. } => "dead_letter",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    pub job_id: String,
    pub queue: String,
    pub payload: Job,
    pub attempt: u32,
    pub max_attempts: u32,
    pub earliest_run_at: chrono::DateTime<chrono::Utc>,
    pub state: JobState,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub failure: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_name_matches_job_variant() {
        let job = Job::MediaJob {
            content_id: "c1".into(),
            item_type: ContentType::Video,
            source_url: "https://example.com/v.mp4".into(),
            operations: vec![MediaOperation::Download, MediaOperation::Transcode],
        };
        assert_eq!(job.queue_name(), "media");
    }
}
