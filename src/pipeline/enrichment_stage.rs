//! Enrichment stage: best-effort transcript and embedding. Neither step
//! fails the job or the item; failures are logged and the item still
//! finalizes to READY. Only an unhandled error before finalization (e.g.
//! the final status write itself failing) is propagated.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cms_client::CmsClient;
use crate::embedder::{Embedder, EmbeddingModel};
use crate::error::{IngestionError, Result};
use crate::pipeline::worker::StageHandler;
use crate::schemas::canonical_item::ContentStatus;
use crate::schemas::job::{EnrichmentOperation, EnrichmentTextFields, Job, JobEnvelope};
use crate::transcoder::{MediaCaps, Transcoder};
use crate::transcriber_client::TranscriberClient;

const EMBEDDING_TEXT_SNIPPET_LEN: usize = 2000;
const EMBEDDING_TEXT_HARD_CAP: usize = 8192;

pub struct EnrichmentStageHandler<M: EmbeddingModel + 'static> {
    transcoder: Arc<Transcoder>,
    transcriber: Arc<TranscriberClient>,
    embedder: Arc<Embedder<M>>,
    cms: Arc<CmsClient>,
    caps: MediaCaps,
}

impl<M: EmbeddingModel + 'static> EnrichmentStageHandler<M> {
    pub fn new(transcoder: Arc<Transcoder>, transcriber: Arc<TranscriberClient>, embedder: Arc<Embedder<M>>, cms: Arc<CmsClient>) -> Self {
        Self { transcoder, transcriber, embedder, cms, caps: MediaCaps::default() }
    }

    /// Resolves a local audio-only file for the item's media, downloading
    /// and demuxing as needed. Returns `None` when there's no media to
    /// transcribe.
    async fn resolve_audio_path(&self, content_id: &str, media_path: Option<&str>, media_url: Option<&str>) -> Result<Option<std::path::PathBuf>> {
        let source = match (media_path, media_url) {
            (Some(path), _) => {
                let probe = self.transcoder.probe(std::path::Path::new(path)).await?;
                if probe.has_video {
                    let audio = self.transcoder.extract_audio(content_id, std::path::Path::new(path), &self.caps).await?;
                    return Ok(Some(audio.keep()));
                }
                return Ok(Some(std::path::PathBuf::from(path)));
            }
            (None, Some(url)) => url,
            (None, None) => return Ok(None),
        };

        let downloaded = self.transcoder.download(content_id, source, &self.caps).await?;
        let probe = self.transcoder.probe(downloaded.path()).await?;
        if probe.has_video {
            let audio = self.transcoder.extract_audio(content_id, downloaded.path(), &self.caps).await?;
            Ok(Some(audio.keep()))
        } else {
            Ok(Some(downloaded.keep()))
        }
    }

    async fn run_transcript(&self, content_id: &str, media_path: Option<&str>, media_url: Option<&str>) -> Option<String> {
        let audio_path = match self.resolve_audio_path(content_id, media_path, media_url).await {
            Ok(path) => path?,
            Err(err) => {
                warn!(content_id, error = %err, "failed to prepare audio for transcription, skipping");
                return None;
            }
        };

        let bytes = match tokio::fs::read(&audio_path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(content_id, error = %err, "failed to read audio file for transcription");
                return None;
            }
        };
        let _ = tokio::fs::remove_file(&audio_path).await;

        let file_name = audio_path.file_name().and_then(|n| n.to_str()).unwrap_or("audio").to_string();
        let transcript = match self.transcriber.transcribe(bytes, &file_name).await {
            Ok(transcript) => transcript,
            Err(err) => {
                warn!(content_id, error = %err, "transcription failed, skipping transcript");
                return None;
            }
        };

        if transcript.full_text.trim().is_empty() {
            return None;
        }

        match self.cms.create_transcript(content_id, &transcript.full_text, &transcript.language).await {
            Ok(created) => {
                if let Err(err) = self.cms.link_transcript(content_id, &created.id).await {
                    warn!(content_id, error = %err, "failed to link transcript to item");
                }
            }
            Err(err) => warn!(content_id, error = %err, "failed to persist transcript"),
        }

        Some(transcript.full_text)
    }

    async fn text_fields_for(&self, content_id: &str, text_fields: &EnrichmentTextFields) -> EnrichmentTextFields {
        if !text_fields.title.is_empty() {
            return text_fields.clone();
        }
        match self.cms.get_item(content_id).await {
            Ok(summary) => EnrichmentTextFields { title: summary.title, body: summary.body_text, excerpt: summary.excerpt },
            Err(err) => {
                warn!(content_id, error = %err, "failed to backfill text fields for embedding");
                text_fields.clone()
            }
        }
    }

    async fn run_embedding(&self, content_id: &str, text_fields: &EnrichmentTextFields, transcript: Option<&str>) {
        let input = build_embedding_input(text_fields, transcript);

        let embedding = match self.embedder.embed(&input).await {
            Ok(embedding) => embedding,
            Err(err) => {
                warn!(content_id, error = %err, "embedding failed, skipping");
                return;
            }
        };

        if let Err(err) = self.cms.update_embedding(content_id, &embedding, &[]).await {
            warn!(content_id, error = %err, "failed to persist embedding");
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Builds the text handed to the embedder: title, then a transcript
/// snippet (preferred) or the body snippet, then the excerpt if it adds
/// anything the title/transcript didn't already cover.
fn build_embedding_input(text_fields: &EnrichmentTextFields, transcript: Option<&str>) -> String {
    let snippet = transcript
        .map(|t| truncate_chars(t, EMBEDDING_TEXT_SNIPPET_LEN))
        .or_else(|| text_fields.body.as_deref().map(|b| truncate_chars(b, EMBEDDING_TEXT_SNIPPET_LEN)))
        .unwrap_or_default();

    let mut input = format!("{} {}", text_fields.title, snippet);
    if let Some(excerpt) = text_fields.excerpt.as_deref() {
        if excerpt != text_fields.title && Some(excerpt) != transcript {
            input.push(' ');
            input.push_str(excerpt);
        }
    }

    truncate_chars(&input, EMBEDDING_TEXT_HARD_CAP)
}

#[async_trait]
impl<M: EmbeddingModel + 'static> StageHandler for EnrichmentStageHandler<M> {
    async fn handle(&self, envelope: &JobEnvelope, _cancel: &CancellationToken) -> Result<()> {
        let Job::EnrichmentJob { content_id, operations, text_fields, media_path, media_url, .. } = &envelope.payload else {
            return Err(IngestionError::InternalError(format!(
                "enrichment worker received non-enrichment job: {:?}",
                envelope.payload
            )));
        };

        let text_fields = self.text_fields_for(content_id, text_fields).await;

        let transcript = if operations.contains(&EnrichmentOperation::Transcript) {
            self.run_transcript(content_id, media_path.as_deref(), media_url.as_deref()).await
        } else {
            None
        };

        if operations.contains(&EnrichmentOperation::Embedding) {
            self.run_embedding(content_id, &text_fields, transcript.as_deref()).await;
        }

        self.cms.update_status(content_id, ContentStatus::Ready, None).await?;

        info!(content_id, transcribed = transcript.is_some(), "enrichment stage complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(title: &str, body: Option<&str>, excerpt: Option<&str>) -> EnrichmentTextFields {
        EnrichmentTextFields { title: title.to_string(), body: body.map(str::to_string), excerpt: excerpt.map(str::to_string) }
    }

    #[test]
    fn truncate_chars_leaves_short_strings_untouched() {
        assert_eq!(truncate_chars("hello", 10), "hello");
    }

    #[test]
    fn truncate_chars_caps_at_char_boundary() {
        assert_eq!(truncate_chars("hello world", 5), "hello");
    }

    #[test]
    fn build_embedding_input_prefers_transcript_over_body() {
        let text_fields = fields("Title", Some("body text"), None);
        let input = build_embedding_input(&text_fields, Some("transcript text"));
        assert!(input.contains("transcript text"));
        assert!(!input.contains("body text"));
    }

    #[test]
    fn build_embedding_input_falls_back_to_body_without_transcript() {
        let text_fields = fields("Title", Some("body text"), None);
        let input = build_embedding_input(&text_fields, None);
        assert!(input.contains("body text"));
    }

    #[test]
    fn build_embedding_input_appends_excerpt_when_distinct() {
        let text_fields = fields("Title", Some("body text"), Some("a distinct excerpt"));
        let input = build_embedding_input(&text_fields, None);
        assert!(input.contains("a distinct excerpt"));
    }

    #[test]
    fn build_embedding_input_skips_excerpt_matching_title_or_transcript() {
        let text_fields = fields("Title", None, Some("Title"));
        let input = build_embedding_input(&text_fields, None);
        assert_eq!(input.matches("Title").count(), 1);

        let text_fields = fields("Title", None, Some("same as transcript"));
        let input = build_embedding_input(&text_fields, Some("same as transcript"));
        assert_eq!(input.matches("same as transcript").count(), 1);
    }

    #[test]
    fn build_embedding_input_is_capped_at_hard_limit() {
        let long_body = "a".repeat(EMBEDDING_TEXT_HARD_CAP + 500);
        let text_fields = fields("Title", Some(&long_body), None);
        let input = build_embedding_input(&text_fields, None);
        assert!(input.chars().count() <= EMBEDDING_TEXT_HARD_CAP);
    }
}
