//! Media stage: download, probe, transcode, thumbnail, upload, then hand
//! off to enrichment. Download/transcode failures are fatal (job retried,
//! item marked FAILED); a thumbnail failure falls back to a
//! platform-provided thumbnail and is never fatal.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cms_client::CmsClient;
use crate::error::{IngestionError, Result};
use crate::job_store::{EnqueueOptions, JobStore};
use crate::object_store::ObjectStore;
use crate::pipeline::worker::StageHandler;
use crate::schemas::canonical_item::ContentStatus;
use crate::schemas::job::{EnrichmentOperation, EnrichmentTextFields, Job, JobEnvelope};
use crate::transcoder::{MediaCaps, MediaProbe, Transcoder};

const THUMBNAIL_AT_SECS: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TranscodeMode {
    Video,
    AudioWithPlaceholder,
}

fn transcode_mode_for(probe: &MediaProbe) -> TranscodeMode {
    if probe.has_video {
        TranscodeMode::Video
    } else {
        TranscodeMode::AudioWithPlaceholder
    }
}

pub struct MediaStageHandler {
    transcoder: Arc<Transcoder>,
    object_store: Arc<ObjectStore>,
    cms: Arc<CmsClient>,
    store: Arc<dyn JobStore>,
    caps: MediaCaps,
}

impl MediaStageHandler {
    pub fn new(transcoder: Arc<Transcoder>, object_store: Arc<ObjectStore>, cms: Arc<CmsClient>, store: Arc<dyn JobStore>) -> Self {
        Self { transcoder, object_store, cms, store, caps: MediaCaps::default() }
    }

    async fn run_pipeline(&self, content_id: &str, source_url: &str) -> Result<(String, Option<String>, Option<f64>)> {
        let processed_key = ObjectStore::processed_key(content_id);
        if self.object_store.exists(&processed_key).await? {
            info!(content_id, "processed artifact already present, skipping download/transcode");
            return Ok((self.object_store.public_url(&processed_key), None, None));
        }

        let downloaded = self.transcoder.download(content_id, source_url, &self.caps).await?;
        let probe = self.transcoder.probe(downloaded.path()).await?;

        let transcoded = match transcode_mode_for(&probe) {
            TranscodeMode::Video => self.transcoder.transcode(content_id, downloaded.path(), &self.caps).await?,
            TranscodeMode::AudioWithPlaceholder => {
                self.transcoder.transcode_audio_with_placeholder(content_id, downloaded.path(), &self.caps).await?
            }
        };

        let thumbnail_key = ObjectStore::thumbnail_key(content_id);
        let thumbnail_url = match self.transcoder.thumbnail(content_id, downloaded.path(), THUMBNAIL_AT_SECS).await {
            Ok(thumb_file) => {
                let bytes = tokio::fs::read(thumb_file.path()).await?;
                match self.object_store.upload(&thumbnail_key, bytes, "image/jpeg").await {
                    Ok(url) => Some(url),
                    Err(err) => {
                        warn!(content_id, error = %err, "thumbnail upload failed, continuing without one");
                        None
                    }
                }
            }
            Err(err) => {
                warn!(content_id, error = %err, "thumbnail extraction failed, continuing without one");
                None
            }
        };

        let processed_bytes = tokio::fs::read(transcoded.path()).await?;
        let processed_url = self.object_store.upload(&processed_key, processed_bytes, "video/mp4").await?;

        Ok((processed_url, thumbnail_url, probe.duration_seconds))
    }
}

#[async_trait]
impl StageHandler for MediaStageHandler {
    async fn handle(&self, envelope: &JobEnvelope, _cancel: &CancellationToken) -> Result<()> {
        let Job::MediaJob { content_id, item_type, source_url, .. } = &envelope.payload else {
            return Err(IngestionError::InternalError(format!(
                "media worker received non-media job: {:?}",
                envelope.payload
            )));
        };

        self.cms.update_status(content_id, ContentStatus::Processing, None).await?;

        let outcome = self.run_pipeline(content_id, source_url).await;

        let (processed_url, thumbnail_url, duration_seconds) = match outcome {
            Ok(result) => result,
            Err(err) => {
                self.cms.update_status(content_id, ContentStatus::Failed, Some(&err.to_string())).await.ok();
                return Err(err);
            }
        };

        self.cms
            .update_artifacts(content_id, Some(&processed_url), thumbnail_url.as_deref(), duration_seconds)
            .await?;

        let job = Job::EnrichmentJob {
            content_id: content_id.clone(),
            item_type: *item_type,
            operations: vec![EnrichmentOperation::Transcript, EnrichmentOperation::Embedding],
            text_fields: EnrichmentTextFields::default(),
            media_path: None,
            media_url: Some(processed_url),
        };
        self.store.enqueue("enrichment", job, EnqueueOptions::default().with_priority(2)).await?;

        info!(content_id, "media stage complete, enrichment enqueued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcode_mode_for_video_probe_is_video() {
        let probe = MediaProbe { duration_seconds: Some(30.0), has_video: true, has_audio: true };
        assert_eq!(transcode_mode_for(&probe), TranscodeMode::Video);
    }

    #[test]
    fn transcode_mode_for_audio_only_probe_is_placeholder() {
        let probe = MediaProbe { duration_seconds: Some(30.0), has_video: false, has_audio: true };
        assert_eq!(transcode_mode_for(&probe), TranscodeMode::AudioWithPlaceholder);
    }

    #[test]
    fn transcode_mode_ignores_audio_track_presence() {
        let probe = MediaProbe { duration_seconds: None, has_video: false, has_audio: false };
        assert_eq!(transcode_mode_for(&probe), TranscodeMode::AudioWithPlaceholder);
    }
}
