//! S3-compatible object store client with deterministic keys for
//! processed media artifacts.

use tracing::{debug, info};

use crate::error::{IngestionError, Result};

fn retry_delays_ms() -> [u64; 3] {
    [1_000, 2_000, 4_000]
}

pub struct ObjectStoreConfig {
    pub bucket: String,
    pub endpoint_url: Option<String>,
    pub public_base_url: String,
    pub region: String,
}

pub struct ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_base_url: String,
}

impl ObjectStore {
    pub async fn new(config: ObjectStoreConfig) -> Result<Self> {
        let region = aws_config::Region::new(config.region.clone());
        let loaded = aws_config::from_env().region(region).load().await;

        let s3_config = if let Some(ref endpoint) = config.endpoint_url {
            aws_sdk_s3::config::Builder::from(&loaded)
                .endpoint_url(endpoint)
                .force_path_style(true)
                .build()
        } else {
            aws_sdk_s3::config::Builder::from(&loaded).build()
        };

        let client = aws_sdk_s3::Client::from_conf(s3_config);

        info!(bucket = %config.bucket, "initialized object store client");

        Ok(Self { client, bucket: config.bucket, public_base_url: config.public_base_url })
    }

    pub fn original_key(content_id: &str, ext: &str) -> String {
        format!("content/{content_id}/original.{ext}")
    }

    pub fn processed_key(content_id: &str) -> String {
        format!("content/{content_id}/processed.mp4")
    }

    pub fn thumbnail_key(content_id: &str) -> String {
        format!("content/{content_id}/thumbnail.jpg")
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, self.bucket, key)
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                if err.as_service_error().map(|e| e.is_not_found()).unwrap_or(false) {
                    Ok(false)
                } else {
                    Err(IngestionError::ObjectStoreError(err.to_string()))
                }
            }
        }
    }

    /// Uploads `body` to `key` with bounded exponential retries (3
    /// attempts, 1s/2s/4s) per the media stage's upload step.
    pub async fn upload(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String> {
        let delays = retry_delays_ms();
        let mut last_err = None;

        for (attempt, delay_ms) in std::iter::once(&0).chain(delays.iter()).enumerate() {
            if attempt > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(*delay_ms)).await;
            }

            let result = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(body.clone().into())
                .content_type(content_type)
                .send()
                .await;

            match result {
                Ok(_) => {
                    debug!(bucket = %self.bucket, key, attempt, "uploaded object");
                    return Ok(self.public_url(key));
                }
                Err(err) => last_err = Some(err),
            }
        }

        Err(IngestionError::ObjectStoreError(format!(
            "upload failed after retries: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_deterministic_per_content_id() {
        assert_eq!(ObjectStore::processed_key("abc"), "content/abc/processed.mp4");
        assert_eq!(ObjectStore::thumbnail_key("abc"), "content/abc/thumbnail.jpg");
        assert_eq!(ObjectStore::original_key("abc", "mp4"), "content/abc/original.mp4");
    }
}
