//! Configuration for the ingestion service — loaded from environment
//! variables (optionally via a `.env` file) through the same
//! `config`/`dotenvy` layering the rest of this codebase's ambient stack
//! uses.

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // CMS collaborator
    pub collaborator_base_url: String,
    pub collaborator_service_token: String,
    #[serde(default = "default_service_name")]
    pub collaborator_service_name: String,

    // Durable job store / queue backend
    pub queue_store_url: String,

    // Object store
    pub object_store_endpoint: Option<String>,
    pub object_store_bucket: String,
    pub object_store_access_key: Option<String>,
    pub object_store_secret_key: Option<String>,
    pub object_store_public_url: String,
    #[serde(default = "default_object_store_region")]
    pub object_store_region: String,

    // Transcription collaborator
    pub transcriber_url: String,

    // Embedding model
    #[serde(default = "default_embedding_model_name")]
    pub embedding_model_name: String,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    // Media processing
    #[serde(default = "default_media_temp_dir")]
    pub media_temp_dir: PathBuf,

    // Worker runtime
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    // Circuit breaker
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,
    #[serde(default = "default_breaker_reset_timeout_ms")]
    pub breaker_reset_timeout_ms: u64,
    #[serde(default = "default_breaker_half_open_probes")]
    pub breaker_half_open_probes: u32,

    // Rate limiting
    #[serde(default = "default_rate_limit_window_ms")]
    pub rate_limit_window_ms: i64,
    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: u64,

    // Source registry
    pub source_allowlist_path: Option<PathBuf>,

    // Per-provider API keys (absence disables the corresponding adapter)
    pub video_channel_api_key: Option<String>,
    pub forum_api_key: Option<String>,
    pub microblog_api_key: Option<String>,

    // Ambient: logging
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,

    // Ambient: metrics
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,

    // Ambient: admin/management HTTP surface
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,
}

fn default_service_name() -> String {
    "ingestion-pipeline".to_string()
}

fn default_object_store_region() -> String {
    "us-east-1".to_string()
}

fn default_embedding_model_name() -> String {
    "hash-feature-v1".to_string()
}

fn default_embedding_dimension() -> usize {
    384
}

fn default_media_temp_dir() -> PathBuf {
    PathBuf::from("/tmp/ingestion-media")
}

fn default_worker_concurrency() -> usize {
    5
}

fn default_breaker_failure_threshold() -> u32 {
    5
}

fn default_breaker_reset_timeout_ms() -> u64 {
    30_000
}

fn default_breaker_half_open_probes() -> u32 {
    3
}

fn default_rate_limit_window_ms() -> i64 {
    60_000
}

fn default_rate_limit_max_requests() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_admin_port() -> u16 {
    9091
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__").try_parsing(true))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Fails fast at startup on missing/invalid required configuration,
    /// rather than surfacing a confusing error from deep in a worker.
    pub fn validate(&self) -> Result<()> {
        if self.collaborator_base_url.is_empty() {
            anyhow::bail!("collaborator_base_url must not be empty");
        }
        if self.queue_store_url.is_empty() {
            anyhow::bail!("queue_store_url must not be empty");
        }
        if self.transcriber_url.is_empty() {
            anyhow::bail!("transcriber_url must not be empty");
        }
        if self.embedding_dimension == 0 {
            anyhow::bail!("embedding_dimension must be greater than zero");
        }
        Ok(())
    }

    pub fn has_video_channel_provider(&self) -> bool {
        self.video_channel_api_key.is_some()
    }

    pub fn has_forum_provider(&self) -> bool {
        self.forum_api_key.is_some()
    }

    pub fn has_microblog_provider(&self) -> bool {
        self.microblog_api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        Config {
            collaborator_base_url: "https://cms.internal".to_string(),
            collaborator_service_token: "token".to_string(),
            collaborator_service_name: default_service_name(),
            queue_store_url: "redis://localhost:6379".to_string(),
            object_store_endpoint: None,
            object_store_bucket: "content-media".to_string(),
            object_store_access_key: None,
            object_store_secret_key: None,
            object_store_public_url: "https://cdn.example.com".to_string(),
            object_store_region: default_object_store_region(),
            transcriber_url: "https://transcriber.internal".to_string(),
            embedding_model_name: default_embedding_model_name(),
            embedding_dimension: default_embedding_dimension(),
            media_temp_dir: default_media_temp_dir(),
            worker_concurrency: default_worker_concurrency(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_reset_timeout_ms: default_breaker_reset_timeout_ms(),
            breaker_half_open_probes: default_breaker_half_open_probes(),
            rate_limit_window_ms: default_rate_limit_window_ms(),
            rate_limit_max_requests: default_rate_limit_max_requests(),
            source_allowlist_path: None,
            video_channel_api_key: None,
            forum_api_key: None,
            microblog_api_key: None,
            log_level: default_log_level(),
            log_json: false,
            metrics_port: default_metrics_port(),
            metrics_enabled: default_metrics_enabled(),
            admin_port: default_admin_port(),
        }
    }

    #[test]
    fn default_breaker_and_rate_limit_values_match_resource_model() {
        let config = sample_config();
        assert_eq!(config.breaker_failure_threshold, 5);
        assert_eq!(config.breaker_reset_timeout_ms, 30_000);
        assert_eq!(config.breaker_half_open_probes, 3);
        assert_eq!(config.rate_limit_max_requests, 60);
    }

    #[test]
    fn validate_rejects_missing_required_fields() {
        let mut config = sample_config();
        config.collaborator_base_url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn provider_keys_gate_adapters() {
        let mut config = sample_config();
        assert!(!config.has_video_channel_provider());
        config.video_channel_api_key = Some("key".to_string());
        assert!(config.has_video_channel_provider());
    }
}
