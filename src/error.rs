//! Error taxonomy for the ingestion pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    /// Missing/invalid configuration. Fail fast at startup.
    #[error("configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    /// Dependency I/O failure. Handled by breakers + retries.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// 4xx from a collaborator. Not retried, surfaced as item-level failure.
    #[error("upstream rejected request: {status} {message}")]
    UpstreamRejected { status: u16, message: String },

    /// Local or upstream throttling. Job returns successfully with empty output.
    #[error("rate limited, retry after {reset_ms}ms")]
    RateLimited { reset_ms: u64 },

    /// Malformed source item. Item skipped, counted.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Fast-fail; job retried by the job store.
    #[error("circuit open for dependency: {0}")]
    CircuitOpen(String),

    /// Download/transcode exceeded configured caps. Item marked FAILED.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Cooperative shutdown. Job returned to WAITING.
    #[error("cancelled")]
    Cancelled,

    /// Anything unexpected. Job retried, then DLQ.
    #[error("internal error: {0}")]
    InternalError(String),

    #[error("http error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("object store error: {0}")]
    ObjectStoreError(String),
}

impl IngestionError {
    /// True when the failure reflects the remote side, not our request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestionError::UpstreamUnavailable(_)
                | IngestionError::HttpError(_)
                | IngestionError::RedisError(_)
                | IngestionError::IoError(_)
                | IngestionError::InternalError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, IngestionError>;
