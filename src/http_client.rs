//! Resilient HTTP client: concurrency limiting + exponential backoff with
//! jitter on retryable statuses. Per-dependency circuit breaking and
//! per-(source_kind, source_id) rate limiting are layered on top by
//! callers (`circuit_breaker::CircuitBreakerRegistry`, `rate_limiter::RateLimiter`)
//! rather than baked into this client, so the same client instance can
//! back several independently-gated upstreams.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Request, Response, StatusCode};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::{IngestionError, Result};

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub max_concurrent_requests: usize,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub retry_multiplier: f64,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 10,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_retries: 3,
            initial_retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(30),
            retry_multiplier: 2.0,
            user_agent: format!("content-ingestion/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

pub struct ResilientHttpClient {
    client: Client,
    semaphore: Arc<Semaphore>,
    config: HttpClientConfig,
}

impl ResilientHttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            config,
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(HttpClientConfig::default())
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Executes a request with retry logic (exponential backoff + jitter).
    /// Non-retryable 4xx responses surface as `UpstreamRejected` and are
    /// returned immediately without retrying.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| IngestionError::InternalError("http semaphore closed".to_string()))?;

        let method = request.method().clone();
        let url = request.url().clone();

        debug!(%method, %url, "executing http request");

        let mut attempt = 0u32;
        let mut delay = self.config.initial_retry_delay;

        loop {
            attempt += 1;
            let req = request
                .try_clone()
                .ok_or_else(|| IngestionError::InternalError("request body not cloneable for retry".to_string()))?;

            match self.client.execute(req).await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if Self::is_retryable_status(status) && attempt <= self.config.max_retries {
                        warn!(%status, attempt, max_retries = self.config.max_retries, "retryable upstream status");
                        self.sleep_with_jitter(&mut delay).await;
                        continue;
                    }
                    let body = response.text().await.unwrap_or_default();
                    return Err(IngestionError::UpstreamRejected { status: status.as_u16(), message: body });
                }
                Err(err) => {
                    if (err.is_timeout() || err.is_connect()) && attempt <= self.config.max_retries {
                        warn!(error = %err, attempt, "transient http error, retrying");
                        self.sleep_with_jitter(&mut delay).await;
                        continue;
                    }
                    return Err(IngestionError::UpstreamUnavailable(err.to_string()));
                }
            }
        }
    }

    async fn sleep_with_jitter(&self, delay: &mut Duration) {
        let jitter = 0.5 + rand::random::<f64>();
        let jittered = Duration::from_secs_f64(delay.as_secs_f64() * jitter);
        tokio::time::sleep(jittered).await;
        *delay = std::cmp::min(
            Duration::from_secs_f64(delay.as_secs_f64() * self.config.retry_multiplier),
            self.config.max_retry_delay,
        );
    }

    pub fn is_retryable_status(status: StatusCode) -> bool {
        matches!(
            status,
            StatusCode::TOO_MANY_REQUESTS
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
                | StatusCode::BAD_GATEWAY
                | StatusCode::REQUEST_TIMEOUT
        )
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_teacher_tuning() {
        let config = HttpClientConfig::default();
        assert_eq!(config.max_concurrent_requests, 10);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn retryable_status_matches_taxonomy() {
        assert!(ResilientHttpClient::is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(ResilientHttpClient::is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!ResilientHttpClient::is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!ResilientHttpClient::is_retryable_status(StatusCode::UNAUTHORIZED));
    }
}
