//! HTTP client for the ASR (speech-to-text) collaborator. The response
//! shape isn't guaranteed: some deployments return `{text, segments?}`
//! JSON, others a bare text body. Both are accepted and normalized to
//! the same `Transcript`.

use std::sync::Arc;

use serde::Deserialize;
use tracing::instrument;

use crate::error::Result;
use crate::http_client::ResilientHttpClient;

#[derive(Debug, Clone)]
pub struct Transcript {
    pub full_text: String,
    pub language: String,
}

#[derive(Debug, Deserialize)]
struct JsonTranscriptResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetectLanguageResponse {
    language: String,
}

pub struct TranscriberClient {
    http: Arc<ResilientHttpClient>,
    base_url: String,
}

impl TranscriberClient {
    pub fn new(http: Arc<ResilientHttpClient>, base_url: String) -> Self {
        Self { http, base_url }
    }

    #[instrument(skip(self, audio_bytes))]
    pub async fn transcribe(&self, audio_bytes: Vec<u8>, file_name: &str) -> Result<Transcript> {
        let part = reqwest::multipart::Part::bytes(audio_bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("audio", part);

        let request = self
            .http
            .inner()
            .post(format!("{}/asr", self.base_url))
            .multipart(form)
            .build()?;

        let response = self.http.execute(request).await?;
        let body = response.text().await?;

        let (full_text, language) = match serde_json::from_str::<JsonTranscriptResponse>(&body) {
            Ok(parsed) => (parsed.text, parsed.language),
            Err(_) => (body, None),
        };

        let language = match language {
            Some(lang) => lang,
            None => self.detect_language(&full_text).await.unwrap_or_else(|_| "und".to_string()),
        };

        Ok(Transcript { full_text, language })
    }

    #[instrument(skip(self, text))]
    pub async fn detect_language(&self, text: &str) -> Result<String> {
        let request = self
            .http
            .inner()
            .post(format!("{}/detect-language", self.base_url))
            .json(&serde_json::json!({ "text": text }))
            .build()?;

        let response = self.http.execute(request).await?;
        let parsed: DetectLanguageResponse = response.json().await?;
        Ok(parsed.language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_response_parses_text_and_language() {
        let body = r#"{"text": "hello world", "language": "en"}"#;
        let parsed: JsonTranscriptResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.text, "hello world");
        assert_eq!(parsed.language.as_deref(), Some("en"));
    }

    #[test]
    fn plain_text_body_fails_json_parse_and_falls_back() {
        let body = "just a plain transcript, no json here";
        assert!(serde_json::from_str::<JsonTranscriptResponse>(body).is_err());
    }
}
