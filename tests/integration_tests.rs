//! Black-box integration tests against the CMS collaborator's wire
//! contract, mocked with wiremock. Verifies the request/response shapes
//! the pipeline's `CmsClient` depends on, without linking the crate's
//! internal modules (the binary exposes no library target).

use std::time::Duration;

use serde_json::json;
use sha2::{Digest, Sha256};
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn canonicalize(url_str: &str) -> String {
    let mut url = Url::parse(url_str).unwrap();
    url.set_fragment(None);
    if let Some(host) = url.host_str() {
        let lower = host.to_lowercase();
        url.set_host(Some(&lower)).unwrap();
    }
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !["ref", "source"].contains(&k.as_ref()) && !k.starts_with("utm_"))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    url.set_query(None);
    if !kept.is_empty() {
        let query = kept.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");
        url.set_query(Some(&query));
    }
    let mut p = url.path().to_string();
    while p.len() > 1 && p.ends_with('/') {
        p.pop();
    }
    url.set_path(&p);
    url.to_string()
}

#[test]
fn canonicalize_url_strips_tracking_params_and_fragment() {
    let a = canonicalize("https://Example.com/Articles/42/?utm_source=newsletter&ref=feed#section-2");
    let b = canonicalize("https://example.com/Articles/42");
    assert_eq!(a, b);
}

#[test]
fn canonicalize_url_collapses_trailing_slash() {
    assert_eq!(canonicalize("https://example.com/post/"), canonicalize("https://example.com/post"));
}

#[test]
fn canonicalize_url_keeps_non_tracking_query_params() {
    let canonical = canonicalize("https://example.com/search?q=rust&utm_campaign=spring");
    assert!(canonical.contains("q=rust"));
    assert!(!canonical.contains("utm_campaign"));
}

#[test]
fn dedup_hash_fallback_is_deterministic() {
    let content = format!("{}|{}", "A Title", "2024-01-15T10:00:00Z");
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let first = hex::encode(hasher.finalize());

    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let second = hex::encode(hasher.finalize());

    assert_eq!(first, second);
    assert_eq!(first.len(), 64);
}

/// Exercises the `create_or_get` request/response contract the
/// normalize stage depends on: bearer auth, idempotency key present,
/// JSON body matches the collaborator's documented shape.
#[tokio::test]
async fn create_or_get_round_trips_through_mock_collaborator() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/internal/content-items"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "content-123",
            "status": "PENDING",
            "created": true
        })))
        .mount(&mock_server)
        .await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/internal/content-items", mock_server.uri()))
        .bearer_auth("test-token")
        .json(&json!({
            "idempotencyKey": "https://example.com/articles/42",
            "type": "ARTICLE",
            "source": "feed",
            "status": "PENDING",
            "title": "Example Article",
            "sourceName": "example.com",
            "originalUrl": "https://example.com/articles/42",
            "metadata": {}
        }))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["id"], "content-123");
    assert!(body["created"].as_bool().unwrap());
}

#[tokio::test]
async fn update_status_patches_failure_reason_on_media_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/internal/content-items/content-123/status"))
        .and(body_json(json!({"status": "FAILED", "failureReason": "ffmpeg timed out"})))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let client = reqwest::Client::new();
    let response = client
        .patch(format!("{}/internal/content-items/content-123/status", mock_server.uri()))
        .json(&json!({"status": "FAILED", "failureReason": "ffmpeg timed out"}))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
}

#[tokio::test]
async fn transcriber_rejects_oversized_upload_with_client_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/asr"))
        .respond_with(ResponseTemplate::new(413).set_body_json(json!({"error": "payload too large"})))
        .mount(&mock_server)
        .await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/asr", mock_server.uri()))
        .body(vec![0u8; 1024])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn rate_limited_upstream_response_carries_retry_hint() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
        .mount(&mock_server)
        .await;

    let client = reqwest::Client::new();
    let response = tokio::time::timeout(
        Duration::from_secs(5),
        client.get(format!("{}/feed", mock_server.uri())).send(),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers().get("retry-after").unwrap(), "2");
}
