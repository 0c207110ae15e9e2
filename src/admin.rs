//! Thin admin/management HTTP surface: manual source triggers, queue
//! depth inspection, and manual feed discovery. Deliberately outside the
//! core pipeline — it only calls into `SourceRegistry`'s and `JobStore`'s
//! public APIs, mirroring the hyper server wiring `metrics.rs` uses for
//! `/metrics`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::job_store::JobStore;
use crate::registry::SourceRegistry;
use crate::schemas::source::SourceKind;

pub struct AdminState {
    pub registry: Arc<SourceRegistry>,
    pub store: Arc<dyn JobStore>,
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

async fn trigger_source(state: &AdminState, id: &str) -> Response<Full<Bytes>> {
    let Some(source) = state.registry.get(id) else {
        return json_response(StatusCode::NOT_FOUND, serde_json::json!({"error": "unknown source"}));
    };

    match state.registry.trigger_now(&source).await {
        Ok(job_id) => json_response(StatusCode::ACCEPTED, serde_json::json!({"jobId": job_id})),
        Err(err) => {
            warn!(source_id = id, error = %err, "admin trigger failed");
            json_response(StatusCode::INTERNAL_SERVER_ERROR, serde_json::json!({"error": err.to_string()}))
        }
    }
}

async fn queue_counts(state: &AdminState, queue: &str) -> Response<Full<Bytes>> {
    match state.store.counts(queue).await {
        Ok(counts) => json_response(
            StatusCode::OK,
            serde_json::json!({
                "waiting": counts.waiting,
                "active": counts.active,
                "delayed": counts.delayed,
                "completed": counts.completed,
                "failed": counts.failed,
            }),
        ),
        Err(err) => {
            warn!(queue, error = %err, "admin queue counts lookup failed");
            json_response(StatusCode::INTERNAL_SERVER_ERROR, serde_json::json!({"error": err.to_string()}))
        }
    }
}

/// Manually triggers every registered `PODCAST_DISCOVERY` source.
async fn trigger_discovery(state: &AdminState) -> Response<Full<Bytes>> {
    let discovery_sources: Vec<_> =
        state.registry.list().into_iter().filter(|s| s.kind == SourceKind::PodcastDiscovery).collect();

    let mut triggered = 0usize;
    for source in &discovery_sources {
        match state.registry.trigger_now(source).await {
            Ok(_) => triggered += 1,
            Err(err) => warn!(source_id = %source.id, error = %err, "failed to trigger discovery source"),
        }
    }

    json_response(StatusCode::ACCEPTED, serde_json::json!({"triggered": triggered}))
}

async fn handle(req: Request<Incoming>, state: Arc<AdminState>) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let trimmed = path.trim_matches('/');
    let segments: Vec<&str> = trimmed.split('/').collect();

    let response = match (&method, segments.as_slice()) {
        (&Method::POST, ["admin", "sources", id, "trigger"]) => trigger_source(&state, id).await,
        (&Method::GET, ["admin", "queues", queue, "counts"]) => queue_counts(&state, queue).await,
        (&Method::POST, ["admin", "sources", "discover"]) => trigger_discovery(&state).await,
        _ => json_response(StatusCode::NOT_FOUND, serde_json::json!({"error": "not found"})),
    };

    Ok(response)
}

pub async fn start_admin_server(addr: SocketAddr, state: Arc<AdminState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(address = %addr, "admin server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle(req, state.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!(error = %e, "error serving admin connection");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn trigger_route_segments_parse_as_expected() {
        let path = "/admin/sources/feed-123/trigger";
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        assert_eq!(segments, ["admin", "sources", "feed-123", "trigger"]);
    }

    #[test]
    fn queue_counts_route_segments_parse_as_expected() {
        let path = "/admin/queues/fetch/counts";
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        assert_eq!(segments, ["admin", "queues", "fetch", "counts"]);
    }
}
