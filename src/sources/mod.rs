//! Source-kind dispatch for the fetch stage.
//!
//! A closed, tagged-variant mapping from `SourceKind` to an adapter —
//! not a dynamic registry of arbitrary callables — so adding a kind is a
//! compile error everywhere the match isn't extended.

pub mod feed;
pub mod forum;
pub mod microblog;
pub mod podcast_discovery;
pub mod upload;
pub mod video_channel;
pub mod website;

use std::sync::Arc;

use crate::error::Result;
use crate::job_store::JobStore;
use crate::schemas::raw_item::RawItem;
use crate::schemas::source::{SourceDescriptor, SourceKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchCounts {
    pub fetched: u64,
    pub skipped: u64,
    pub errors: u64,
}

#[derive(Debug, Default)]
pub struct FetchOutput {
    pub items: Vec<RawItem>,
    pub next_cursor: Option<String>,
    pub more: bool,
    pub counts: FetchCounts,
}

impl FetchOutput {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Shared collaborators an adapter may need: an HTTP client and, for
/// discovery-style adapters, the job store to fan out new `FetchJob`s.
pub struct AdapterContext {
    pub http: reqwest::Client,
    pub job_store: Arc<dyn JobStore>,
}

pub async fn dispatch(ctx: &AdapterContext, source: &SourceDescriptor, cursor: Option<String>) -> Result<FetchOutput> {
    match source.kind {
        SourceKind::Feed | SourceKind::PodcastFeed => feed::fetch(ctx, source, cursor).await,
        SourceKind::Website => website::fetch(ctx, source, cursor).await,
        SourceKind::VideoChannel => video_channel::fetch(ctx, source, cursor).await,
        SourceKind::PodcastDiscovery => podcast_discovery::fetch(ctx, source, cursor).await,
        SourceKind::Forum => forum::fetch(ctx, source, cursor).await,
        SourceKind::Microblog => microblog::fetch(ctx, source, cursor).await,
        SourceKind::Upload => upload::fetch(ctx, source, cursor).await,
    }
}
