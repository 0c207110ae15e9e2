//! `SourceDescriptor` — input to the fetch stage, owned by the registry.

use serde::{Deserialize, Serialize};
use serde_json::Map;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceKind {
    Feed,
    Website,
    VideoChannel,
    PodcastFeed,
    PodcastDiscovery,
    Forum,
    Microblog,
    Upload,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Feed => "FEED",
            SourceKind::Website => "WEBSITE",
            SourceKind::VideoChannel => "VIDEO_CHANNEL",
            SourceKind::PodcastFeed => "PODCAST_FEED",
            SourceKind::PodcastDiscovery => "PODCAST_DISCOVERY",
            SourceKind::Forum => "FORUM",
            SourceKind::Microblog => "MICROBLOG",
            SourceKind::Upload => "UPLOAD",
        }
    }

    /// Default poll interval when `poll_interval` is zero. `None` means
    /// the kind is never scheduled (`UPLOAD`).
    pub fn default_poll_interval(&self) -> Option<std::time::Duration> {
        use std::time::Duration;
        match self {
            SourceKind::Feed => Some(Duration::from_secs(15 * 60)),
            SourceKind::VideoChannel => Some(Duration::from_secs(60 * 60)),
            SourceKind::PodcastFeed => Some(Duration::from_secs(60 * 60)),
            SourceKind::PodcastDiscovery => Some(Duration::from_secs(24 * 60 * 60)),
            SourceKind::Forum => Some(Duration::from_secs(10 * 60)),
            SourceKind::Microblog => Some(Duration::from_secs(30 * 60)),
            SourceKind::Website => Some(Duration::from_secs(15 * 60)),
            SourceKind::Upload => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
    pub id: String,
    pub kind: SourceKind,
    pub display_name: String,
    pub endpoint: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Zero means "use the kind's default".
    #[serde(default)]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub kind_specific_settings: Map<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl SourceDescriptor {
    pub fn poll_interval(&self) -> Option<std::time::Duration> {
        if self.poll_interval_secs > 0 {
            Some(std::time::Duration::from_secs(self.poll_interval_secs))
        } else {
            self.kind.default_poll_interval()
        }
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.kind_specific_settings.get(key).and_then(|v| v.as_str())
    }

    pub fn setting_str_list(&self, key: &str) -> Vec<String> {
        self.kind_specific_settings
            .get(key)
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }

    pub fn setting_f64(&self, key: &str) -> Option<f64> {
        self.kind_specific_settings.get(key).and_then(|v| v.as_f64())
    }

    pub fn is_trusted(&self) -> bool {
        self.kind_specific_settings
            .get("trusted")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_sources_are_never_scheduled() {
        assert_eq!(SourceKind::Upload.default_poll_interval(), None);
    }

    #[test]
    fn zero_poll_interval_falls_back_to_kind_default() {
        let s = SourceDescriptor {
            id: "1".into(),
            kind: SourceKind::Feed,
            display_name: "x".into(),
            endpoint: "https://example.com/feed".into(),
            enabled: true,
            poll_interval_secs: 0,
            kind_specific_settings: Map::new(),
        };
        assert_eq!(s.poll_interval(), Some(std::time::Duration::from_secs(900)));
    }
}
