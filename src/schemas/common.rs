//! Common schema primitives shared across the domain model.

use serde::{Deserialize, Serialize};

pub type SchemaVersion = String;
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Content moderation decision recorded in `attributes.moderation`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModerationDecision {
    AutoApproved,
    NeedsReview,
    AutoRejected,
}

/// Engagement counters carried on a `RawItem`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Engagement {
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub shares: u64,
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub score: f64,
}

impl Engagement {
    pub fn total(&self) -> f64 {
        self.likes as f64 + self.shares as f64 + self.comments as f64 + self.score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engagement_total_sums_fields() {
        let e = Engagement { likes: 10, shares: 2, comments: 3, views: 100, score: 1.5 };
        assert_eq!(e.total(), 16.5);
    }
}
