//! Per-issue event history.
//!
//! Records every lifecycle change of an issue so the dashboard can show how an
//! issue moved from detection to verification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Maximum events retained per issue before the oldest are pruned.
const MAX_EVENTS_PER_ISSUE: usize = 1_000;

/// Kind of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventType {
    /// Issue created
    Detected,
    /// Count, severity, status or text changed
    Updated,
    /// Resolution attached
    Resolved,
    /// Resolution attested on the ledger
    Attested,
}

/// An entry in an issue's timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Unique event ID
    pub event_id: String,
    /// Issue the event belongs to
    pub issue_id: String,
    /// When the event happened
    pub timestamp: DateTime<Utc>,
    pub event_type: TimelineEventType,
    /// Human-readable description
    pub description: String,
    /// Structured details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Timeline store for all issues.
pub struct IssueTimeline {
    /// Events per issue (oldest first)
    events: Arc<RwLock<HashMap<String, VecDeque<TimelineEvent>>>>,
    /// Maximum events to retain per issue
    max_events: usize,
}

impl IssueTimeline {
    /// Create a new timeline.
    pub fn new() -> Self {
        Self::with_max_events(MAX_EVENTS_PER_ISSUE)
    }

    /// Create with custom per-issue retention.
    pub fn with_max_events(max_events: usize) -> Self {
        Self {
            events: Arc::new(RwLock::new(HashMap::new())),
            max_events,
        }
    }

    /// Append an event, returning its ID.
    pub async fn record(
        &self,
        issue_id: &str,
        event_type: TimelineEventType,
        description: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> String {
        let event = TimelineEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            issue_id: issue_id.to_string(),
            timestamp: Utc::now(),
            event_type,
            description: description.into(),
            data,
        };
        let event_id = event.event_id.clone();

        let mut events = self.events.write().await;
        let history = events.entry(issue_id.to_string()).or_default();
        history.push_back(event);

        // Prune if over limit
        while history.len() > self.max_events {
            history.pop_front();
        }

        event_id
    }

    /// Events for an issue, oldest first.
    pub async fn for_issue(&self, issue_id: &str) -> Vec<TimelineEvent> {
        let events = self.events.read().await;
        events
            .get(issue_id)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Most recent events across all issues, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<TimelineEvent> {
        let events = self.events.read().await;
        let mut all: Vec<TimelineEvent> = events.values().flatten().cloned().collect();
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        all.truncate(limit);
        all
    }

    /// Total number of retained events.
    pub async fn count(&self) -> usize {
        let events = self.events.read().await;
        events.values().map(VecDeque::len).sum()
    }
}

impl Default for IssueTimeline {
    fn default() -> Self {
        Self::new()
    }
}
