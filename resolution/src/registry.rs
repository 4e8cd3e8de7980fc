//! Issue registry.
//!
//! Issues are created explicitly or when a complaint cluster crosses the
//! tracking threshold, updated as complaint counts grow, and moved to
//! resolved and verified by the resolution engine. Every write is a
//! compare-and-swap against the record version.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::TrackingConfig;
use crate::locks::KeyedMutex;
use crate::store::{modify, KeyedStore, MemoryStore, StoreError};
use crate::timeline::{IssueTimeline, TimelineEventType};
use crate::types::{Attestation, ComplaintCluster, Issue, IssueStatus, IssueUpdate, NewIssue};

/// Compare-and-swap attempts before a write gives up.
const DEFAULT_MAX_ATTEMPTS: u32 = 8;

/// Error types for registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Issue not found: {0}")]
    NotFound(String),

    #[error("Issue already exists: {0}")]
    Duplicate(String),

    #[error("Invalid issue: {0}")]
    Invalid(String),

    #[error("Invalid status transition: {} -> {}", .from.as_str(), .to.as_str())]
    InvalidTransition { from: IssueStatus, to: IssueStatus },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Registry of tracked issues.
pub struct IssueRegistry {
    store: Arc<dyn KeyedStore<Issue>>,
    tracking: TrackingConfig,
    timeline: Arc<IssueTimeline>,
    /// Serializes cluster tracking per (exchange, category)
    cluster_locks: KeyedMutex,
    max_attempts: u32,
}

impl IssueRegistry {
    /// Create a registry over the given store.
    pub fn new(store: Arc<dyn KeyedStore<Issue>>, tracking: TrackingConfig) -> Self {
        Self {
            store,
            tracking,
            timeline: Arc::new(IssueTimeline::new()),
            cluster_locks: KeyedMutex::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Create a registry backed by an in-process store with default thresholds.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::<Issue>::new()), TrackingConfig::default())
    }

    /// Share an existing timeline.
    pub fn with_timeline(mut self, timeline: Arc<IssueTimeline>) -> Self {
        self.timeline = timeline;
        self
    }

    /// Set the compare-and-swap attempt bound.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Issue event history.
    pub fn timeline(&self) -> &Arc<IssueTimeline> {
        &self.timeline
    }

    pub fn tracking(&self) -> &TrackingConfig {
        &self.tracking
    }

    /// Create an issue in the active state.
    pub async fn create_issue(&self, spec: NewIssue) -> Result<Issue, RegistryError> {
        self.insert(spec, IssueStatus::Active).await
    }

    /// Get an issue by ID.
    pub async fn get(&self, id: &str) -> Result<Issue, RegistryError> {
        debug!(issue_id = %id, "Fetching issue");
        self.store
            .get(id)
            .await?
            .map(|record| record.value)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// List issues, optionally filtered by status, oldest first.
    pub async fn list(&self, status: Option<IssueStatus>) -> Result<Vec<Issue>, RegistryError> {
        let mut issues: Vec<Issue> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|issue| status.map_or(true, |s| issue.status == s))
            .collect();
        issues.sort_by(|a, b| {
            a.first_detected
                .cmp(&b.first_detected)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(issues)
    }

    /// Merge a partial update into an issue.
    ///
    /// Zero counts and empty strings are ignored. Counts never decrease and
    /// only the open statuses can be set here.
    pub async fn update(&self, id: &str, update: IssueUpdate) -> Result<Issue, RegistryError> {
        let issue = modify(
            self.store.as_ref(),
            id,
            self.max_attempts,
            |mut issue: Issue| -> Result<Issue, RegistryError> {
                apply_update(&mut issue, &update)?;
                Ok(issue)
            },
        )
        .await?
        .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        info!(
            issue_id = %id,
            status = issue.status.as_str(),
            complaint_count = issue.complaint_count,
            "Issue updated"
        );
        self.timeline
            .record(
                id,
                TimelineEventType::Updated,
                "Issue updated",
                serde_json::to_value(&update).ok(),
            )
            .await;

        Ok(issue)
    }

    /// Track a complaint cluster reported by a collector.
    ///
    /// Returns `None` when the cluster is below the tracking threshold.
    pub async fn track_cluster(
        &self,
        cluster: ComplaintCluster,
    ) -> Result<Option<Issue>, RegistryError> {
        if cluster.exchange.trim().is_empty() || cluster.category.trim().is_empty() {
            return Err(RegistryError::Invalid(
                "exchange and category must not be empty".to_string(),
            ));
        }

        if cluster.complaint_count < self.tracking.tracking_threshold {
            debug!(
                exchange = %cluster.exchange,
                category = %cluster.category,
                complaint_count = cluster.complaint_count,
                "Cluster below tracking threshold"
            );
            return Ok(None);
        }

        let _guard = self
            .cluster_locks
            .lock(&format!("{}/{}", cluster.exchange, cluster.category))
            .await;

        let existing = self.list(None).await?.into_iter().find(|issue| {
            issue.status.is_open()
                && issue.exchange == cluster.exchange
                && issue.category == cluster.category
        });

        let target_status = if cluster.complaint_count >= self.tracking.active_threshold {
            IssueStatus::Active
        } else {
            IssueStatus::Investigating
        };

        if let Some(issue) = existing {
            if cluster.complaint_count <= issue.complaint_count {
                return Ok(Some(issue));
            }
            // Growing clusters escalate, they never cool down here
            let status = (target_status == IssueStatus::Active).then_some(IssueStatus::Active);
            let updated = self
                .update(
                    &issue.id,
                    IssueUpdate {
                        complaint_count: Some(cluster.complaint_count),
                        status,
                        ..Default::default()
                    },
                )
                .await?;
            return Ok(Some(updated));
        }

        let title = cluster.title.clone().unwrap_or_else(|| {
            format!("{} {}", cluster.exchange, cluster.category.replace('_', " "))
        });
        let spec = NewIssue {
            id: None,
            exchange: cluster.exchange,
            category: cluster.category,
            title,
            description: cluster.description.unwrap_or_default(),
            complaint_count: cluster.complaint_count,
            severity: cluster.severity,
        };
        self.insert(spec, target_status).await.map(Some)
    }

    /// Point an issue at a new resolution and mark it resolved.
    pub(crate) async fn attach_resolution(
        &self,
        issue_id: &str,
        resolution_id: &str,
    ) -> Result<Issue, RegistryError> {
        let issue = modify(
            self.store.as_ref(),
            issue_id,
            self.max_attempts,
            |mut issue: Issue| {
                if issue.status == IssueStatus::Verified {
                    return Err(RegistryError::InvalidTransition {
                        from: issue.status,
                        to: IssueStatus::Resolved,
                    });
                }
                issue.status = IssueStatus::Resolved;
                issue.resolution_id = Some(resolution_id.to_string());
                issue.attestation = None;
                issue.last_updated = Utc::now().max(issue.last_updated);
                Ok(issue)
            },
        )
        .await?
        .ok_or_else(|| RegistryError::NotFound(issue_id.to_string()))?;

        info!(issue_id = %issue_id, resolution_id = %resolution_id, "Issue resolved");
        self.timeline
            .record(
                issue_id,
                TimelineEventType::Resolved,
                "Resolution created",
                Some(serde_json::json!({ "resolution_id": resolution_id })),
            )
            .await;

        Ok(issue)
    }

    /// Copy an attestation onto the issue and mark it verified.
    ///
    /// Skipped when the issue no longer points at `resolution_id`.
    pub(crate) async fn attach_attestation(
        &self,
        issue_id: &str,
        resolution_id: &str,
        attestation: &Attestation,
    ) -> Result<Option<Issue>, RegistryError> {
        let mut current = true;
        let issue = modify(
            self.store.as_ref(),
            issue_id,
            self.max_attempts,
            |mut issue: Issue| {
                current = issue.resolution_id.as_deref() == Some(resolution_id);
                if current {
                    issue.status = IssueStatus::Verified;
                    issue.attestation = Some(attestation.clone());
                    issue.last_updated = Utc::now().max(issue.last_updated);
                }
                Ok::<_, RegistryError>(issue)
            },
        )
        .await?
        .ok_or_else(|| RegistryError::NotFound(issue_id.to_string()))?;

        if !current {
            warn!(
                issue_id = %issue_id,
                resolution_id = %resolution_id,
                "Attestation belongs to a superseded resolution, issue left unchanged"
            );
            return Ok(None);
        }

        info!(
            issue_id = %issue_id,
            attestation_id = attestation.id,
            "Issue verified"
        );
        self.timeline
            .record(
                issue_id,
                TimelineEventType::Attested,
                "Resolution attested on ledger",
                Some(serde_json::json!({
                    "resolution_id": resolution_id,
                    "attestation_id": attestation.id,
                    "transaction_hash": attestation.transaction_hash,
                })),
            )
            .await;

        Ok(Some(issue))
    }

    async fn insert(&self, spec: NewIssue, status: IssueStatus) -> Result<Issue, RegistryError> {
        for (field, value) in [
            ("exchange", &spec.exchange),
            ("category", &spec.category),
            ("title", &spec.title),
        ] {
            if value.trim().is_empty() {
                return Err(RegistryError::Invalid(format!("{} must not be empty", field)));
            }
        }

        let id = match spec.id {
            Some(id) if id.trim().is_empty() => {
                return Err(RegistryError::Invalid("id must not be empty".to_string()))
            }
            Some(id) => id,
            None => uuid::Uuid::new_v4().to_string(),
        };

        let now = Utc::now();
        let issue = Issue {
            id: id.clone(),
            exchange: spec.exchange,
            category: spec.category,
            title: spec.title,
            description: spec.description,
            first_detected: now,
            last_updated: now,
            complaint_count: spec.complaint_count,
            severity: spec.severity,
            status,
            resolution_id: None,
            attestation: None,
        };

        match self.store.compare_and_swap(&id, None, issue.clone()).await {
            Ok(_) => {}
            Err(StoreError::Conflict { .. }) => return Err(RegistryError::Duplicate(id)),
            Err(e) => return Err(e.into()),
        }

        info!(
            issue_id = %issue.id,
            exchange = %issue.exchange,
            category = %issue.category,
            status = issue.status.as_str(),
            "Issue created"
        );
        self.timeline
            .record(
                &issue.id,
                TimelineEventType::Detected,
                format!("Issue detected with {} complaints", issue.complaint_count),
                None,
            )
            .await;

        Ok(issue)
    }
}

fn apply_update(issue: &mut Issue, update: &IssueUpdate) -> Result<(), RegistryError> {
    if let Some(count) = update.complaint_count.filter(|c| *c > 0) {
        if count < issue.complaint_count {
            return Err(RegistryError::Invalid(format!(
                "complaint count cannot decrease ({} -> {})",
                issue.complaint_count, count
            )));
        }
        issue.complaint_count = count;
    }

    if let Some(severity) = update.severity {
        issue.severity = severity;
    }

    if let Some(status) = update.status.filter(|s| *s != issue.status) {
        if !issue.status.is_open() || !status.is_open() {
            return Err(RegistryError::InvalidTransition {
                from: issue.status,
                to: status,
            });
        }
        issue.status = status;
    }

    if let Some(title) = update.title.as_ref().filter(|t| !t.trim().is_empty()) {
        issue.title = title.clone();
    }
    if let Some(description) = update.description.as_ref().filter(|d| !d.trim().is_empty()) {
        issue.description = description.clone();
    }

    issue.last_updated = Utc::now().max(issue.last_updated);
    Ok(())
}
