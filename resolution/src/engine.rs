//! Resolution engine.
//!
//! Turns evidence into resolution records: validates it, scores it, checks
//! the acceptance criteria and links the result to its issue. Creation is
//! serialized per issue so concurrent claims on the same issue are ordered.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, ReResolutionPolicy};
use crate::evidence::{Evidence, EvidenceError};
use crate::locks::KeyedMutex;
use crate::registry::{IssueRegistry, RegistryError};
use crate::scoring;
use crate::store::{modify, KeyedStore, MemoryStore, StoreError};
use crate::types::{Attestation, IssueStatus, Resolution, ResolutionStatus};

/// Error types for resolution operations.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("Issue not found: {0}")]
    IssueNotFound(String),

    #[error("Resolution not found: {0}")]
    NotFound(String),

    #[error("Invalid evidence: {0}")]
    InvalidEvidence(#[from] EvidenceError),

    #[error("Issue {issue_id} is already resolved by {resolution_id}")]
    AlreadyResolved {
        issue_id: String,
        resolution_id: String,
    },

    #[error("Already attested: {0}")]
    AlreadyAttested(String),

    #[error("Registry error: {0}")]
    Registry(RegistryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<RegistryError> for ResolutionError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => Self::IssueNotFound(id),
            RegistryError::Store(e) => Self::Store(e),
            other => Self::Registry(other),
        }
    }
}

/// Creates and tracks resolutions.
pub struct ResolutionEngine {
    registry: Arc<IssueRegistry>,
    resolutions: Arc<dyn KeyedStore<Resolution>>,
    config: EngineConfig,
    issue_locks: KeyedMutex,
}

impl ResolutionEngine {
    /// Create an engine over the given registry and resolution store.
    pub fn new(
        registry: Arc<IssueRegistry>,
        resolutions: Arc<dyn KeyedStore<Resolution>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            resolutions,
            config,
            issue_locks: KeyedMutex::new(),
        }
    }

    /// Create an engine with an in-process resolution store and default config.
    pub fn in_memory(registry: Arc<IssueRegistry>) -> Self {
        Self::new(
            registry,
            Arc::new(MemoryStore::<Resolution>::new()),
            EngineConfig::default(),
        )
    }

    pub fn registry(&self) -> &Arc<IssueRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a resolution for an issue from evidence.
    ///
    /// The resolution is verified when the evidence meets the acceptance
    /// criteria and pending otherwise. Either way the issue moves to resolved
    /// and points at the new resolution.
    pub async fn create_resolution(
        &self,
        issue_id: &str,
        mut evidence: Evidence,
        summary: impl Into<String>,
    ) -> Result<Resolution, ResolutionError> {
        let _guard = self.issue_locks.lock(issue_id).await;

        let issue = self.registry.get(issue_id).await?;

        if issue.status == IssueStatus::Verified {
            return Err(ResolutionError::AlreadyAttested(issue.id));
        }
        if issue.status == IssueStatus::Resolved
            && self.config.re_resolution == ReResolutionPolicy::Reject
        {
            return Err(ResolutionError::AlreadyResolved {
                issue_id: issue.id,
                resolution_id: issue.resolution_id.unwrap_or_default(),
            });
        }

        if let Err(e) = evidence.validate(self.config.percentage_tolerance) {
            warn!(issue_id = %issue_id, error = %e, "Rejected resolution evidence");
            return Err(e.into());
        }
        // Scoring, criteria and the commitment use the decrease the counts imply
        evidence.percentage_decrease = evidence.expected_decrease();

        let confidence = scoring::score(&evidence);
        let resolution_window = evidence.window_days()?;
        let unmet = self
            .config
            .criteria
            .unmet(&evidence, confidence, resolution_window);

        let now = Utc::now();
        let (status, verified_at) = if unmet.is_empty() {
            (ResolutionStatus::Verified, Some(now))
        } else {
            debug!(issue_id = %issue_id, unmet = ?unmet, "Acceptance criteria not met");
            (ResolutionStatus::Pending, None)
        };

        let resolution = Resolution {
            id: uuid::Uuid::new_v4().to_string(),
            issue_id: issue.id.clone(),
            exchange: issue.exchange.clone(),
            issue_category: issue.category.clone(),
            summary: summary.into(),
            evidence,
            confidence,
            resolution_window,
            status,
            created_at: now,
            verified_at,
            attestation: None,
        };

        self.resolutions
            .compare_and_swap(&resolution.id, None, resolution.clone())
            .await?;
        self.registry
            .attach_resolution(issue_id, &resolution.id)
            .await?;

        if let Some(previous) = issue.resolution_id {
            info!(
                issue_id = %issue_id,
                superseded = %previous,
                resolution_id = %resolution.id,
                "Resolution superseded"
            );
        }
        info!(
            issue_id = %issue_id,
            resolution_id = %resolution.id,
            confidence = resolution.confidence,
            status = resolution.status.as_str(),
            "Resolution created"
        );

        Ok(resolution)
    }

    /// Get a resolution by ID.
    pub async fn get_resolution(&self, id: &str) -> Result<Resolution, ResolutionError> {
        self.resolutions
            .get(id)
            .await?
            .map(|record| record.value)
            .ok_or_else(|| ResolutionError::NotFound(id.to_string()))
    }

    /// List resolutions, optionally filtered by status, oldest first.
    pub async fn list_resolutions(
        &self,
        status: Option<ResolutionStatus>,
    ) -> Result<Vec<Resolution>, ResolutionError> {
        let mut resolutions: Vec<Resolution> = self
            .resolutions
            .list()
            .await?
            .into_iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .collect();
        resolutions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(resolutions)
    }

    /// Whether the resolution is still the one its issue points at.
    pub async fn is_current(&self, resolution: &Resolution) -> Result<bool, ResolutionError> {
        let issue = self.registry.get(&resolution.issue_id).await?;
        Ok(issue.resolution_id.as_deref() == Some(resolution.id.as_str()))
    }

    /// Record a confirmed ledger attestation.
    ///
    /// Sets the resolution on-chain and, when the resolution is still current,
    /// marks its issue verified. Recording the same attestation twice is a
    /// no-op; a different attestation for an attested resolution is refused.
    pub async fn record_attestation(
        &self,
        resolution_id: &str,
        attestation: Attestation,
    ) -> Result<Resolution, ResolutionError> {
        let existing = self.get_resolution(resolution_id).await?;
        let _guard = self.issue_locks.lock(&existing.issue_id).await;

        let resolution = modify(
            self.resolutions.as_ref(),
            resolution_id,
            self.config.max_store_attempts,
            |mut resolution: Resolution| match resolution
                .attestation
                .as_ref()
                .map(|current| *current == attestation)
            {
                Some(true) => Ok(resolution),
                Some(false) => Err(ResolutionError::AlreadyAttested(resolution.id.clone())),
                None => {
                    resolution.attestation = Some(attestation.clone());
                    resolution.status = ResolutionStatus::OnChain;
                    Ok(resolution)
                }
            },
        )
        .await?
        .ok_or_else(|| ResolutionError::NotFound(resolution_id.to_string()))?;

        info!(
            resolution_id = %resolution_id,
            attestation_id = attestation.id,
            transaction_hash = %attestation.transaction_hash,
            "Resolution on chain"
        );

        self.registry
            .attach_attestation(&resolution.issue_id, resolution_id, &attestation)
            .await?;

        Ok(resolution)
    }
}
