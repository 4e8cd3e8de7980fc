//! ResolutionService - main entry point for the resolution lifecycle.
//!
//! Wires the issue registry, resolution engine, attestation gateway and
//! verifier together behind one facade.

use std::collections::BTreeMap;
use std::sync::Arc;

use resolution::{
    Attestation, ComplaintCluster, Evidence, EvidenceError, Issue, IssueRegistry, IssueStatus,
    IssueTimeline, IssueUpdate, KeyedStore, MemoryStore, NewIssue, RegistryError, Resolution,
    ResolutionEngine, ResolutionError, ResolutionStatus, StoreError, TimelineEvent,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{ConfigError, ServiceConfig};
use crate::custody::{CustodyKey, CustodyLink};
use crate::gateway::{AttestationGateway, GatewayError, RetrySafety};
use crate::ledger::{ChainInfo, Ledger};
use crate::verify::{VerificationResult, VerificationTarget, Verifier, VerifyError};

/// Error types for the service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid evidence: {0}")]
    InvalidEvidence(#[from] EvidenceError),

    /// Resolution exists but has not been written to the ledger
    #[error("Resolution not attested: {0}")]
    NotAttested(String),
}

impl ServiceError {
    /// Whether the failed call may be retried.
    pub fn retry_safety(&self) -> RetrySafety {
        match self {
            Self::Registry(RegistryError::Store(e)) => store_retry_safety(e),
            Self::Resolution(ResolutionError::Store(e)) => store_retry_safety(e),
            Self::Gateway(e) => e.retry_safety(),
            Self::Verify(e) => e.retry_safety(),
            _ => RetrySafety::NotRetryable,
        }
    }

    /// Whether the error means a requested record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Registry(RegistryError::NotFound(_))
                | Self::Resolution(ResolutionError::NotFound(_))
                | Self::Resolution(ResolutionError::IssueNotFound(_))
                | Self::Gateway(GatewayError::NotFound(_))
                | Self::Gateway(GatewayError::Resolution(ResolutionError::NotFound(_)))
                | Self::Verify(VerifyError::NotFound(_))
        )
    }
}

fn store_retry_safety(err: &StoreError) -> RetrySafety {
    match err {
        StoreError::Conflict { .. } | StoreError::Backend(_) => RetrySafety::RetryWithBackoff,
    }
}

/// Aggregate counters for dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total_issues: usize,
    pub total_resolutions: usize,
    /// Issue count per status name
    pub issues_by_status: BTreeMap<String, usize>,
    /// Resolution count per status name
    pub resolutions_by_status: BTreeMap<String, usize>,
    /// Resolutions carrying a local attestation
    pub attested_resolutions: usize,
    /// Commitments on the ledger, absent when the ledger is unreachable
    pub on_chain_commitments: Option<u64>,
}

/// Main entry point for the resolution lifecycle.
pub struct ResolutionService {
    config: ServiceConfig,
    registry: Arc<IssueRegistry>,
    engine: Arc<ResolutionEngine>,
    gateway: Arc<AttestationGateway>,
    verifier: Verifier,
}

impl ResolutionService {
    /// Create a service with in-process stores.
    pub fn new(config: ServiceConfig, ledger: Arc<dyn Ledger>) -> Result<Self, ServiceError> {
        Self::with_stores(
            config,
            ledger,
            Arc::new(MemoryStore::<Issue>::new()),
            Arc::new(MemoryStore::<Resolution>::new()),
        )
    }

    /// Create a service over the given issue and resolution stores.
    pub fn with_stores(
        config: ServiceConfig,
        ledger: Arc<dyn Ledger>,
        issues: Arc<dyn KeyedStore<Issue>>,
        resolutions: Arc<dyn KeyedStore<Resolution>>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        let ledger_network = &ledger.chain().network;
        if *ledger_network != config.network {
            return Err(ConfigError::Invalid(format!(
                "ledger is on {}, config names {}",
                ledger_network, config.network
            ))
            .into());
        }

        let registry = Arc::new(
            IssueRegistry::new(issues, config.tracking.clone())
                .with_max_attempts(config.engine.max_store_attempts),
        );
        let engine = Arc::new(ResolutionEngine::new(
            Arc::clone(&registry),
            resolutions,
            config.engine.clone(),
        ));
        let gateway = Arc::new(AttestationGateway::new(
            ledger,
            Arc::clone(&engine),
            config.attestation.clone(),
        ));
        let verifier = Verifier::new(Arc::clone(&gateway), config.verification.clone());

        info!(
            network = %config.network,
            chain_id = gateway.ledger().chain().chain_id,
            algorithm = %config.attestation.algorithm,
            "Resolution service initialized"
        );

        Ok(Self {
            config,
            registry,
            engine,
            gateway,
            verifier,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<AttestationGateway> {
        &self.gateway
    }

    // ========================================================================
    // Issues
    // ========================================================================

    pub async fn create_issue(&self, spec: NewIssue) -> Result<Issue, ServiceError> {
        Ok(self.registry.create_issue(spec).await?)
    }

    pub async fn get_issue(&self, id: &str) -> Result<Issue, ServiceError> {
        Ok(self.registry.get(id).await?)
    }

    pub async fn list_issues(
        &self,
        status: Option<IssueStatus>,
    ) -> Result<Vec<Issue>, ServiceError> {
        Ok(self.registry.list(status).await?)
    }

    pub async fn update_issue(
        &self,
        id: &str,
        update: IssueUpdate,
    ) -> Result<Issue, ServiceError> {
        Ok(self.registry.update(id, update).await?)
    }

    /// Track a complaint cluster; `None` when it is below the tracking threshold.
    pub async fn track_cluster(
        &self,
        cluster: ComplaintCluster,
    ) -> Result<Option<Issue>, ServiceError> {
        Ok(self.registry.track_cluster(cluster).await?)
    }

    /// Events recorded for an issue, oldest first.
    pub async fn issue_timeline(&self, id: &str) -> Vec<TimelineEvent> {
        self.timeline().for_issue(id).await
    }

    pub fn timeline(&self) -> &Arc<IssueTimeline> {
        self.registry.timeline()
    }

    // ========================================================================
    // Resolutions
    // ========================================================================

    pub async fn create_resolution(
        &self,
        issue_id: &str,
        evidence: Evidence,
        summary: impl Into<String>,
    ) -> Result<Resolution, ServiceError> {
        Ok(self
            .engine
            .create_resolution(issue_id, evidence, summary)
            .await?)
    }

    pub async fn get_resolution(&self, id: &str) -> Result<Resolution, ServiceError> {
        Ok(self.engine.get_resolution(id).await?)
    }

    pub async fn list_resolutions(
        &self,
        status: Option<ResolutionStatus>,
    ) -> Result<Vec<Resolution>, ServiceError> {
        Ok(self.engine.list_resolutions(status).await?)
    }

    // ========================================================================
    // Attestation and verification
    // ========================================================================

    /// Anchor a resolution on the ledger.
    pub async fn attest_resolution(&self, resolution_id: &str) -> Result<Attestation, ServiceError> {
        match self.gateway.attest(resolution_id).await {
            Ok(attestation) => Ok(attestation),
            Err(e) => {
                warn!(
                    resolution_id = %resolution_id,
                    error = %e,
                    retry = ?e.retry_safety(),
                    "Attestation failed"
                );
                Err(e.into())
            }
        }
    }

    /// The attestation recorded for a resolution.
    pub async fn attestation_for_resolution(
        &self,
        resolution_id: &str,
    ) -> Result<Attestation, ServiceError> {
        self.engine
            .get_resolution(resolution_id)
            .await?
            .attestation
            .ok_or_else(|| ServiceError::NotAttested(resolution_id.to_string()))
    }

    /// Attestation by ledger sequence id.
    pub async fn get_attestation(&self, sequence_id: u64) -> Result<Attestation, ServiceError> {
        Ok(self.gateway.get_by_id(sequence_id).await?)
    }

    pub async fn verify(
        &self,
        target: VerificationTarget,
    ) -> Result<VerificationResult, ServiceError> {
        Ok(self.verifier.verify(target).await?)
    }

    /// Verify from request fields; the evidence hash wins when both are given.
    pub async fn verify_request(
        &self,
        evidence_hash: Option<&str>,
        resolution_id: Option<&str>,
    ) -> Result<VerificationResult, ServiceError> {
        let target = VerificationTarget::from_request(evidence_hash, resolution_id)?;
        self.verify(target).await
    }

    /// Commitment for evidence as `0x`-prefixed hex.
    pub fn hash_evidence(&self, evidence: &Evidence) -> Result<String, ServiceError> {
        evidence.validate(self.config.engine.percentage_tolerance)?;
        Ok(self.gateway.commitment(evidence)?.to_string())
    }

    /// Custody chain for an (exchange, category) pair, oldest first.
    pub fn custody_chain(&self, exchange: &str, issue_category: &str) -> Vec<CustodyLink> {
        self.gateway
            .custody()
            .chain(&CustodyKey::new(exchange, issue_category))
    }

    // ========================================================================
    // Reporting
    // ========================================================================

    pub async fn stats(&self) -> Result<Stats, ServiceError> {
        let issues = self.registry.list(None).await?;
        let resolutions = self.engine.list_resolutions(None).await?;

        let mut issues_by_status = BTreeMap::new();
        for issue in &issues {
            *issues_by_status
                .entry(issue.status.as_str().to_string())
                .or_insert(0) += 1;
        }

        let mut resolutions_by_status = BTreeMap::new();
        for resolution in &resolutions {
            *resolutions_by_status
                .entry(resolution.status.as_str().to_string())
                .or_insert(0) += 1;
        }

        let on_chain_commitments = match self.gateway.commitment_count().await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(error = %e, "Commitment count unavailable");
                None
            }
        };

        Ok(Stats {
            total_issues: issues.len(),
            total_resolutions: resolutions.len(),
            issues_by_status,
            resolutions_by_status,
            attested_resolutions: resolutions
                .iter()
                .filter(|r| r.attestation.is_some())
                .count(),
            on_chain_commitments,
        })
    }

    /// Network, contract and attestor details.
    pub fn chain_info(&self) -> ChainInfo {
        self.gateway.ledger().chain().clone()
    }
}
