//! Independent verification of attested resolutions.
//!
//! Re-derives the commitment from stored evidence, fetches the ledger record
//! and compares the two. Tampering with stored evidence after attestation
//! shows up as a hash mismatch.

use std::sync::Arc;

use chrono::Utc;
use resolution::{Attestation, Commitment, CommitmentParseError, EvidenceError, ResolutionError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::VerificationConfig;
use crate::gateway::{AttestationGateway, GatewayError, RetrySafety};
use crate::ledger::{LedgerError, LedgerRecord};

/// Error types for verification.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("Resolution not found: {0}")]
    NotFound(String),

    #[error("Either an evidence hash or a resolution id is required")]
    MissingTarget,

    #[error("Invalid evidence hash: {0}")]
    InvalidHash(#[from] CommitmentParseError),

    #[error("Stored evidence cannot be hashed: {0}")]
    InvalidEvidence(#[from] EvidenceError),

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Verification failed: {0}")]
    Failed(String),
}

impl From<LedgerError> for VerifyError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Unavailable(reason) => Self::LedgerUnavailable(reason),
            LedgerError::Rejected(reason) => Self::Failed(reason),
        }
    }
}

impl From<GatewayError> for VerifyError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::LedgerUnavailable(reason) => Self::LedgerUnavailable(reason),
            GatewayError::Resolution(ResolutionError::NotFound(id)) => Self::NotFound(id),
            GatewayError::InvalidEvidence(e) => Self::InvalidEvidence(e),
            other => Self::Failed(other.to_string()),
        }
    }
}

impl From<ResolutionError> for VerifyError {
    fn from(err: ResolutionError) -> Self {
        GatewayError::from(err).into()
    }
}

impl VerifyError {
    pub fn retry_safety(&self) -> RetrySafety {
        match self {
            Self::LedgerUnavailable(_) => RetrySafety::RetryWithBackoff,
            _ => RetrySafety::NotRetryable,
        }
    }
}

/// What to verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationTarget {
    /// A stored resolution, re-hashed from its evidence
    Resolution(String),
    /// A bare commitment
    Commitment(Commitment),
}

impl VerificationTarget {
    /// Build a target from request fields; the evidence hash wins when both are present.
    pub fn from_request(
        evidence_hash: Option<&str>,
        resolution_id: Option<&str>,
    ) -> Result<Self, VerifyError> {
        let evidence_hash = evidence_hash.filter(|h| !h.trim().is_empty());
        let resolution_id = resolution_id.filter(|id| !id.trim().is_empty());
        match (evidence_hash, resolution_id) {
            (Some(hash), _) => Ok(Self::Commitment(hash.parse()?)),
            (None, Some(id)) => Ok(Self::Resolution(id.to_string())),
            (None, None) => Err(VerifyError::MissingTarget),
        }
    }
}

/// Verification verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// `hash_match && on_chain`
    pub verified: bool,
    /// The commitment is recorded on the ledger
    pub on_chain: bool,
    /// The recomputed commitment equals the ledger's
    pub hash_match: bool,
    /// The ledger timestamp is within the accepted range
    pub timestamp_valid: bool,
    /// Commitment derived locally (resolution targets only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recomputed_hash: Option<Commitment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation: Option<Attestation>,
    pub message: String,
}

impl VerificationResult {
    fn not_on_chain(recomputed_hash: Option<Commitment>, message: String) -> Self {
        Self {
            verified: false,
            on_chain: false,
            hash_match: false,
            timestamp_valid: false,
            recomputed_hash,
            attestation: None,
            message,
        }
    }
}

/// Verification service.
pub struct Verifier {
    gateway: Arc<AttestationGateway>,
    config: VerificationConfig,
}

impl Verifier {
    pub fn new(gateway: Arc<AttestationGateway>, config: VerificationConfig) -> Self {
        Self { gateway, config }
    }

    /// Verify a resolution or a commitment against the ledger.
    pub async fn verify(
        &self,
        target: VerificationTarget,
    ) -> Result<VerificationResult, VerifyError> {
        match target {
            VerificationTarget::Commitment(commitment) => {
                self.verify_commitment(commitment).await
            }
            VerificationTarget::Resolution(id) => self.verify_resolution(&id).await,
        }
    }

    async fn verify_commitment(
        &self,
        commitment: Commitment,
    ) -> Result<VerificationResult, VerifyError> {
        let lookup = self.gateway.verify_by_commitment(&commitment).await?;
        match lookup.record {
            Some(record) => Ok(self.compare(commitment, None, record)),
            None => {
                debug!(evidence_hash = %commitment, "Commitment not on ledger");
                Ok(VerificationResult::not_on_chain(
                    None,
                    "Hash not found on-chain".to_string(),
                ))
            }
        }
    }

    async fn verify_resolution(&self, id: &str) -> Result<VerificationResult, VerifyError> {
        let resolution = self.gateway.engine().get_resolution(id).await?;
        let recomputed = self.gateway.commitment(&resolution.evidence)?;

        // An attested resolution is checked against the record it was written to
        let record = match &resolution.attestation {
            Some(attestation) => {
                let record = self.gateway.ledger().record(attestation.id).await?;
                if record.is_none() {
                    warn!(
                        resolution_id = %id,
                        attestation_id = attestation.id,
                        "Attestation missing from ledger"
                    );
                    return Ok(VerificationResult::not_on_chain(
                        Some(recomputed),
                        format!("Attestation {} not found on-chain", attestation.id),
                    ));
                }
                record
            }
            None => self.gateway.verify_by_commitment(&recomputed).await?.record,
        };

        match record {
            Some(record) => Ok(self.compare(recomputed, Some(id), record)),
            None => Ok(VerificationResult::not_on_chain(
                Some(recomputed),
                format!("Resolution {} has no on-chain attestation", id),
            )),
        }
    }

    fn compare(
        &self,
        expected: Commitment,
        resolution_id: Option<&str>,
        record: LedgerRecord,
    ) -> VerificationResult {
        let hash_match = record.evidence_hash == expected;
        let timestamp_valid = self.config.accepts_timestamp(record.timestamp, Utc::now());

        let message = if hash_match {
            format!("Hash verified on-chain. Attestation ID: {}", record.sequence_id)
        } else {
            warn!(
                resolution_id = resolution_id.unwrap_or_default(),
                recomputed = %expected,
                on_chain = %record.evidence_hash,
                "Evidence hash mismatch"
            );
            format!(
                "Evidence hash mismatch: recomputed {}, on-chain {}",
                expected, record.evidence_hash
            )
        };

        VerificationResult {
            verified: hash_match,
            on_chain: true,
            hash_match,
            timestamp_valid,
            recomputed_hash: resolution_id.map(|_| expected),
            attestation: Some(self.gateway.attestation_from_record(&record)),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_from_request() {
        let hash = format!("0x{}", "ab".repeat(32));
        assert!(matches!(
            VerificationTarget::from_request(Some(&hash), Some("res-1")),
            Ok(VerificationTarget::Commitment(_))
        ));
        assert_eq!(
            VerificationTarget::from_request(None, Some("res-1")).unwrap(),
            VerificationTarget::Resolution("res-1".to_string())
        );
        assert_eq!(
            VerificationTarget::from_request(Some(""), Some("res-1")).unwrap(),
            VerificationTarget::Resolution("res-1".to_string())
        );
        assert!(matches!(
            VerificationTarget::from_request(None, None),
            Err(VerifyError::MissingTarget)
        ));
        assert!(matches!(
            VerificationTarget::from_request(Some("0x12"), None),
            Err(VerifyError::InvalidHash(_))
        ));
    }

    #[test]
    fn test_error_mapping() {
        let err: VerifyError = GatewayError::LedgerUnavailable("down".into()).into();
        assert!(matches!(err, VerifyError::LedgerUnavailable(_)));
        assert_eq!(err.retry_safety(), RetrySafety::RetryWithBackoff);

        let err: VerifyError = ResolutionError::NotFound("res-1".into()).into();
        assert!(matches!(err, VerifyError::NotFound(id) if id == "res-1"));
    }
}
