//! Attestation gateway.
//!
//! Anchors resolution commitments to the ledger. One attestation runs at a
//! time per (exchange, category) pair so that each write's predecessor is
//! known before it is submitted:
//!
//! 1. return the existing attestation if the resolution already has one
//! 2. hash the evidence
//! 3. read the pair's head from the ledger and copy any records the custody
//!    log is missing
//! 4. adopt a matching ledger record left by an earlier ambiguous attempt
//! 5. refuse superseded resolutions
//! 6. submit and poll for the receipt under a bounded timeout
//! 7. check the receipt against the head read in step 3
//! 8. append to the custody log and attach the attestation
//!
//! Step 8 runs in its own task so it completes even if the caller goes away.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use resolution::{
    hash_evidence, Attestation, Commitment, Evidence, EvidenceError, KeyedGuard, KeyedMutex,
    ResolutionEngine, ResolutionError, StoreError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::AttestationConfig;
use crate::custody::{CustodyError, CustodyKey, CustodyLink, CustodyLog};
use crate::ledger::{CommitmentWrite, Ledger, LedgerError, LedgerReceipt, LedgerRecord, ReceiptStatus};

/// Whether a failed operation may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrySafety {
    /// Retrying will fail the same way
    NotRetryable,
    /// Transient; retry after a delay
    RetryWithBackoff,
    /// The operation may have taken effect; check state before retrying
    CheckBeforeRetry,
}

/// Error types for attestation.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("Invalid evidence: {0}")]
    InvalidEvidence(#[from] EvidenceError),

    #[error("Resolution {resolution_id} was superseded by {current:?}")]
    Superseded {
        resolution_id: String,
        current: Option<String>,
    },

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("No receipt for {tx_hash} after {waited_secs}s")]
    LedgerTimeout { tx_hash: String, waited_secs: u64 },

    #[error("Ledger rejected write: {0}")]
    LedgerRejected(String),

    #[error("Custody divergence on {key}: expected previous {expected}, ledger reported {reported}")]
    CustodyDivergence {
        key: CustodyKey,
        expected: Commitment,
        reported: Commitment,
    },

    #[error("Attestation not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<LedgerError> for GatewayError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Unavailable(reason) => Self::LedgerUnavailable(reason),
            LedgerError::Rejected(reason) => Self::LedgerRejected(reason),
        }
    }
}

impl From<CustodyError> for GatewayError {
    fn from(err: CustodyError) -> Self {
        match err {
            CustodyError::Divergence {
                key,
                expected,
                actual,
            } => Self::CustodyDivergence {
                key,
                expected,
                reported: actual,
            },
        }
    }
}

impl GatewayError {
    pub fn retry_safety(&self) -> RetrySafety {
        match self {
            Self::LedgerUnavailable(_) => RetrySafety::RetryWithBackoff,
            Self::LedgerTimeout { .. } | Self::Internal(_) => RetrySafety::CheckBeforeRetry,
            Self::Resolution(ResolutionError::Store(StoreError::Conflict { .. })) => {
                RetrySafety::RetryWithBackoff
            }
            _ => RetrySafety::NotRetryable,
        }
    }
}

/// Result of looking up a commitment on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLookup {
    pub exists: bool,
    pub sequence_id: Option<u64>,
    pub record: Option<LedgerRecord>,
}

/// Submits commitments and maintains the chain of custody.
pub struct AttestationGateway {
    ledger: Arc<dyn Ledger>,
    engine: Arc<ResolutionEngine>,
    custody: Arc<CustodyLog>,
    pair_locks: Arc<KeyedMutex>,
    config: AttestationConfig,
}

impl AttestationGateway {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        engine: Arc<ResolutionEngine>,
        config: AttestationConfig,
    ) -> Self {
        Self {
            ledger,
            engine,
            custody: Arc::new(CustodyLog::new()),
            pair_locks: Arc::new(KeyedMutex::new()),
            config,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn engine(&self) -> &Arc<ResolutionEngine> {
        &self.engine
    }

    pub fn custody(&self) -> &Arc<CustodyLog> {
        &self.custody
    }

    pub fn config(&self) -> &AttestationConfig {
        &self.config
    }

    /// Commitment for evidence under the configured algorithm.
    pub fn commitment(&self, evidence: &Evidence) -> Result<Commitment, EvidenceError> {
        hash_evidence(evidence, self.config.algorithm)
    }

    /// Anchor a resolution's evidence commitment on the ledger.
    ///
    /// Idempotent: a resolution is written at most once, and repeated calls
    /// return the same attestation.
    pub async fn attest(&self, resolution_id: &str) -> Result<Attestation, GatewayError> {
        let resolution = self.engine.get_resolution(resolution_id).await?;
        if let Some(attestation) = resolution.attestation {
            debug!(resolution_id = %resolution_id, "Already attested");
            return Ok(attestation);
        }

        let key = CustodyKey::new(&resolution.exchange, &resolution.issue_category);
        let guard = self.pair_locks.lock(&key.to_string()).await;

        // Another caller may have finished while we waited
        let resolution = self.engine.get_resolution(resolution_id).await?;
        if let Some(attestation) = resolution.attestation {
            debug!(resolution_id = %resolution_id, "Attested while waiting for pair lock");
            return Ok(attestation);
        }

        let commitment = self.commitment(&resolution.evidence)?;

        // The ledger is authoritative for the pair's head; the custody log
        // may lag behind writes whose receipts never arrived
        let expected_previous = self
            .ledger
            .latest(&resolution.exchange, &resolution.issue_category)
            .await?;
        self.sync_custody(&key, expected_previous).await?;

        // A landed write is adopted even if the resolution has since been superseded
        if let Some(record) = self.reconcile(&key, &commitment).await? {
            info!(
                resolution_id = %resolution_id,
                attestation_id = record.sequence_id,
                "Adopting commitment already on ledger"
            );
            let attestation = self.attestation_from_record(&record);
            return self.commit(guard, key, resolution_id, attestation).await;
        }

        if !self.engine.is_current(&resolution).await? {
            let current = self
                .engine
                .registry()
                .get(&resolution.issue_id)
                .await
                .ok()
                .and_then(|issue| issue.resolution_id);
            return Err(GatewayError::Superseded {
                resolution_id: resolution_id.to_string(),
                current,
            });
        }

        let tx_hash = self
            .ledger
            .submit(CommitmentWrite {
                exchange: resolution.exchange.clone(),
                issue_category: resolution.issue_category.clone(),
                evidence_hash: commitment,
            })
            .await?;
        info!(
            resolution_id = %resolution_id,
            evidence_hash = %commitment,
            tx_hash = %tx_hash,
            "Commitment submitted"
        );

        let receipt = self.await_receipt(&tx_hash).await?;
        if receipt.status == ReceiptStatus::Reverted {
            warn!(tx_hash = %tx_hash, "Commitment write reverted");
            return Err(GatewayError::LedgerRejected(format!(
                "transaction {} reverted",
                tx_hash
            )));
        }

        let event = receipt.recorded().ok_or_else(|| {
            GatewayError::LedgerRejected(format!("transaction {} emitted no record", tx_hash))
        })?;

        if event.previous_hash != expected_previous {
            error!(
                pair = %key,
                expected = %expected_previous,
                reported = %event.previous_hash,
                "Custody divergence"
            );
            return Err(GatewayError::CustodyDivergence {
                key,
                expected: expected_previous,
                reported: event.previous_hash,
            });
        }

        let chain = self.ledger.chain();
        let attestation = Attestation {
            id: event.sequence_id,
            transaction_hash: receipt.transaction_hash.clone(),
            block_number: receipt.block_number,
            block_timestamp: receipt.block_timestamp,
            chain_id: chain.chain_id,
            contract_address: chain.contract_address.clone(),
            evidence_hash: commitment,
            previous_hash: event.previous_hash,
            attestor: event.attestor.clone(),
            explorer_url: chain.tx_url(&receipt.transaction_hash),
            verified: true,
        };

        self.commit(guard, key, resolution_id, attestation).await
    }

    /// Look up a commitment on the ledger.
    pub async fn verify_by_commitment(
        &self,
        commitment: &Commitment,
    ) -> Result<LedgerLookup, GatewayError> {
        let Some(sequence_id) = self.ledger.find(commitment).await? else {
            return Ok(LedgerLookup {
                exists: false,
                sequence_id: None,
                record: None,
            });
        };
        let record = self.ledger.record(sequence_id).await?;
        Ok(LedgerLookup {
            exists: true,
            sequence_id: Some(sequence_id),
            record,
        })
    }

    /// Attestation by ledger sequence id.
    pub async fn get_by_id(&self, sequence_id: u64) -> Result<Attestation, GatewayError> {
        self.ledger
            .record(sequence_id)
            .await?
            .map(|record| self.attestation_from_record(&record))
            .ok_or_else(|| GatewayError::NotFound(sequence_id.to_string()))
    }

    /// Total commitments on the ledger.
    pub async fn commitment_count(&self) -> Result<u64, GatewayError> {
        Ok(self.ledger.commitment_count().await?)
    }

    /// Build an attestation from a stored ledger record.
    pub fn attestation_from_record(&self, record: &LedgerRecord) -> Attestation {
        let chain = self.ledger.chain();
        Attestation {
            id: record.sequence_id,
            transaction_hash: record.transaction_hash.clone(),
            block_number: record.block_number,
            block_timestamp: DateTime::<Utc>::from_timestamp(record.timestamp, 0)
                .unwrap_or_default(),
            chain_id: chain.chain_id,
            contract_address: chain.contract_address.clone(),
            evidence_hash: record.evidence_hash,
            previous_hash: record.previous_hash,
            attestor: record.attestor.clone(),
            explorer_url: chain.tx_url(&record.transaction_hash),
            verified: true,
        }
    }

    /// Find a ledger record for this commitment left by an earlier attempt.
    async fn reconcile(
        &self,
        key: &CustodyKey,
        commitment: &Commitment,
    ) -> Result<Option<LedgerRecord>, GatewayError> {
        let lookup = self.verify_by_commitment(commitment).await?;
        let Some(record) = lookup.record else {
            return Ok(None);
        };
        if record.exchange != key.exchange || record.issue_category != key.issue_category {
            return Err(GatewayError::LedgerRejected(format!(
                "commitment {} already recorded for {}/{}",
                commitment, record.exchange, record.issue_category
            )));
        }
        Ok(Some(record))
    }

    /// Bring the pair's custody chain up to the ledger head.
    ///
    /// Walks back from `head` through predecessor links until it reaches a
    /// commitment the log already holds (or the start of the chain), then
    /// appends the missing records oldest first.
    async fn sync_custody(&self, key: &CustodyKey, head: Commitment) -> Result<(), GatewayError> {
        let mut missing = Vec::new();
        let mut cursor = head;
        while !cursor.is_zero() && !self.custody.contains(key, &cursor) {
            let record = match self.ledger.find(&cursor).await? {
                Some(sequence_id) => self.ledger.record(sequence_id).await?,
                None => None,
            };
            let Some(record) = record else {
                return Err(GatewayError::Internal(format!(
                    "ledger head {} for {} has no record",
                    cursor, key
                )));
            };
            cursor = record.previous_hash;
            missing.push(record);
        }

        if missing.is_empty() {
            return Ok(());
        }
        warn!(pair = %key, missing = missing.len(), "Custody log behind ledger, backfilling");
        for record in missing.into_iter().rev() {
            self.custody.append(
                key,
                CustodyLink {
                    sequence_id: record.sequence_id,
                    evidence_hash: record.evidence_hash,
                    previous_hash: record.previous_hash,
                    resolution_id: None,
                    recorded_at: Utc::now(),
                },
            )?;
        }
        Ok(())
    }

    /// Poll for a receipt until it arrives or the confirmation timeout passes.
    async fn await_receipt(&self, tx_hash: &str) -> Result<LedgerReceipt, GatewayError> {
        let timeout = self.config.confirmation_timeout();
        let poll = async {
            let mut interval = tokio::time::interval(self.config.poll_interval());
            loop {
                interval.tick().await;
                match self.ledger.receipt(tx_hash).await {
                    Ok(Some(receipt)) => return Ok(receipt),
                    Ok(None) => debug!(tx_hash = %tx_hash, "Receipt pending"),
                    Err(LedgerError::Unavailable(reason)) => {
                        warn!(tx_hash = %tx_hash, reason = %reason, "Ledger unavailable while polling");
                    }
                    Err(e) => return Err(GatewayError::from(e)),
                }
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tx_hash = %tx_hash, "Timed out waiting for receipt");
                Err(GatewayError::LedgerTimeout {
                    tx_hash: tx_hash.to_string(),
                    waited_secs: timeout.as_secs(),
                })
            }
        }
    }

    /// Record a confirmed attestation locally.
    ///
    /// Runs on its own task holding the pair lock, so a cancelled caller
    /// never leaves the custody log and the resolution out of step.
    async fn commit(
        &self,
        guard: KeyedGuard,
        key: CustodyKey,
        resolution_id: &str,
        attestation: Attestation,
    ) -> Result<Attestation, GatewayError> {
        let custody = Arc::clone(&self.custody);
        let engine = Arc::clone(&self.engine);
        let resolution_id = resolution_id.to_string();

        let task = tokio::spawn(async move {
            let _guard = guard;
            custody.append(
                &key,
                CustodyLink {
                    sequence_id: attestation.id,
                    evidence_hash: attestation.evidence_hash,
                    previous_hash: attestation.previous_hash,
                    resolution_id: Some(resolution_id.clone()),
                    recorded_at: Utc::now(),
                },
            )?;
            engine
                .record_attestation(&resolution_id, attestation.clone())
                .await?;
            info!(
                resolution_id = %resolution_id,
                attestation_id = attestation.id,
                explorer_url = %attestation.explorer_url,
                "Resolution attested"
            );
            Ok::<_, GatewayError>(attestation)
        });

        task.await
            .map_err(|e| GatewayError::Internal(format!("commit task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use chrono::Duration;
    use resolution::{IssueRegistry, NewIssue, ResolutionStatus};

    async fn setup(ledger: Arc<InMemoryLedger>) -> (AttestationGateway, String) {
        let registry = Arc::new(IssueRegistry::in_memory());
        let engine = Arc::new(ResolutionEngine::in_memory(Arc::clone(&registry)));
        let issue = registry
            .create_issue(NewIssue::new("coinbase", "withdrawal_delays", "Withdrawal delays"))
            .await
            .unwrap();
        let resolution = engine
            .create_resolution(&issue.id, evidence(), "Withdrawals normal")
            .await
            .unwrap();
        let config = AttestationConfig {
            poll_interval_ms: 10,
            confirmation_timeout_secs: 1,
            ..Default::default()
        };
        (AttestationGateway::new(ledger, engine, config), resolution.id)
    }

    fn evidence() -> Evidence {
        let end = Utc::now() - Duration::days(1);
        Evidence::from_counts(150, 22)
            .with_sentiment_shift(0.3)
            .with_sources(["youtube", "google", "reddit"])
            .with_window(end - Duration::days(7), end)
    }

    #[tokio::test]
    async fn test_attest() {
        let ledger = Arc::new(InMemoryLedger::default());
        let (gateway, resolution_id) = setup(Arc::clone(&ledger)).await;

        let attestation = gateway.attest(&resolution_id).await.unwrap();
        assert_eq!(attestation.id, 1);
        assert!(attestation.previous_hash.is_zero());
        assert!(attestation.verified);
        assert_eq!(attestation.chain_id, 84532);
        assert!(attestation
            .explorer_url
            .ends_with(&format!("/tx/{}", attestation.transaction_hash)));

        let resolution = gateway.engine().get_resolution(&resolution_id).await.unwrap();
        assert_eq!(resolution.status, ResolutionStatus::OnChain);
        assert_eq!(
            attestation.evidence_hash,
            gateway.commitment(&resolution.evidence).unwrap()
        );

        let key = CustodyKey::new("coinbase", "withdrawal_delays");
        assert_eq!(gateway.custody().latest(&key), Some(attestation.evidence_hash));

        let by_id = gateway.get_by_id(1).await.unwrap();
        assert_eq!(by_id.evidence_hash, attestation.evidence_hash);
        assert_eq!(by_id.transaction_hash, attestation.transaction_hash);
        assert!(matches!(
            gateway.get_by_id(9).await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_attest_idempotent() {
        let ledger = Arc::new(InMemoryLedger::default());
        let (gateway, resolution_id) = setup(Arc::clone(&ledger)).await;

        let first = gateway.attest(&resolution_id).await.unwrap();
        let second = gateway.attest(&resolution_id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(ledger.submit_count(), 1);
    }

    #[tokio::test]
    async fn test_reverted_write() {
        let ledger = Arc::new(InMemoryLedger::default().with_rejection(true));
        let (gateway, resolution_id) = setup(Arc::clone(&ledger)).await;

        let err = gateway.attest(&resolution_id).await.unwrap_err();
        assert!(matches!(err, GatewayError::LedgerRejected(_)));
        assert_eq!(err.retry_safety(), RetrySafety::NotRetryable);

        let resolution = gateway.engine().get_resolution(&resolution_id).await.unwrap();
        assert_ne!(resolution.status, ResolutionStatus::OnChain);
        assert!(resolution.attestation.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_ledger() {
        let ledger = Arc::new(InMemoryLedger::default().with_available(false));
        let (gateway, resolution_id) = setup(Arc::clone(&ledger)).await;

        let err = gateway.attest(&resolution_id).await.unwrap_err();
        assert!(matches!(err, GatewayError::LedgerUnavailable(_)));
        assert_eq!(err.retry_safety(), RetrySafety::RetryWithBackoff);
    }

    #[tokio::test]
    async fn test_missing_resolution() {
        let ledger = Arc::new(InMemoryLedger::default());
        let (gateway, _) = setup(ledger).await;
        assert!(matches!(
            gateway.attest("missing").await,
            Err(GatewayError::Resolution(ResolutionError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_custody_backfilled_from_ledger() {
        let ledger = Arc::new(InMemoryLedger::default());
        let (gateway, resolution_id) = setup(Arc::clone(&ledger)).await;

        // Written by another gateway instance sharing the ledger
        let foreign = Commitment::from_bytes([3; 32]);
        ledger
            .submit(CommitmentWrite {
                exchange: "coinbase".to_string(),
                issue_category: "withdrawal_delays".to_string(),
                evidence_hash: foreign,
            })
            .await
            .unwrap();

        let attestation = gateway.attest(&resolution_id).await.unwrap();
        assert_eq!(attestation.previous_hash, foreign);

        let key = CustodyKey::new("coinbase", "withdrawal_delays");
        let chain = gateway.custody().chain(&key);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].evidence_hash, foreign);
        assert!(chain[0].resolution_id.is_none());
        assert_eq!(chain[1].resolution_id.as_deref(), Some(resolution_id.as_str()));
        assert!(gateway.custody().verify_chain(&key));
    }

    #[tokio::test]
    async fn test_verify_by_commitment() {
        let ledger = Arc::new(InMemoryLedger::default());
        let (gateway, resolution_id) = setup(Arc::clone(&ledger)).await;
        let attestation = gateway.attest(&resolution_id).await.unwrap();

        let found = gateway
            .verify_by_commitment(&attestation.evidence_hash)
            .await
            .unwrap();
        assert!(found.exists);
        assert_eq!(found.sequence_id, Some(attestation.id));

        let missing = gateway
            .verify_by_commitment(&Commitment::from_bytes([5; 32]))
            .await
            .unwrap();
        assert!(!missing.exists);
        assert!(missing.record.is_none());
        assert_eq!(gateway.commitment_count().await.unwrap(), 1);
    }
}
