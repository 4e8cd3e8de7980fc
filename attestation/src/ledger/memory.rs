//! In-memory ledger for tests and local runs.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use resolution::{Commitment, CommitmentAlgorithm};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::RwLock;

use super::traits::*;
use crate::chains::{self, DEFAULT_NETWORK};

/// Placeholder contract address for local runs.
pub const LOCAL_CONTRACT_ADDRESS: &str = "0x0000000000000000000000000000000000000a77";
/// Placeholder attestor address for local runs.
pub const LOCAL_ATTESTOR: &str = "0x000000000000000000000000000000000000c01e";

/// Confirmation polls that never confirm.
pub const NEVER_CONFIRM: u32 = u32::MAX;

#[derive(Default)]
struct LedgerState {
    /// Records indexed by sequence id - 1
    records: Vec<LedgerRecord>,
    by_hash: HashMap<Commitment, u64>,
    latest: HashMap<(String, String), Commitment>,
    transactions: HashMap<String, PendingReceipt>,
    events: Vec<ResolutionRecorded>,
    block_number: u64,
    nonce: u64,
}

struct PendingReceipt {
    receipt: LedgerReceipt,
    /// Receipt polls that still report "unconfirmed"
    polls_remaining: u32,
}

/// Ledger that keeps everything in process memory.
///
/// Writes take effect at submission, like a transaction that lands in the
/// next block. Availability, confirmation delay and rejection are
/// configurable so callers can exercise their failure handling.
pub struct InMemoryLedger {
    chain: ChainInfo,
    state: RwLock<LedgerState>,
    available: AtomicBool,
    rejecting: AtomicBool,
    confirmation_polls: AtomicU32,
    submit_count: AtomicU32,
    clock_offset: Duration,
}

impl InMemoryLedger {
    /// Create a ledger reporting the given chain details.
    pub fn new(chain: ChainInfo) -> Self {
        Self {
            chain,
            state: RwLock::new(LedgerState::default()),
            available: AtomicBool::new(true),
            rejecting: AtomicBool::new(false),
            confirmation_polls: AtomicU32::new(0),
            submit_count: AtomicU32::new(0),
            clock_offset: Duration::zero(),
        }
    }

    /// Set availability.
    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    /// Number of receipt polls that report "unconfirmed" for each write.
    pub fn with_confirmation_polls(self, polls: u32) -> Self {
        self.confirmation_polls.store(polls, Ordering::SeqCst);
        self
    }

    /// Revert every write.
    pub fn with_rejection(self, rejecting: bool) -> Self {
        self.rejecting.store(rejecting, Ordering::SeqCst);
        self
    }

    /// Shift block timestamps relative to the local clock.
    pub fn with_clock_offset(mut self, offset: Duration) -> Self {
        self.clock_offset = offset;
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_confirmation_polls(&self, polls: u32) {
        self.confirmation_polls.store(polls, Ordering::SeqCst);
    }

    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    /// Get the number of times submit was called.
    pub fn submit_count(&self) -> u32 {
        self.submit_count.load(Ordering::SeqCst)
    }

    /// All emitted events, oldest first.
    pub async fn events(&self) -> Vec<ResolutionRecorded> {
        self.state.read().await.events.clone()
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LedgerError::Unavailable("In-memory ledger disabled".to_string()))
        }
    }

    fn revert_reason(&self, state: &LedgerState, write: &CommitmentWrite) -> Option<&'static str> {
        if self.rejecting.load(Ordering::SeqCst) {
            Some("writes disabled")
        } else if write.exchange.is_empty() || write.issue_category.is_empty() {
            Some("empty exchange or category")
        } else if write.evidence_hash.is_zero() {
            Some("zero evidence hash")
        } else if state.by_hash.contains_key(&write.evidence_hash) {
            Some("evidence hash already recorded")
        } else {
            None
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        let info = chains::chain(DEFAULT_NETWORK)
            .map(|config| config.info(DEFAULT_NETWORK, LOCAL_CONTRACT_ADDRESS, LOCAL_ATTESTOR))
            .unwrap_or_else(|| ChainInfo {
                network: DEFAULT_NETWORK.to_string(),
                chain_id: 84532,
                contract_address: LOCAL_CONTRACT_ADDRESS.to_string(),
                explorer_url: String::new(),
                attestor: LOCAL_ATTESTOR.to_string(),
            });
        Self::new(info)
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    fn chain(&self) -> &ChainInfo {
        &self.chain
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn submit(&self, write: CommitmentWrite) -> Result<String, LedgerError> {
        self.submit_count.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let mut state = self.state.write().await;
        state.nonce += 1;
        state.block_number += 1;

        let tx_bytes = format!(
            "{}:{}:{}:{}",
            state.nonce, write.exchange, write.issue_category, write.evidence_hash
        );
        let transaction_hash = format!(
            "0x{}",
            hex::encode(CommitmentAlgorithm::Keccak256.digest(tx_bytes.as_bytes()))
        );
        let block_timestamp = Utc::now() + self.clock_offset;
        let block_number = state.block_number;

        let (status, events) = match self.revert_reason(&state, &write) {
            Some(reason) => {
                tracing::debug!(tx_hash = %transaction_hash, reason, "Write reverted");
                (ReceiptStatus::Reverted, Vec::new())
            }
            None => {
                let sequence_id = state.records.len() as u64 + 1;
                let pair = (write.exchange.clone(), write.issue_category.clone());
                let previous_hash = state.latest.get(&pair).copied().unwrap_or(Commitment::ZERO);
                let timestamp = block_timestamp.timestamp();

                state.records.push(LedgerRecord {
                    sequence_id,
                    evidence_hash: write.evidence_hash,
                    previous_hash,
                    timestamp,
                    block_number,
                    exchange: write.exchange.clone(),
                    issue_category: write.issue_category.clone(),
                    attestor: self.chain.attestor.clone(),
                    transaction_hash: transaction_hash.clone(),
                });
                state.by_hash.insert(write.evidence_hash, sequence_id);
                state.latest.insert(pair, write.evidence_hash);

                let event = ResolutionRecorded {
                    sequence_id,
                    exchange: write.exchange,
                    issue_category: write.issue_category,
                    evidence_hash: write.evidence_hash,
                    previous_hash,
                    timestamp,
                    attestor: self.chain.attestor.clone(),
                };
                state.events.push(event.clone());
                (ReceiptStatus::Success, vec![event])
            }
        };

        let receipt = LedgerReceipt {
            transaction_hash: transaction_hash.clone(),
            block_number,
            block_timestamp,
            status,
            events,
        };
        state.transactions.insert(
            transaction_hash.clone(),
            PendingReceipt {
                receipt,
                polls_remaining: self.confirmation_polls.load(Ordering::SeqCst),
            },
        );

        Ok(transaction_hash)
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<LedgerReceipt>, LedgerError> {
        self.check_available()?;

        let mut state = self.state.write().await;
        let Some(pending) = state.transactions.get_mut(tx_hash) else {
            return Ok(None);
        };
        if pending.polls_remaining > 0 {
            if pending.polls_remaining != NEVER_CONFIRM {
                pending.polls_remaining -= 1;
            }
            return Ok(None);
        }
        Ok(Some(pending.receipt.clone()))
    }

    async fn find(&self, commitment: &Commitment) -> Result<Option<u64>, LedgerError> {
        self.check_available()?;
        Ok(self.state.read().await.by_hash.get(commitment).copied())
    }

    async fn record(&self, sequence_id: u64) -> Result<Option<LedgerRecord>, LedgerError> {
        self.check_available()?;
        let state = self.state.read().await;
        let index = match sequence_id.checked_sub(1) {
            Some(index) => index as usize,
            None => return Ok(None),
        };
        Ok(state.records.get(index).cloned())
    }

    async fn latest(
        &self,
        exchange: &str,
        issue_category: &str,
    ) -> Result<Commitment, LedgerError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .latest
            .get(&(exchange.to_string(), issue_category.to_string()))
            .copied()
            .unwrap_or(Commitment::ZERO))
    }

    async fn commitment_count(&self) -> Result<u64, LedgerError> {
        self.check_available()?;
        Ok(self.state.read().await.records.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(exchange: &str, byte: u8) -> CommitmentWrite {
        CommitmentWrite {
            exchange: exchange.to_string(),
            issue_category: "withdrawal_delays".to_string(),
            evidence_hash: Commitment::from_bytes([byte; 32]),
        }
    }

    #[tokio::test]
    async fn test_write_and_lookup() {
        let ledger = InMemoryLedger::default();
        assert_eq!(ledger.chain().chain_id, 84532);

        let tx = ledger.submit(write("coinbase", 1)).await.unwrap();
        let receipt = ledger.receipt(&tx).await.unwrap().unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Success);

        let event = receipt.recorded().unwrap();
        assert_eq!(event.sequence_id, 1);
        assert!(event.previous_hash.is_zero());

        let commitment = Commitment::from_bytes([1; 32]);
        assert_eq!(ledger.find(&commitment).await.unwrap(), Some(1));
        let record = ledger.record(1).await.unwrap().unwrap();
        assert_eq!(record.evidence_hash, commitment);
        assert_eq!(record.transaction_hash, tx);
        assert!(ledger.record(0).await.unwrap().is_none());
        assert!(ledger.record(2).await.unwrap().is_none());
        assert_eq!(ledger.commitment_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_previous_hash_per_pair() {
        let ledger = InMemoryLedger::default();
        ledger.submit(write("coinbase", 1)).await.unwrap();
        ledger.submit(write("kraken", 2)).await.unwrap();
        let tx = ledger.submit(write("coinbase", 3)).await.unwrap();

        let receipt = ledger.receipt(&tx).await.unwrap().unwrap();
        let event = receipt.recorded().unwrap();
        assert_eq!(event.sequence_id, 3);
        assert_eq!(event.previous_hash, Commitment::from_bytes([1; 32]));
        assert_eq!(
            ledger.latest("coinbase", "withdrawal_delays").await.unwrap(),
            Commitment::from_bytes([3; 32])
        );
        assert!(ledger.latest("binance", "fees").await.unwrap().is_zero());
        assert_eq!(ledger.events().await.len(), 3);
    }

    #[tokio::test]
    async fn test_reverts() {
        let ledger = InMemoryLedger::default();
        ledger.submit(write("coinbase", 1)).await.unwrap();

        let duplicate = ledger.submit(write("coinbase", 1)).await.unwrap();
        let receipt = ledger.receipt(&duplicate).await.unwrap().unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Reverted);
        assert!(receipt.recorded().is_none());

        let zero = ledger.submit(write("coinbase", 0)).await.unwrap();
        let receipt = ledger.receipt(&zero).await.unwrap().unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Reverted);

        ledger.set_rejecting(true);
        let rejected = ledger.submit(write("coinbase", 9)).await.unwrap();
        let receipt = ledger.receipt(&rejected).await.unwrap().unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Reverted);

        assert_eq!(ledger.commitment_count().await.unwrap(), 1);
        assert_eq!(ledger.submit_count(), 4);
    }

    #[tokio::test]
    async fn test_confirmation_delay() {
        let ledger = InMemoryLedger::default().with_confirmation_polls(2);
        let tx = ledger.submit(write("coinbase", 1)).await.unwrap();

        assert!(ledger.receipt(&tx).await.unwrap().is_none());
        assert!(ledger.receipt(&tx).await.unwrap().is_none());
        assert!(ledger.receipt(&tx).await.unwrap().is_some());

        // The write is visible before the receipt confirms
        ledger.set_confirmation_polls(NEVER_CONFIRM);
        let pending = ledger.submit(write("coinbase", 2)).await.unwrap();
        assert!(ledger.receipt(&pending).await.unwrap().is_none());
        assert_eq!(
            ledger.find(&Commitment::from_bytes([2; 32])).await.unwrap(),
            Some(2)
        );
        assert!(ledger.receipt("0xunknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable() {
        let ledger = InMemoryLedger::default().with_available(false);
        assert!(!ledger.is_available().await);

        let result = ledger.submit(write("coinbase", 1)).await;
        assert!(matches!(result, Err(LedgerError::Unavailable(_))));
        assert!(ledger.commitment_count().await.is_err());

        ledger.set_available(true);
        assert_eq!(ledger.commitment_count().await.unwrap(), 0);
    }
}
