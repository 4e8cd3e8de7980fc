//! Core traits for attestation ledgers.
//!
//! This module defines the `Ledger` trait - the contract the attestation
//! gateway needs from an append-only commitment store. On EVM networks this is
//! the resolution attestation contract; tests and the demo use
//! [`InMemoryLedger`](super::InMemoryLedger).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use resolution::Commitment;
use serde::{Deserialize, Serialize};

/// Error types for ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// Ledger could not be reached
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// Ledger refused the request
    #[error("Ledger rejected request: {0}")]
    Rejected(String),
}

/// Network the ledger lives on and the identity writing to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    /// Network name (e.g. "base_sepolia")
    pub network: String,
    pub chain_id: u64,
    /// Attestation contract address
    pub contract_address: String,
    /// Block explorer base URL
    pub explorer_url: String,
    /// Address that submits commitments
    pub attestor: String,
}

impl ChainInfo {
    /// Explorer link for a transaction.
    pub fn tx_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{}", self.explorer_url, tx_hash)
    }

    /// Explorer link for an address.
    pub fn address_url(&self, address: &str) -> String {
        format!("{}/address/{}", self.explorer_url, address)
    }
}

/// A commitment write for an (exchange, category) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentWrite {
    pub exchange: String,
    pub issue_category: String,
    pub evidence_hash: Commitment,
}

/// A stored commitment, as returned by lookup-by-id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Ledger-assigned sequence id (1-based)
    pub sequence_id: u64,
    pub evidence_hash: Commitment,
    /// Previous commitment for the same pair, zero if none
    pub previous_hash: Commitment,
    /// Unix seconds
    pub timestamp: i64,
    pub block_number: u64,
    pub exchange: String,
    pub issue_category: String,
    pub attestor: String,
    /// Transaction that wrote the record
    pub transaction_hash: String,
}

/// Event emitted by a successful commitment write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRecorded {
    pub sequence_id: u64,
    pub exchange: String,
    pub issue_category: String,
    pub evidence_hash: Commitment,
    pub previous_hash: Commitment,
    /// Unix seconds
    pub timestamp: i64,
    pub attestor: String,
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// Receipt for a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub transaction_hash: String,
    pub block_number: u64,
    pub block_timestamp: DateTime<Utc>,
    pub status: ReceiptStatus,
    /// Events emitted by the transaction
    pub events: Vec<ResolutionRecorded>,
}

impl LedgerReceipt {
    /// The commitment event, if the write succeeded.
    pub fn recorded(&self) -> Option<&ResolutionRecorded> {
        self.events.first()
    }
}

/// Append-only commitment ledger.
///
/// Implementations must be safe to call concurrently. Retry policy belongs to
/// the caller.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Network and contract details.
    fn chain(&self) -> &ChainInfo;

    /// Check if the ledger is currently reachable.
    async fn is_available(&self) -> bool;

    /// Submit a commitment write, returning the transaction hash.
    async fn submit(&self, write: CommitmentWrite) -> Result<String, LedgerError>;

    /// Receipt for a submitted transaction; `None` while unconfirmed.
    async fn receipt(&self, tx_hash: &str) -> Result<Option<LedgerReceipt>, LedgerError>;

    /// Sequence id of the record holding `commitment`, if any.
    async fn find(&self, commitment: &Commitment) -> Result<Option<u64>, LedgerError>;

    /// Record by sequence id.
    async fn record(&self, sequence_id: u64) -> Result<Option<LedgerRecord>, LedgerError>;

    /// Latest commitment for a pair, zero when none has been written.
    async fn latest(&self, exchange: &str, issue_category: &str)
        -> Result<Commitment, LedgerError>;

    /// Total number of stored commitments.
    async fn commitment_count(&self) -> Result<u64, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explorer_links() {
        let chain = ChainInfo {
            network: "base_sepolia".to_string(),
            chain_id: 84532,
            contract_address: "0xabc".to_string(),
            explorer_url: "https://sepolia.basescan.org".to_string(),
            attestor: "0xdef".to_string(),
        };
        assert_eq!(
            chain.tx_url("0x123"),
            "https://sepolia.basescan.org/tx/0x123"
        );
        assert_eq!(
            chain.address_url("0xabc"),
            "https://sepolia.basescan.org/address/0xabc"
        );
    }
}
