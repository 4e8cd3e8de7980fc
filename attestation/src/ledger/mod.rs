//! Ledger abstraction layer.
//!
//! Provides a trait-based interface over commitment ledgers:
//! - EVM attestation contracts (behind the `Ledger` trait)
//! - In-memory ledger for tests and local runs

pub mod memory;
pub mod traits;

pub use memory::{InMemoryLedger, LOCAL_ATTESTOR, LOCAL_CONTRACT_ADDRESS, NEVER_CONFIRM};
pub use traits::{
    ChainInfo, CommitmentWrite, Ledger, LedgerError, LedgerReceipt, LedgerRecord, ReceiptStatus,
    ResolutionRecorded,
};
