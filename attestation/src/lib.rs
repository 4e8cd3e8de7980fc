//! Ledger attestation for Coinsights resolutions.
//!
//! Anchors each resolution's evidence commitment to an append-only ledger,
//! keeps a chain of custody per (exchange, category) pair, and verifies
//! stored resolutions against what the ledger recorded.
//!
//! ## Modules
//!
//! - [`ledger`] - `Ledger` trait and the in-memory implementation
//! - [`gateway`] - submit, confirm and reconcile commitments
//! - [`custody`] - per-pair chain of custody
//! - [`verify`] - independent verification
//! - [`service`] - facade over the whole lifecycle

pub mod chains;
pub mod config;
pub mod custody;
pub mod gateway;
pub mod ledger;
pub mod service;
pub mod verify;

pub use chains::{ChainConfig, DEFAULT_NETWORK};
pub use config::{AttestationConfig, ConfigError, ServiceConfig, VerificationConfig};
pub use custody::{CustodyKey, CustodyLink, CustodyLog};
pub use gateway::{AttestationGateway, GatewayError, LedgerLookup, RetrySafety};
pub use ledger::{ChainInfo, InMemoryLedger, Ledger, LedgerError, NEVER_CONFIRM};
pub use service::{ResolutionService, ServiceError, Stats};
pub use verify::{VerificationResult, VerificationTarget, Verifier, VerifyError};
