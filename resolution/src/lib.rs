//! Resolution lifecycle for Coinsights.
//!
//! This crate tracks complaint issues about an exchange and turns measured
//! complaint abatement into resolution records that can be committed to a
//! ledger:
//!
//! - **Issues**: complaint clusters tracked from detection to verification
//! - **Evidence**: before/after complaint metrics backing a resolution claim
//! - **Commitments**: canonical, fixed-width hashes of evidence
//! - **Resolutions**: evidence evaluated against acceptance criteria
//!
//! # Key Components
//!
//! - [`IssueRegistry`]: lifecycle of tracked issues over a [`KeyedStore`]
//! - [`ResolutionEngine`]: validates evidence and creates resolutions
//! - [`canonical::hash_evidence`]: deterministic evidence commitment
//! - [`scoring::score`]: fixed rule table for resolution confidence
//!
//! # Example
//!
//! ```ignore
//! use resolution::{IssueRegistry, NewIssue, ResolutionEngine, Severity};
//!
//! let registry = Arc::new(IssueRegistry::in_memory());
//! let engine = ResolutionEngine::in_memory(Arc::clone(&registry));
//!
//! let issue = registry
//!     .create_issue(NewIssue::new("coinbase", "withdrawal_delays", "Withdrawal delays"))
//!     .await?;
//! let resolution = engine
//!     .create_resolution(&issue.id, evidence, "Delays resolved")
//!     .await?;
//! ```

pub mod canonical;
pub mod config;
pub mod engine;
pub mod evidence;
pub mod locks;
pub mod registry;
pub mod scoring;
pub mod store;
pub mod timeline;
pub mod types;

// Re-export main types
pub use canonical::{
    canonicalize, hash_evidence, Commitment, CommitmentAlgorithm, CommitmentParseError,
};
pub use config::{EngineConfig, ReResolutionPolicy, ResolutionCriteria, TrackingConfig};
pub use engine::{ResolutionEngine, ResolutionError};
pub use evidence::{Evidence, EvidenceError};
pub use locks::{KeyedGuard, KeyedMutex};
pub use registry::{IssueRegistry, RegistryError};
pub use store::{KeyedStore, MemoryStore, StoreError, Versioned};
pub use timeline::{IssueTimeline, TimelineEvent, TimelineEventType};
pub use types::*;
