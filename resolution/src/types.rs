//! Core types for issues, resolutions and attestations.
//!
//! Field names follow the JSON shapes consumed by the Coinsights dashboard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::Commitment;
use crate::evidence::Evidence;

/// How severe a tracked issue is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Severity {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Lifecycle status of an issue.
///
/// Issues move forward only: an open issue (active or investigating) becomes
/// resolved when a resolution is attached, and verified once that resolution
/// is attested on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    /// Complaint volume is high and the issue is being tracked
    #[default]
    Active,
    /// Lower volume, still under observation
    Investigating,
    /// A resolution has been created for the issue
    Resolved,
    /// The resolution has been attested on the ledger
    Verified,
}

impl IssueStatus {
    /// Whether the issue is still awaiting a resolution.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Active | Self::Investigating)
    }

    /// Position in the forward-only lifecycle.
    fn stage(&self) -> u8 {
        match self {
            Self::Active | Self::Investigating => 0,
            Self::Resolved => 1,
            Self::Verified => 2,
        }
    }

    /// Check whether moving to `next` keeps the lifecycle moving forward.
    pub fn can_transition_to(&self, next: Self) -> bool {
        self.stage() <= next.stage()
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Investigating => "investigating",
            Self::Resolved => "resolved",
            Self::Verified => "verified",
        }
    }
}

/// A tracked complaint cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Unique identifier
    pub id: String,
    /// Exchange the complaints are about
    pub exchange: String,
    /// Category tag (e.g. "withdrawal_delays")
    pub category: String,
    /// Short title
    pub title: String,
    /// Longer description
    pub description: String,
    /// When the cluster first crossed the tracking threshold
    pub first_detected: DateTime<Utc>,
    /// Last time the record changed
    pub last_updated: DateTime<Utc>,
    /// Number of complaints in the cluster
    pub complaint_count: u64,
    /// Severity assessment
    pub severity: Severity,
    /// Lifecycle status
    pub status: IssueStatus,
    /// Current resolution, if any
    pub resolution_id: Option<String>,
    /// Copy of the current resolution's attestation
    pub attestation: Option<Attestation>,
}

/// Input for creating an issue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewIssue {
    /// Explicit identifier; generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub exchange: String,
    pub category: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub complaint_count: u64,
    #[serde(default)]
    pub severity: Severity,
}

impl NewIssue {
    /// Create issue input with the required fields.
    pub fn new(
        exchange: impl Into<String>,
        category: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            category: category.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Use an explicit identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the complaint count.
    pub fn with_complaint_count(mut self, count: u64) -> Self {
        self.complaint_count = count;
        self
    }

    /// Set the severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// Partial update of an issue.
///
/// Only non-empty, non-zero fields are merged into the stored record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueUpdate {
    #[serde(default)]
    pub complaint_count: Option<u64>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub status: Option<IssueStatus>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A complaint cluster reported by an upstream collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplaintCluster {
    pub exchange: String,
    pub category: String,
    pub complaint_count: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub severity: Severity,
}

/// Status of a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    /// Created but did not meet acceptance criteria
    #[default]
    Pending,
    /// Met acceptance criteria at creation
    Verified,
    /// Commitment confirmed on the ledger
    OnChain,
}

impl ResolutionStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::OnChain => "on_chain",
        }
    }
}

/// A claim, backed by evidence, that an issue's complaint volume has abated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Unique identifier
    pub id: String,
    /// Issue this resolution was created for
    pub issue_id: String,
    /// Exchange copied from the issue
    pub exchange: String,
    /// Category copied from the issue
    pub issue_category: String,
    /// Human-readable summary
    pub summary: String,
    /// Evidence backing the claim
    pub evidence: Evidence,
    /// Confidence derived from the evidence (0.0-1.0)
    pub confidence: f64,
    /// Whole days between measurement start and end
    pub resolution_window: i64,
    /// Lifecycle status
    pub status: ResolutionStatus,
    /// When the resolution was created
    pub created_at: DateTime<Utc>,
    /// When acceptance criteria were confirmed
    pub verified_at: Option<DateTime<Utc>>,
    /// Ledger attestation, once confirmed
    pub attestation: Option<Attestation>,
}

/// Ledger-confirmed proof of a resolution's evidence commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    /// Ledger-assigned sequence id
    pub id: u64,
    /// Transaction that recorded the commitment
    pub transaction_hash: String,
    /// Block containing the transaction
    pub block_number: u64,
    /// Block timestamp
    pub block_timestamp: DateTime<Utc>,
    /// Network chain id
    pub chain_id: u64,
    /// Attestation contract address
    pub contract_address: String,
    /// Evidence commitment
    pub evidence_hash: Commitment,
    /// Previous commitment for the same exchange and category
    pub previous_hash: Commitment,
    /// Identity that submitted the commitment
    pub attestor: String,
    /// Block explorer link
    pub explorer_url: String,
    /// Whether the ledger confirmed the write
    pub verified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(IssueStatus::Active.can_transition_to(IssueStatus::Investigating));
        assert!(IssueStatus::Investigating.can_transition_to(IssueStatus::Active));
        assert!(IssueStatus::Active.can_transition_to(IssueStatus::Resolved));
        assert!(IssueStatus::Resolved.can_transition_to(IssueStatus::Verified));
        assert!(!IssueStatus::Resolved.can_transition_to(IssueStatus::Active));
        assert!(!IssueStatus::Verified.can_transition_to(IssueStatus::Resolved));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ResolutionStatus::OnChain).unwrap();
        assert_eq!(json, "\"on_chain\"");

        let status: IssueStatus = serde_json::from_str("\"investigating\"").unwrap();
        assert_eq!(status, IssueStatus::Investigating);
        assert!(status.is_open());
    }
}
