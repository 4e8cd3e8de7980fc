//! Configuration for issue tracking and resolution acceptance.

use serde::{Deserialize, Serialize};

use crate::evidence::Evidence;

/// Thresholds evidence must meet for a resolution to be marked verified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionCriteria {
    /// Minimum fractional drop in complaints
    pub min_percentage_decrease: f64,
    /// Minimum confidence score
    pub min_confidence: f64,
    /// Minimum measurement window (whole days)
    pub min_window_days: i64,
    /// Require sentiment to have improved
    pub require_sentiment_improvement: bool,
}

impl Default for ResolutionCriteria {
    fn default() -> Self {
        Self {
            min_percentage_decrease: 0.70,
            min_confidence: 0.85,
            min_window_days: 7,
            require_sentiment_improvement: false,
        }
    }
}

impl ResolutionCriteria {
    /// Names of the criteria the evidence fails, empty when all hold.
    pub fn unmet(&self, evidence: &Evidence, confidence: f64, window_days: i64) -> Vec<&'static str> {
        let mut unmet = Vec::new();
        if evidence.percentage_decrease < self.min_percentage_decrease {
            unmet.push("percentage_decrease");
        }
        if confidence < self.min_confidence {
            unmet.push("confidence");
        }
        if window_days < self.min_window_days {
            unmet.push("resolution_window");
        }
        if self.require_sentiment_improvement && evidence.sentiment_shift <= 0.0 {
            unmet.push("sentiment_shift");
        }
        unmet
    }

    /// Whether all criteria hold.
    pub fn accepts(&self, evidence: &Evidence, confidence: f64, window_days: i64) -> bool {
        self.unmet(evidence, confidence, window_days).is_empty()
    }
}

/// What happens when a resolution is created for an already-resolved issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReResolutionPolicy {
    /// The new resolution replaces the old one, which can no longer be attested
    #[default]
    Supersede,
    /// The second resolution is refused
    Reject,
}

/// Complaint cluster thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Clusters below this count are not tracked
    pub tracking_threshold: u64,
    /// Clusters at or above this count are tracked as active, otherwise investigating
    pub active_threshold: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            tracking_threshold: 10,
            active_threshold: 50,
        }
    }
}

/// Resolution engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Acceptance criteria
    pub criteria: ResolutionCriteria,
    /// Re-resolution policy
    pub re_resolution: ReResolutionPolicy,
    /// Allowed drift between supplied and recomputed percentage decrease
    pub percentage_tolerance: f64,
    /// Compare-and-swap attempts before giving up with a conflict
    pub max_store_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            criteria: ResolutionCriteria::default(),
            re_resolution: ReResolutionPolicy::default(),
            percentage_tolerance: 0.01,
            max_store_attempts: 8,
        }
    }
}
