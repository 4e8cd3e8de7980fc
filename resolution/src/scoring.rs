//! Deterministic confidence scoring.
//!
//! Confidence is a fixed rule table over the evidence metrics. It carries no
//! statistical meaning beyond "how convincing is this abatement".

use crate::evidence::Evidence;

/// Minimum sentiment improvement that earns the sentiment bonus.
pub const SENTIMENT_BONUS_THRESHOLD: f64 = 0.20;
/// Distinct data sources needed for the corroboration bonus.
pub const SOURCE_BONUS_THRESHOLD: usize = 3;

const SENTIMENT_BONUS: f64 = 0.05;
const SOURCE_BONUS: f64 = 0.03;

/// Base confidence by percentage decrease, highest tier first.
const BASE_TIERS: [(f64, f64); 3] = [(0.90, 0.95), (0.70, 0.85), (0.50, 0.70)];
const BASE_FLOOR: f64 = 0.50;

/// Score evidence in [0, 1].
pub fn score(evidence: &Evidence) -> f64 {
    let mut confidence = base_score(evidence.percentage_decrease);

    if evidence.sentiment_shift > SENTIMENT_BONUS_THRESHOLD {
        confidence += SENTIMENT_BONUS;
    }

    if evidence.distinct_sources().len() >= SOURCE_BONUS_THRESHOLD {
        confidence += SOURCE_BONUS;
    }

    confidence.min(1.0)
}

fn base_score(percentage_decrease: f64) -> f64 {
    BASE_TIERS
        .iter()
        .find(|(threshold, _)| percentage_decrease >= *threshold)
        .map(|(_, base)| *base)
        .unwrap_or(BASE_FLOOR)
}
