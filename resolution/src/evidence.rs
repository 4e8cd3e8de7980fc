//! Resolution evidence and its structural validation.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error types for malformed evidence.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvidenceError {
    /// A required field is absent
    #[error("Missing evidence field: {0}")]
    MissingField(&'static str),

    /// Measurement window ends before it starts
    #[error("Measurement window ends before it starts: {start} > {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Complaint count below zero
    #[error("Negative complaint count in {field}: {value}")]
    NegativeCount { field: &'static str, value: i64 },

    /// Sentiment shift outside [-1, 1]
    #[error("Sentiment shift out of range [-1, 1]: {0}")]
    SentimentOutOfRange(f64),

    /// NaN or infinite metric
    #[error("Non-finite value in {0}")]
    NonFinite(&'static str),

    /// Supplied percentage disagrees with the complaint counts
    #[error("Percentage decrease {supplied} does not match counts (expected {expected})")]
    PercentageMismatch { supplied: f64, expected: f64 },

    /// Canonical form could not be serialized
    #[error("Failed to encode canonical evidence: {0}")]
    Encoding(String),
}

/// Measurable claim substrate for a resolution.
///
/// This is the data that gets canonicalized and committed to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Complaint count at start of window
    pub complaints_before: i64,
    /// Complaint count at end of window
    pub complaints_after: i64,
    /// Fractional drop in complaints (negative if they increased)
    pub percentage_decrease: f64,
    /// Change in average sentiment (-1 to 1)
    #[serde(default)]
    pub sentiment_shift: f64,
    /// Representative complaint identifiers
    #[serde(default)]
    pub sample_complaints: Vec<String>,
    /// Where the data came from
    #[serde(default)]
    pub data_sources: Vec<String>,
    #[serde(default)]
    pub measurement_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub measurement_end: Option<DateTime<Utc>>,
    /// Brief description of the analysis
    #[serde(default)]
    pub analysis_methodology: String,
}

impl Evidence {
    /// Create evidence from complaint counts, deriving the percentage decrease.
    pub fn from_counts(before: i64, after: i64) -> Self {
        Self {
            complaints_before: before,
            complaints_after: after,
            percentage_decrease: expected_decrease(before, after),
            sentiment_shift: 0.0,
            sample_complaints: Vec::new(),
            data_sources: Vec::new(),
            measurement_start: None,
            measurement_end: None,
            analysis_methodology: String::new(),
        }
    }

    /// Set the sentiment shift.
    pub fn with_sentiment_shift(mut self, shift: f64) -> Self {
        self.sentiment_shift = shift;
        self
    }

    /// Set the data sources.
    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data_sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// Set the sample complaint identifiers.
    pub fn with_samples<I, S>(mut self, samples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sample_complaints = samples.into_iter().map(Into::into).collect();
        self
    }

    /// Set the measurement window.
    pub fn with_window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.measurement_start = Some(start);
        self.measurement_end = Some(end);
        self
    }

    /// Set the methodology description.
    pub fn with_methodology(mut self, methodology: impl Into<String>) -> Self {
        self.analysis_methodology = methodology.into();
        self
    }

    /// Decrease implied by the complaint counts.
    pub fn expected_decrease(&self) -> f64 {
        expected_decrease(self.complaints_before, self.complaints_after)
    }

    /// Data sources as a set, in canonical (sorted) order.
    pub fn distinct_sources(&self) -> BTreeSet<&str> {
        self.data_sources.iter().map(String::as_str).collect()
    }

    /// Measurement window bounds, failing if either is absent.
    pub fn window(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), EvidenceError> {
        let start = self
            .measurement_start
            .ok_or(EvidenceError::MissingField("measurement_start"))?;
        let end = self
            .measurement_end
            .ok_or(EvidenceError::MissingField("measurement_end"))?;
        Ok((start, end))
    }

    /// Whole days covered by the measurement window (truncated).
    pub fn window_days(&self) -> Result<i64, EvidenceError> {
        let (start, end) = self.window()?;
        Ok((end - start).num_days())
    }

    /// Check the structural invariants.
    ///
    /// `tolerance` bounds how far the supplied percentage decrease may drift
    /// from the value recomputed from the complaint counts.
    pub fn validate(&self, tolerance: f64) -> Result<(), EvidenceError> {
        let (start, end) = self.window()?;
        if start > end {
            return Err(EvidenceError::InvalidWindow { start, end });
        }

        if self.complaints_before < 0 {
            return Err(EvidenceError::NegativeCount {
                field: "complaints_before",
                value: self.complaints_before,
            });
        }
        if self.complaints_after < 0 {
            return Err(EvidenceError::NegativeCount {
                field: "complaints_after",
                value: self.complaints_after,
            });
        }

        self.check_finite()?;

        if !(-1.0..=1.0).contains(&self.sentiment_shift) {
            return Err(EvidenceError::SentimentOutOfRange(self.sentiment_shift));
        }

        let expected = self.expected_decrease();
        if (self.percentage_decrease - expected).abs() > tolerance {
            return Err(EvidenceError::PercentageMismatch {
                supplied: self.percentage_decrease,
                expected,
            });
        }

        Ok(())
    }

    pub(crate) fn check_finite(&self) -> Result<(), EvidenceError> {
        if !self.percentage_decrease.is_finite() {
            return Err(EvidenceError::NonFinite("percentage_decrease"));
        }
        if !self.sentiment_shift.is_finite() {
            return Err(EvidenceError::NonFinite("sentiment_shift"));
        }
        Ok(())
    }
}

/// (before - after) / before, or zero when there was nothing to decrease from.
fn expected_decrease(before: i64, after: i64) -> f64 {
    if before > 0 {
        (before - after) as f64 / before as f64
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn week() -> (DateTime<Utc>, DateTime<Utc>) {
        let end = Utc::now();
        (end - Duration::days(7), end)
    }

    #[test]
    fn test_from_counts_derives_decrease() {
        let evidence = Evidence::from_counts(150, 120);
        assert!((evidence.percentage_decrease - 0.20).abs() < 1e-12);

        let increase = Evidence::from_counts(100, 150);
        assert!((increase.percentage_decrease + 0.5).abs() < 1e-12);

        let empty = Evidence::from_counts(0, 10);
        assert_eq!(empty.percentage_decrease, 0.0);
    }

    #[test]
    fn test_validate_accepts_rounded_percentage() {
        let (start, end) = week();
        let mut evidence = Evidence::from_counts(150, 22).with_window(start, end);
        evidence.percentage_decrease = 0.853;
        assert!(evidence.validate(0.01).is_ok());

        evidence.percentage_decrease = 0.95;
        assert!(matches!(
            evidence.validate(0.01),
            Err(EvidenceError::PercentageMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_window() {
        let (start, end) = week();
        let missing = Evidence::from_counts(10, 1);
        assert_eq!(
            missing.validate(0.01),
            Err(EvidenceError::MissingField("measurement_start"))
        );

        let inverted = Evidence::from_counts(10, 1).with_window(end, start);
        assert!(matches!(
            inverted.validate(0.01),
            Err(EvidenceError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn test_validate_counts_and_sentiment() {
        let (start, end) = week();
        let mut negative = Evidence::from_counts(10, 1).with_window(start, end);
        negative.complaints_after = -1;
        assert!(matches!(
            negative.validate(1.0),
            Err(EvidenceError::NegativeCount {
                field: "complaints_after",
                ..
            })
        ));

        let sentiment = Evidence::from_counts(10, 1)
            .with_window(start, end)
            .with_sentiment_shift(1.5);
        assert_eq!(
            sentiment.validate(0.01),
            Err(EvidenceError::SentimentOutOfRange(1.5))
        );

        let nan = Evidence::from_counts(10, 1)
            .with_window(start, end)
            .with_sentiment_shift(f64::NAN);
        assert_eq!(
            nan.validate(0.01),
            Err(EvidenceError::NonFinite("sentiment_shift"))
        );
    }

    #[test]
    fn test_window_days_truncates() {
        let end = Utc::now();
        let evidence = Evidence::from_counts(10, 1)
            .with_window(end - Duration::hours(7 * 24 + 23), end);
        assert_eq!(evidence.window_days().unwrap(), 7);
    }

    #[test]
    fn test_distinct_sources() {
        let evidence =
            Evidence::from_counts(10, 1).with_sources(["reddit", "youtube", "reddit"]);
        let sources: Vec<&str> = evidence.distinct_sources().into_iter().collect();
        assert_eq!(sources, vec!["reddit", "youtube"]);
    }
}
