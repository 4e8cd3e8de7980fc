//! Canonical evidence encoding and commitments.
//!
//! Evidence is serialized to a compact JSON object whose keys are emitted in
//! lexicographic order. Floats are rendered as fixed six-decimal strings and
//! timestamps as RFC 3339 UTC with second precision, so logically identical
//! evidence always produces identical bytes regardless of how it was built or
//! transported. The commitment is a 32-byte digest of those bytes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use sha3::Keccak256;

use crate::evidence::{Evidence, EvidenceError};

/// Schema tag embedded in every canonical encoding.
pub const CANONICAL_SCHEMA: &str = "coinsights.evidence.v1";

/// Digits after the decimal point for canonical floats.
const FLOAT_PRECISION: usize = 6;

/// Hash function used to derive commitments.
///
/// This must match the hashing convention of the ledger the commitments are
/// anchored to. The attestation contract on EVM networks uses Keccak-256.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentAlgorithm {
    #[default]
    Keccak256,
    Sha256,
}

impl CommitmentAlgorithm {
    /// Digest arbitrary bytes into a 32-byte array.
    pub fn digest(&self, bytes: &[u8]) -> [u8; 32] {
        match self {
            Self::Keccak256 => {
                let mut hasher = Keccak256::new();
                hasher.update(bytes);
                hasher.finalize().into()
            }
            Self::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(bytes);
                hasher.finalize().into()
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keccak256 => "keccak256",
            Self::Sha256 => "sha256",
        }
    }
}

/// Unknown hash algorithm name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported commitment algorithm: {0} (expected keccak256 or sha256)")]
pub struct UnknownAlgorithm(pub String);

impl FromStr for CommitmentAlgorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keccak256" | "keccak-256" => Ok(Self::Keccak256),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            other => Err(UnknownAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for CommitmentAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a commitment from hex.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitmentParseError {
    #[error("Commitment must be 64 hex digits, got {0}")]
    InvalidLength(usize),

    #[error("Invalid hex in commitment: {0}")]
    InvalidHex(String),
}

/// Fixed-width evidence commitment, as stored on the ledger (`bytes32`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Commitment([u8; 32]);

impl Commitment {
    /// The "no predecessor" value for chain-of-custody links.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Lowercase hex without the `0x` prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commitment({})", self)
    }
}

impl FromStr for Commitment {
    type Err = CommitmentParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches("0x");
        if digits.len() != 64 {
            return Err(CommitmentParseError::InvalidLength(digits.len()));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|e| CommitmentParseError::InvalidHex(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Commitment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Commitment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Canonical shape of evidence.
///
/// Field declaration order is the serialized key order and must stay
/// lexicographic.
#[derive(Serialize)]
struct CanonicalEvidence<'a> {
    analysis_methodology: &'a str,
    complaints_after: i64,
    complaints_before: i64,
    data_sources: Vec<&'a str>,
    measurement_end: String,
    measurement_start: String,
    percentage_decrease: String,
    sample_complaints: &'a [String],
    schema: &'static str,
    sentiment_shift: String,
}

/// Serialize evidence to its canonical byte sequence.
pub fn canonicalize(evidence: &Evidence) -> Result<Vec<u8>, EvidenceError> {
    let (start, end) = evidence.window()?;
    evidence.check_finite()?;

    let canonical = CanonicalEvidence {
        analysis_methodology: &evidence.analysis_methodology,
        complaints_after: evidence.complaints_after,
        complaints_before: evidence.complaints_before,
        data_sources: evidence.distinct_sources().into_iter().collect(),
        measurement_end: canonical_timestamp(&end),
        measurement_start: canonical_timestamp(&start),
        percentage_decrease: fixed_decimal(evidence.percentage_decrease),
        sample_complaints: &evidence.sample_complaints,
        schema: CANONICAL_SCHEMA,
        sentiment_shift: fixed_decimal(evidence.sentiment_shift),
    };

    serde_json::to_vec(&canonical).map_err(|e| EvidenceError::Encoding(e.to_string()))
}

/// Derive the commitment for a piece of evidence.
pub fn hash_evidence(
    evidence: &Evidence,
    algorithm: CommitmentAlgorithm,
) -> Result<Commitment, EvidenceError> {
    let bytes = canonicalize(evidence)?;
    Ok(Commitment(algorithm.digest(&bytes)))
}

fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn fixed_decimal(value: f64) -> String {
    let rendered = format!("{:.*}", FLOAT_PRECISION, value);
    // "-0.000000" and "0.000000" are the same value
    if rendered.starts_with('-') && rendered[1..].bytes().all(|b| b == b'0' || b == b'.') {
        rendered[1..].to_string()
    } else {
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Evidence {
        let start = Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 12, 8, 0, 0, 0).unwrap();
        let mut evidence = Evidence::from_counts(150, 22)
            .with_sentiment_shift(0.3)
            .with_samples(["complaint_001", "complaint_002"])
            .with_sources(["youtube", "google", "reddit"])
            .with_window(start, end)
            .with_methodology("Complaint volume tracking");
        evidence.percentage_decrease = 0.853;
        evidence
    }

    #[test]
    fn test_canonical_form() {
        let bytes = canonicalize(&sample()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            concat!(
                r#"{"analysis_methodology":"Complaint volume tracking","#,
                r#""complaints_after":22,"complaints_before":150,"#,
                r#""data_sources":["google","reddit","youtube"],"#,
                r#""measurement_end":"2025-12-08T00:00:00Z","#,
                r#""measurement_start":"2025-12-01T00:00:00Z","#,
                r#""percentage_decrease":"0.853000","#,
                r#""sample_complaints":["complaint_001","complaint_002"],"#,
                r#""schema":"coinsights.evidence.v1","#,
                r#""sentiment_shift":"0.300000"}"#
            )
        );
    }

    #[test]
    fn test_hash_deterministic() {
        let evidence = sample();
        let a = hash_evidence(&evidence, CommitmentAlgorithm::Keccak256).unwrap();
        let b = hash_evidence(&evidence, CommitmentAlgorithm::Keccak256).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_zero());

        let sha = hash_evidence(&evidence, CommitmentAlgorithm::Sha256).unwrap();
        assert_ne!(a, sha);
    }

    #[test]
    fn test_hash_ignores_field_order_and_whitespace() {
        let compact = r#"{"complaints_before":150,"complaints_after":22,"percentage_decrease":0.853,"sentiment_shift":0.3,"sample_complaints":["complaint_001","complaint_002"],"data_sources":["youtube","google","reddit"],"measurement_start":"2025-12-01T00:00:00Z","measurement_end":"2025-12-08T00:00:00Z","analysis_methodology":"Complaint volume tracking"}"#;
        let shuffled = r#"
        {
            "analysis_methodology": "Complaint volume tracking",
            "measurement_end": "2025-12-08T01:00:00+01:00",
            "data_sources": ["reddit", "youtube", "google", "reddit"],
            "sentiment_shift": 0.30000000001,
            "measurement_start": "2025-12-01T00:00:00.000Z",
            "sample_complaints": ["complaint_001", "complaint_002"],
            "percentage_decrease": 0.8530,
            "complaints_after": 22,
            "complaints_before": 150
        }"#;

        let a: Evidence = serde_json::from_str(compact).unwrap();
        let b: Evidence = serde_json::from_str(shuffled).unwrap();

        let expected = hash_evidence(&sample(), CommitmentAlgorithm::Keccak256).unwrap();
        assert_eq!(hash_evidence(&a, CommitmentAlgorithm::Keccak256).unwrap(), expected);
        assert_eq!(hash_evidence(&b, CommitmentAlgorithm::Keccak256).unwrap(), expected);
    }

    #[test]
    fn test_hash_changes_with_evidence() {
        let original = hash_evidence(&sample(), CommitmentAlgorithm::Keccak256).unwrap();

        let mut altered = sample();
        altered.complaints_after = 23;
        let changed = hash_evidence(&altered, CommitmentAlgorithm::Keccak256).unwrap();
        assert_ne!(original, changed);

        let mut reordered = sample();
        reordered.sample_complaints.reverse();
        let changed = hash_evidence(&reordered, CommitmentAlgorithm::Keccak256).unwrap();
        assert_ne!(original, changed);
    }

    #[test]
    fn test_canonicalize_requires_window() {
        let evidence = Evidence::from_counts(10, 2);
        assert_eq!(
            canonicalize(&evidence),
            Err(EvidenceError::MissingField("measurement_start"))
        );
    }

    #[test]
    fn test_fixed_decimal_normalizes_negative_zero() {
        assert_eq!(fixed_decimal(-0.0), "0.000000");
        assert_eq!(fixed_decimal(-0.0000001), "0.000000");
        assert_eq!(fixed_decimal(-0.25), "-0.250000");
        assert_eq!(fixed_decimal(0.1 + 0.2), "0.300000");
    }

    #[test]
    fn test_keccak_known_vector() {
        // keccak256("") from the Ethereum yellow paper
        let empty = Commitment::from_bytes(CommitmentAlgorithm::Keccak256.digest(b""));
        assert_eq!(
            empty.to_string(),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_commitment_parse() {
        let commitment = hash_evidence(&sample(), CommitmentAlgorithm::Keccak256).unwrap();
        let text = commitment.to_string();
        assert!(text.starts_with("0x"));
        assert_eq!(text.len(), 66);

        assert_eq!(text.parse::<Commitment>().unwrap(), commitment);
        assert_eq!(commitment.to_hex().parse::<Commitment>().unwrap(), commitment);
        assert_eq!(
            "0x1234".parse::<Commitment>(),
            Err(CommitmentParseError::InvalidLength(4))
        );
        assert!("zz".repeat(32).parse::<Commitment>().is_err());

        let json = serde_json::to_string(&commitment).unwrap();
        assert_eq!(json, format!("\"{}\"", text));
        let back: Commitment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, commitment);
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!("keccak256".parse(), Ok(CommitmentAlgorithm::Keccak256));
        assert_eq!("SHA256".parse(), Ok(CommitmentAlgorithm::Sha256));
        assert!("md5".parse::<CommitmentAlgorithm>().is_err());
    }
}
