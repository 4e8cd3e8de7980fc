//! Chain of custody.
//!
//! Each (exchange, category) pair has an append-only list of attested
//! commitments. Every link names its predecessor, so the list can be checked
//! against the ledger and against itself.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use resolution::Commitment;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The pair a custody chain belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CustodyKey {
    pub exchange: String,
    pub issue_category: String,
}

impl CustodyKey {
    pub fn new(exchange: impl Into<String>, issue_category: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            issue_category: issue_category.into(),
        }
    }
}

impl fmt::Display for CustodyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.exchange, self.issue_category)
    }
}

/// One attested commitment in a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyLink {
    /// Ledger sequence id
    pub sequence_id: u64,
    pub evidence_hash: Commitment,
    pub previous_hash: Commitment,
    /// Resolution the commitment belongs to; unknown for links copied from
    /// the ledger until a resolution adopts them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Error types for custody operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CustodyError {
    #[error("Custody divergence on {key}: expected previous {expected}, got {actual}")]
    Divergence {
        key: CustodyKey,
        expected: Commitment,
        actual: Commitment,
    },
}

/// Custody chains for all pairs.
#[derive(Default)]
pub struct CustodyLog {
    chains: DashMap<CustodyKey, Vec<CustodyLink>>,
}

impl CustodyLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent commitment for a pair.
    pub fn latest(&self, key: &CustodyKey) -> Option<Commitment> {
        self.chains
            .get(key)
            .and_then(|chain| chain.last().map(|link| link.evidence_hash))
    }

    /// Whether the pair's chain holds `commitment`.
    pub fn contains(&self, key: &CustodyKey, commitment: &Commitment) -> bool {
        self.chains.get(key).map_or(false, |chain| {
            chain.iter().any(|link| link.evidence_hash == *commitment)
        })
    }

    /// Append a link.
    ///
    /// Returns `Ok(false)` if the commitment is already in the chain, filling
    /// in its resolution id if that was not yet known. A link
    /// must name the current latest commitment as its predecessor; the first
    /// link of a chain may name anything, since the ledger may hold history
    /// this log has not seen.
    pub fn append(&self, key: &CustodyKey, link: CustodyLink) -> Result<bool, CustodyError> {
        let mut chain = self.chains.entry(key.clone()).or_default();

        if let Some(existing) = chain
            .iter_mut()
            .find(|l| l.evidence_hash == link.evidence_hash)
        {
            if existing.resolution_id.is_none() {
                existing.resolution_id = link.resolution_id;
            }
            return Ok(false);
        }

        if let Some(last) = chain.last() {
            if last.evidence_hash != link.previous_hash {
                return Err(CustodyError::Divergence {
                    key: key.clone(),
                    expected: last.evidence_hash,
                    actual: link.previous_hash,
                });
            }
        }

        chain.push(link);
        Ok(true)
    }

    /// All links for a pair, oldest first.
    pub fn chain(&self, key: &CustodyKey) -> Vec<CustodyLink> {
        self.chains
            .get(key)
            .map(|chain| chain.value().clone())
            .unwrap_or_default()
    }

    /// Whether every link names its predecessor.
    pub fn verify_chain(&self, key: &CustodyKey) -> bool {
        self.chains.get(key).map_or(true, |chain| {
            chain
                .windows(2)
                .all(|pair| pair[1].previous_hash == pair[0].evidence_hash)
        })
    }

    /// Total links across all pairs.
    pub fn len(&self) -> usize {
        self.chains.iter().map(|chain| chain.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(sequence_id: u64, hash: u8, previous: u8) -> CustodyLink {
        CustodyLink {
            sequence_id,
            evidence_hash: Commitment::from_bytes([hash; 32]),
            previous_hash: Commitment::from_bytes([previous; 32]),
            resolution_id: Some(format!("res-{}", sequence_id)),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_append_links() {
        let log = CustodyLog::new();
        let key = CustodyKey::new("coinbase", "withdrawal_delays");
        assert!(log.latest(&key).is_none());

        assert!(log.append(&key, link(1, 1, 0)).unwrap());
        assert!(log.append(&key, link(2, 2, 1)).unwrap());
        assert_eq!(log.latest(&key), Some(Commitment::from_bytes([2; 32])));

        // Re-appending is a no-op
        assert!(!log.append(&key, link(2, 2, 1)).unwrap());
        assert!(!log.append(&key, link(1, 1, 0)).unwrap());

        assert_eq!(log.chain(&key).len(), 2);
        assert!(log.verify_chain(&key));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_divergence() {
        let log = CustodyLog::new();
        let key = CustodyKey::new("coinbase", "withdrawal_delays");
        log.append(&key, link(1, 1, 0)).unwrap();

        let err = log.append(&key, link(2, 2, 9)).unwrap_err();
        assert_eq!(
            err,
            CustodyError::Divergence {
                key: key.clone(),
                expected: Commitment::from_bytes([1; 32]),
                actual: Commitment::from_bytes([9; 32]),
            }
        );
        assert_eq!(log.chain(&key).len(), 1);
    }

    #[test]
    fn test_backfilled_link_claimed() {
        let log = CustodyLog::new();
        let key = CustodyKey::new("coinbase", "withdrawal_delays");
        let backfilled = CustodyLink {
            resolution_id: None,
            ..link(1, 1, 0)
        };
        assert!(log.append(&key, backfilled).unwrap());
        assert!(log.contains(&key, &Commitment::from_bytes([1; 32])));
        assert!(!log.contains(&key, &Commitment::from_bytes([2; 32])));

        assert!(!log.append(&key, link(1, 1, 0)).unwrap());
        assert_eq!(log.chain(&key)[0].resolution_id.as_deref(), Some("res-1"));

        // A known resolution id is never replaced
        let other = CustodyLink {
            resolution_id: Some("other".to_string()),
            ..link(1, 1, 0)
        };
        assert!(!log.append(&key, other).unwrap());
        assert_eq!(log.chain(&key)[0].resolution_id.as_deref(), Some("res-1"));
    }

    #[test]
    fn test_cold_start_accepts_any_predecessor() {
        let log = CustodyLog::new();
        let key = CustodyKey::new("kraken", "fees");
        assert!(log.append(&key, link(7, 7, 6)).unwrap());
        assert_eq!(key.to_string(), "kraken/fees");
    }
}
