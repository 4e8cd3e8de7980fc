//! Service configuration.

use chrono::{DateTime, Utc};
use resolution::{CommitmentAlgorithm, EngineConfig, TrackingConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::chains::{self, ChainConfig, DEFAULT_NETWORK};

/// Error types for configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Ledger write settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttestationConfig {
    /// Hash function for evidence commitments
    pub algorithm: CommitmentAlgorithm,
    /// How long to wait for a receipt (seconds)
    pub confirmation_timeout_secs: u64,
    /// Receipt polling interval (milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            algorithm: CommitmentAlgorithm::Keccak256,
            confirmation_timeout_secs: 120,
            poll_interval_ms: 2_000,
        }
    }
}

impl AttestationConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Largest accepted `future_skew_secs` (one day).
pub const MAX_FUTURE_SKEW_SECS: i64 = 86_400;
/// Largest accepted `max_age_days` (a century).
pub const MAX_AGE_DAYS: i64 = 36_500;

/// Verification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// How far in the future a ledger timestamp may be (seconds)
    pub future_skew_secs: i64,
    /// Oldest acceptable ledger timestamp (days)
    pub max_age_days: i64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            future_skew_secs: 300, // 5 minutes
            max_age_days: 3650,    // ~10 years
        }
    }
}

impl VerificationConfig {
    /// Whether a ledger timestamp (unix seconds) is neither too far in the
    /// future nor too old.
    ///
    /// Bounds that fall outside chrono's range are treated as open.
    pub fn accepts_timestamp(&self, timestamp: i64, now: DateTime<Utc>) -> bool {
        let latest = chrono::Duration::try_seconds(self.future_skew_secs)
            .and_then(|skew| now.checked_add_signed(skew))
            .map_or(i64::MAX, |t| t.timestamp());
        let earliest = chrono::Duration::try_days(self.max_age_days)
            .and_then(|age| now.checked_sub_signed(age))
            .map_or(i64::MIN, |t| t.timestamp());
        (earliest..=latest).contains(&timestamp)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Network name, one of the supported chains
    pub network: String,
    /// Resolution engine settings
    pub engine: EngineConfig,
    /// Complaint cluster thresholds
    pub tracking: TrackingConfig,
    /// Ledger write settings
    pub attestation: AttestationConfig,
    /// Verification settings
    pub verification: VerificationConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            network: DEFAULT_NETWORK.to_string(),
            engine: EngineConfig::default(),
            tracking: TrackingConfig::default(),
            attestation: AttestationConfig::default(),
            verification: VerificationConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Chain details for the configured network.
    pub fn chain(&self) -> Result<ChainConfig, ConfigError> {
        chains::chain(&self.network)
            .ok_or_else(|| ConfigError::UnsupportedNetwork(self.network.clone()))
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chain()?;
        if self.attestation.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".into()));
        }
        if self.attestation.confirmation_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "confirmation_timeout_secs must be positive".into(),
            ));
        }
        if self.engine.percentage_tolerance < 0.0 {
            return Err(ConfigError::Invalid(
                "percentage_tolerance must not be negative".into(),
            ));
        }
        if !(0..=MAX_FUTURE_SKEW_SECS).contains(&self.verification.future_skew_secs) {
            return Err(ConfigError::Invalid(format!(
                "future_skew_secs must be between 0 and {}",
                MAX_FUTURE_SKEW_SECS
            )));
        }
        if !(0..=MAX_AGE_DAYS).contains(&self.verification.max_age_days) {
            return Err(ConfigError::Invalid(format!(
                "max_age_days must be between 0 and {}",
                MAX_AGE_DAYS
            )));
        }
        if self.tracking.active_threshold < self.tracking.tracking_threshold {
            return Err(ConfigError::Invalid(
                "active_threshold must be at least tracking_threshold".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resolution::ReResolutionPolicy;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.network, "base_sepolia");
        assert_eq!(config.attestation.algorithm, CommitmentAlgorithm::Keccak256);
        assert_eq!(config.attestation.confirmation_timeout(), Duration::from_secs(120));
        assert_eq!(config.attestation.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.verification.future_skew_secs, 300);
        assert_eq!(config.chain().unwrap().chain_id, 84532);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_accepts_timestamp() {
        let config = VerificationConfig::default();
        let now = Utc::now();
        let ts = now.timestamp();
        assert!(config.accepts_timestamp(ts, now));
        assert!(config.accepts_timestamp(ts + 300, now));
        assert!(!config.accepts_timestamp(ts + 301, now));
        assert!(config.accepts_timestamp(ts - 3649 * 86_400, now));
        assert!(!config.accepts_timestamp(ts - 3651 * 86_400, now));

        // Out-of-range windows saturate instead of panicking
        let unbounded = VerificationConfig {
            future_skew_secs: i64::MAX,
            max_age_days: i64::MAX,
        };
        assert!(unbounded.accepts_timestamp(ts + 86_400 * 365 * 100, now));
        assert!(unbounded.accepts_timestamp(0, now));
    }

    #[test]
    fn test_verification_bounds_validated() {
        let yaml = "verification:\n  future_skew_secs: 9223372036854775807\n";
        assert!(matches!(
            ServiceConfig::from_yaml(yaml),
            Err(ConfigError::Invalid(_))
        ));

        let mut config = ServiceConfig::default();
        config.verification.max_age_days = -1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.verification.max_age_days = MAX_AGE_DAYS + 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.verification.max_age_days = MAX_AGE_DAYS;
        config.verification.future_skew_secs = MAX_FUTURE_SKEW_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = ServiceConfig::default();
        let yaml = config.to_yaml().unwrap();
        let parsed = ServiceConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
network: base_mainnet
engine:
  re_resolution: reject
attestation:
  algorithm: sha256
"#;
        let config = ServiceConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.network, "base_mainnet");
        assert_eq!(config.engine.re_resolution, ReResolutionPolicy::Reject);
        assert_eq!(config.attestation.algorithm, CommitmentAlgorithm::Sha256);
        assert_eq!(config.attestation.poll_interval_ms, 2_000);
        assert_eq!(config.tracking.tracking_threshold, 10);
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            ServiceConfig::from_yaml("network: polygon"),
            Err(ConfigError::UnsupportedNetwork(_))
        ));
        assert!(matches!(
            ServiceConfig::from_yaml("attestation:\n  poll_interval_ms: 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ServiceConfig::from_yaml("network: [1, 2"),
            Err(ConfigError::Yaml(_))
        ));
    }
}
