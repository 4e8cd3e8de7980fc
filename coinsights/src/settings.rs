//! Effective configuration: YAML file, then command line and environment overrides.

use std::path::Path;

use anyhow::Context;
use attestation::ServiceConfig;
use resolution::CommitmentAlgorithm;
use tracing::info;

/// Values supplied on the command line or through the environment.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub network: Option<String>,
    pub algorithm: Option<CommitmentAlgorithm>,
}

/// Load the config file if it exists, otherwise defaults, then apply overrides.
pub fn load(path: &Path, overrides: Overrides) -> anyhow::Result<ServiceConfig> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        ServiceConfig::from_yaml(&content)
            .with_context(|| format!("parsing {}", path.display()))?
    } else {
        info!(path = %path.display(), "Config file not found, using defaults");
        ServiceConfig::default()
    };

    if let Some(network) = overrides.network {
        config.network = network;
    }
    if let Some(algorithm) = overrides.algorithm {
        config.attestation.algorithm = algorithm;
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir.path().join("absent.yaml"), Overrides::default()).unwrap();
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn test_file_then_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "network: base_mainnet").unwrap();
        writeln!(file, "attestation:").unwrap();
        writeln!(file, "  poll_interval_ms: 500").unwrap();

        let config = load(file.path(), Overrides::default()).unwrap();
        assert_eq!(config.network, "base_mainnet");
        assert_eq!(config.attestation.poll_interval_ms, 500);

        let overrides = Overrides {
            network: Some("ethereum_sepolia".to_string()),
            algorithm: Some(CommitmentAlgorithm::Sha256),
        };
        let config = load(file.path(), overrides).unwrap();
        assert_eq!(config.network, "ethereum_sepolia");
        assert_eq!(config.attestation.algorithm, CommitmentAlgorithm::Sha256);
        assert_eq!(config.attestation.poll_interval_ms, 500);
    }

    #[test]
    fn test_unsupported_network_override() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = Overrides {
            network: Some("polygon".to_string()),
            ..Default::default()
        };
        assert!(load(&dir.path().join("absent.yaml"), overrides).is_err());
    }
}
