//! Supported networks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ledger::ChainInfo;

/// Network the attestation contract is deployed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Display name
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    /// Block explorer base URL
    pub explorer_url: String,
    pub is_testnet: bool,
}

impl ChainConfig {
    fn new(name: &str, chain_id: u64, rpc_url: &str, explorer_url: &str, is_testnet: bool) -> Self {
        Self {
            name: name.to_string(),
            chain_id,
            rpc_url: rpc_url.to_string(),
            explorer_url: explorer_url.to_string(),
            is_testnet,
        }
    }

    /// Ledger-facing description of this network.
    pub fn info(
        &self,
        network: impl Into<String>,
        contract_address: impl Into<String>,
        attestor: impl Into<String>,
    ) -> ChainInfo {
        ChainInfo {
            network: network.into(),
            chain_id: self.chain_id,
            contract_address: contract_address.into(),
            explorer_url: self.explorer_url.clone(),
            attestor: attestor.into(),
        }
    }
}

/// Default network.
pub const DEFAULT_NETWORK: &str = "base_sepolia";

/// All networks with a deployed attestation contract, keyed by network name.
pub fn supported_chains() -> BTreeMap<&'static str, ChainConfig> {
    BTreeMap::from([
        (
            "base_sepolia",
            ChainConfig::new(
                "Base Sepolia",
                84532,
                "https://sepolia.base.org",
                "https://sepolia.basescan.org",
                true,
            ),
        ),
        (
            "base_mainnet",
            ChainConfig::new(
                "Base",
                8453,
                "https://mainnet.base.org",
                "https://basescan.org",
                false,
            ),
        ),
        (
            "ethereum_sepolia",
            ChainConfig::new(
                "Ethereum Sepolia",
                11155111,
                "https://rpc.sepolia.org",
                "https://sepolia.etherscan.io",
                true,
            ),
        ),
    ])
}

/// Look up a network by name.
pub fn chain(network: &str) -> Option<ChainConfig> {
    supported_chains().remove(network)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_chains() {
        let chains = supported_chains();
        assert_eq!(chains.len(), 3);
        assert_eq!(chains["base_sepolia"].chain_id, 84532);
        assert_eq!(chains["base_mainnet"].chain_id, 8453);
        assert!(!chains["base_mainnet"].is_testnet);
        assert_eq!(chains["ethereum_sepolia"].chain_id, 11155111);
        assert!(chain("polygon").is_none());
    }

    #[test]
    fn test_chain_info() {
        let info = chain(DEFAULT_NETWORK)
            .unwrap()
            .info(DEFAULT_NETWORK, "0xcontract", "0xattestor");
        assert_eq!(info.chain_id, 84532);
        assert_eq!(info.tx_url("0xabc"), "https://sepolia.basescan.org/tx/0xabc");
    }
}
