//! Network definitions and known token deployments.
//!
//! This module defines the networks IVXP settles on and provides the
//! statically known USDC deployments per network.

use alloy_primitives::{Address, address};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Supported Ethereum-compatible networks.
///
/// Used to differentiate between testnet and mainnet environments for the
/// IVXP protocol. A provider is configured for exactly one network and
/// rejects payment proofs that name another.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    /// Base Sepolia testnet (chain ID 84532).
    #[serde(rename = "base-sepolia")]
    BaseSepolia,
    /// Base mainnet (chain ID 8453).
    #[serde(rename = "base-mainnet")]
    BaseMainnet,
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::BaseSepolia => {
                write!(f, "base-sepolia")
            }
            Network::BaseMainnet => {
                write!(f, "base-mainnet")
            }
        }
    }
}

/// Error returned when parsing an unknown network name.
#[derive(Debug, thiserror::Error)]
#[error("Unknown network: {0}")]
pub struct UnknownNetwork(String);

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base-sepolia" => Ok(Network::BaseSepolia),
            "base-mainnet" => Ok(Network::BaseMainnet),
            other => Err(UnknownNetwork(other.to_string())),
        }
    }
}

impl Network {
    /// Return the numeric chain ID associated with the network.
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::BaseSepolia => 84532,
            Network::BaseMainnet => 8453,
        }
    }

    /// Return all known [`Network`] variants.
    pub fn variants() -> &'static [Network] {
        &[Network::BaseSepolia, Network::BaseMainnet]
    }
}

/// Lazily initialized known USDC deployment on Base Sepolia as [`UsdcDeployment`].
static USDC_BASE_SEPOLIA: Lazy<UsdcDeployment> = Lazy::new(|| UsdcDeployment {
    address: address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
    network: Network::BaseSepolia,
    decimals: 6,
});

/// Lazily initialized known USDC deployment on Base mainnet as [`UsdcDeployment`].
static USDC_BASE_MAINNET: Lazy<UsdcDeployment> = Lazy::new(|| UsdcDeployment {
    address: address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
    network: Network::BaseMainnet,
    decimals: 6,
});

/// A known USDC token deployment.
#[derive(Clone, Debug)]
pub struct UsdcDeployment {
    /// The token contract address.
    pub address: Address,
    /// The network the contract is deployed on.
    pub network: Network,
    /// ERC-20 decimals (6 for USDC).
    pub decimals: u8,
}

impl UsdcDeployment {
    /// Return the known USDC deployment for the given network.
    pub fn by_network<N: Borrow<Network>>(network: N) -> &'static UsdcDeployment {
        match network.borrow() {
            Network::BaseSepolia => &USDC_BASE_SEPOLIA,
            Network::BaseMainnet => &USDC_BASE_MAINNET,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_roundtrip() {
        assert_eq!(
            "base-sepolia".parse::<Network>().unwrap(),
            Network::BaseSepolia
        );
        assert_eq!(
            "base-mainnet".parse::<Network>().unwrap(),
            Network::BaseMainnet
        );
        assert!("base".parse::<Network>().is_err());
        assert_eq!(Network::BaseSepolia.to_string(), "base-sepolia");
    }

    #[test]
    fn test_chain_ids() {
        assert_eq!(Network::BaseSepolia.chain_id(), 84532);
        assert_eq!(Network::BaseMainnet.chain_id(), 8453);
    }

    #[test]
    fn test_usdc_deployments() {
        let sepolia = UsdcDeployment::by_network(Network::BaseSepolia);
        assert_eq!(sepolia.network, Network::BaseSepolia);
        assert_eq!(sepolia.decimals, 6);

        let mainnet = UsdcDeployment::by_network(Network::BaseMainnet);
        assert_eq!(mainnet.network, Network::BaseMainnet);
    }

    #[test]
    fn test_serde_wire_names() {
        let json = serde_json::to_string(&Network::BaseSepolia).unwrap();
        assert_eq!(json, "\"base-sepolia\"");
        let network: Network = serde_json::from_str("\"base-mainnet\"").unwrap();
        assert_eq!(network, Network::BaseMainnet);
    }
}
