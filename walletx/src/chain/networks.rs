//! Static network catalog.
//!
//! Each chain has a mainnet and one public test network. RPC endpoints are
//! deployment-specific and resolved from configuration or the environment.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Chain;

/// Network of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Production network.
    Mainnet,
    /// The chain's public test network (Sepolia, Amoy, Fuji, Devnet, ...).
    Testnet,
}

impl Network {
    /// Stable identifier used in storage keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Self::Mainnet),
            "testnet" | "sepolia" | "amoy" | "fuji" | "devnet" => Ok(Self::Testnet),
            other => Err(format!("unknown network '{other}'")),
        }
    }
}

/// Static description of a chain's network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Display name (e.g., "Base Sepolia").
    pub name: &'static str,
    /// EIP-155 chain id; `None` for non-EVM chains.
    pub chain_id: Option<u64>,
    /// Block explorer base URL.
    pub explorer_url: &'static str,
    /// Faucet URL for test networks.
    pub faucet_url: Option<&'static str>,
}

impl NetworkConfig {
    /// Explorer URL for a transaction hash.
    #[must_use]
    pub fn transaction_url(&self, hash: &str) -> String {
        match self.explorer_url.split_once('?') {
            Some((base, query)) => format!("{base}/tx/{hash}?{query}"),
            None => format!("{}/tx/{hash}", self.explorer_url),
        }
    }

    /// Explorer URL for an address.
    #[must_use]
    pub fn address_url(&self, address: &str) -> String {
        match self.explorer_url.split_once('?') {
            Some((base, query)) => format!("{base}/address/{address}?{query}"),
            None => format!("{}/address/{address}", self.explorer_url),
        }
    }
}

/// Returns the catalog entry for a chain's network.
#[must_use]
pub fn network_config(chain: Chain, network: Network) -> &'static NetworkConfig {
    match (chain, network) {
        (Chain::Ethereum, Network::Mainnet) => &NetworkConfig {
            name: "Ethereum Mainnet",
            chain_id: Some(1),
            explorer_url: "https://etherscan.io",
            faucet_url: None,
        },
        (Chain::Ethereum, Network::Testnet) => &NetworkConfig {
            name: "Ethereum Sepolia",
            chain_id: Some(11_155_111),
            explorer_url: "https://sepolia.etherscan.io",
            faucet_url: Some("https://cloud.google.com/application/web3/faucet/ethereum/sepolia"),
        },
        (Chain::Base, Network::Mainnet) => &NetworkConfig {
            name: "Base Mainnet",
            chain_id: Some(8453),
            explorer_url: "https://basescan.org",
            faucet_url: None,
        },
        (Chain::Base, Network::Testnet) => &NetworkConfig {
            name: "Base Sepolia",
            chain_id: Some(84_532),
            explorer_url: "https://sepolia.basescan.org",
            faucet_url: Some("https://portal.cdp.coinbase.com/products/faucet"),
        },
        (Chain::Polygon, Network::Mainnet) => &NetworkConfig {
            name: "Polygon Mainnet",
            chain_id: Some(137),
            explorer_url: "https://polygonscan.com",
            faucet_url: None,
        },
        (Chain::Polygon, Network::Testnet) => &NetworkConfig {
            name: "Polygon Amoy",
            chain_id: Some(80_002),
            explorer_url: "https://amoy.polygonscan.com",
            faucet_url: Some("https://faucet.polygon.technology"),
        },
        (Chain::Avalanche, Network::Mainnet) => &NetworkConfig {
            name: "Avalanche C-Chain",
            chain_id: Some(43_114),
            explorer_url: "https://snowtrace.io",
            faucet_url: None,
        },
        (Chain::Avalanche, Network::Testnet) => &NetworkConfig {
            name: "Avalanche Fuji",
            chain_id: Some(43_113),
            explorer_url: "https://testnet.snowtrace.io",
            faucet_url: Some("https://core.app/tools/testnet-faucet"),
        },
        (Chain::Bnb, Network::Mainnet) => &NetworkConfig {
            name: "BNB Smart Chain",
            chain_id: Some(56),
            explorer_url: "https://bscscan.com",
            faucet_url: None,
        },
        (Chain::Bnb, Network::Testnet) => &NetworkConfig {
            name: "BNB Smart Chain Testnet",
            chain_id: Some(97),
            explorer_url: "https://testnet.bscscan.com",
            faucet_url: Some("https://www.bnbchain.org/en/testnet-faucet"),
        },
        (Chain::Solana, Network::Mainnet) => &NetworkConfig {
            name: "Solana Mainnet",
            chain_id: None,
            explorer_url: "https://explorer.solana.com",
            faucet_url: None,
        },
        (Chain::Solana, Network::Testnet) => &NetworkConfig {
            name: "Solana Devnet",
            chain_id: None,
            explorer_url: "https://explorer.solana.com?cluster=devnet",
            faucet_url: Some("https://faucet.solana.com"),
        },
    }
}

/// Environment variable consulted for a chain's RPC endpoint.
#[must_use]
pub fn rpc_env_var(chain: Chain, network: Network) -> String {
    format!(
        "WALLETX_{}_{}_RPC_URL",
        chain.as_str().to_ascii_uppercase(),
        network.as_str().to_ascii_uppercase()
    )
}

/// Reads the RPC endpoint for a chain's network from the environment.
///
/// Looks up `WALLETX_<CHAIN>_<NETWORK>_RPC_URL`, e.g.
/// `WALLETX_BASE_TESTNET_RPC_URL`.
#[must_use]
pub fn rpc_url_from_env(chain: Chain, network: Network) -> Option<String> {
    std::env::var(rpc_env_var(chain, network))
        .ok()
        .filter(|url| !url.trim().is_empty())
}
