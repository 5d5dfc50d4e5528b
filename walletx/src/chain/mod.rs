//! Supported chains and their derivation families.
//!
//! Every [`Chain`] belongs to exactly one [`ChainFamily`], and every family
//! maps to one [`ChainFamilyDescriptor`]. Chains whose descriptors are equal
//! derive byte-identical addresses from the same secret, which is what lets
//! Ethereum, Base, Polygon, Avalanche and BNB Smart Chain share one seed.
//!
//! # Supported Chains
//!
//! | Chain     | Family | Curve     | Coin type | Encoding |
//! |-----------|--------|-----------|-----------|----------|
//! | Ethereum  | EVM    | secp256k1 | 60        | EIP-55   |
//! | Base      | EVM    | secp256k1 | 60        | EIP-55   |
//! | Polygon   | EVM    | secp256k1 | 60        | EIP-55   |
//! | Avalanche | EVM    | secp256k1 | 60        | EIP-55   |
//! | BNB       | EVM    | secp256k1 | 60        | EIP-55   |
//! | Solana    | Solana | ed25519   | 501       | base58   |

mod address;
mod networks;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use address::{normalize_address, validate_address};
pub use networks::{Network, NetworkConfig, network_config, rpc_env_var, rpc_url_from_env};

/// Elliptic curve used for key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Curve {
    /// BIP-32 over secp256k1.
    Secp256k1,
    /// SLIP-0010 over ed25519 (hardened-only).
    Ed25519,
}

/// How a public key is rendered as an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressEncoding {
    /// Keccak-256 of the uncompressed key, last 20 bytes, EIP-55 mixed case.
    HexEip55,
    /// Base58 of the raw 32-byte public key (Solana).
    Base58,
}

/// A derivation scheme shared by a family of chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainFamilyDescriptor {
    /// Curve used for key derivation.
    pub curve: Curve,
    /// BIP-44 coin type (hardened second path segment).
    pub coin_type: u32,
    /// Address rendering.
    pub address_encoding: AddressEncoding,
}

impl ChainFamilyDescriptor {
    /// Descriptor shared by all EVM-compatible chains.
    pub const EVM: Self = Self {
        curve: Curve::Secp256k1,
        coin_type: 60,
        address_encoding: AddressEncoding::HexEip55,
    };

    /// Descriptor for Solana.
    pub const SOLANA: Self = Self {
        curve: Curve::Ed25519,
        coin_type: 501,
        address_encoding: AddressEncoding::Base58,
    };
}

/// A closed set of derivation families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    /// EVM-compatible chains sharing coin type 60.
    Evm,
    /// Solana (ed25519, coin type 501).
    Solana,
}

impl ChainFamily {
    /// All families.
    pub const ALL: [Self; 2] = [Self::Evm, Self::Solana];

    /// The derivation descriptor for this family.
    #[must_use]
    pub const fn descriptor(self) -> ChainFamilyDescriptor {
        match self {
            Self::Evm => ChainFamilyDescriptor::EVM,
            Self::Solana => ChainFamilyDescriptor::SOLANA,
        }
    }

    /// Chains belonging to this family.
    #[must_use]
    pub const fn chains(self) -> &'static [Chain] {
        match self {
            Self::Evm => &[
                Chain::Ethereum,
                Chain::Base,
                Chain::Polygon,
                Chain::Avalanche,
                Chain::Bnb,
            ],
            Self::Solana => &[Chain::Solana],
        }
    }

    /// Stable identifier used in storage keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Evm => "evm",
            Self::Solana => "solana",
        }
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chain supported by the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    /// Ethereum.
    Ethereum,
    /// Base (Coinbase L2).
    Base,
    /// Polygon PoS.
    Polygon,
    /// Avalanche C-Chain.
    Avalanche,
    /// BNB Smart Chain.
    Bnb,
    /// Solana.
    Solana,
}

impl Chain {
    /// All supported chains.
    pub const ALL: [Self; 6] = [
        Self::Ethereum,
        Self::Base,
        Self::Polygon,
        Self::Avalanche,
        Self::Bnb,
        Self::Solana,
    ];

    /// The derivation family of this chain.
    #[must_use]
    pub const fn family(self) -> ChainFamily {
        match self {
            Self::Ethereum | Self::Base | Self::Polygon | Self::Avalanche | Self::Bnb => {
                ChainFamily::Evm
            }
            Self::Solana => ChainFamily::Solana,
        }
    }

    /// Shorthand for `self.family().descriptor()`.
    #[must_use]
    pub const fn descriptor(self) -> ChainFamilyDescriptor {
        self.family().descriptor()
    }

    /// Returns `true` for EVM-compatible chains.
    #[must_use]
    pub const fn is_evm(self) -> bool {
        matches!(self.family(), ChainFamily::Evm)
    }

    /// Stable identifier used in storage keys and configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Base => "base",
            Self::Polygon => "polygon",
            Self::Avalanche => "avalanche",
            Self::Bnb => "bnb",
            Self::Solana => "solana",
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Ethereum => "Ethereum",
            Self::Base => "Base",
            Self::Polygon => "Polygon",
            Self::Avalanche => "Avalanche",
            Self::Bnb => "BNB Smart Chain",
            Self::Solana => "Solana",
        }
    }

    /// Native token symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Ethereum | Self::Base => "ETH",
            Self::Polygon => "POL",
            Self::Avalanche => "AVAX",
            Self::Bnb => "BNB",
            Self::Solana => "SOL",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown chain identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown chain '{0}'")]
pub struct ParseChainError(String);

impl FromStr for Chain {
    type Err = ParseChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "ethereum" | "eth" => Ok(Self::Ethereum),
            "base" => Ok(Self::Base),
            "polygon" | "matic" => Ok(Self::Polygon),
            "avalanche" | "avax" => Ok(Self::Avalanche),
            "bnb" | "bsc" => Ok(Self::Bnb),
            "solana" | "sol" => Ok(Self::Solana),
            _ => Err(ParseChainError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evm_chains_share_descriptor() {
        for chain in ChainFamily::Evm.chains() {
            assert_eq!(chain.descriptor(), ChainFamilyDescriptor::EVM);
            assert!(chain.is_evm());
        }
        assert_ne!(Chain::Solana.descriptor(), ChainFamilyDescriptor::EVM);
    }

    #[test]
    fn test_family_membership_is_consistent() {
        for chain in Chain::ALL {
            assert!(chain.family().chains().contains(&chain));
        }
    }

    #[test]
    fn test_chain_parse_roundtrip() {
        for chain in Chain::ALL {
            assert_eq!(chain.as_str().parse::<Chain>().unwrap(), chain);
        }
        assert_eq!("BSC".parse::<Chain>().unwrap(), Chain::Bnb);
        assert!("dogecoin".parse::<Chain>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Chain::Bnb).unwrap();
        assert_eq!(json, "\"bnb\"");
        let family: ChainFamily = serde_json::from_str("\"evm\"").unwrap();
        assert_eq!(family, ChainFamily::Evm);
    }
}
