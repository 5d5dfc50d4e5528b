//! Deterministic multi-chain key derivation.
//!
//! [`DerivationEngine::derive`] turns a [`RootSeed`], a
//! [`ChainFamilyDescriptor`] and an account index into a key pair and an
//! address, following the BIP-44 layout `m/44'/coin'/0'/0/index`.
//!
//! # Architecture
//!
//! ```text
//! DerivationEngine::derive(seed, descriptor, index)
//!   ├── DerivationPath::bip44()   → hardening per curve
//!   ├── secp256k1::derive()      → BIP-32 + EIP-55 address (alloy)
//!   └── ed25519::derive()        → SLIP-0010 + base58 address
//! ```
//!
//! Ed25519 has no non-hardened child derivation, so on that curve every
//! segment is hardened: `m/44'/501'/0'/0'/index'`.
//!
//! The engine is stateless: identical inputs always produce identical
//! output, and chains sharing a descriptor produce identical addresses.

mod ed25519;
mod secp256k1;

use std::fmt;

use alloy::signers::local::PrivateKeySigner;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::chain::{AddressEncoding, Chain, ChainFamilyDescriptor, Curve};
use crate::error::{DerivationError, DerivationResult, ValidationResult};
use crate::secret::RootSeed;

/// First hardened child index.
pub const HARDENED_OFFSET: u32 = 1 << 31;

/// Largest account index that can be hardened (2^31 - 1).
pub const MAX_ACCOUNT_INDEX: u32 = HARDENED_OFFSET - 1;

/// BIP-44 purpose constant.
const PURPOSE: u32 = 44;

/// One segment of a derivation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChildIndex {
    /// Index without the hardened bit.
    pub index: u32,
    /// Whether the segment is hardened.
    pub hardened: bool,
}

impl ChildIndex {
    const fn hardened(index: u32) -> Self {
        Self {
            index,
            hardened: true,
        }
    }

    const fn normal(index: u32) -> Self {
        Self {
            index,
            hardened: false,
        }
    }
}

/// A BIP-32 style derivation path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DerivationPath {
    segments: Vec<ChildIndex>,
}

impl DerivationPath {
    /// Builds `m/44'/coin'/0'/0/index` for the descriptor's curve.
    ///
    /// # Errors
    ///
    /// Returns [`DerivationError::DerivationIndexExhausted`] if `account_index`
    /// exceeds [`MAX_ACCOUNT_INDEX`].
    pub fn bip44(descriptor: ChainFamilyDescriptor, account_index: u32) -> DerivationResult<Self> {
        if account_index > MAX_ACCOUNT_INDEX {
            return Err(DerivationError::DerivationIndexExhausted(account_index));
        }
        if descriptor.coin_type > MAX_ACCOUNT_INDEX {
            return Err(DerivationError::Key(format!(
                "coin type {} cannot be hardened",
                descriptor.coin_type
            )));
        }

        let tail = |index| match descriptor.curve {
            Curve::Secp256k1 => ChildIndex::normal(index),
            Curve::Ed25519 => ChildIndex::hardened(index),
        };

        Ok(Self {
            segments: vec![
                ChildIndex::hardened(PURPOSE),
                ChildIndex::hardened(descriptor.coin_type),
                ChildIndex::hardened(0),
                tail(0),
                tail(account_index),
            ],
        })
    }

    /// Path segments from the master key down.
    #[must_use]
    pub fn segments(&self) -> &[ChildIndex] {
        &self.segments
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for segment in &self.segments {
            write!(f, "/{}", segment.index)?;
            if segment.hardened {
                f.write_str("'")?;
            }
        }
        Ok(())
    }
}

/// A 32-byte private key. Zeroized on drop, redacted in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKeyMaterial(Zeroizing<[u8; 32]>);

impl PrivateKeyMaterial {
    pub(crate) fn new(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Raw key bytes.
    ///
    /// **Security Warning**: never log or transmit these bytes.
    #[must_use]
    pub fn expose_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex without `0x` prefix.
    #[must_use]
    pub fn expose_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(alloy::primitives::hex::encode(*self.0))
    }
}

impl fmt::Debug for PrivateKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKeyMaterial(<redacted>)")
    }
}

/// Output of [`DerivationEngine::derive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKey {
    /// Descriptor the key was derived for.
    pub descriptor: ChainFamilyDescriptor,
    /// Account index (last path segment).
    pub account_index: u32,
    /// Full derivation path.
    pub path: DerivationPath,
    /// Encoded address.
    pub address: String,
    /// Public key (33-byte compressed secp256k1 or 32-byte ed25519).
    pub public_key: Vec<u8>,
    /// Private key.
    pub private_key: PrivateKeyMaterial,
}

/// A key pair bound to a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedWallet {
    /// Chain the wallet belongs to.
    pub chain: Chain,
    /// Account index; `None` for wallets imported from a raw private key.
    pub account_index: Option<u32>,
    /// Encoded address.
    pub address: String,
    /// Public key bytes.
    pub public_key: Vec<u8>,
    private_key: PrivateKeyMaterial,
}

impl DerivedWallet {
    fn from_key(chain: Chain, key: DerivedKey) -> Self {
        Self {
            chain,
            account_index: Some(key.account_index),
            address: key.address,
            public_key: key.public_key,
            private_key: key.private_key,
        }
    }

    /// The private key, for handing to an external signer.
    ///
    /// **Security Warning**: never log or persist this outside the secret store.
    #[must_use]
    pub const fn private_key(&self) -> &PrivateKeyMaterial {
        &self.private_key
    }

    /// An alloy signer for EVM chains, `None` otherwise.
    ///
    /// Used to hand the key to an external transaction-signing routine.
    #[must_use]
    pub fn evm_signer(&self) -> Option<PrivateKeySigner> {
        if !self.chain.is_evm() {
            return None;
        }
        PrivateKeySigner::from_slice(self.private_key.expose_bytes()).ok()
    }

    /// The 64-byte Solana keypair (`secret || public`), `None` otherwise.
    ///
    /// **Security Warning**: contains the private key.
    #[must_use]
    pub fn solana_keypair_bytes(&self) -> Option<Zeroizing<[u8; 64]>> {
        if self.chain != Chain::Solana || self.public_key.len() != 32 {
            return None;
        }
        let mut keypair = Zeroizing::new([0u8; 64]);
        keypair[..32].copy_from_slice(self.private_key.expose_bytes());
        keypair[32..].copy_from_slice(&self.public_key);
        Some(keypair)
    }
}

/// Stateless derivation entry point.
#[derive(Debug, Clone, Copy, Default)]
pub struct DerivationEngine;

impl DerivationEngine {
    /// Derives the key pair and address at `account_index`.
    ///
    /// # Errors
    ///
    /// - [`DerivationError::DerivationIndexExhausted`] if the index exceeds 2^31 - 1.
    /// - [`DerivationError::UnsupportedCurve`] if the curve/encoding pair is not implemented.
    pub fn derive(
        seed: &RootSeed,
        descriptor: ChainFamilyDescriptor,
        account_index: u32,
    ) -> DerivationResult<DerivedKey> {
        let path = DerivationPath::bip44(descriptor, account_index)?;

        let (private_key, public_key, address) =
            match (descriptor.curve, descriptor.address_encoding) {
                (Curve::Secp256k1, AddressEncoding::HexEip55) => {
                    secp256k1::derive(seed.as_bytes(), &path)?
                }
                (Curve::Ed25519, AddressEncoding::Base58) => ed25519::derive(seed.as_bytes(), &path)?,
                (curve, encoding) => {
                    return Err(DerivationError::UnsupportedCurve { curve, encoding });
                }
            };

        Ok(DerivedKey {
            descriptor,
            account_index,
            path,
            address,
            public_key,
            private_key,
        })
    }

    /// Derives the wallet for `chain` at `account_index`.
    ///
    /// # Errors
    ///
    /// Same as [`derive`](Self::derive).
    pub fn derive_for_chain(
        seed: &RootSeed,
        chain: Chain,
        account_index: u32,
    ) -> DerivationResult<DerivedWallet> {
        Self::derive(seed, chain.descriptor(), account_index)
            .map(|key| DerivedWallet::from_key(chain, key))
    }

    /// Builds a wallet from a raw private key imported out of band.
    ///
    /// EVM keys are 32-byte hex, with or without `0x`. Solana keys are base58,
    /// either the 32-byte secret or the 64-byte `secret || public` keypair.
    /// The resulting wallet has no account index.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidPrivateKey`](crate::error::ValidationError::InvalidPrivateKey)
    /// for malformed keys.
    pub fn import_private_key(chain: Chain, key: &str) -> ValidationResult<DerivedWallet> {
        let descriptor = chain.descriptor();
        let (private_key, public_key, address) = match descriptor.curve {
            Curve::Secp256k1 => secp256k1::from_private_key(chain, key.trim())?,
            Curve::Ed25519 => ed25519::from_private_key(chain, key.trim())?,
        };
        Ok(DerivedWallet {
            chain,
            account_index: None,
            address,
            public_key,
            private_key,
        })
    }
}

/// Key material produced by the per-curve modules: private key, public key, address.
type KeyTriple = (PrivateKeyMaterial, Vec<u8>, String);
