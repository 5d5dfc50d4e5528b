//! Unified error types for walletx.
//!
//! Errors are grouped by how callers are expected to react to them:
//!
//! - [`ValidationError`]: bad user input (mnemonic, address, key). Always
//!   surfaced, never retried.
//! - [`DerivationError`]: index exhaustion or an unimplemented curve. Indicates
//!   a programmer or configuration error.
//! - [`RegistryError`]: wallet registry invariants (secret conflicts, unknown
//!   wallets).
//! - [`PersistenceError`]: key-value store failures. Reads are fatal to the
//!   call, writes roll back in-memory state.
//! - [`RemoteSourceError`]: indexer failures. Recoverable; reconciliation
//!   downgrades to a local-only view instead of propagating them.

use std::time::Duration;

use crate::chain::{AddressEncoding, Chain, ChainFamily, Curve};

// ============================================================================
// Main Error Type
// ============================================================================

/// The main error type for walletx operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid user-supplied input.
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    /// Key derivation failure.
    #[error("derivation: {0}")]
    Derivation(#[from] DerivationError),

    /// Wallet registry invariant violation.
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),

    /// Local persistence failure.
    #[error("persistence: {0}")]
    Persistence(#[from] PersistenceError),

    /// Remote indexer failure.
    #[error("remote: {0}")]
    Remote(#[from] RemoteSourceError),

    /// Configuration error.
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// The operating system could not provide secure randomness.
    #[error("secure entropy source unavailable: {0}")]
    EntropySourceUnavailable(String),
}

impl Error {
    /// Returns `true` if the caller can continue in a degraded mode.
    ///
    /// Only remote-source failures qualify; everything else either needs
    /// user correction or indicates a broken local environment.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

/// Result type alias for walletx operations.
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Validation Errors
// ============================================================================

/// Error type for rejected user input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ValidationError {
    /// The mnemonic checksum does not match its words.
    #[error("invalid mnemonic: checksum mismatch")]
    InvalidMnemonic,

    /// The phrase does not have 12 or 24 words.
    #[error("invalid word count: {0} (expected 12 or 24)")]
    InvalidWordCount(usize),

    /// A word is not part of the BIP-39 English wordlist.
    #[error("unknown word '{word}' at position {position}")]
    UnknownWord {
        /// Zero-based position of the offending word.
        position: usize,
        /// The offending word.
        word: String,
    },

    /// The address is malformed for the given chain.
    #[error("invalid {chain} address '{address}': {reason}")]
    InvalidAddress {
        /// Chain the address was validated against.
        chain: Chain,
        /// The rejected address.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The private key is malformed for the given chain.
    #[error("invalid {chain} private key: {reason}")]
    InvalidPrivateKey {
        /// Chain the key was parsed for.
        chain: Chain,
        /// Why it was rejected. Never contains key material.
        reason: String,
    },
}

impl ValidationError {
    /// Create an invalid address error.
    #[must_use]
    pub fn address(chain: Chain, address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            chain,
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid private key error.
    #[must_use]
    pub fn private_key(chain: Chain, reason: impl Into<String>) -> Self {
        Self::InvalidPrivateKey {
            chain,
            reason: reason.into(),
        }
    }
}

/// Result type for validation.
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

// ============================================================================
// Derivation Errors
// ============================================================================

/// Error type for hierarchical key derivation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DerivationError {
    /// The account index is above the hardened-index ceiling.
    #[error("account index {0} exceeds the maximum of 2^31 - 1")]
    DerivationIndexExhausted(u32),

    /// The descriptor names a curve/encoding pair with no implementation.
    #[error("unsupported curve {curve:?} with {encoding:?} address encoding")]
    UnsupportedCurve {
        /// Requested curve.
        curve: Curve,
        /// Requested address encoding.
        encoding: AddressEncoding,
    },

    /// The underlying key arithmetic failed (invalid child key).
    #[error("key derivation failed: {0}")]
    Key(String),
}

/// Result type for derivation.
pub type DerivationResult<T> = std::result::Result<T, DerivationError>;

// ============================================================================
// Registry Errors
// ============================================================================

/// Error type for wallet registry invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// A different secret is already active for the family.
    #[error("a different secret is already active for the {0} family; use replace_all")]
    SecretConflict(ChainFamily),

    /// No secret has been created or imported for the family.
    #[error("no secret material for the {0} family")]
    NoSecret(ChainFamily),

    /// The wallet is not registered.
    #[error("wallet {address} not found on {chain}")]
    WalletNotFound {
        /// Chain that was searched.
        chain: Chain,
        /// Address that was not found.
        address: String,
    },

    /// The wallet is already registered on the chain.
    #[error("wallet {address} already registered on {chain}")]
    DuplicateWallet {
        /// Chain the wallet belongs to.
        chain: Chain,
        /// Address of the duplicate.
        address: String,
    },
}

// ============================================================================
// Persistence Errors
// ============================================================================

/// Error type for key-value store operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PersistenceError {
    /// Reading a key failed.
    #[error("[{backend}] read '{key}' failed: {message}")]
    StoreReadFailure {
        /// Backend identifier (e.g., `"file"`, `"sqlite"`).
        backend: &'static str,
        /// Key being read.
        key: String,
        /// Human-readable error description.
        message: String,
    },

    /// Writing or deleting a key failed.
    #[error("[{backend}] write '{key}' failed: {message}")]
    PersistenceWriteFailed {
        /// Backend identifier.
        backend: &'static str,
        /// Key being written.
        key: String,
        /// Human-readable error description.
        message: String,
    },

    /// A stored value could not be decoded.
    #[error("corrupt value at '{key}': {message}")]
    Corrupt {
        /// Key holding the bad value.
        key: String,
        /// Decoder error.
        message: String,
    },
}

impl PersistenceError {
    /// Creates a [`StoreReadFailure`](Self::StoreReadFailure) error.
    #[must_use]
    pub fn read(backend: &'static str, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StoreReadFailure {
            backend,
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates a [`PersistenceWriteFailed`](Self::PersistenceWriteFailed) error.
    #[must_use]
    pub fn write(backend: &'static str, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PersistenceWriteFailed {
            backend,
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates a [`Corrupt`](Self::Corrupt) error.
    #[must_use]
    pub fn corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if this is a write failure.
    #[must_use]
    pub const fn is_write(&self) -> bool {
        matches!(self, Self::PersistenceWriteFailed { .. })
    }
}

/// Enables `?` on [`rusqlite::Error`] inside blocking closures.
#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for PersistenceError {
    fn from(e: rusqlite::Error) -> Self {
        Self::read("sqlite", "<connection>", e.to_string())
    }
}

/// Result type for persistence operations.
pub type PersistenceResult<T> = std::result::Result<T, PersistenceError>;

// ============================================================================
// Remote Source Errors
// ============================================================================

/// Error type for remote indexer queries.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum RemoteSourceError {
    /// The source could not be reached or refused the request.
    #[error("remote source unavailable: {0}")]
    RemoteSourceUnavailable(String),

    /// The source did not answer within the bounded timeout.
    #[error("remote source timed out after {0:?}")]
    Timeout(Duration),

    /// The source answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },

    /// The response could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),

    /// The source does not serve this chain.
    #[error("remote source does not support {0}")]
    UnsupportedChain(Chain),
}

impl RemoteSourceError {
    /// Create an unavailable error.
    #[must_use]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::RemoteSourceUnavailable(msg.into())
    }
}

impl From<reqwest::Error> for RemoteSourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_connect() {
            Self::unavailable(format!("connection failed: {err}"))
        } else {
            Self::unavailable(err.to_string())
        }
    }
}

/// Result type for remote queries.
pub type RemoteResult<T> = std::result::Result<T, RemoteSourceError>;

// ============================================================================
// Configuration Errors
// ============================================================================

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),

    /// Invalid value.
    #[error("invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create an invalid value error.
    #[inline]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversions() {
        let err: Error = ValidationError::InvalidMnemonic.into();
        assert!(matches!(err, Error::Validation(_)));

        let err: Error = RemoteSourceError::unavailable("down").into();
        assert!(err.is_recoverable());

        let err: Error = PersistenceError::write("memory", "k", "full").into();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_persistence_helpers() {
        let err = PersistenceError::write("file", "wallets:base", "disk full");
        assert!(err.is_write());
        assert_eq!(
            err.to_string(),
            "[file] write 'wallets:base' failed: disk full"
        );
        assert!(!PersistenceError::read("file", "k", "eio").is_write());
    }

    #[test]
    fn test_validation_display() {
        let err = ValidationError::UnknownWord {
            position: 11,
            word: "walletx".into(),
        };
        assert_eq!(err.to_string(), "unknown word 'walletx' at position 11");
        assert_eq!(
            ValidationError::InvalidWordCount(13).to_string(),
            "invalid word count: 13 (expected 12 or 24)"
        );
    }
}
