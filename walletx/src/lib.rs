#![cfg_attr(docsrs, feature(doc_cfg))]
//! Walletx - deterministic multi-chain HD wallets with local/remote ledger
//! reconciliation.
//!
//! One BIP-39 mnemonic per chain family yields reproducible keys on every
//! chain of that family: the five EVM chains share coin type 60 and produce
//! identical addresses for the same account index, while Solana derives with
//! SLIP-0010 over ed25519. Each address's transfer history is the merge of
//! a local ledger of transfers the application submitted and a remote
//! indexer's view of the chain.
//!
//! # Architecture
//!
//! - **Secrets** ([`secret`]) - mnemonic validation and root seeds
//! - **Derivation** ([`derivation`]) - BIP-32 / SLIP-0010 key derivation and address encoding
//! - **Registry** ([`registry`]) - per-chain wallet lists with write-through persistence
//! - **Ledger** ([`ledger`]) - local transfer cache, remote sources and reconciliation
//! - **Store** ([`store`]) - key-value persistence backends
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use walletx::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> walletx::Result<()> {
//!     let config = load_config("walletx.json")?;
//!     let store: SharedStore = Arc::new(FileStore::default_path());
//!
//!     let registry = WalletRegistry::open(Arc::clone(&store), config.registry).await?;
//!     let wallet = registry.create_next(Chain::Base).await?;
//!
//!     let ledger = Arc::new(LedgerStore::with_config(Arc::clone(&store), &config.ledger));
//!     let engine = ReconciliationEngine::with_config(ledger, config.reconcile.clone());
//!     let source = AlchemyTransferSource::from_config(&config)?;
//!
//!     let partition = PartitionKey::new(Chain::Base, Network::Testnet, &wallet.address);
//!     let view = engine.view(&partition, &source, 20).await?;
//!     for entry in &view.entries {
//!         println!("{} {} -> {} {}", entry.timestamp, entry.from, entry.to, entry.amount);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `sqlite` - `SqliteStore` persistence backend via rusqlite
//! - `reqwest-rustls` - rustls instead of the platform TLS stack

pub mod chain;
pub mod config;
pub mod derivation;
pub mod error;
pub mod ledger;
pub mod registry;
pub mod secret;
pub mod store;

pub use error::{Error, Result};

/// Prelude module for convenient imports.
pub mod prelude {
    // Error types (centralized)
    pub use crate::error::{
        ConfigError, ConfigResult, DerivationError, DerivationResult, Error, PersistenceError,
        PersistenceResult, RegistryError, RemoteResult, RemoteSourceError, Result,
        ValidationError, ValidationResult,
    };

    // Chains
    pub use crate::chain::{
        Chain, ChainFamily, ChainFamilyDescriptor, Network, network_config, validate_address,
    };

    // Configuration
    pub use crate::config::{WalletxConfig, load_config};

    // Keys
    pub use crate::derivation::{DerivationEngine, DerivationPath, DerivedWallet};
    pub use crate::secret::{SecretMaterial, WordCount};

    // Registry
    pub use crate::registry::{ActivityProbe, LedgerActivityProbe, RegistryEvent, WalletRegistry};

    // Ledger
    pub use crate::ledger::{
        AlchemyTransferSource, Direction, LedgerEntry, LedgerPoller, LedgerStore, LedgerView,
        PartitionKey, Provenance, ReconciliationEngine, RemoteLedgerSource,
    };

    // Storage
    pub use crate::store::{FileStore, KeyValueStore, MemoryStore, SharedStore};

    #[cfg(feature = "sqlite")]
    pub use crate::store::SqliteStore;
}
