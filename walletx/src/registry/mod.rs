//! Wallet registry: per-chain ordered wallet lists backed by one secret per
//! chain family.
//!
//! All EVM chains share the EVM family's secret, so a given account index
//! yields the same address on every EVM chain. The registry never silently
//! re-derives with a different secret: importing a second, different phrase
//! for a family fails with [`RegistryError::SecretConflict`], and
//! [`WalletRegistry::replace_all`] is the explicit way to switch.
//!
//! # Persistence
//!
//! Every mutation is written to the [`KeyValueStore`] before the in-memory
//! state changes. A mutation touching several keys snapshots them first and
//! restores the snapshot if a later write fails, so a failed call leaves both
//! the store and the registry as they were.
//!
//! Wallet records store the address and account index; private keys are
//! re-derived on [`load`](WalletRegistry::load). Only wallets imported from a
//! raw private key carry key material in their record.

mod probe;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::chain::{Chain, ChainFamily, normalize_address};
use crate::config::RegistryConfig;
use crate::derivation::{DerivationEngine, DerivedWallet};
use crate::error::{PersistenceError, PersistenceResult, RegistryError, Result};
use crate::secret::{RootSeed, SecretMaterial, WordCount};
use crate::store::{KeyValueStore, SharedStore, keys, load_json};

pub use probe::{ActivityProbe, LedgerActivityProbe};

/// A committed registry mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A wallet was created or imported.
    WalletAdded {
        /// Chain of the new wallet.
        chain: Chain,
        /// Its address.
        address: String,
        /// Its account index, `None` for raw private-key imports.
        account_index: Option<u32>,
    },
    /// A wallet was removed.
    WalletRemoved {
        /// Chain of the removed wallet.
        chain: Chain,
        /// Its address.
        address: String,
    },
    /// The family's secret was replaced and its wallets dropped.
    FamilyReplaced(ChainFamily),
    /// The family's secret and wallets were destroyed.
    Cleared(ChainFamily),
}

#[derive(Debug)]
struct FamilySecret {
    material: SecretMaterial,
    seed: RootSeed,
}

impl FamilySecret {
    fn new(material: SecretMaterial) -> Self {
        let seed = material.root_seed();
        Self { material, seed }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    secrets: HashMap<ChainFamily, FamilySecret>,
    wallets: HashMap<Chain, Vec<DerivedWallet>>,
}

impl RegistryState {
    fn wallets(&self, chain: Chain) -> &[DerivedWallet] {
        self.wallets.get(&chain).map(Vec::as_slice).unwrap_or_default()
    }
}

#[derive(Serialize, Deserialize)]
struct StoredSecret {
    phrase: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    passphrase: String,
}

impl Drop for StoredSecret {
    fn drop(&mut self) {
        self.phrase.zeroize();
        self.passphrase.zeroize();
    }
}

#[derive(Serialize, Deserialize)]
struct WalletRecord {
    address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    account_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    imported_key: Option<String>,
}

impl WalletRecord {
    fn from_wallet(wallet: &DerivedWallet) -> Self {
        let imported_key = wallet.account_index.is_none().then(|| {
            wallet.solana_keypair_bytes().map_or_else(
                || wallet.private_key().expose_hex().to_string(),
                |keypair| bs58::encode(&keypair[..]).into_string(),
            )
        });
        Self {
            address: wallet.address.clone(),
            account_index: wallet.account_index,
            imported_key,
        }
    }
}

impl Drop for WalletRecord {
    fn drop(&mut self) {
        self.imported_key.zeroize();
    }
}

/// A pending store write.
enum StoreOp {
    Set { key: String, value: String },
    Delete { key: String },
}

impl StoreOp {
    fn set_json<T: Serialize>(store: &dyn KeyValueStore, key: String, value: &T) -> PersistenceResult<Self> {
        let value = serde_json::to_string(value)
            .map_err(|e| PersistenceError::write(store.backend(), &key, e.to_string()))?;
        Ok(Self::Set { key, value })
    }

    fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Delete { key } => key,
        }
    }

    async fn apply(&self, store: &dyn KeyValueStore) -> PersistenceResult<()> {
        match self {
            Self::Set { key, value } => store.set(key, value).await,
            Self::Delete { key } => store.delete(key).await,
        }
    }
}

fn same_address(chain: Chain, a: &str, b: &str) -> bool {
    normalize_address(chain, a) == normalize_address(chain, b)
}

fn position(wallets: &[DerivedWallet], chain: Chain, address: &str) -> Option<usize> {
    wallets
        .iter()
        .position(|w| same_address(chain, &w.address, address))
}

fn next_index(wallets: &[DerivedWallet]) -> u32 {
    wallets
        .iter()
        .filter_map(|w| w.account_index)
        .max()
        .map_or(0, |max| max.saturating_add(1))
}

/// Derives the first wallet at or past [`next_index`] whose address is not
/// already listed. Key-imported wallets may occupy a derivable address.
fn derive_unused(
    seed: &RootSeed,
    chain: Chain,
    wallets: &[DerivedWallet],
) -> Result<DerivedWallet> {
    let mut index = next_index(wallets);
    loop {
        let wallet = DerivationEngine::derive_for_chain(seed, chain, index)?;
        if position(wallets, chain, &wallet.address).is_none() {
            return Ok(wallet);
        }
        debug!(chain = %chain, index, "index occupied by an imported key, skipping");
        index += 1;
    }
}

/// Ordered wallets per chain, one secret per chain family.
#[derive(Debug)]
pub struct WalletRegistry {
    store: SharedStore,
    config: RegistryConfig,
    state: RwLock<RegistryState>,
    events: broadcast::Sender<RegistryEvent>,
}

impl WalletRegistry {
    /// Creates an empty registry. Call [`load`](Self::load) to hydrate it.
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        Self::with_config(store, RegistryConfig::default())
    }

    /// Creates an empty registry with explicit settings.
    #[must_use]
    pub fn with_config(store: SharedStore, config: RegistryConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            store,
            config,
            state: RwLock::new(RegistryState::default()),
            events,
        }
    }

    /// Creates a registry and hydrates it from the store.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load).
    pub async fn open(store: SharedStore, config: RegistryConfig) -> Result<Self> {
        let registry = Self::with_config(store, config);
        registry.load().await?;
        Ok(registry)
    }

    /// Replaces the in-memory state with what the store holds, re-deriving
    /// every wallet's keys.
    ///
    /// # Errors
    ///
    /// - [`PersistenceError::StoreReadFailure`] if a read fails.
    /// - [`PersistenceError::Corrupt`] if a record does not decode, names an
    ///   account index without a family secret, or re-derives to a different
    ///   address than the one stored.
    pub async fn load(&self) -> Result<()> {
        let mut loaded = RegistryState::default();

        for family in ChainFamily::ALL {
            let key = keys::secret(family);
            let Some(stored) = load_json::<StoredSecret>(self.store.as_ref(), &key).await? else {
                continue;
            };
            let material = SecretMaterial::import(&stored.phrase)
                .map_err(|e| PersistenceError::corrupt(&key, e.to_string()))?
                .with_passphrase(stored.passphrase.clone());
            loaded.secrets.insert(family, FamilySecret::new(material));
        }

        for chain in Chain::ALL {
            let key = keys::wallets(chain);
            let Some(records) = load_json::<Vec<WalletRecord>>(self.store.as_ref(), &key).await?
            else {
                continue;
            };
            let secret = loaded.secrets.get(&chain.family());
            let wallets = records
                .iter()
                .map(|record| rehydrate(chain, record, secret, &key))
                .collect::<Result<Vec<_>>>()?;
            debug!(chain = %chain, count = wallets.len(), "wallets loaded");
            loaded.wallets.insert(chain, wallets);
        }

        let total: usize = loaded.wallets.values().map(Vec::len).sum();
        *self.state.write().await = loaded;
        info!(wallets = total, "wallet registry loaded");
        Ok(())
    }

    /// Subscribes to committed mutations.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Derives the next wallet for `chain` and persists it.
    ///
    /// The index is one past the highest index in the chain's list (0 for an
    /// empty list), skipping indices whose address was already imported as a
    /// raw private key. If the family has no secret yet, a 12-word one is
    /// generated and persisted with the wallet.
    ///
    /// # Errors
    ///
    /// - [`Error::EntropySourceUnavailable`](crate::Error::EntropySourceUnavailable)
    ///   if a secret must be generated and the OS has no randomness.
    /// - [`DerivationError::DerivationIndexExhausted`](crate::error::DerivationError::DerivationIndexExhausted)
    ///   past index 2^31 - 1.
    /// - [`PersistenceError::PersistenceWriteFailed`]; the registry is unchanged.
    pub async fn create_next(&self, chain: Chain) -> Result<DerivedWallet> {
        let family = chain.family();
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let mut ops = Vec::new();
        let generated = if state.secrets.contains_key(&family) {
            None
        } else {
            let material = SecretMaterial::generate(WordCount::Twelve)?;
            ops.push(secret_op(self.store.as_ref(), family, &material)?);
            Some(FamilySecret::new(material))
        };

        let seed = match (&generated, state.secrets.get(&family)) {
            (Some(secret), _) | (None, Some(secret)) => &secret.seed,
            (None, None) => return Err(RegistryError::NoSecret(family).into()),
        };
        let wallet = derive_unused(seed, chain, state.wallets(chain))?;

        let mut wallets = state.wallets(chain).to_vec();
        wallets.push(wallet.clone());
        ops.push(wallets_op(self.store.as_ref(), chain, &wallets)?);
        self.apply(&ops).await?;

        if let Some(secret) = generated {
            info!(family = %family, "secret generated");
            state.secrets.insert(family, secret);
        }
        state.wallets.insert(chain, wallets);
        drop(guard);

        info!(chain = %chain, index = wallet.account_index, address = %wallet.address, "wallet created");
        self.emit(RegistryEvent::WalletAdded {
            chain,
            address: wallet.address.clone(),
            account_index: wallet.account_index,
        });
        Ok(wallet)
    }

    /// Imports a mnemonic for `chain`'s family and derives wallets from it.
    ///
    /// See [`import_secret`](Self::import_secret).
    ///
    /// # Errors
    ///
    /// [`ValidationError`](crate::error::ValidationError) for a malformed
    /// phrase, otherwise as [`import_secret`](Self::import_secret).
    pub async fn import_mnemonic(
        &self,
        chain: Chain,
        phrase: &str,
        probe: Option<&dyn ActivityProbe>,
    ) -> Result<Vec<DerivedWallet>> {
        let material = SecretMaterial::import(phrase)?;
        self.import_secret(chain, material, probe).await
    }

    /// Adopts `material` as the family's secret and adds wallets for `chain`.
    ///
    /// Index 0 is always added. With a probe, indices `1..=scan_depth` are
    /// derived in turn and added while the probe reports activity; the scan
    /// stops at the first idle address or probe failure. Addresses already in
    /// the list are skipped. Re-importing the active secret is allowed.
    ///
    /// Returns the wallets that were added.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::SecretConflict`] if the family already has a
    ///   different secret.
    /// - [`PersistenceError::PersistenceWriteFailed`]; the registry and store
    ///   are unchanged.
    pub async fn import_secret(
        &self,
        chain: Chain,
        material: SecretMaterial,
        probe: Option<&dyn ActivityProbe>,
    ) -> Result<Vec<DerivedWallet>> {
        let family = chain.family();
        self.check_secret(family, &material).await?;

        let secret = FamilySecret::new(material);
        let mut derived = vec![DerivationEngine::derive_for_chain(&secret.seed, chain, 0)?];
        if let Some(probe) = probe {
            for index in 1..=self.config.scan_depth {
                let wallet = DerivationEngine::derive_for_chain(&secret.seed, chain, index)?;
                match probe.has_activity(chain, &wallet.address).await {
                    Ok(true) => derived.push(wallet),
                    Ok(false) => break,
                    Err(e) => {
                        warn!(chain = %chain, index, error = %e, "activity probe failed, stopping scan");
                        break;
                    }
                }
            }
        }

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let new_secret = match state.secrets.get(&family) {
            Some(existing) if existing.material != secret.material => {
                return Err(RegistryError::SecretConflict(family).into());
            }
            Some(_) => None,
            None => Some(secret),
        };

        let mut wallets = state.wallets(chain).to_vec();
        let mut added = Vec::new();
        for wallet in derived {
            if position(&wallets, chain, &wallet.address).is_none() {
                wallets.push(wallet.clone());
                added.push(wallet);
            }
        }

        let mut ops = Vec::new();
        if let Some(secret) = &new_secret {
            ops.push(secret_op(self.store.as_ref(), family, &secret.material)?);
        }
        if !added.is_empty() {
            ops.push(wallets_op(self.store.as_ref(), chain, &wallets)?);
        }
        self.apply(&ops).await?;

        if let Some(secret) = new_secret {
            info!(family = %family, "secret imported");
            state.secrets.insert(family, secret);
        }
        state.wallets.insert(chain, wallets);
        drop(guard);

        info!(chain = %chain, added = added.len(), "mnemonic imported");
        for wallet in &added {
            self.emit(RegistryEvent::WalletAdded {
                chain,
                address: wallet.address.clone(),
                account_index: wallet.account_index,
            });
        }
        Ok(added)
    }

    /// Imports a wallet from a raw private key. The wallet has no account
    /// index and is independent of the family secret.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::InvalidPrivateKey`](crate::error::ValidationError::InvalidPrivateKey)
    ///   for a malformed key.
    /// - [`RegistryError::DuplicateWallet`] if the address is already listed.
    /// - [`PersistenceError::PersistenceWriteFailed`]; the registry is unchanged.
    pub async fn import_private_key(&self, chain: Chain, key: &str) -> Result<DerivedWallet> {
        let wallet = DerivationEngine::import_private_key(chain, key)?;

        let mut guard = self.state.write().await;
        if position(guard.wallets(chain), chain, &wallet.address).is_some() {
            return Err(RegistryError::DuplicateWallet {
                chain,
                address: wallet.address,
            }
            .into());
        }

        let mut wallets = guard.wallets(chain).to_vec();
        wallets.push(wallet.clone());
        self.apply(&[wallets_op(self.store.as_ref(), chain, &wallets)?])
            .await?;
        guard.wallets.insert(chain, wallets);
        drop(guard);

        info!(chain = %chain, address = %wallet.address, "private key imported");
        self.emit(RegistryEvent::WalletAdded {
            chain,
            address: wallet.address.clone(),
            account_index: None,
        });
        Ok(wallet)
    }

    /// Wallets for `chain` in creation order.
    pub async fn list(&self, chain: Chain) -> Vec<DerivedWallet> {
        self.state.read().await.wallets(chain).to_vec()
    }

    /// Looks up a wallet by address. EVM addresses compare case-insensitively.
    pub async fn get(&self, chain: Chain, address: &str) -> Option<DerivedWallet> {
        let state = self.state.read().await;
        let wallets = state.wallets(chain);
        position(wallets, chain, address).map(|i| wallets[i].clone())
    }

    /// Removes a wallet and returns it.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::WalletNotFound`] if the address is not listed.
    /// - [`PersistenceError::PersistenceWriteFailed`]; the registry is unchanged.
    pub async fn remove(&self, chain: Chain, address: &str) -> Result<DerivedWallet> {
        let mut guard = self.state.write().await;
        let Some(index) = position(guard.wallets(chain), chain, address) else {
            return Err(RegistryError::WalletNotFound {
                chain,
                address: address.to_string(),
            }
            .into());
        };

        let mut wallets = guard.wallets(chain).to_vec();
        let removed = wallets.remove(index);
        self.apply(&[wallets_op(self.store.as_ref(), chain, &wallets)?])
            .await?;
        if wallets.is_empty() {
            guard.wallets.remove(&chain);
        } else {
            guard.wallets.insert(chain, wallets);
        }
        drop(guard);

        info!(chain = %chain, address = %removed.address, "wallet removed");
        self.emit(RegistryEvent::WalletRemoved {
            chain,
            address: removed.address.clone(),
        });
        Ok(removed)
    }

    /// Switches the family to a new secret, dropping every wallet of every
    /// chain in the family, raw private-key imports included.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::PersistenceWriteFailed`]; the registry and store
    /// are unchanged.
    pub async fn replace_all(&self, family: ChainFamily, material: SecretMaterial) -> Result<()> {
        let mut guard = self.state.write().await;

        let mut ops = vec![secret_op(self.store.as_ref(), family, &material)?];
        ops.extend(family.chains().iter().map(|&chain| StoreOp::Delete {
            key: keys::wallets(chain),
        }));
        self.apply(&ops).await?;

        guard.secrets.insert(family, FamilySecret::new(material));
        for chain in family.chains() {
            guard.wallets.remove(chain);
        }
        drop(guard);

        info!(family = %family, "family secret replaced");
        self.emit(RegistryEvent::FamilyReplaced(family));
        Ok(())
    }

    /// Destroys the family's secret and all of its wallets.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::PersistenceWriteFailed`]; the registry and store
    /// are unchanged.
    pub async fn clear_family(&self, family: ChainFamily) -> Result<()> {
        self.clear(&[family]).await
    }

    /// Destroys every secret and every wallet.
    ///
    /// # Errors
    ///
    /// Same as [`clear_family`](Self::clear_family).
    pub async fn clear_all(&self) -> Result<()> {
        self.clear(&ChainFamily::ALL).await
    }

    async fn clear(&self, families: &[ChainFamily]) -> Result<()> {
        let mut guard = self.state.write().await;

        let ops: Vec<StoreOp> = families
            .iter()
            .flat_map(|&family| {
                std::iter::once(keys::secret(family))
                    .chain(family.chains().iter().map(|&chain| keys::wallets(chain)))
            })
            .map(|key| StoreOp::Delete { key })
            .collect();
        self.apply(&ops).await?;

        for &family in families {
            guard.secrets.remove(&family);
            for chain in family.chains() {
                guard.wallets.remove(chain);
            }
        }
        drop(guard);

        for &family in families {
            info!(family = %family, "family cleared");
            self.emit(RegistryEvent::Cleared(family));
        }
        Ok(())
    }

    /// Returns `true` if the family has a secret.
    pub async fn has_secret(&self, family: ChainFamily) -> bool {
        self.state.read().await.secrets.contains_key(&family)
    }

    /// The family's secret, for backup display.
    ///
    /// **Security Warning**: the returned value holds the mnemonic.
    pub async fn secret(&self, family: ChainFamily) -> Option<SecretMaterial> {
        self.state
            .read()
            .await
            .secrets
            .get(&family)
            .map(|s| s.material.clone())
    }

    /// Returns `true` if any chain in the family has a wallet.
    pub async fn has_any_wallets(&self, family: ChainFamily) -> bool {
        self.total_wallet_count(family).await > 0
    }

    /// Number of wallets across all chains in the family.
    pub async fn total_wallet_count(&self, family: ChainFamily) -> usize {
        let state = self.state.read().await;
        family.chains().iter().map(|&c| state.wallets(c).len()).sum()
    }

    async fn check_secret(&self, family: ChainFamily, material: &SecretMaterial) -> Result<()> {
        match self.state.read().await.secrets.get(&family) {
            Some(existing) if existing.material != *material => {
                Err(RegistryError::SecretConflict(family).into())
            }
            _ => Ok(()),
        }
    }

    /// Applies `ops` in order. On failure, keys already written are restored
    /// to their snapshot and the failure is returned.
    async fn apply(&self, ops: &[StoreOp]) -> PersistenceResult<()> {
        let store = self.store.as_ref();

        let mut snapshot = Vec::with_capacity(ops.len());
        for op in ops {
            snapshot.push(store.get(op.key()).await?);
        }

        for (done, op) in ops.iter().enumerate() {
            if let Err(e) = op.apply(store).await {
                warn!(key = op.key(), error = %e, "registry write failed, rolling back");
                for (op, previous) in ops[..done].iter().zip(&snapshot[..done]).rev() {
                    let restored = match previous {
                        Some(value) => store.set(op.key(), value).await,
                        None => store.delete(op.key()).await,
                    };
                    if let Err(e) = restored {
                        warn!(key = op.key(), error = %e, "rollback write failed");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn emit(&self, event: RegistryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn secret_op(
    store: &dyn KeyValueStore,
    family: ChainFamily,
    material: &SecretMaterial,
) -> PersistenceResult<StoreOp> {
    let stored = StoredSecret {
        phrase: material.expose_phrase().to_string(),
        passphrase: material.expose_passphrase().to_string(),
    };
    StoreOp::set_json(store, keys::secret(family), &stored)
}

fn wallets_op(
    store: &dyn KeyValueStore,
    chain: Chain,
    wallets: &[DerivedWallet],
) -> PersistenceResult<StoreOp> {
    let records: Vec<WalletRecord> = wallets.iter().map(WalletRecord::from_wallet).collect();
    StoreOp::set_json(store, keys::wallets(chain), &records)
}

fn rehydrate(
    chain: Chain,
    record: &WalletRecord,
    secret: Option<&FamilySecret>,
    key: &str,
) -> Result<DerivedWallet> {
    let wallet = match (record.account_index, record.imported_key.as_deref()) {
        (Some(index), _) => {
            let secret = secret.ok_or_else(|| {
                PersistenceError::corrupt(
                    key,
                    format!("wallet {} has an account index but no {} secret", record.address, chain.family()),
                )
            })?;
            DerivationEngine::derive_for_chain(&secret.seed, chain, index)?
        }
        (None, Some(imported)) => DerivationEngine::import_private_key(chain, imported)
            .map_err(|e| PersistenceError::corrupt(key, e.to_string()))?,
        (None, None) => {
            return Err(PersistenceError::corrupt(
                key,
                format!("wallet {} has neither an account index nor a key", record.address),
            )
            .into());
        }
    };

    if !same_address(chain, &wallet.address, &record.address) {
        return Err(PersistenceError::corrupt(
            key,
            format!(
                "stored address {} does not match derived address {}",
                record.address, wallet.address
            ),
        )
        .into());
    }
    Ok(wallet)
}
