//! Transaction ledger: local cache, remote sources and reconciliation.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐     ┌─────────────────────┐
//! │  LedgerStore  │     │ RemoteLedgerSource  │
//! │ (local cache) │     │ (indexer, e.g.      │
//! │               │     │  Alchemy)           │
//! └───────┬───────┘     └──────────┬──────────┘
//!         │ read_all               │ fetch (bounded by timeout)
//!         └───────────┬────────────┘
//!                     ▼
//!          ReconciliationEngine::view
//!                     │
//!                     ▼
//!       LedgerView { entries, degraded }
//! ```
//!
//! Everything is keyed by a [`PartitionKey`]: `(chain, network, address)`.
//! Two entries describe the same transfer when their transaction ids are
//! equal, or when their endpoints, amounts and timestamps agree within a
//! [`Tolerance`].

mod alchemy;
mod poller;
mod reconcile;
mod remote;
mod store;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chain::{Chain, Network, normalize_address};
use crate::store::keys;

pub use alchemy::AlchemyTransferSource;
pub use poller::{DEFAULT_POLL_INTERVAL, LedgerPoller, PollerHandle};
pub use reconcile::{FuzzyMatch, LedgerView, ReconciliationEngine, merge_entries};
pub use remote::{RawTransferRecord, RemoteLedgerSource};
pub use store::{AppendOutcome, LedgerStore};

#[cfg(test)]
pub(crate) use remote::testing;

/// Direction of a transfer relative to the partition's address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Received by the address.
    Incoming,
    /// Sent by the address.
    Outgoing,
}

/// Where an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Written by this application.
    Local,
    /// Reported by a remote indexer.
    Remote,
}

/// One transfer as seen from a partition's address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Sender address.
    pub from: String,
    /// Recipient address.
    pub to: String,
    /// Amount in whole native units.
    pub amount: f64,
    /// Unix timestamp, seconds.
    pub timestamp: u64,
    /// Transaction hash/signature, once known.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "hash")]
    pub transaction_id: Option<String>,
    /// Direction relative to the partition's address.
    pub direction: Direction,
    /// Origin of the entry.
    pub provenance: Provenance,
}

impl LedgerEntry {
    /// A locally produced entry without a transaction id.
    pub fn local(
        from: impl Into<String>,
        to: impl Into<String>,
        amount: f64,
        timestamp: u64,
        direction: Direction,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            amount,
            timestamp,
            transaction_id: None,
            direction,
            provenance: Provenance::Local,
        }
    }

    /// Sets the transaction id.
    #[must_use]
    pub fn with_transaction_id(mut self, id: impl Into<String>) -> Self {
        self.transaction_id = Some(id.into());
        self
    }

    /// Sets the direction.
    #[must_use]
    pub const fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// The transaction id, treating empty strings as absent.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.transaction_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Returns `true` if both entries carry the same non-empty id.
    #[must_use]
    pub fn same_id(&self, other: &Self) -> bool {
        matches!((self.id(), other.id()), (Some(a), Some(b)) if a == b)
    }
}

/// Matching tolerances for the fuzzy rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    /// Maximum absolute amount difference.
    pub amount_epsilon: f64,
    /// Maximum timestamp difference, seconds.
    pub time_window_secs: u64,
}

impl Tolerance {
    /// Reconciliation default: 1e-5 units, 10 seconds.
    pub const RECONCILE: Self = Self {
        amount_epsilon: 1e-5,
        time_window_secs: 10,
    };

    /// Local store default: 1e-6 units, 5 seconds.
    pub const STORE: Self = Self {
        amount_epsilon: 1e-6,
        time_window_secs: 5,
    };

    /// Fuzzy rule: endpoints equal ignoring case, amounts and timestamps
    /// within tolerance. Transaction ids are not consulted.
    #[must_use]
    pub fn matches(&self, a: &LedgerEntry, b: &LedgerEntry) -> bool {
        a.from.eq_ignore_ascii_case(&b.from)
            && a.to.eq_ignore_ascii_case(&b.to)
            && (a.amount - b.amount).abs() <= self.amount_epsilon
            && a.timestamp.abs_diff(b.timestamp) <= self.time_window_secs
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::RECONCILE
    }
}

/// Identity of one ledger: `(chain, network, address)`.
///
/// EVM addresses are lowercased on construction; base58 addresses are kept
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    chain: Chain,
    network: Network,
    address: String,
}

impl PartitionKey {
    /// Creates a partition key, normalizing the address.
    pub fn new(chain: Chain, network: Network, address: impl AsRef<str>) -> Self {
        Self {
            chain,
            network,
            address: normalize_address(chain, address.as_ref()),
        }
    }

    /// The chain.
    #[must_use]
    pub const fn chain(&self) -> Chain {
        self.chain
    }

    /// The network.
    #[must_use]
    pub const fn network(&self) -> Network {
        self.network
    }

    /// The normalized address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Persistence key for this partition.
    #[must_use]
    pub fn storage_key(&self) -> String {
        keys::ledger(self.chain, self.network, &self.address)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.chain, self.network, self.address)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const ALICE: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    pub(crate) const BOB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    /// Routes log output to the test harness; `RUST_LOG` selects the level.
    pub(crate) fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    pub(crate) fn partition() -> PartitionKey {
        PartitionKey::new(Chain::Base, Network::Testnet, ALICE)
    }

    pub(crate) fn entry(amount: f64, timestamp: u64, id: Option<&str>) -> LedgerEntry {
        let entry = LedgerEntry::local(ALICE, BOB, amount, timestamp, Direction::Outgoing);
        match id {
            Some(id) => entry.with_transaction_id(id),
            None => entry,
        }
    }

    #[test]
    fn test_partition_key_normalizes_evm() {
        let upper = PartitionKey::new(Chain::Base, Network::Mainnet, "0xAbCdEf0000000000000000000000000000000001");
        let lower = PartitionKey::new(Chain::Base, Network::Mainnet, "0xabcdef0000000000000000000000000000000001");
        assert_eq!(upper, lower);
        assert_eq!(
            upper.storage_key(),
            "ledger:base:mainnet:0xabcdef0000000000000000000000000000000001"
        );

        let sol = PartitionKey::new(Chain::Solana, Network::Testnet, "AbC");
        assert_eq!(sol.address(), "AbC");
    }

    #[test]
    fn test_fuzzy_tolerance() {
        let tol = Tolerance::RECONCILE;
        let local = entry(1.0, 1000, None);
        let mut remote = entry(1.000_001, 1004, Some("0xdef"));
        remote.from = remote.from.to_ascii_uppercase().replace("0X", "0x");
        assert!(tol.matches(&local, &remote));

        assert!(!tol.matches(&local, &entry(1.0, 1011, None)));
        assert!(!tol.matches(&local, &entry(1.1, 1000, None)));

        let mut other_to = entry(1.0, 1000, None);
        other_to.to = ALICE.into();
        assert!(!tol.matches(&local, &other_to));
    }

    #[test]
    fn test_empty_id_is_absent() {
        let a = entry(1.0, 1, Some(""));
        assert_eq!(a.id(), None);
        assert!(!a.same_id(&entry(1.0, 1, Some(""))));
        assert!(entry(1.0, 1, Some("0x1")).same_id(&entry(2.0, 9, Some("0x1"))));
    }

    #[test]
    fn test_entry_serde_uses_hash_field() {
        let json = serde_json::to_value(entry(0.5, 7, Some("0xabc"))).unwrap();
        assert_eq!(json["hash"], "0xabc");
        assert_eq!(json["direction"], "outgoing");
        assert_eq!(json["provenance"], "local");

        let back: LedgerEntry = serde_json::from_value(serde_json::json!({
            "from": ALICE, "to": BOB, "amount": 0.5, "timestamp": 7,
            "direction": "incoming", "provenance": "remote"
        }))
        .unwrap();
        assert_eq!(back.transaction_id, None);
    }
}
