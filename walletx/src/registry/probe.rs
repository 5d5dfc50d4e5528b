//! Account discovery probes.

use async_trait::async_trait;

use crate::chain::{Chain, Network};
use crate::error::RemoteResult;
use crate::ledger::{PartitionKey, RemoteLedgerSource};

/// Reports whether an address has on-chain activity.
///
/// Used by [`WalletRegistry::import_mnemonic`](super::WalletRegistry::import_mnemonic)
/// to discover accounts beyond index 0.
#[async_trait]
pub trait ActivityProbe: Send + Sync {
    /// Returns `true` if `address` has any recorded activity on `chain`.
    async fn has_activity(&self, chain: Chain, address: &str) -> RemoteResult<bool>;
}

/// Probe backed by a [`RemoteLedgerSource`]: an address is active when the
/// source reports at least one transfer for it.
#[derive(Debug, Clone)]
pub struct LedgerActivityProbe<S> {
    source: S,
    network: Network,
}

impl<S> LedgerActivityProbe<S> {
    /// Creates a probe querying `network`.
    pub const fn new(source: S, network: Network) -> Self {
        Self { source, network }
    }
}

#[async_trait]
impl<S: RemoteLedgerSource> ActivityProbe for LedgerActivityProbe<S> {
    async fn has_activity(&self, chain: Chain, address: &str) -> RemoteResult<bool> {
        let partition = PartitionKey::new(chain, self.network, address);
        Ok(!self.source.fetch(&partition).await?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteSourceError;
    use crate::ledger::testing::StaticSource;
    use crate::ledger::{Direction, RawTransferRecord};

    #[tokio::test]
    async fn test_ledger_probe() {
        let record = RawTransferRecord {
            from: "0xa".into(),
            to: Some("0xb".into()),
            value: Some(1.0),
            timestamp: 1,
            hash: "0x1".into(),
            direction: Direction::Incoming,
        };
        let active = LedgerActivityProbe::new(StaticSource::ok(vec![record]), Network::Mainnet);
        assert!(active.has_activity(Chain::Base, "0xb").await.unwrap());

        let idle = LedgerActivityProbe::new(StaticSource::ok(Vec::new()), Network::Mainnet);
        assert!(!idle.has_activity(Chain::Base, "0xb").await.unwrap());

        let down = LedgerActivityProbe::new(
            StaticSource::failing(RemoteSourceError::unavailable("down")),
            Network::Mainnet,
        );
        assert!(down.has_activity(Chain::Base, "0xb").await.is_err());
    }
}
