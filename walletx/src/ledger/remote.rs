//! Remote ledger sources.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Direction, LedgerEntry, PartitionKey, Provenance};
use crate::error::RemoteResult;

/// A transfer as reported by a remote indexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransferRecord {
    /// Sender address.
    pub from: String,
    /// Recipient address; absent for contract creations.
    pub to: Option<String>,
    /// Amount in whole native units; absent when the indexer cannot price it.
    pub value: Option<f64>,
    /// Unix timestamp, seconds.
    pub timestamp: u64,
    /// Transaction hash/signature.
    pub hash: String,
    /// Direction relative to the queried address.
    pub direction: Direction,
}

impl RawTransferRecord {
    /// Converts to a remote-provenance ledger entry.
    #[must_use]
    pub fn into_entry(self) -> LedgerEntry {
        LedgerEntry {
            from: self.from,
            to: self.to.unwrap_or_default(),
            amount: self.value.unwrap_or(0.0),
            timestamp: self.timestamp,
            transaction_id: Some(self.hash).filter(|h| !h.is_empty()),
            direction: self.direction,
            provenance: Provenance::Remote,
        }
    }
}

/// A remote chain-indexing service queried for one partition's transfers.
///
/// Implementations perform a single attempt; timeouts and degraded-mode
/// handling belong to the [`ReconciliationEngine`](super::ReconciliationEngine).
#[async_trait]
pub trait RemoteLedgerSource: Send + Sync {
    /// Fetches transfers involving the partition's address.
    async fn fetch(&self, partition: &PartitionKey) -> RemoteResult<Vec<RawTransferRecord>>;
}

#[async_trait]
impl<T: RemoteLedgerSource + ?Sized> RemoteLedgerSource for Arc<T> {
    async fn fetch(&self, partition: &PartitionKey) -> RemoteResult<Vec<RawTransferRecord>> {
        (**self).fetch(partition).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration;

    use super::*;
    use crate::error::RemoteSourceError;

    /// Source returning a fixed answer, optionally after a delay.
    #[derive(Debug, Clone)]
    pub(crate) struct StaticSource {
        pub(crate) answer: Result<Vec<RawTransferRecord>, RemoteSourceError>,
        pub(crate) delay: Duration,
    }

    impl StaticSource {
        pub(crate) fn ok(records: Vec<RawTransferRecord>) -> Self {
            Self {
                answer: Ok(records),
                delay: Duration::ZERO,
            }
        }

        pub(crate) fn failing(error: RemoteSourceError) -> Self {
            Self {
                answer: Err(error),
                delay: Duration::ZERO,
            }
        }

        pub(crate) fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl RemoteLedgerSource for StaticSource {
        async fn fetch(&self, _partition: &PartitionKey) -> RemoteResult<Vec<RawTransferRecord>> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.answer.clone()
        }
    }
}
