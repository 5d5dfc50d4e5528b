//! Local append-only ledger cache.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::{Direction, LedgerEntry, PartitionKey, Provenance, Tolerance};
use crate::chain::{Chain, Network};
use crate::config::LedgerConfig;
use crate::error::PersistenceResult;
use crate::store::{SharedStore, load_json, save_json};

/// Result of [`LedgerStore::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The entry was new and has been stored.
    Inserted,
    /// An entry describing the same transfer already exists; nothing changed.
    Duplicate,
    /// An id-less entry for the same transfer existed and now carries the id.
    Enriched,
}

/// Persistent per-partition ledger.
///
/// Appends to one partition are serialized by an async mutex, so concurrent
/// appends of the same transfer store it once. Different partitions proceed
/// independently.
#[derive(Debug)]
pub struct LedgerStore {
    store: SharedStore,
    tolerance: Tolerance,
    max_entries: usize,
    locks: Mutex<HashMap<PartitionKey, Arc<Mutex<()>>>>,
}

impl LedgerStore {
    /// Creates a ledger store with default settings.
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        Self::with_config(store, &LedgerConfig::default())
    }

    /// Creates a ledger store from configuration.
    #[must_use]
    pub fn with_config(store: SharedStore, config: &LedgerConfig) -> Self {
        Self {
            store,
            tolerance: config.tolerance(),
            max_entries: config.max_entries,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn partition_lock(&self, partition: &PartitionKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(partition.clone()).or_default())
    }

    /// Drops the partition's mutex from the map once nobody else holds or
    /// awaits it. Clones are only handed out under the map lock, so the
    /// count cannot grow while it is checked.
    async fn release_lock(&self, partition: &PartitionKey, lock: &Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        let idle = locks
            .get(partition)
            .is_some_and(|held| Arc::ptr_eq(held, lock) && Arc::strong_count(lock) == 2);
        if idle {
            locks.remove(partition);
        }
    }

    /// Appends an entry to a partition.
    ///
    /// - An entry whose id is already present is a [`Duplicate`](AppendOutcome::Duplicate).
    /// - An entry without an id that fuzzily matches any stored entry is a duplicate.
    /// - An entry with an id that fuzzily matches a stored id-less entry fills
    ///   that entry's id in place ([`Enriched`](AppendOutcome::Enriched)).
    ///
    /// # Errors
    ///
    /// Returns a [`PersistenceError`](crate::error::PersistenceError) if the
    /// partition cannot be read or written. On write failure the stored
    /// partition is unchanged.
    pub async fn append(
        &self,
        partition: &PartitionKey,
        entry: LedgerEntry,
    ) -> PersistenceResult<AppendOutcome> {
        let lock = self.partition_lock(partition).await;
        let result = {
            let _guard = lock.lock().await;
            self.append_locked(partition, entry).await
        };
        self.release_lock(partition, &lock).await;
        result
    }

    async fn append_locked(
        &self,
        partition: &PartitionKey,
        entry: LedgerEntry,
    ) -> PersistenceResult<AppendOutcome> {
        let key = partition.storage_key();
        let mut entries: Vec<LedgerEntry> =
            load_json(self.store.as_ref(), &key).await?.unwrap_or_default();

        let outcome = self.merge(&mut entries, entry);
        if outcome == AppendOutcome::Duplicate {
            trace!(partition = %partition, "duplicate ledger entry ignored");
            return Ok(outcome);
        }

        let evicted = self.enforce_retention(&mut entries);
        save_json(self.store.as_ref(), &key, &entries).await?;
        debug!(
            partition = %partition,
            outcome = ?outcome,
            len = entries.len(),
            evicted,
            "ledger entry appended"
        );
        Ok(outcome)
    }

    fn merge(&self, entries: &mut Vec<LedgerEntry>, entry: LedgerEntry) -> AppendOutcome {
        if entry.id().is_some() {
            if entries.iter().any(|e| e.same_id(&entry)) {
                return AppendOutcome::Duplicate;
            }
            let candidate = entries
                .iter_mut()
                .filter(|e| e.id().is_none() && self.tolerance.matches(e, &entry))
                .min_by_key(|e| e.timestamp.abs_diff(entry.timestamp));
            if let Some(existing) = candidate {
                existing.transaction_id = entry.transaction_id;
                return AppendOutcome::Enriched;
            }
        } else if entries.iter().any(|e| self.tolerance.matches(e, &entry)) {
            return AppendOutcome::Duplicate;
        }

        entries.push(entry);
        AppendOutcome::Inserted
    }

    /// Drops the oldest entries beyond `max_entries`, keeping insertion order.
    fn enforce_retention(&self, entries: &mut Vec<LedgerEntry>) -> usize {
        if self.max_entries == 0 || entries.len() <= self.max_entries {
            return 0;
        }
        let excess = entries.len() - self.max_entries;

        let mut by_age: Vec<(u64, usize)> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.timestamp, i))
            .collect();
        by_age.sort_unstable();
        let evict: HashSet<usize> = by_age.into_iter().take(excess).map(|(_, i)| i).collect();

        let mut index = 0;
        entries.retain(|_| {
            let keep = !evict.contains(&index);
            index += 1;
            keep
        });
        excess
    }

    /// All entries of a partition, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::StoreReadFailure`](crate::error::PersistenceError::StoreReadFailure)
    /// or [`Corrupt`](crate::error::PersistenceError::Corrupt) if the partition cannot be read.
    pub async fn read_all(&self, partition: &PartitionKey) -> PersistenceResult<Vec<LedgerEntry>> {
        let entries = load_json(self.store.as_ref(), &partition.storage_key())
            .await?
            .unwrap_or_default();
        Ok(entries)
    }

    /// Removes every entry of a partition.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn clear(&self, partition: &PartitionKey) -> PersistenceResult<()> {
        let lock = self.partition_lock(partition).await;
        let result = {
            let _guard = lock.lock().await;
            self.store.delete(&partition.storage_key()).await
        };
        self.release_lock(partition, &lock).await;
        result?;
        debug!(partition = %partition, "ledger partition cleared");
        Ok(())
    }

    /// Records a submitted transfer in both parties' partitions.
    ///
    /// The sender's partition gets an outgoing entry, the recipient's an
    /// incoming one. Both are marked local.
    ///
    /// # Errors
    ///
    /// Returns the first persistence failure. If the recipient write fails
    /// the sender's entry stays recorded.
    pub async fn record_transfer(
        &self,
        chain: Chain,
        network: Network,
        entry: LedgerEntry,
    ) -> PersistenceResult<(AppendOutcome, AppendOutcome)> {
        let sender = PartitionKey::new(chain, network, &entry.from);
        let recipient = PartitionKey::new(chain, network, &entry.to);

        let outgoing = LedgerEntry {
            direction: Direction::Outgoing,
            provenance: Provenance::Local,
            ..entry
        };
        let incoming = outgoing.clone().with_direction(Direction::Incoming);

        let sent = self.append(&sender, outgoing).await?;
        let received = self.append(&recipient, incoming).await?;
        Ok((sent, received))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistenceError;
    use crate::ledger::tests::{ALICE, BOB, entry, partition};
    use crate::store::MemoryStore;
    use crate::store::testing::FlakyStore;

    fn ledger() -> LedgerStore {
        LedgerStore::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_append_and_read_in_insertion_order() {
        let ledger = ledger();
        let p = partition();
        for (i, ts) in [(1u8, 300), (2, 100), (3, 200)] {
            let outcome = ledger
                .append(&p, entry(f64::from(i), ts, Some(&format!("0x{i}"))))
                .await
                .unwrap();
            assert_eq!(outcome, AppendOutcome::Inserted);
        }
        let all = ledger.read_all(&p).await.unwrap();
        let ids: Vec<_> = all.iter().filter_map(LedgerEntry::id).collect();
        assert_eq!(ids, ["0x1", "0x2", "0x3"]);
    }

    #[tokio::test]
    async fn test_append_is_idempotent_on_id() {
        let ledger = ledger();
        let p = partition();
        let e = entry(1.0, 1000, Some("0xabc"));
        assert_eq!(ledger.append(&p, e.clone()).await.unwrap(), AppendOutcome::Inserted);
        assert_eq!(ledger.append(&p, e.clone()).await.unwrap(), AppendOutcome::Duplicate);

        // Same id, different details: still the same transaction.
        let mut changed = e;
        changed.amount = 9.0;
        assert_eq!(ledger.append(&p, changed).await.unwrap(), AppendOutcome::Duplicate);
        assert_eq!(ledger.read_all(&p).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_appends_store_once() {
        let ledger = Arc::new(ledger());
        let p = partition();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let p = p.clone();
                tokio::spawn(async move {
                    ledger.append(&p, entry(1.0, 1000, Some("0xrace"))).await.unwrap()
                })
            })
            .collect();

        let mut inserted = 0;
        for task in tasks {
            if task.await.unwrap() == AppendOutcome::Inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(ledger.read_all(&p).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_distinct_appends_are_not_lost() {
        let ledger = Arc::new(ledger());
        let p = partition();

        let tasks: Vec<_> = (0..20u64)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                let p = p.clone();
                tokio::spawn(async move {
                    ledger
                        .append(&p, entry(1.0, i * 100, Some(&format!("0x{i}"))))
                        .await
                        .unwrap()
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(ledger.read_all(&p).await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_partition_locks_are_released() {
        let ledger = Arc::new(ledger());
        let tasks: Vec<_> = (0..32u64)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                let owner = format!("0x{:040x}", i % 4);
                let p = PartitionKey::new(Chain::Base, Network::Testnet, &owner);
                tokio::spawn(async move {
                    ledger
                        .append(&p, entry(1.0, i * 100, Some(&format!("0x{i}"))))
                        .await
                        .unwrap()
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert!(ledger.locks.lock().await.is_empty());

        ledger.clear(&partition()).await.unwrap();
        assert!(ledger.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_idless_entries_dedup_fuzzily() {
        let ledger = ledger();
        let p = partition();
        ledger.append(&p, entry(1.0, 1000, None)).await.unwrap();
        assert_eq!(
            ledger.append(&p, entry(1.0, 1003, None)).await.unwrap(),
            AppendOutcome::Duplicate
        );
        // Outside the 5 second store window.
        assert_eq!(
            ledger.append(&p, entry(1.0, 1006, None)).await.unwrap(),
            AppendOutcome::Inserted
        );
    }

    #[tokio::test]
    async fn test_id_enriches_idless_entry() {
        let ledger = ledger();
        let p = partition();
        ledger.append(&p, entry(1.0, 1000, None)).await.unwrap();
        assert_eq!(
            ledger.append(&p, entry(1.0, 1002, Some("0xdef"))).await.unwrap(),
            AppendOutcome::Enriched
        );

        let all = ledger.read_all(&p).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id(), Some("0xdef"));
        assert_eq!(all[0].timestamp, 1000);
    }

    #[tokio::test]
    async fn test_retention_evicts_oldest() {
        let config = LedgerConfig {
            max_entries: 3,
            ..LedgerConfig::default()
        };
        let ledger = LedgerStore::with_config(Arc::new(MemoryStore::new()), &config);
        let p = partition();
        for (id, ts) in [("a", 50), ("b", 10), ("c", 40), ("d", 30)] {
            ledger.append(&p, entry(1.0, ts, Some(id))).await.unwrap();
        }
        let ids: Vec<_> = ledger
            .read_all(&p)
            .await
            .unwrap()
            .iter()
            .filter_map(|e| e.id().map(str::to_string))
            .collect();
        assert_eq!(ids, ["a", "c", "d"]);
    }

    #[tokio::test]
    async fn test_record_transfer_writes_both_sides() {
        let ledger = ledger();
        let transfer = LedgerEntry::local(ALICE, BOB, 0.25, 500, Direction::Outgoing)
            .with_transaction_id("0xfeed");
        let (sent, received) = ledger
            .record_transfer(Chain::Base, Network::Testnet, transfer)
            .await
            .unwrap();
        assert_eq!((sent, received), (AppendOutcome::Inserted, AppendOutcome::Inserted));

        let alice = ledger.read_all(&partition()).await.unwrap();
        assert_eq!(alice[0].direction, Direction::Outgoing);

        let bob = PartitionKey::new(Chain::Base, Network::Testnet, BOB.to_ascii_uppercase().replace("0X", "0x"));
        let bob_entries = ledger.read_all(&bob).await.unwrap();
        assert_eq!(bob_entries.len(), 1);
        assert_eq!(bob_entries[0].direction, Direction::Incoming);
        assert_eq!(bob_entries[0].provenance, Provenance::Local);
    }

    #[tokio::test]
    async fn test_clear() {
        let ledger = ledger();
        let p = partition();
        ledger.append(&p, entry(1.0, 1, Some("x"))).await.unwrap();
        ledger.clear(&p).await.unwrap();
        assert!(ledger.read_all(&p).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failures_surface() {
        let store = Arc::new(FlakyStore::new());
        let ledger = LedgerStore::new(Arc::clone(&store) as SharedStore);
        let p = partition();
        ledger.append(&p, entry(1.0, 1, Some("keep"))).await.unwrap();

        store.fail_writes(true);
        let err = ledger.append(&p, entry(2.0, 99, Some("lost"))).await.unwrap_err();
        assert!(err.is_write());
        store.fail_writes(false);
        assert_eq!(ledger.read_all(&p).await.unwrap().len(), 1);

        store.fail_reads(true);
        assert!(matches!(
            ledger.read_all(&p).await.unwrap_err(),
            PersistenceError::StoreReadFailure { .. }
        ));
    }
}
