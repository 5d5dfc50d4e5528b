//! Merging the local ledger with a remote indexer.
//!
//! [`ReconciliationEngine::view`] produces one deduplicated, time-ordered
//! history for a partition:
//!
//! 1. Read the local entries. A read failure is returned to the caller.
//! 2. Fetch remote records under a timeout. A failure or timeout yields a
//!    local-only view with [`LedgerView::degraded`] set.
//! 3. Pair local and remote entries one-to-one: first by transaction id, then
//!    by the fuzzy rule ([`Tolerance::matches`]) as allowed by [`FuzzyMatch`].
//! 4. Sort by timestamp descending, ties by transaction id ascending with
//!    id-less entries first, and truncate.
//!
//! Both inputs are put into a canonical order before pairing, so the result
//! does not depend on the order either side returned its entries in.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    LedgerEntry, LedgerStore, PartitionKey, Provenance, RawTransferRecord, RemoteLedgerSource,
    Tolerance,
};
use crate::config::ReconcileConfig;
use crate::error::{PersistenceResult, RemoteResult, RemoteSourceError};

/// When the fuzzy rule may pair two entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuzzyMatch {
    /// Only equal transaction ids pair entries.
    Never,
    /// Fuzzy pairing when at least one side has no transaction id.
    MissingId,
    /// Fuzzy pairing regardless of ids.
    #[default]
    Always,
}

impl FuzzyMatch {
    fn allows(self, local: &LedgerEntry, remote: &LedgerEntry) -> bool {
        match self {
            Self::Never => false,
            Self::MissingId => local.id().is_none() || remote.id().is_none(),
            Self::Always => true,
        }
    }
}

/// Result of a reconciliation.
#[derive(Debug, Clone, Default)]
pub struct LedgerView {
    /// Merged entries, newest first.
    pub entries: Vec<LedgerEntry>,
    /// Why the remote source was skipped, when it was.
    pub degraded: Option<RemoteSourceError>,
}

impl LedgerView {
    /// Returns `true` if the view contains local entries only because the
    /// remote source failed.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Reconciles a [`LedgerStore`] with remote sources.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    ledger: Arc<LedgerStore>,
    config: ReconcileConfig,
}

impl ReconciliationEngine {
    /// Creates an engine with default tolerances and timeout.
    #[must_use]
    pub fn new(ledger: Arc<LedgerStore>) -> Self {
        Self::with_config(ledger, ReconcileConfig::default())
    }

    /// Creates an engine from configuration.
    #[must_use]
    pub const fn with_config(ledger: Arc<LedgerStore>, config: ReconcileConfig) -> Self {
        Self { ledger, config }
    }

    /// The engine's configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// The underlying ledger store.
    #[must_use]
    pub const fn ledger(&self) -> &Arc<LedgerStore> {
        &self.ledger
    }

    /// Reconciles a partition against `source`.
    ///
    /// `limit` caps the number of entries returned; `0` means unlimited.
    ///
    /// # Errors
    ///
    /// Returns a [`PersistenceError`](crate::error::PersistenceError) if the
    /// local ledger cannot be read. Remote failures never produce an error.
    pub async fn view(
        &self,
        partition: &PartitionKey,
        source: &dyn RemoteLedgerSource,
        limit: usize,
    ) -> PersistenceResult<LedgerView> {
        self.view_with(partition, source.fetch(partition), limit).await
    }

    /// Like [`view`](Self::view), with the remote fetch supplied as a future.
    ///
    /// The future is only polled after the local read succeeds.
    ///
    /// # Errors
    ///
    /// Same as [`view`](Self::view).
    pub async fn view_with<F>(
        &self,
        partition: &PartitionKey,
        fetch: F,
        limit: usize,
    ) -> PersistenceResult<LedgerView>
    where
        F: Future<Output = RemoteResult<Vec<RawTransferRecord>>> + Send,
    {
        let local = self.ledger.read_all(partition).await?;

        let timeout = self.config.remote_timeout();
        let (remote, degraded) = match tokio::time::timeout(timeout, fetch).await {
            Ok(Ok(records)) => (records, None),
            Ok(Err(e)) => {
                warn!(partition = %partition, error = %e, "remote source failed, serving local ledger");
                (Vec::new(), Some(e))
            }
            Err(_) => {
                warn!(partition = %partition, ?timeout, "remote source timed out, serving local ledger");
                (Vec::new(), Some(RemoteSourceError::Timeout(timeout)))
            }
        };

        let remote: Vec<LedgerEntry> = remote.into_iter().map(RawTransferRecord::into_entry).collect();
        let (local_len, remote_len) = (local.len(), remote.len());
        let entries = merge_entries(
            local,
            remote,
            &self.config.tolerance_for(partition.chain()),
            self.config.fuzzy_match,
            limit,
        );
        debug!(
            partition = %partition,
            local = local_len,
            remote = remote_len,
            merged = entries.len(),
            degraded = degraded.is_some(),
            "ledger reconciled"
        );

        Ok(LedgerView { entries, degraded })
    }
}

/// Merges local and remote entries into one ordered, deduplicated list.
///
/// Remote entries sharing a transaction id collapse to one. Each local entry
/// pairs with at most one remote entry and vice versa; the id pass runs
/// before the fuzzy pass, and the fuzzy pass assigns closest timestamps first.
/// A pair keeps the local entry's fields, takes whichever id is present
/// (local first), and is [`Provenance::Local`] if either side was.
#[must_use]
pub fn merge_entries(
    mut local: Vec<LedgerEntry>,
    mut remote: Vec<LedgerEntry>,
    tolerance: &Tolerance,
    policy: FuzzyMatch,
    limit: usize,
) -> Vec<LedgerEntry> {
    local.sort_by(canonical_order);
    remote.sort_by(canonical_order);

    let mut seen = HashSet::new();
    remote.retain(|e| e.id().is_none_or(|id| seen.insert(id.to_string())));

    let mut pair: Vec<Option<usize>> = vec![None; local.len()];
    let mut taken = vec![false; remote.len()];

    for (i, l) in local.iter().enumerate() {
        if l.id().is_none() {
            continue;
        }
        if let Some(j) = (0..remote.len()).find(|&j| !taken[j] && l.same_id(&remote[j])) {
            pair[i] = Some(j);
            taken[j] = true;
        }
    }

    if policy != FuzzyMatch::Never {
        let mut candidates: Vec<(u64, usize, usize)> = Vec::new();
        for (i, l) in local.iter().enumerate().filter(|(i, _)| pair[*i].is_none()) {
            for (j, r) in remote.iter().enumerate().filter(|(j, _)| !taken[*j]) {
                if policy.allows(l, r) && tolerance.matches(l, r) {
                    candidates.push((l.timestamp.abs_diff(r.timestamp), i, j));
                }
            }
        }
        candidates.sort_unstable();
        for (_, i, j) in candidates {
            if pair[i].is_none() && !taken[j] {
                pair[i] = Some(j);
                taken[j] = true;
            }
        }
    }

    let mut merged: Vec<LedgerEntry> = local
        .into_iter()
        .zip(pair)
        .map(|(l, p)| match p {
            Some(j) => combine(l, &remote[j]),
            None => l,
        })
        .collect();
    merged.extend(
        remote
            .into_iter()
            .zip(taken)
            .filter_map(|(r, used)| (!used).then_some(r)),
    );

    merged.sort_by(view_order);
    if limit > 0 {
        merged.truncate(limit);
    }
    merged
}

fn combine(mut local: LedgerEntry, remote: &LedgerEntry) -> LedgerEntry {
    if local.id().is_none() {
        local.transaction_id.clone_from(&remote.transaction_id);
    }
    if remote.provenance == Provenance::Local {
        local.provenance = Provenance::Local;
    }
    local
}

/// Timestamp descending, then id ascending (absent first), then the
/// remaining fields for a total order.
fn view_order(a: &LedgerEntry, b: &LedgerEntry) -> Ordering {
    b.timestamp
        .cmp(&a.timestamp)
        .then_with(|| a.id().cmp(&b.id()))
        .then_with(|| tie_break(a, b))
}

/// Timestamp ascending, then id, then the remaining fields.
fn canonical_order(a: &LedgerEntry, b: &LedgerEntry) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.id().cmp(&b.id()))
        .then_with(|| tie_break(a, b))
}

fn tie_break(a: &LedgerEntry, b: &LedgerEntry) -> Ordering {
    a.from
        .to_ascii_lowercase()
        .cmp(&b.from.to_ascii_lowercase())
        .then_with(|| a.to.to_ascii_lowercase().cmp(&b.to.to_ascii_lowercase()))
        .then_with(|| a.amount.total_cmp(&b.amount))
        .then_with(|| (a.direction as u8).cmp(&(b.direction as u8)))
        .then_with(|| (a.provenance as u8).cmp(&(b.provenance as u8)))
}
