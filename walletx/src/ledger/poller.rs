//! Periodic ledger refresh.
//!
//! A [`LedgerPoller`] calls [`ReconciliationEngine::view`] for one partition
//! on a fixed interval and publishes each result on a `watch` channel. A
//! failed refresh is logged and the previous view stays published; the next
//! attempt happens on the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{LedgerView, PartitionKey, ReconciliationEngine, RemoteLedgerSource};

/// Default interval between refreshes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Refresh loop for one partition.
pub struct LedgerPoller {
    engine: Arc<ReconciliationEngine>,
    source: Arc<dyn RemoteLedgerSource>,
    partition: PartitionKey,
    interval: Duration,
    limit: usize,
}

impl std::fmt::Debug for LedgerPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerPoller")
            .field("partition", &self.partition)
            .field("interval", &self.interval)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl LedgerPoller {
    /// Creates a poller with the default interval and the engine's default limit.
    #[must_use]
    pub fn new(
        engine: Arc<ReconciliationEngine>,
        source: Arc<dyn RemoteLedgerSource>,
        partition: PartitionKey,
    ) -> Self {
        let limit = engine.config().default_limit;
        Self {
            engine,
            source,
            partition,
            interval: DEFAULT_POLL_INTERVAL,
            limit,
        }
    }

    /// Sets the refresh interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the entry limit passed to each view; `0` is unlimited.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Spawns the refresh loop. The first refresh runs immediately.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(self) -> PollerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (view_tx, view_rx) = watch::channel(None);

        let task = tokio::spawn(async move {
            info!(partition = %self.partition, interval = ?self.interval, "ledger poller started");

            loop {
                self.refresh(&view_tx).await;

                tokio::select! {
                    () = tokio::time::sleep(self.interval) => {}
                    _ = shutdown_rx.recv() => {
                        info!(partition = %self.partition, "ledger poller shutting down");
                        break;
                    }
                }
            }
        });

        PollerHandle {
            shutdown_tx,
            views: view_rx,
            task,
        }
    }

    async fn refresh(&self, view_tx: &watch::Sender<Option<LedgerView>>) {
        match self
            .engine
            .view(&self.partition, self.source.as_ref(), self.limit)
            .await
        {
            Ok(view) => {
                debug!(
                    partition = %self.partition,
                    entries = view.entries.len(),
                    degraded = view.is_degraded(),
                    "ledger view refreshed"
                );
                view_tx.send_replace(Some(view));
            }
            Err(e) => {
                warn!(partition = %self.partition, error = %e, "ledger refresh failed");
            }
        }
    }
}

/// Handle for a running [`LedgerPoller`].
///
/// Dropping the handle also stops the loop.
#[derive(Debug)]
pub struct PollerHandle {
    shutdown_tx: mpsc::Sender<()>,
    views: watch::Receiver<Option<LedgerView>>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// A receiver for published views. Holds `None` until the first
    /// successful refresh.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<LedgerView>> {
        self.views.clone()
    }

    /// The most recently published view.
    #[must_use]
    pub fn latest(&self) -> Option<LedgerView> {
        self.views.borrow().clone()
    }

    /// Stops the loop and waits for the in-flight refresh to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "ledger poller task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteSourceError;
    use crate::ledger::remote::testing::StaticSource;
    use crate::ledger::tests::{entry, partition};
    use crate::ledger::{LedgerStore, RawTransferRecord};
    use crate::store::MemoryStore;

    async fn engine_with_one_entry() -> Arc<ReconciliationEngine> {
        let ledger = Arc::new(LedgerStore::new(Arc::new(MemoryStore::new())));
        ledger
            .append(&partition(), entry(1.0, 1000, Some("0x1")))
            .await
            .unwrap();
        Arc::new(ReconciliationEngine::new(ledger))
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_and_refreshes() {
        let engine = engine_with_one_entry().await;
        let source: Arc<dyn RemoteLedgerSource> = Arc::new(StaticSource::ok(Vec::<RawTransferRecord>::new()));
        let handle = LedgerPoller::new(Arc::clone(&engine), source, partition())
            .with_interval(Duration::from_secs(5))
            .start();

        let mut rx = handle.subscribe();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().unwrap().entries.len(), 1);

        engine
            .ledger()
            .append(&partition(), entry(2.0, 2000, Some("0x2")))
            .await
            .unwrap();

        rx.changed().await.unwrap();
        let latest = handle.latest().unwrap();
        assert_eq!(latest.entries.len(), 2);
        assert_eq!(latest.entries[0].id(), Some("0x2"));

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_views_are_published() {
        let engine = engine_with_one_entry().await;
        let source: Arc<dyn RemoteLedgerSource> =
            Arc::new(StaticSource::failing(RemoteSourceError::unavailable("down")));
        let handle = LedgerPoller::new(engine, source, partition()).start();

        let mut rx = handle.subscribe();
        rx.changed().await.unwrap();
        let view = handle.latest().unwrap();
        assert!(view.is_degraded());
        assert_eq!(view.entries.len(), 1);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_before_first_tick() {
        let engine = engine_with_one_entry().await;
        let source: Arc<dyn RemoteLedgerSource> = Arc::new(StaticSource::ok(Vec::new()));
        let handle = LedgerPoller::new(engine, source, partition())
            .with_interval(Duration::from_secs(3600))
            .with_limit(1)
            .start();
        handle.stop().await;
    }
}
