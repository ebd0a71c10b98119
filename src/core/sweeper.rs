//! Stale-claim sweeper.
//!
//! Recovers records orphaned by crashed workers: any record still `busy`
//! past the configured threshold is returned to `ready`. This is the sole
//! retry mechanism in the system; it exists to survive worker crashes, not
//! to retry user logic. Finalize's ownership check keeps a task that
//! completes after being requeued from finalizing twice.

use crate::config::SweeperSettings;
use crate::error::ForgeResult;
use crate::store::SharedStore;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

/// Out-of-band recovery loop over one store.
pub struct StaleSweeper {
    store: SharedStore,
    threshold: Duration,
    interval: Duration,
}

impl StaleSweeper {
    /// Create a sweeper from settings.
    pub fn new(store: SharedStore, settings: &SweeperSettings) -> Self {
        Self {
            store,
            threshold: Duration::from_secs(settings.stale_after_secs),
            interval: Duration::from_secs(settings.interval_secs),
        }
    }

    /// Requeue everything claimed before `now - threshold`. Returns the
    /// number of records recovered.
    pub async fn sweep_once(&self, now: SystemTime) -> ForgeResult<u64> {
        let cutoff = now.checked_sub(self.threshold).unwrap_or(UNIX_EPOCH);
        let recovered = self.store.requeue_stale(cutoff).await?;
        if recovered > 0 {
            tracing::warn!(count = recovered, "recovered stale claims");
        }
        Ok(recovered)
    }

    /// Sweep on the configured interval until shutdown is signalled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            threshold_secs = self.threshold.as_secs(),
            interval_secs = self.interval.as_secs(),
            "sweeper started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick fires immediately; skip it so a freshly started
        // forge doesn't sweep claims made moments before a restart twice.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.sweep_once(SystemTime::now()).await {
                        tracing::error!(%error, "sweep failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("sweeper stopped");
    }
}
