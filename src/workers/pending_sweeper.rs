//! Periodically schedules verification of payments stuck in `pending`.
//!
//! Covers webhooks that never arrived: any pending payment with a provider
//! reference that has not been touched for `stale_after` is pushed onto the
//! reconciliation retry queue.

use crate::store::{LedgerStore, StoreResult};
use crate::workers::reconciliation_retry::{RetryJob, RetryQueue};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PendingSweeperConfig {
    pub interval: Duration,
    pub stale_after: Duration,
    pub batch_size: i64,
}

impl Default for PendingSweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            stale_after: Duration::from_secs(900),
            batch_size: 100,
        }
    }
}

pub struct PendingPaymentSweeper {
    store: Arc<dyn LedgerStore>,
    retry_queue: RetryQueue,
    config: PendingSweeperConfig,
}

impl PendingPaymentSweeper {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        retry_queue: RetryQueue,
        config: PendingSweeperConfig,
    ) -> Self {
        Self {
            store,
            retry_queue,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            stale_after_secs = self.config.stale_after.as_secs(),
            batch_size = self.config.batch_size,
            "pending payment sweeper started"
        );

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("pending payment sweeper stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(error = %e, "pending payment sweep failed");
                    }
                }
            }
        }

        info!("pending payment sweeper stopped");
    }

    /// One pass; returns how many payments were queued for verification.
    pub async fn sweep_once(&self) -> StoreResult<usize> {
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::seconds(900));
        let cutoff = Utc::now() - stale_after;

        let stale = self
            .store
            .list_stale_pending(cutoff, self.config.batch_size)
            .await?;
        if stale.is_empty() {
            debug!("no stale pending payments");
            return Ok(0);
        }

        let mut queued = 0;
        for payment in stale {
            let Some(reference) = payment.provider_reference.clone() else {
                continue;
            };
            if self
                .retry_queue
                .enqueue(RetryJob::new(reference, payment.provider))
            {
                queued += 1;
            }
        }

        info!(queued, "stale pending payments queued for verification");
        Ok(queued)
    }
}
