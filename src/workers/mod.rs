//! Background workers

pub mod pending_sweeper;
pub mod reconciliation_retry;

pub use pending_sweeper::{PendingPaymentSweeper, PendingSweeperConfig};
pub use reconciliation_retry::{
    ReconciliationRetryWorker, RetryJob, RetryPolicy, RetryQueue, RetryResolution,
};
