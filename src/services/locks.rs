//! Per-payment mutual exclusion for the reconciliation engine.

use crate::error::{AppError, AppErrorKind, AppResult, InfrastructureError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;
use uuid::Uuid;

type LockTable = Arc<StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>>;

/// One async mutex per payment id, created on demand and dropped once the
/// last holder releases it.
#[derive(Clone)]
pub struct PaymentLocks {
    table: LockTable,
    timeout: Duration,
}

/// Held for the duration of one reconciliation of a payment.
pub struct PaymentLockGuard {
    payment_id: Uuid,
    table: LockTable,
    guard: Option<OwnedMutexGuard<()>>,
}

impl PaymentLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            table: Arc::new(StdMutex::new(HashMap::new())),
            timeout,
        }
    }

    pub async fn acquire(&self, payment_id: Uuid) -> AppResult<PaymentLockGuard> {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            table
                .entry(payment_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        match tokio::time::timeout(self.timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(PaymentLockGuard {
                payment_id,
                table: self.table.clone(),
                guard: Some(guard),
            }),
            Err(_) => {
                warn!(
                    payment_id = %payment_id,
                    waited_ms = self.timeout.as_millis() as u64,
                    "timed out waiting for payment lock"
                );
                release_entry(&self.table, payment_id);
                Err(AppError::new(AppErrorKind::Infrastructure(
                    InfrastructureError::LockTimeout {
                        payment_id: payment_id.to_string(),
                        waited_ms: self.timeout.as_millis() as u64,
                    },
                )))
            }
        }
    }

    /// Number of payments with a live lock entry.
    pub fn active(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Drops the table entry when nobody but the table references the mutex.
fn release_entry(table: &LockTable, payment_id: Uuid) {
    let mut table = table.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(lock) = table.get(&payment_id) {
        if Arc::strong_count(lock) == 1 {
            table.remove(&payment_id);
        }
    }
}

impl Drop for PaymentLockGuard {
    fn drop(&mut self) {
        // Release the mutex first so the strong count reflects waiters only.
        self.guard.take();
        release_entry(&self.table, self.payment_id);
    }
}
