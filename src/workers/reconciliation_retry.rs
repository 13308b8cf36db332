//! Background reconciliation retries
//!
//! Webhook handlers and verify calls that fail transiently push a
//! [`RetryJob`] onto a bounded queue. The worker re-verifies each job with the
//! provider under a [`RetryPolicy`], re-reading the payment before every
//! attempt and abandoning the job as soon as the payment is settled. A job
//! that gives up on a still-pending payment flags it for manual review so the
//! pending sweeper stops re-enqueueing it.

use crate::payments::ProviderName;
use crate::services::reconciliation::{ReconcileOutcome, ReconciliationEngine};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// `base × 2^attempt`, capped at `max_delay`. `attempt` is zero-based.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryJob {
    pub reference: String,
    pub provider: ProviderName,
    pub enqueued_at: DateTime<Utc>,
}

impl RetryJob {
    pub fn new(reference: impl Into<String>, provider: ProviderName) -> Self {
        Self {
            reference: reference.into(),
            provider,
            enqueued_at: Utc::now(),
        }
    }
}

/// Producer side of the retry queue. Enqueueing never blocks a request.
#[derive(Clone)]
pub struct RetryQueue {
    tx: mpsc::Sender<RetryJob>,
}

impl RetryQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RetryJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, job: RetryJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(reference = %job.reference, "reconciliation retry queue full, job dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!(reference = %job.reference, "reconciliation retry queue closed, job dropped");
                false
            }
        }
    }
}

/// How a retry job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryResolution {
    /// The payment settled, either by this job or concurrently.
    Settled(ReconcileOutcome),
    /// Nothing left to retry: unknown reference or a non-retryable error.
    Abandoned { reason: String },
    /// All attempts used while the payment was still pending.
    Exhausted { attempts: u32 },
    /// Worker shut down mid-job.
    Cancelled,
}

#[derive(Clone)]
pub struct ReconciliationRetryWorker {
    engine: Arc<ReconciliationEngine>,
    policy: RetryPolicy,
    in_flight: Arc<StdMutex<HashSet<String>>>,
}

impl ReconciliationRetryWorker {
    pub fn new(engine: Arc<ReconciliationEngine>, policy: RetryPolicy) -> Self {
        Self {
            engine,
            policy,
            in_flight: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    pub async fn run(
        self,
        mut jobs: mpsc::Receiver<RetryJob>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!(
            max_attempts = self.policy.max_attempts,
            base_delay_ms = self.policy.base_delay.as_millis() as u64,
            max_delay_ms = self.policy.max_delay.as_millis() as u64,
            "reconciliation retry worker started"
        );

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("reconciliation retry worker stopping");
                        break;
                    }
                }
                job = jobs.recv() => {
                    let Some(job) = job else { break };
                    if !self.claim(&job.reference) {
                        debug!(reference = %job.reference, "retry already in flight, skipping");
                        continue;
                    }
                    let worker = self.clone();
                    let shutdown = shutdown_rx.clone();
                    tokio::spawn(async move {
                        let reference = job.reference.clone();
                        worker.process(job, shutdown).await;
                        worker.release(&reference);
                    });
                }
            }
        }

        info!("reconciliation retry worker stopped");
    }

    /// Run one job to completion under the retry policy.
    pub async fn process(
        &self,
        job: RetryJob,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> RetryResolution {
        let mut last_seen: Option<Uuid> = None;
        for attempt in 0..self.policy.max_attempts {
            let delay = self.policy.delay_for(attempt);
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        return RetryResolution::Cancelled;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }

            // Re-read before every attempt; a webhook may have settled it meanwhile.
            let payment = match self.engine.store().find_payment_by_reference(&job.reference).await {
                Ok(Some(payment)) => payment,
                Ok(None) => {
                    info!(reference = %job.reference, "retry abandoned, unknown reference");
                    return RetryResolution::Abandoned {
                        reason: "unknown reference".to_string(),
                    };
                }
                Err(e) => {
                    warn!(reference = %job.reference, attempt = attempt + 1, error = %e, "retry could not load payment");
                    continue;
                }
            };
            last_seen = Some(payment.id);
            if payment.status.is_settled() {
                debug!(payment_id = %payment.id, status = %payment.status, "payment settled, retry done");
                return RetryResolution::Settled(ReconcileOutcome::AlreadyApplied(payment));
            }

            match self.engine.verify_payment(payment.id).await {
                Ok(ReconcileOutcome::StillPending(_)) => {
                    debug!(payment_id = %payment.id, attempt = attempt + 1, "provider still pending");
                }
                Ok(outcome) => {
                    info!(
                        payment_id = %payment.id,
                        attempt = attempt + 1,
                        outcome = outcome.label(),
                        "reconciliation retry succeeded"
                    );
                    return RetryResolution::Settled(outcome);
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        payment_id = %payment.id,
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "reconciliation retry failed"
                    );
                }
                Err(e) => {
                    error!(
                        payment_id = %payment.id,
                        error = %e,
                        "reconciliation retry hit a non-retryable error, manual intervention required"
                    );
                    let reason = e.to_string();
                    self.hand_over(payment.id, &reason).await;
                    return RetryResolution::Abandoned { reason };
                }
            }
        }

        error!(
            reference = %job.reference,
            provider = %job.provider,
            attempts = self.policy.max_attempts,
            enqueued_at = %job.enqueued_at,
            "reconciliation retries exhausted, manual intervention required"
        );
        if let Some(payment_id) = last_seen {
            let reason = format!(
                "reconciliation retries exhausted after {} attempts",
                self.policy.max_attempts
            );
            self.hand_over(payment_id, &reason).await;
        }
        RetryResolution::Exhausted {
            attempts: self.policy.max_attempts,
        }
    }

    /// Flag a still-pending payment for review. Settled payments are left alone.
    async fn hand_over(&self, payment_id: Uuid, reason: &str) {
        if let Err(e) = self.engine.mark_needs_review(payment_id, reason).await {
            error!(payment_id = %payment_id, error = %e, "could not flag payment for review");
        }
    }

    fn claim(&self, reference: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(reference.to_string())
    }

    fn release(&self, reference: &str) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(reference);
    }
}
