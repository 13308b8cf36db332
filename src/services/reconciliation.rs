//! Reconciliation engine
//!
//! Matches provider signals (webhooks, verify calls, background retries) to the
//! ledger and applies the resulting transition exactly once. Every mutation of
//! a payment runs while holding that payment's lock, and the store repeats the
//! status check inside its own unit of work.

use crate::error::{AppError, AppResult, DomainError, ValidationError};
use crate::ledger::{
    apply_refund, apply_verification_result, LedgerError, Payment, PaymentStatus, Refund,
    RefundStatus, Transition, UserId, VoteGrant,
};
use crate::payments::types::to_minor_units;
use crate::payments::{
    PaymentGatewayFactory, ProviderName, ProviderOutcome, VerificationResult, WebhookEvent,
};
use crate::services::locks::PaymentLocks;
use crate::services::referral::ReferralRewardCalculator;
use crate::store::{
    CommitOutcome, CompletionUnit, FailureUnit, LedgerStore, RefundCommitOutcome,
    RefundCompletion, StoreErrorKind,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Where a provider signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Webhook,
    Verification,
}

/// A provider's claim about the outcome of one charge.
#[derive(Debug, Clone)]
pub struct ProviderSignal {
    pub provider: ProviderName,
    pub reference: String,
    pub outcome: ProviderOutcome,
    /// Amount the provider says it settled, in major units.
    pub amount: Option<Decimal>,
    pub transaction_id: Option<String>,
    pub metadata: JsonValue,
    pub source: SignalSource,
}

impl ProviderSignal {
    pub fn from_verification(result: VerificationResult) -> Self {
        Self {
            provider: result.provider,
            reference: result.reference,
            outcome: result.outcome,
            amount: result.amount,
            transaction_id: result.transaction_id,
            metadata: result.raw,
            source: SignalSource::Verification,
        }
    }

    /// `None` for events that carry no charge outcome or no reference.
    pub fn from_webhook(event: &WebhookEvent) -> Option<Self> {
        Some(Self {
            provider: event.provider,
            reference: event.reference.clone()?,
            outcome: event.outcome()?,
            amount: event.amount,
            transaction_id: event.transaction_id.clone(),
            metadata: event.data.clone(),
            source: SignalSource::Webhook,
        })
    }

    /// Provider metadata to persist, with the transaction id refunds are issued against.
    fn provider_metadata(&self) -> JsonValue {
        let mut metadata = match &self.metadata {
            JsonValue::Object(map) => JsonValue::Object(map.clone()),
            JsonValue::Null => json!({}),
            other => json!({ "payload": other }),
        };
        if let (Some(id), JsonValue::Object(map)) = (&self.transaction_id, &mut metadata) {
            map.entry("id").or_insert_with(|| JsonValue::String(id.clone()));
        }
        metadata
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// No payment carries the signal's reference; nothing was touched.
    UnknownReference,
    Completed(Payment),
    Failed(Payment),
    /// The ledger already reflects the signal.
    AlreadyApplied(Payment),
    /// Provider has not settled the charge yet.
    StillPending(Payment),
}

impl ReconcileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::UnknownReference => "unknown_reference",
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
            Self::AlreadyApplied(_) => "already_applied",
            Self::StillPending(_) => "pending",
        }
    }

    pub fn payment(&self) -> Option<&Payment> {
        match self {
            Self::UnknownReference => None,
            Self::Completed(p) | Self::Failed(p) | Self::AlreadyApplied(p) | Self::StillPending(p) => {
                Some(p)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedRefund {
    pub refund: Refund,
    pub payment: Payment,
}

pub struct ReconciliationEngine {
    store: Arc<dyn LedgerStore>,
    gateways: Arc<PaymentGatewayFactory>,
    locks: PaymentLocks,
    calculator: ReferralRewardCalculator,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateways: Arc<PaymentGatewayFactory>,
        locks: PaymentLocks,
        calculator: ReferralRewardCalculator,
    ) -> Self {
        Self {
            store,
            gateways,
            locks,
            calculator,
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn gateways(&self) -> &Arc<PaymentGatewayFactory> {
        &self.gateways
    }

    pub async fn payment(&self, payment_id: Uuid) -> AppResult<Payment> {
        self.store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| payment_not_found(payment_id.to_string()))
    }

    /// Apply a provider signal to the payment it references.
    pub async fn reconcile(&self, signal: ProviderSignal) -> AppResult<ReconcileOutcome> {
        let Some(found) = self.store.find_payment_by_reference(&signal.reference).await? else {
            info!(
                reference = %signal.reference,
                provider = %signal.provider,
                outcome = %signal.outcome,
                "provider signal for unknown reference, ignoring"
            );
            return Ok(ReconcileOutcome::UnknownReference);
        };

        let _guard = self.locks.acquire(found.id).await?;
        // State may have moved while we waited for the lock.
        let payment = self.payment(found.id).await?;

        let transition = apply_verification_result(&payment, signal.outcome).map_err(|e| {
            error!(
                payment_id = %payment.id,
                reference = %signal.reference,
                status = %payment.status,
                outcome = %signal.outcome,
                source = ?signal.source,
                "provider outcome contradicts ledger state"
            );
            AppError::from(e)
        })?;

        match transition {
            Transition::AlreadyApplied(status) => {
                debug!(
                    payment_id = %payment.id,
                    status = %status,
                    "provider signal already reflected, no-op"
                );
                Ok(ReconcileOutcome::AlreadyApplied(payment))
            }
            Transition::AwaitingProvider => {
                debug!(payment_id = %payment.id, "provider reports charge still pending");
                Ok(ReconcileOutcome::StillPending(payment))
            }
            Transition::Complete => self.complete(payment, &signal).await,
            Transition::Fail => self.fail(payment, signal.provider_metadata()).await,
        }
    }

    async fn complete(
        &self,
        payment: Payment,
        signal: &ProviderSignal,
    ) -> AppResult<ReconcileOutcome> {
        if let Some(reported) = signal.amount {
            if reported != payment.amount {
                error!(
                    payment_id = %payment.id,
                    expected = %payment.amount,
                    reported = %reported,
                    "provider amount does not match payment, leaving pending for review"
                );
                let reason = format!(
                    "provider reported {} for a payment of {}",
                    reported, payment.amount
                );
                // Caller already holds the payment lock.
                if let Err(e) = self.flag_for_review(payment.id, &reason).await {
                    error!(payment_id = %payment.id, error = %e, "could not flag payment for review");
                }
                return Err(AppError::domain(DomainError::AmountMismatch {
                    payment_id: payment.id.to_string(),
                    expected: payment.amount.to_string(),
                    reported: reported.to_string(),
                }));
            }
        }

        let now = Utc::now();
        let unit = CompletionUnit {
            payment_id: payment.id,
            provider_metadata: signal.provider_metadata(),
            completed_at: now,
            vote_grant: VoteGrant {
                user_id: payment.user_id,
                poll_id: payment.poll_id,
                votes_available: payment.votes_purchased,
                created_at: now,
            },
            referral_reward: self.calculator.reward_for(&payment, now),
        };
        let reward = unit
            .referral_reward
            .as_ref()
            .map(|r| (r.user_id, r.amount));

        match self.store.commit_completion(unit).await? {
            CommitOutcome::Applied(completed) => {
                info!(
                    payment_id = %completed.id,
                    reference = %completed.display_reference(),
                    votes = completed.votes_purchased,
                    referrer = ?reward.map(|(user, _)| user),
                    reward = ?reward.map(|(_, amount)| amount),
                    "payment completed"
                );
                Ok(ReconcileOutcome::Completed(completed))
            }
            CommitOutcome::StatusChanged(current) => {
                self.settled_elsewhere(current, ProviderOutcome::Success)
            }
        }
    }

    async fn fail(&self, payment: Payment, metadata: JsonValue) -> AppResult<ReconcileOutcome> {
        let unit = FailureUnit {
            payment_id: payment.id,
            provider_metadata: metadata,
            failed_at: Utc::now(),
        };
        match self.store.commit_failure(unit).await? {
            CommitOutcome::Applied(failed) => {
                info!(
                    payment_id = %failed.id,
                    reference = %failed.display_reference(),
                    "payment failed"
                );
                Ok(ReconcileOutcome::Failed(failed))
            }
            CommitOutcome::StatusChanged(current) => {
                self.settled_elsewhere(current, ProviderOutcome::Failure)
            }
        }
    }

    /// The store's compare-and-set lost against a writer outside this process.
    fn settled_elsewhere(
        &self,
        current: Payment,
        outcome: ProviderOutcome,
    ) -> AppResult<ReconcileOutcome> {
        warn!(
            payment_id = %current.id,
            status = %current.status,
            "payment settled concurrently, re-evaluating"
        );
        match apply_verification_result(&current, outcome)? {
            Transition::AlreadyApplied(_) => Ok(ReconcileOutcome::AlreadyApplied(current)),
            other => Err(AppError::from(LedgerError::InvalidTransition {
                payment_id: current.id,
                from: current.status,
                to: match other {
                    Transition::Fail => PaymentStatus::Failed,
                    _ => PaymentStatus::Completed,
                },
            })),
        }
    }

    /// Ask the provider for the charge status and reconcile the answer.
    /// Settled payments are answered from the ledger without a provider call.
    pub async fn verify_payment(&self, payment_id: Uuid) -> AppResult<ReconcileOutcome> {
        let payment = self.payment(payment_id).await?;
        if payment.status.is_settled() {
            return Ok(ReconcileOutcome::AlreadyApplied(payment));
        }

        let reference = payment.provider_reference.clone().ok_or_else(|| {
            AppError::validation(ValidationError::InvalidField {
                field: "payment_id".to_string(),
                reason: "payment was never initialized with the provider".to_string(),
            })
        })?;

        let gateway = self.gateways.get(payment.provider)?;
        let result = gateway.verify_transaction(&reference).await.map_err(|e| {
            warn!(
                payment_id = %payment.id,
                reference = %reference,
                provider = %payment.provider,
                error = %e,
                retryable = e.is_retryable(),
                "provider verification failed"
            );
            AppError::from(e)
        })?;

        self.reconcile(ProviderSignal::from_verification(result)).await
    }

    pub async fn verify_reference(&self, reference: &str) -> AppResult<ReconcileOutcome> {
        match self.store.find_payment_by_reference(reference).await? {
            Some(payment) => self.verify_payment(payment.id).await,
            None => {
                info!(reference = %reference, "verification requested for unknown reference");
                Ok(ReconcileOutcome::UnknownReference)
            }
        }
    }

    /// Record the provider reference returned by initialization.
    pub async fn attach_provider_reference(
        &self,
        payment_id: Uuid,
        reference: &str,
        provider_data: JsonValue,
    ) -> AppResult<Payment> {
        let _guard = self.locks.acquire(payment_id).await?;
        self.store
            .assign_provider_reference(payment_id, reference, provider_data)
            .await
            .map_err(|e| match e.kind {
                StoreErrorKind::UniqueViolation { .. } => {
                    AppError::domain(DomainError::DuplicateReference {
                        reference: reference.to_string(),
                    })
                }
                _ => AppError::from(e),
            })
    }

    /// Fail a payment whose provider initialization was rejected.
    pub async fn mark_initialization_failed(
        &self,
        payment_id: Uuid,
        reason: &str,
    ) -> AppResult<ReconcileOutcome> {
        let _guard = self.locks.acquire(payment_id).await?;
        let payment = self.payment(payment_id).await?;
        if payment.status != PaymentStatus::Pending {
            return Ok(ReconcileOutcome::AlreadyApplied(payment));
        }
        self.fail(payment, json!({ "initialization_error": reason }))
            .await
    }

    /// Take a pending payment out of automatic reconciliation. Returns `None`
    /// when the payment settled in the meantime.
    pub async fn mark_needs_review(
        &self,
        payment_id: Uuid,
        reason: &str,
    ) -> AppResult<Option<Payment>> {
        let _guard = self.locks.acquire(payment_id).await?;
        self.flag_for_review(payment_id, reason).await
    }

    async fn flag_for_review(&self, payment_id: Uuid, reason: &str) -> AppResult<Option<Payment>> {
        let flagged = self
            .store
            .flag_for_review(payment_id, reason, Utc::now())
            .await?;
        match &flagged {
            Some(payment) => warn!(
                payment_id = %payment.id,
                reference = %payment.display_reference(),
                reason = %reason,
                "payment flagged for manual review"
            ),
            None => debug!(payment_id = %payment_id, "payment no longer pending, not flagged"),
        }
        Ok(flagged)
    }

    /// Execute an approved refund: `pending → processing`, provider refund call,
    /// then `completed` together with the payment's refund status, or `failed`.
    pub async fn process_refund(
        &self,
        refund_id: Uuid,
        reviewer: UserId,
    ) -> AppResult<ProcessedRefund> {
        let refund = self
            .store
            .get_refund(refund_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::RefundNotFound {
                    refund_id: refund_id.to_string(),
                })
            })?;

        let (refund, payment, transaction_id) = {
            let _guard = self.locks.acquire(refund.payment_id).await?;

            let refund = self
                .store
                .transition_refund(
                    refund_id,
                    RefundStatus::Pending,
                    RefundStatus::Processing,
                    Some(reviewer),
                )
                .await?
                .ok_or_else(|| refund_conflict(&refund, RefundStatus::Processing))?;

            let payment = self.payment(refund.payment_id).await?;
            // Other approved refunds still at the provider count against the
            // balance. This one is already among them.
            let committed = self.store.completed_refund_total(payment.id).await?
                + self.store.in_flight_refund_total(payment.id).await?
                - refund.amount;
            if let Err(e) = apply_refund(&payment, committed, refund.amount) {
                warn!(refund_id = %refund.id, payment_id = %payment.id, error = %e, "refund rejected by ledger");
                self.fail_refund(refund.id).await;
                return Err(e.into());
            }

            let transaction_id = match payment
                .provider_transaction_id()
                .or_else(|| payment.provider_reference.clone())
            {
                Some(id) => id,
                None => {
                    self.fail_refund(refund.id).await;
                    return Err(AppError::validation(ValidationError::MissingField {
                        field: "provider_transaction_id".to_string(),
                    }));
                }
            };
            (refund, payment, transaction_id)
        };

        // The provider call runs without the payment lock; `commit_refund`
        // re-validates the balance and the refund's status.
        let issued = match self.issue_provider_refund(&payment, &transaction_id, refund.amount).await {
            Ok(issued) => issued,
            Err(e) => {
                self.fail_refund(refund.id).await;
                return Err(e);
            }
        };

        let completion = RefundCompletion {
            refund_id: refund.id,
            provider_reference: issued.external_refund_reference.clone(),
            provider_data: issued.provider_data,
            completed_at: Utc::now(),
        };
        match self.store.commit_refund(completion).await? {
            RefundCommitOutcome::Applied { refund, payment } => {
                info!(
                    refund_id = %refund.id,
                    payment_id = %payment.id,
                    amount = %refund.amount,
                    status = %payment.status,
                    provider_reference = %issued.external_refund_reference,
                    "refund completed"
                );
                Ok(ProcessedRefund { refund, payment })
            }
            RefundCommitOutcome::Rejected(e) => {
                error!(
                    refund_id = %refund.id,
                    payment_id = %payment.id,
                    provider_reference = %issued.external_refund_reference,
                    error = %e,
                    "provider accepted refund but ledger rejected it, manual intervention required"
                );
                self.fail_refund(refund.id).await;
                Err(e.into())
            }
        }
    }

    async fn issue_provider_refund(
        &self,
        payment: &Payment,
        transaction_id: &str,
        amount: Decimal,
    ) -> AppResult<crate::payments::RefundIssued> {
        let gateway = self.gateways.get(payment.provider)?;
        let minor = to_minor_units(amount)?;
        gateway
            .issue_refund(transaction_id, Some(minor))
            .await
            .map_err(|e| {
                warn!(
                    payment_id = %payment.id,
                    provider = %payment.provider,
                    error = %e,
                    "provider refund call failed"
                );
                AppError::from(e)
            })
    }

    async fn fail_refund(&self, refund_id: Uuid) {
        if let Err(e) = self
            .store
            .transition_refund(
                refund_id,
                RefundStatus::Processing,
                RefundStatus::Failed,
                None,
            )
            .await
        {
            error!(refund_id = %refund_id, error = %e, "could not mark refund as failed");
        }
    }

    /// Provider-side refund notifications. Refunds complete when the provider
    /// accepts the API call, so these are matched and logged only.
    pub async fn acknowledge_refund_event(&self, event: &WebhookEvent) -> AppResult<Option<Refund>> {
        let Some(reference) = event.refund_reference.as_deref() else {
            warn!(event_type = %event.event_type, "refund event without refund reference");
            return Ok(None);
        };
        let refund = self.store.find_refund_by_provider_reference(reference).await?;
        match &refund {
            Some(r) => info!(
                refund_id = %r.id,
                payment_id = %r.payment_id,
                status = %r.status,
                provider_reference = %reference,
                "provider confirmed refund"
            ),
            None => info!(
                provider_reference = %reference,
                charge_reference = ?event.reference,
                "refund event for unknown refund reference"
            ),
        }
        Ok(refund)
    }
}

fn payment_not_found(reference: String) -> AppError {
    AppError::domain(DomainError::PaymentNotFound { reference })
}

fn refund_conflict(refund: &Refund, to: RefundStatus) -> AppError {
    AppError::domain(DomainError::InvalidTransition {
        payment_id: refund.id.to_string(),
        from: refund.status.to_string(),
        to: to.to_string(),
    })
    .with_context("refund")
}
