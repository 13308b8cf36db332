//! Staff-only refund requests and their review.

use crate::error::{AppError, AppResult, DomainError};
use crate::ledger::{
    validate_refund_amount, NewRefund, PaymentStatus, Refund, RefundReason, RefundStatus,
};
use crate::services::locks::PaymentLocks;
use crate::services::reconciliation::{ProcessedRefund, ReconciliationEngine};
use crate::services::Caller;
use crate::store::LedgerStore;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRefundRequest {
    pub payment_id: Uuid,
    /// Defaults to the remaining refundable balance.
    #[serde(default)]
    pub amount: Option<Decimal>,
    pub reason: RefundReason,
    #[serde(default)]
    pub reason_description: String,
}

pub struct RefundService {
    store: Arc<dyn LedgerStore>,
    engine: Arc<ReconciliationEngine>,
    locks: PaymentLocks,
}

impl RefundService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        engine: Arc<ReconciliationEngine>,
        locks: PaymentLocks,
    ) -> Self {
        Self {
            store,
            engine,
            locks,
        }
    }

    pub async fn create_refund(
        &self,
        caller: &Caller,
        request: CreateRefundRequest,
    ) -> AppResult<Refund> {
        caller.require_staff("request refunds")?;

        let _guard = self.locks.acquire(request.payment_id).await?;
        let payment = self.engine.payment(request.payment_id).await?;
        if !matches!(
            payment.status,
            PaymentStatus::Completed | PaymentStatus::PartiallyRefunded
        ) {
            return Err(AppError::domain(DomainError::InvalidTransition {
                payment_id: payment.id.to_string(),
                from: payment.status.to_string(),
                to: PaymentStatus::Refunded.to_string(),
            }));
        }

        let refunded = self.store.completed_refund_total(payment.id).await?;
        let remaining = crate::ledger::remaining_refundable(&payment, refunded);
        let amount = request.amount.unwrap_or(remaining);
        validate_refund_amount(&payment, refunded, amount)?;

        let refund = self
            .store
            .insert_refund(NewRefund {
                payment_id: payment.id,
                amount,
                reason: request.reason,
                reason_description: request.reason_description,
                requested_by: Some(caller.user_id),
            })
            .await?;

        info!(
            refund_id = %refund.id,
            payment_id = %payment.id,
            amount = %amount,
            reason = refund.reason.as_str(),
            requested_by = caller.user_id,
            "refund requested"
        );
        Ok(refund)
    }

    pub async fn approve_refund(
        &self,
        caller: &Caller,
        refund_id: Uuid,
    ) -> AppResult<ProcessedRefund> {
        caller.require_staff("approve refunds")?;
        self.engine.process_refund(refund_id, caller.user_id).await
    }

    pub async fn reject_refund(&self, caller: &Caller, refund_id: Uuid) -> AppResult<Refund> {
        caller.require_staff("reject refunds")?;

        let current = self.store.get_refund(refund_id).await?.ok_or_else(|| {
            AppError::domain(DomainError::RefundNotFound {
                refund_id: refund_id.to_string(),
            })
        })?;
        let rejected = self
            .store
            .transition_refund(
                refund_id,
                RefundStatus::Pending,
                RefundStatus::Rejected,
                Some(caller.user_id),
            )
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::InvalidTransition {
                    payment_id: current.id.to_string(),
                    from: current.status.to_string(),
                    to: RefundStatus::Rejected.to_string(),
                })
                .with_context("refund")
            })?;

        info!(
            refund_id = %rejected.id,
            payment_id = %rejected.payment_id,
            reviewed_by = caller.user_id,
            "refund rejected"
        );
        Ok(rejected)
    }

    pub async fn get_refund(&self, caller: &Caller, refund_id: Uuid) -> AppResult<Refund> {
        caller.require_staff("view refunds")?;
        self.store.get_refund(refund_id).await?.ok_or_else(|| {
            AppError::domain(DomainError::RefundNotFound {
                refund_id: refund_id.to_string(),
            })
        })
    }
}
