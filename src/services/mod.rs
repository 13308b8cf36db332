//! Services module for business logic

pub mod locks;
pub mod payment_service;
pub mod reconciliation;
pub mod referral;
pub mod refund_service;
pub mod webhook_processor;

pub use locks::{PaymentLockGuard, PaymentLocks};
pub use payment_service::{InitializePaymentRequest, InitializedPayment, PaymentService};
pub use reconciliation::{
    ProcessedRefund, ProviderSignal, ReconcileOutcome, ReconciliationEngine, SignalSource,
};
pub use referral::{ReferralRewardCalculator, ReferralService, ReferralSummary};
pub use refund_service::{CreateRefundRequest, RefundService};
pub use webhook_processor::{WebhookAck, WebhookProcessor, WebhookProcessorError};

use crate::config::ReconciliationConfig;
use crate::error::{AppError, AppResult};
use crate::ledger::UserId;
use crate::payments::PaymentGatewayFactory;
use crate::store::{AccountDirectory, LedgerStore};
use crate::workers::reconciliation_retry::{RetryJob, RetryQueue};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identity of the user invoking an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub is_staff: bool,
}

impl Caller {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            is_staff: false,
        }
    }

    pub fn staff(user_id: UserId) -> Self {
        Self {
            user_id,
            is_staff: true,
        }
    }

    pub fn require_staff(&self, action: &str) -> AppResult<()> {
        if self.is_staff {
            Ok(())
        } else {
            Err(AppError::forbidden(action))
        }
    }
}

/// Every service, built once at startup and shared through `Arc` handles.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn LedgerStore>,
    pub engine: Arc<ReconciliationEngine>,
    pub payments: Arc<PaymentService>,
    pub refunds: Arc<RefundService>,
    pub referrals: Arc<ReferralService>,
    pub webhooks: Arc<WebhookProcessor>,
    pub retry_queue: RetryQueue,
}

impl Services {
    /// Wire the services together. The returned receiver feeds the
    /// reconciliation retry worker.
    pub fn build(
        store: Arc<dyn LedgerStore>,
        directory: Arc<dyn AccountDirectory>,
        gateways: Arc<PaymentGatewayFactory>,
        config: &ReconciliationConfig,
        callback_url: Option<String>,
    ) -> (Self, mpsc::Receiver<RetryJob>) {
        let locks = PaymentLocks::new(config.lock_timeout);
        let calculator = ReferralRewardCalculator::new(config.commission_rate);
        let (retry_queue, retry_rx) = RetryQueue::channel(config.retry_queue_capacity);

        let engine = Arc::new(ReconciliationEngine::new(
            store.clone(),
            gateways.clone(),
            locks.clone(),
            calculator,
        ));
        let payments = Arc::new(PaymentService::new(
            store.clone(),
            directory.clone(),
            gateways.clone(),
            engine.clone(),
            retry_queue.clone(),
            callback_url,
        ));
        let refunds = Arc::new(RefundService::new(store.clone(), engine.clone(), locks));
        let referrals = Arc::new(ReferralService::new(store.clone(), directory));
        let webhooks = Arc::new(WebhookProcessor::new(
            gateways,
            engine.clone(),
            retry_queue.clone(),
        ));

        (
            Self {
                store,
                engine,
                payments,
                refunds,
                referrals,
                webhooks,
                retry_queue,
            },
            retry_rx,
        )
    }
}
