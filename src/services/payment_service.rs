//! Payment initialization and the caller-facing read/verify operations.

use crate::error::{AppError, AppResult, DomainError, ValidationError};
use crate::ledger::{
    ensure_minor_unit_precision, NewPayment, Payment, PollId, UserId, MAX_VOTES_PER_PAYMENT,
    MIN_VOTES_PER_PAYMENT, MONEY_SCALE,
};
use crate::logging::mask_email;
use crate::payments::{InitializeTransaction, PaymentGatewayFactory, ProviderName};
use crate::services::reconciliation::{ReconcileOutcome, ReconciliationEngine};
use crate::services::Caller;
use crate::store::{AccountDirectory, LedgerStore};
use crate::workers::reconciliation_retry::{RetryJob, RetryQueue};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

const MAX_REFERRAL_CODE_LEN: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct InitializePaymentRequest {
    pub poll_id: PollId,
    pub votes_count: i32,
    #[serde(default)]
    pub referral_code: Option<String>,
    #[serde(default)]
    pub provider: Option<ProviderName>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializedPayment {
    pub payment_id: Uuid,
    pub reference: String,
    pub authorization_url: String,
    pub amount: Decimal,
    pub currency: String,
    pub provider: ProviderName,
}

pub struct PaymentService {
    store: Arc<dyn LedgerStore>,
    directory: Arc<dyn AccountDirectory>,
    gateways: Arc<PaymentGatewayFactory>,
    engine: Arc<ReconciliationEngine>,
    retry_queue: RetryQueue,
    callback_url: Option<String>,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        directory: Arc<dyn AccountDirectory>,
        gateways: Arc<PaymentGatewayFactory>,
        engine: Arc<ReconciliationEngine>,
        retry_queue: RetryQueue,
        callback_url: Option<String>,
    ) -> Self {
        Self {
            store,
            directory,
            gateways,
            engine,
            retry_queue,
            callback_url,
        }
    }

    /// Create a pending payment and open a checkout with the provider.
    pub async fn initialize_payment(
        &self,
        caller: &Caller,
        request: InitializePaymentRequest,
    ) -> AppResult<InitializedPayment> {
        validate_votes(request.votes_count)?;

        let user = self
            .directory
            .find_user(caller.user_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::UserNotFound {
                    user_id: caller.user_id,
                })
            })?;

        let poll = self
            .directory
            .find_poll(request.poll_id)
            .await?
            .filter(|poll| poll.is_active)
            .ok_or_else(|| {
                AppError::domain(DomainError::PollNotFound {
                    poll_id: request.poll_id,
                })
            })?;
        if !poll.is_paid || poll.vote_price <= Decimal::ZERO {
            return Err(AppError::validation(ValidationError::InvalidField {
                field: "poll_id".to_string(),
                reason: "poll does not accept paid votes".to_string(),
            }));
        }

        let referred_by = self
            .resolve_referrer(caller.user_id, request.referral_code.as_deref())
            .await?;
        let provider = request
            .provider
            .unwrap_or_else(|| self.gateways.default_provider());
        let gateway = self.gateways.get(provider)?;
        let amount = poll.vote_price * Decimal::from(request.votes_count);
        ensure_minor_unit_precision(amount).map_err(|e| {
            warn!(
                poll_id = poll.id,
                vote_price = %poll.vote_price,
                votes = request.votes_count,
                "payment amount is finer than one minor unit"
            );
            AppError::from(e)
        })?;
        let amount = amount.round_dp(MONEY_SCALE);

        let payment = self
            .store
            .insert_payment(NewPayment {
                user_id: user.id,
                poll_id: poll.id,
                amount,
                currency: poll.currency.clone(),
                votes_purchased: request.votes_count,
                provider,
                referred_by,
            })
            .await?;
        // Our payment id doubles as the provider reference.
        let reference = payment.id.to_string();

        let checkout = InitializeTransaction {
            payer_email: user.email.clone(),
            amount,
            currency: poll.currency.clone(),
            reference: Some(reference.clone()),
            callback_url: self.callback_url.clone(),
            metadata: json!({
                "payment_id": payment.id,
                "poll_id": poll.id,
                "votes_count": request.votes_count,
                "user_id": user.id,
            }),
        };

        let initialized = match gateway.initialize_transaction(checkout).await {
            Ok(initialized) => initialized,
            Err(e) => {
                warn!(
                    payment_id = %payment.id,
                    provider = %provider,
                    payer = %mask_email(&user.email),
                    error = %e,
                    "provider rejected payment initialization"
                );
                if let Err(mark_err) = self
                    .engine
                    .mark_initialization_failed(payment.id, &e.to_string())
                    .await
                {
                    error!(
                        payment_id = %payment.id,
                        error = %mark_err,
                        "could not mark payment as failed after initialization error"
                    );
                }
                return Err(e.into());
            }
        };

        let payment = self
            .engine
            .attach_provider_reference(
                payment.id,
                &initialized.external_reference,
                initialized.provider_data,
            )
            .await?;

        info!(
            payment_id = %payment.id,
            poll_id = poll.id,
            votes = request.votes_count,
            amount = %amount,
            provider = %provider,
            referred = referred_by.is_some(),
            "payment initialized"
        );

        Ok(InitializedPayment {
            payment_id: payment.id,
            reference: payment.display_reference(),
            authorization_url: initialized.redirect_url,
            amount,
            currency: payment.currency,
            provider,
        })
    }

    /// Owner or staff only; other callers see a not-found.
    pub async fn get_payment(&self, caller: &Caller, payment_id: Uuid) -> AppResult<Payment> {
        let payment = self.engine.payment(payment_id).await?;
        if payment.user_id != caller.user_id && !caller.is_staff {
            return Err(AppError::domain(DomainError::PaymentNotFound {
                reference: payment_id.to_string(),
            }));
        }
        Ok(payment)
    }

    /// Verify with the provider. Retryable provider failures leave the payment
    /// pending and schedule a background retry before the error is returned.
    pub async fn verify_payment(
        &self,
        caller: &Caller,
        payment_id: Uuid,
    ) -> AppResult<ReconcileOutcome> {
        let payment = self.get_payment(caller, payment_id).await?;
        match self.engine.verify_payment(payment.id).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_retryable() => {
                if let Some(reference) = payment.provider_reference.clone() {
                    self.retry_queue.enqueue(RetryJob::new(reference, payment.provider));
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn resolve_referrer(
        &self,
        payer: UserId,
        referral_code: Option<&str>,
    ) -> AppResult<Option<UserId>> {
        let Some(code) = referral_code.map(str::trim).filter(|c| !c.is_empty()) else {
            return Ok(None);
        };
        if code.len() > MAX_REFERRAL_CODE_LEN {
            return Err(AppError::validation(ValidationError::OutOfRange {
                field: "referral_code".to_string(),
                min: None,
                max: Some(format!("{} characters", MAX_REFERRAL_CODE_LEN)),
            }));
        }

        match self.directory.find_user_by_referral_code(code).await? {
            Some(referrer) if referrer.id == payer => {
                info!(user_id = payer, "self-referral code ignored");
                Ok(None)
            }
            Some(referrer) => Ok(Some(referrer.id)),
            None => {
                info!(user_id = payer, referral_code = %code, "unknown referral code ignored");
                Ok(None)
            }
        }
    }
}

fn validate_votes(votes: i32) -> AppResult<()> {
    if !(MIN_VOTES_PER_PAYMENT..=MAX_VOTES_PER_PAYMENT).contains(&votes) {
        return Err(AppError::validation(ValidationError::OutOfRange {
            field: "votes_count".to_string(),
            min: Some(MIN_VOTES_PER_PAYMENT.to_string()),
            max: Some(MAX_VOTES_PER_PAYMENT.to_string()),
        }));
    }
    Ok(())
}
