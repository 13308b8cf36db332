use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::payments::factory::PaymentGatewayFactory;
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{ProviderName, WebhookEvent, WebhookEventKind};
use crate::services::reconciliation::{ProviderSignal, ReconcileOutcome, ReconciliationEngine};
use crate::workers::reconciliation_retry::{RetryJob, RetryQueue};

/// Errors that reject a delivery. Everything else is acknowledged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookProcessorError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

/// How an authenticated delivery was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookAck {
    Reconciled(ReconcileOutcome),
    /// Reconciliation failed transiently; a background retry was scheduled.
    Deferred,
    /// Reconciliation refused the signal (contradiction, amount mismatch).
    Rejected { error_code: String },
    RefundAcknowledged,
    Ignored { event_type: String },
    Malformed,
}

impl WebhookAck {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Reconciled(outcome) => outcome.label(),
            Self::Deferred => "deferred",
            Self::Rejected { .. } => "rejected",
            Self::RefundAcknowledged => "refund_acknowledged",
            Self::Ignored { .. } => "ignored",
            Self::Malformed => "malformed",
        }
    }
}

pub struct WebhookProcessor {
    gateways: Arc<PaymentGatewayFactory>,
    engine: Arc<ReconciliationEngine>,
    retry_queue: RetryQueue,
}

impl WebhookProcessor {
    pub fn new(
        gateways: Arc<PaymentGatewayFactory>,
        engine: Arc<ReconciliationEngine>,
        retry_queue: RetryQueue,
    ) -> Self {
        Self {
            gateways,
            engine,
            retry_queue,
        }
    }

    /// Header carrying the provider's signature.
    pub fn signature_header(&self, provider_name: &str) -> Result<&'static str, WebhookProcessorError> {
        Ok(self.gateway(provider_name)?.signature_header())
    }

    /// Authenticate, parse and dispatch one delivery. `raw_body` must be the
    /// exact bytes received; signatures are computed over them.
    pub async fn process_webhook(
        &self,
        provider_name: &str,
        signature: Option<&str>,
        raw_body: &[u8],
    ) -> Result<WebhookAck, WebhookProcessorError> {
        let gateway = self.gateway(provider_name)?;

        let signature = signature.ok_or_else(|| {
            warn!(provider = %provider_name, "Missing webhook signature");
            WebhookProcessorError::InvalidSignature
        })?;
        if !gateway.verify_signature(raw_body, signature) {
            warn!(provider = %provider_name, "Invalid webhook signature");
            return Err(WebhookProcessorError::InvalidSignature);
        }

        let event = match gateway.parse_webhook_event(raw_body) {
            Ok(event) => event,
            Err(e) => {
                warn!(provider = %provider_name, error = %e, "Malformed webhook payload acknowledged");
                return Ok(WebhookAck::Malformed);
            }
        };

        info!(
            provider = %event.provider,
            event_type = %event.event_type,
            reference = ?event.reference,
            "Webhook received"
        );

        Ok(self.process_event(event).await)
    }

    async fn process_event(&self, event: WebhookEvent) -> WebhookAck {
        match event.kind {
            WebhookEventKind::ChargeSuccess | WebhookEventKind::ChargeFailed => {
                let Some(signal) = ProviderSignal::from_webhook(&event) else {
                    warn!(event_type = %event.event_type, "Charge event without reference");
                    return WebhookAck::Ignored {
                        event_type: event.event_type,
                    };
                };
                let reference = signal.reference.clone();
                let provider = signal.provider;

                match self.engine.reconcile(signal).await {
                    Ok(outcome) => WebhookAck::Reconciled(outcome),
                    Err(e) if e.is_retryable() => {
                        warn!(reference = %reference, error = %e, "Webhook reconciliation deferred to retry");
                        self.retry_queue.enqueue(RetryJob::new(reference, provider));
                        WebhookAck::Deferred
                    }
                    Err(e) => {
                        error!(reference = %reference, error = %e, "Webhook reconciliation rejected");
                        WebhookAck::Rejected {
                            error_code: format!("{:?}", e.error_code()),
                        }
                    }
                }
            }
            WebhookEventKind::RefundProcessed => {
                if let Err(e) = self.engine.acknowledge_refund_event(&event).await {
                    warn!(event_type = %event.event_type, error = %e, "Refund event could not be matched");
                }
                WebhookAck::RefundAcknowledged
            }
            WebhookEventKind::Other => {
                info!(event_type = %event.event_type, "Unhandled webhook event type");
                WebhookAck::Ignored {
                    event_type: event.event_type,
                }
            }
        }
    }

    fn gateway(&self, provider_name: &str) -> Result<Arc<dyn PaymentGateway>, WebhookProcessorError> {
        let unknown = || WebhookProcessorError::UnknownProvider(provider_name.to_string());
        let provider = ProviderName::from_str(provider_name).map_err(|_| unknown())?;
        self.gateways.get(provider).map_err(|_| unknown())
    }
}
