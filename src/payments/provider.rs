use crate::payments::error::PaymentResult;
use crate::payments::types::{
    InitializeTransaction, InitializedTransaction, ProviderName, RefundIssued, VerificationResult,
    WebhookEvent,
};
use async_trait::async_trait;

/// Adapter over a payment provider's HTTP API. Implementations hold only
/// configuration and never touch ledger state.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize_transaction(
        &self,
        request: InitializeTransaction,
    ) -> PaymentResult<InitializedTransaction>;

    async fn verify_transaction(&self, external_reference: &str)
        -> PaymentResult<VerificationResult>;

    /// `amount_minor_units = None` refunds the full charge.
    async fn issue_refund(
        &self,
        external_transaction_id: &str,
        amount_minor_units: Option<i64>,
    ) -> PaymentResult<RefundIssued>;

    fn name(&self) -> ProviderName;

    /// Header carrying the webhook signature.
    fn signature_header(&self) -> &'static str;

    fn verify_signature(&self, raw_body: &[u8], signature: &str) -> bool;

    fn parse_webhook_event(&self, raw_body: &[u8]) -> PaymentResult<WebhookEvent>;
}
