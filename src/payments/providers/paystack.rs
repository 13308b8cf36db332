use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::ProviderTransaction;
use crate::payments::types::{
    from_minor_units, to_minor_units, InitializeTransaction, InitializedTransaction,
    ProviderName, ProviderOutcome, RefundIssued, VerificationResult, WebhookEvent,
    WebhookEventKind,
};
use crate::payments::utils::{json_id, verify_hmac_sha512_hex, PaymentHttpClient};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};

const PROVIDER: &str = "paystack";
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub public_key: Option<String>,
    pub secret_key: String,
    /// Signing secret for webhooks; Paystack signs with the secret key unless set.
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for PaystackConfig {
    fn default() -> Self {
        Self {
            public_key: None,
            secret_key: String::new(),
            webhook_secret: None,
            base_url: "https://api.paystack.co".to_string(),
            timeout_secs: 5,
        }
    }
}

impl PaystackConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let secret_key =
            std::env::var("PAYSTACK_SECRET_KEY").map_err(|_| PaymentError::ValidationError {
                message: "PAYSTACK_SECRET_KEY environment variable is required".to_string(),
                field: Some("PAYSTACK_SECRET_KEY".to_string()),
            })?;

        Ok(Self {
            public_key: std::env::var("PAYSTACK_PUBLIC_KEY").ok(),
            webhook_secret: std::env::var("PAYSTACK_WEBHOOK_SECRET").ok(),
            base_url: std::env::var("PAYSTACK_BASE_URL")
                .unwrap_or_else(|_| "https://api.paystack.co".to_string()),
            timeout_secs: std::env::var("PAYSTACK_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5),
            secret_key,
        })
    }
}

pub struct PaystackProvider {
    config: PaystackConfig,
    http: PaymentHttpClient,
}

impl PaystackProvider {
    pub fn new(config: PaystackConfig) -> PaymentResult<Self> {
        if config.secret_key.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "paystack secret key is required".to_string(),
                field: Some("PAYSTACK_SECRET_KEY".to_string()),
            });
        }
        let http = PaymentHttpClient::new(PROVIDER, Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(PaystackConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Unwraps the `{status, message, data}` envelope.
    fn open_envelope(&self, raw: JsonValue) -> PaymentResult<JsonValue> {
        let envelope: PaystackEnvelope = self.http.decode(raw)?;
        if !envelope.status {
            return Err(PaymentError::provider_rejected(PROVIDER, envelope.message));
        }
        Ok(envelope.data)
    }
}

#[async_trait]
impl PaymentGateway for PaystackProvider {
    async fn initialize_transaction(
        &self,
        request: InitializeTransaction,
    ) -> PaymentResult<InitializedTransaction> {
        request.validate()?;

        let payload = serde_json::json!({
            "email": request.payer_email,
            "amount": to_minor_units(request.amount)?,
            "currency": request.currency,
            "reference": request.reference,
            "callback_url": request.callback_url,
            "metadata": request.metadata,
        });

        let raw = self
            .http
            .request_value(
                reqwest::Method::POST,
                &self.endpoint("/transaction/initialize"),
                &self.config.secret_key,
                Some(&payload),
            )
            .await?;
        let data = self.open_envelope(raw)?;
        let init: PaystackInitializeData = self.http.decode(data)?;
        info!(reference = %init.reference, "paystack transaction initialized");

        Ok(InitializedTransaction {
            external_reference: init.reference,
            redirect_url: init.authorization_url,
            provider_data: serde_json::json!({ "access_code": init.access_code }),
        })
    }

    async fn verify_transaction(
        &self,
        external_reference: &str,
    ) -> PaymentResult<VerificationResult> {
        if external_reference.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "reference is required".to_string(),
                field: Some("reference".to_string()),
            });
        }
        let raw = self
            .http
            .request_value(
                reqwest::Method::GET,
                &self.endpoint(&format!("/transaction/verify/{}", external_reference)),
                &self.config.secret_key,
                None,
            )
            .await?;
        let data = self.open_envelope(raw)?;
        let tx: PaystackTransaction = self.http.decode(data.clone())?;
        Ok(ProviderTransaction::Paystack(tx).into_verification(data))
    }

    async fn issue_refund(
        &self,
        external_transaction_id: &str,
        amount_minor_units: Option<i64>,
    ) -> PaymentResult<RefundIssued> {
        let mut payload = serde_json::json!({ "transaction": external_transaction_id });
        if let Some(amount) = amount_minor_units {
            payload["amount"] = serde_json::json!(amount);
        }

        let raw = self
            .http
            .request_value(
                reqwest::Method::POST,
                &self.endpoint("/refund"),
                &self.config.secret_key,
                Some(&payload),
            )
            .await?;
        let data = self.open_envelope(raw)?;
        let external_refund_reference = json_id(data.get("id"))
            .or_else(|| json_id(data.get("refund_reference")))
            .ok_or(PaymentError::MalformedResponse {
                provider: PROVIDER.to_string(),
                message: "refund response carries no id".to_string(),
            })?;
        let status = data
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("pending")
            .to_string();
        info!(
            transaction = external_transaction_id,
            refund = %external_refund_reference,
            "paystack refund issued"
        );

        Ok(RefundIssued {
            external_refund_reference,
            status,
            provider_data: data,
        })
    }

    fn name(&self) -> ProviderName {
        ProviderName::Paystack
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    fn verify_signature(&self, raw_body: &[u8], signature: &str) -> bool {
        let secret = self
            .config
            .webhook_secret
            .as_deref()
            .unwrap_or(&self.config.secret_key);
        verify_hmac_sha512_hex(raw_body, secret, signature)
    }

    fn parse_webhook_event(&self, raw_body: &[u8]) -> PaymentResult<WebhookEvent> {
        let parsed: JsonValue = serde_json::from_slice(raw_body).map_err(|e| {
            PaymentError::ValidationError {
                message: format!("invalid webhook JSON payload: {}", e),
                field: None,
            }
        })?;

        let event_type = parsed
            .get("event")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let data = parsed
            .get("data")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));

        let kind = match event_type.as_str() {
            "charge.success" => WebhookEventKind::ChargeSuccess,
            "charge.failed" => WebhookEventKind::ChargeFailed,
            "refund.processed" => WebhookEventKind::RefundProcessed,
            _ => WebhookEventKind::Other,
        };

        let (reference, refund_reference) = match kind {
            WebhookEventKind::RefundProcessed => (
                data.get("transaction_reference")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                json_id(data.get("id")).or_else(|| json_id(data.get("refund_reference"))),
            ),
            _ => (
                data.get("reference")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                None,
            ),
        };

        let amount = data.get("amount").and_then(|v| v.as_i64()).map(from_minor_units);

        Ok(WebhookEvent {
            provider: ProviderName::Paystack,
            event_type,
            kind,
            reference,
            refund_reference,
            amount,
            transaction_id: json_id(data.get("id")),
            data,
            received_at: chrono::Utc::now(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct PaystackEnvelope {
    status: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: JsonValue,
}

#[derive(Debug, Deserialize)]
struct PaystackInitializeData {
    authorization_url: String,
    access_code: String,
    reference: String,
}

/// `data` object of `GET /transaction/verify/{reference}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PaystackTransaction {
    #[serde(default)]
    pub id: Option<u64>,
    pub reference: String,
    pub status: String,
    /// Kobo.
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub gateway_response: Option<String>,
}

impl PaystackTransaction {
    pub(crate) fn outcome(&self) -> ProviderOutcome {
        match self.status.to_lowercase().as_str() {
            "success" => ProviderOutcome::Success,
            "failed" | "reversed" => ProviderOutcome::Failure,
            "abandoned" | "pending" | "ongoing" | "processing" | "queued" => {
                ProviderOutcome::Pending
            }
            other => {
                warn!(status = other, reference = %self.reference, "unrecognized paystack status");
                ProviderOutcome::Pending
            }
        }
    }

    pub(crate) fn normalize(self, raw: JsonValue) -> VerificationResult {
        VerificationResult {
            provider: ProviderName::Paystack,
            outcome: self.outcome(),
            amount: self.amount.map(from_minor_units),
            currency: self.currency,
            transaction_id: self.id.map(|id| id.to_string()),
            gateway_response: self.gateway_response,
            reference: self.reference,
            raw,
        }
    }
}
