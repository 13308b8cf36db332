use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::{decimal_from_json, ProviderTransaction};
use crate::payments::types::{
    InitializeTransaction, InitializedTransaction, ProviderName, ProviderOutcome, RefundIssued,
    VerificationResult, WebhookEvent, WebhookEventKind,
};
use crate::payments::utils::{json_id, secure_eq, PaymentHttpClient};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};

const PROVIDER: &str = "flutterwave";
pub const SIGNATURE_HEADER: &str = "verif-hash";

#[derive(Debug, Clone)]
pub struct FlutterwaveConfig {
    pub secret_key: String,
    /// Static secret hash echoed back in the `verif-hash` header.
    pub webhook_hash: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl FlutterwaveConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let secret_key =
            std::env::var("FLUTTERWAVE_SECRET_KEY").map_err(|_| PaymentError::ValidationError {
                message: "FLUTTERWAVE_SECRET_KEY environment variable is required".to_string(),
                field: Some("FLUTTERWAVE_SECRET_KEY".to_string()),
            })?;

        Ok(Self {
            secret_key,
            webhook_hash: std::env::var("FLUTTERWAVE_WEBHOOK_HASH").ok(),
            base_url: std::env::var("FLUTTERWAVE_BASE_URL")
                .unwrap_or_else(|_| "https://api.flutterwave.com/v3".to_string()),
            timeout_secs: std::env::var("FLUTTERWAVE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5),
        })
    }
}

pub struct FlutterwaveProvider {
    config: FlutterwaveConfig,
    http: PaymentHttpClient,
}

impl FlutterwaveProvider {
    pub fn new(config: FlutterwaveConfig) -> PaymentResult<Self> {
        if config.secret_key.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "flutterwave secret key is required".to_string(),
                field: Some("FLUTTERWAVE_SECRET_KEY".to_string()),
            });
        }
        let http = PaymentHttpClient::new(PROVIDER, Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(FlutterwaveConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn open_envelope(&self, raw: JsonValue) -> PaymentResult<JsonValue> {
        let envelope: FlutterwaveEnvelope = self.http.decode(raw)?;
        if envelope.status.to_lowercase() != "success" {
            return Err(PaymentError::provider_rejected(PROVIDER, envelope.message));
        }
        Ok(envelope.data.unwrap_or_else(|| serde_json::json!({})))
    }
}

#[async_trait]
impl PaymentGateway for FlutterwaveProvider {
    async fn initialize_transaction(
        &self,
        request: InitializeTransaction,
    ) -> PaymentResult<InitializedTransaction> {
        request.validate()?;
        let tx_ref = request
            .reference
            .clone()
            .filter(|r| !r.trim().is_empty())
            .ok_or(PaymentError::ValidationError {
                message: "reference is required for flutterwave initialization".to_string(),
                field: Some("reference".to_string()),
            })?;

        let payload = serde_json::json!({
            "tx_ref": tx_ref,
            "amount": request.amount.to_string(),
            "currency": request.currency,
            "redirect_url": request.callback_url,
            "customer": { "email": request.payer_email },
            "meta": request.metadata,
        });

        let raw = self
            .http
            .request_value(
                reqwest::Method::POST,
                &self.endpoint("/payments"),
                &self.config.secret_key,
                Some(&payload),
            )
            .await?;
        let data = self.open_envelope(raw)?;
        let link = data
            .get("link")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or(PaymentError::MalformedResponse {
                provider: PROVIDER.to_string(),
                message: "missing payment link in flutterwave response".to_string(),
            })?;

        info!(tx_ref = %tx_ref, "flutterwave transaction initialized");

        Ok(InitializedTransaction {
            external_reference: tx_ref,
            redirect_url: link,
            provider_data: data,
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
        let url = format!(
            "{}?tx_ref={}",
            self.endpoint("/transactions/verify_by_reference"),
            external_reference
        );
        let raw = self
            .http
            .request_value(reqwest::Method::GET, &url, &self.config.secret_key, None)
            .await?;
        let data = self.open_envelope(raw)?;
        let tx: FlutterwaveTransaction = self.http.decode(data.clone())?;
        Ok(ProviderTransaction::Flutterwave(tx).into_verification(data))
    }

    async fn issue_refund(
        &self,
        external_transaction_id: &str,
        amount_minor_units: Option<i64>,
    ) -> PaymentResult<RefundIssued> {
        // Flutterwave takes refund amounts in major units.
        let payload = match amount_minor_units {
            Some(minor) => serde_json::json!({ "amount": Decimal::new(minor, 2).to_string() }),
            None => serde_json::json!({}),
        };
        let raw = self
            .http
            .request_value(
                reqwest::Method::POST,
                &self.endpoint(&format!("/transactions/{}/refund", external_transaction_id)),
                &self.config.secret_key,
                Some(&payload),
            )
            .await?;
        let data = self.open_envelope(raw)?;
        let external_refund_reference =
            json_id(data.get("id")).ok_or(PaymentError::MalformedResponse {
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
            "flutterwave refund issued"
        );

        Ok(RefundIssued {
            external_refund_reference,
            status,
            provider_data: data,
        })
    }

    fn name(&self) -> ProviderName {
        ProviderName::Flutterwave
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    fn verify_signature(&self, _raw_body: &[u8], signature: &str) -> bool {
        match self.config.webhook_hash.as_deref() {
            Some(expected) if !expected.trim().is_empty() => {
                secure_eq(expected.trim().as_bytes(), signature.trim().as_bytes())
            }
            _ => {
                warn!("FLUTTERWAVE_WEBHOOK_HASH is not configured, rejecting webhook");
                false
            }
        }
    }

    fn parse_webhook_event(&self, raw_body: &[u8]) -> PaymentResult<WebhookEvent> {
        let parsed: JsonValue =
            serde_json::from_slice(raw_body).map_err(|e| PaymentError::ValidationError {
                message: format!("invalid webhook JSON payload: {}", e),
                field: None,
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

        let status = data
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_lowercase();
        let kind = match (event_type.as_str(), status.as_str()) {
            ("charge.completed", "successful") => WebhookEventKind::ChargeSuccess,
            ("charge.completed", "failed") => WebhookEventKind::ChargeFailed,
            ("refund.completed", _) => WebhookEventKind::RefundProcessed,
            _ => WebhookEventKind::Other,
        };

        let (reference, refund_reference) = match kind {
            WebhookEventKind::RefundProcessed => (
                data.get("tx_ref")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                json_id(data.get("id")),
            ),
            _ => (
                data.get("tx_ref")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                None,
            ),
        };

        Ok(WebhookEvent {
            provider: ProviderName::Flutterwave,
            event_type,
            kind,
            reference,
            refund_reference,
            amount: data.get("amount").and_then(decimal_from_json),
            transaction_id: json_id(data.get("id")),
            data,
            received_at: chrono::Utc::now(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct FlutterwaveEnvelope {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<JsonValue>,
}

/// `data` object of `GET /transactions/verify_by_reference`.
#[derive(Debug, Clone, Deserialize)]
pub struct FlutterwaveTransaction {
    #[serde(default)]
    pub id: Option<u64>,
    pub tx_ref: String,
    #[serde(default)]
    pub flw_ref: Option<String>,
    pub status: String,
    /// Major units, sent as a JSON number.
    #[serde(default)]
    pub amount: Option<JsonValue>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub processor_response: Option<String>,
}

impl FlutterwaveTransaction {
    pub(crate) fn outcome(&self) -> ProviderOutcome {
        match self.status.to_lowercase().as_str() {
            "successful" => ProviderOutcome::Success,
            "failed" | "cancelled" => ProviderOutcome::Failure,
            "pending" | "new" | "processing" => ProviderOutcome::Pending,
            other => {
                warn!(status = other, tx_ref = %self.tx_ref, "unrecognized flutterwave status");
                ProviderOutcome::Pending
            }
        }
    }

    pub(crate) fn normalize(self, raw: JsonValue) -> VerificationResult {
        VerificationResult {
            provider: ProviderName::Flutterwave,
            outcome: self.outcome(),
            amount: self.amount.as_ref().and_then(decimal_from_json),
            currency: self.currency,
            transaction_id: self.id.map(|id| id.to_string()),
            gateway_response: self.processor_response,
            reference: self.tx_ref,
            raw,
        }
    }
}
