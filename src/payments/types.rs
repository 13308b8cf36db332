use crate::payments::error::{PaymentError, PaymentResult};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Paystack,
    Flutterwave,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Paystack => "paystack",
            ProviderName::Flutterwave => "flutterwave",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "paystack" => Ok(ProviderName::Paystack),
            "flutterwave" => Ok(ProviderName::Flutterwave),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

/// Charge outcome as reported by a provider, normalized across providers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderOutcome {
    Success,
    Failure,
    Pending,
}

impl ProviderOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderOutcome::Success => "success",
            ProviderOutcome::Failure => "failure",
            ProviderOutcome::Pending => "pending",
        }
    }
}

impl std::fmt::Display for ProviderOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Convert a major-unit amount (e.g. naira) to minor units (kobo).
/// Fractions of a minor unit are rejected, never rounded.
pub fn to_minor_units(amount: Decimal) -> PaymentResult<i64> {
    let minor = amount * Decimal::ONE_HUNDRED;
    if !minor.fract().is_zero() {
        return Err(PaymentError::ValidationError {
            message: format!("amount {} is finer than one minor unit", amount),
            field: Some("amount".to_string()),
        });
    }
    minor.to_i64().ok_or(PaymentError::ValidationError {
        message: format!("amount {} does not fit in minor units", amount),
        field: Some("amount".to_string()),
    })
}

pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeTransaction {
    pub payer_email: String,
    pub amount: Decimal,
    pub currency: String,
    pub reference: Option<String>,
    pub callback_url: Option<String>,
    pub metadata: JsonValue,
}

impl InitializeTransaction {
    pub fn validate(&self) -> PaymentResult<()> {
        if self.amount <= Decimal::ZERO {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "currency is required".to_string(),
                field: Some("currency".to_string()),
            });
        }
        if self.payer_email.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "payer email is required".to_string(),
                field: Some("payer_email".to_string()),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializedTransaction {
    pub external_reference: String,
    pub redirect_url: String,
    pub provider_data: JsonValue,
}

/// Canonical verification result every provider payload is mapped into.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationResult {
    pub provider: ProviderName,
    pub reference: String,
    pub outcome: ProviderOutcome,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub transaction_id: Option<String>,
    pub gateway_response: Option<String>,
    pub raw: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundIssued {
    pub external_refund_reference: String,
    pub status: String,
    pub provider_data: JsonValue,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventKind {
    ChargeSuccess,
    ChargeFailed,
    RefundProcessed,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub provider: ProviderName,
    pub event_type: String,
    pub kind: WebhookEventKind,
    /// Charge reference; our idempotency key.
    pub reference: Option<String>,
    pub refund_reference: Option<String>,
    pub amount: Option<Decimal>,
    pub transaction_id: Option<String>,
    pub data: JsonValue,
    pub received_at: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn outcome(&self) -> Option<ProviderOutcome> {
        match self.kind {
            WebhookEventKind::ChargeSuccess => Some(ProviderOutcome::Success),
            WebhookEventKind::ChargeFailed => Some(ProviderOutcome::Failure),
            _ => None,
        }
    }
}
