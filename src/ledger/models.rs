use crate::payments::types::ProviderName;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::state_machine::LedgerError;

/// Users and polls are owned by collaborator services and identified by their numeric keys.
pub type UserId = i64;
pub type PollId = i64;

pub const MIN_VOTES_PER_PAYMENT: i32 = 1;
pub const MAX_VOTES_PER_PAYMENT: i32 = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 5] = [
        PaymentStatus::Pending,
        PaymentStatus::Completed,
        PaymentStatus::Failed,
        PaymentStatus::Refunded,
        PaymentStatus::PartiallyRefunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::PartiallyRefunded => "partially_refunded",
        }
    }

    /// No transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Refunded)
    }

    /// True once the payment went through `completed`, refunded or not.
    pub fn reached_completion(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartiallyRefunded | Self::Refunded
        )
    }

    /// Payment is settled from the reconciliation point of view: no provider
    /// charge signal can change it anymore.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for PaymentStatus {
    type Error = LedgerError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            "partially_refunded" => Ok(Self::PartiallyRefunded),
            other => Err(LedgerError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Rejected,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for RefundStatus {
    type Error = LedgerError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "rejected" => Ok(Self::Rejected),
            other => Err(LedgerError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundReason {
    UserRequest,
    Fraud,
    Duplicate,
    TechnicalError,
    Other,
}

impl RefundReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserRequest => "user_request",
            Self::Fraud => "fraud",
            Self::Duplicate => "duplicate",
            Self::TechnicalError => "technical_error",
            Self::Other => "other",
        }
    }
}

impl FromStr for RefundReason {
    type Err = LedgerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "user_request" => Ok(Self::UserRequest),
            "fraud" => Ok(Self::Fraud),
            "duplicate" => Ok(Self::Duplicate),
            "technical_error" => Ok(Self::TechnicalError),
            "other" => Ok(Self::Other),
            other => Err(LedgerError::UnknownReason(other.to_string())),
        }
    }
}

/// A purchase of votes on a paid poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: UserId,
    pub poll_id: PollId,
    pub amount: Decimal,
    pub currency: String,
    pub votes_purchased: i32,
    pub provider: ProviderName,
    pub provider_reference: Option<String>,
    pub provider_metadata: JsonValue,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub referred_by: Option<UserId>,
    /// Set when automatic reconciliation gave up on a pending payment.
    /// Flagged payments are left to an operator and skipped by the sweeper.
    #[serde(default)]
    pub needs_review_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub review_reason: Option<String>,
}

impl Payment {
    /// Provider-side transaction id captured from verification metadata. Refunds
    /// are issued against this id rather than against our reference.
    pub fn provider_transaction_id(&self) -> Option<String> {
        match self.provider_metadata.get("id")? {
            JsonValue::Number(n) => Some(n.to_string()),
            JsonValue::String(s) if !s.trim().is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    /// Human-facing reference: the provider reference once assigned, else our id.
    pub fn display_reference(&self) -> String {
        self.provider_reference
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Insert payload for a fresh `pending` payment.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub user_id: UserId,
    pub poll_id: PollId,
    pub amount: Decimal,
    pub currency: String,
    pub votes_purchased: i32,
    pub provider: ProviderName,
    pub referred_by: Option<UserId>,
}

impl NewPayment {
    pub fn into_payment(self, id: Uuid, now: DateTime<Utc>) -> Payment {
        Payment {
            id,
            user_id: self.user_id,
            poll_id: self.poll_id,
            amount: self.amount,
            currency: self.currency,
            votes_purchased: self.votes_purchased,
            provider: self.provider,
            provider_reference: None,
            provider_metadata: JsonValue::Object(Default::default()),
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            referred_by: self.referred_by,
            needs_review_at: None,
            review_reason: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Refund {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub reason: RefundReason,
    pub reason_description: String,
    pub provider_reference: Option<String>,
    pub status: RefundStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub requested_by: Option<UserId>,
    pub reviewed_by: Option<UserId>,
}

#[derive(Debug, Clone)]
pub struct NewRefund {
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub reason: RefundReason,
    pub reason_description: String,
    pub requested_by: Option<UserId>,
}

impl NewRefund {
    pub fn into_refund(self, id: Uuid, now: DateTime<Utc>) -> Refund {
        Refund {
            id,
            payment_id: self.payment_id,
            amount: self.amount,
            reason: self.reason,
            reason_description: self.reason_description,
            provider_reference: None,
            status: RefundStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            requested_by: self.requested_by,
            reviewed_by: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferralReward {
    pub id: Uuid,
    pub user_id: UserId,
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub is_paid: bool,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Entitlement allowing a user to cast a number of votes on a poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoteGrant {
    pub user_id: UserId,
    pub poll_id: PollId,
    pub votes_available: i32,
    pub created_at: DateTime<Utc>,
}

/// Referral aggregates kept on the referrer's profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReferralStats {
    pub user_id: UserId,
    pub referral_earnings: Decimal,
    pub total_referrals: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in PaymentStatus::ALL {
            assert_eq!(PaymentStatus::try_from(status.as_str()).unwrap(), status);
        }
        assert!(PaymentStatus::try_from("settled").is_err());
    }

    #[test]
    fn provider_transaction_id_accepts_numbers_and_strings() {
        let mut payment = NewPayment {
            user_id: 1,
            poll_id: 2,
            amount: Decimal::new(10000, 2),
            currency: "NGN".to_string(),
            votes_purchased: 2,
            provider: ProviderName::Paystack,
            referred_by: None,
        }
        .into_payment(Uuid::new_v4(), Utc::now());
        assert_eq!(payment.provider_transaction_id(), None);

        payment.provider_metadata = serde_json::json!({"id": 4099260516u64});
        assert_eq!(payment.provider_transaction_id().as_deref(), Some("4099260516"));

        payment.provider_metadata = serde_json::json!({"id": "tx_77"});
        assert_eq!(payment.provider_transaction_id().as_deref(), Some("tx_77"));
    }

    #[test]
    fn refund_reason_parses_known_codes() {
        assert_eq!(
            "technical_error".parse::<RefundReason>().unwrap(),
            RefundReason::TechnicalError
        );
        assert!("whim".parse::<RefundReason>().is_err());
    }
}
