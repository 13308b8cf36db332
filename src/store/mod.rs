//! Persistence for the payment ledger.
//!
//! The reconciliation engine only talks to [`LedgerStore`]; every method that
//! changes a payment's status is a single atomic unit of work guarded by a
//! compare-and-set on the current status, so a lost race is observed as
//! [`CommitOutcome::StatusChanged`] instead of a second set of side effects.

pub mod error;
pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

pub use error::{StoreError, StoreErrorKind};
pub use memory::{InMemoryAccountDirectory, InMemoryLedgerStore};
#[cfg(feature = "database")]
pub use postgres::{init_pool, init_pool_from_config, PgAccountDirectory, PgLedgerStore, PoolConfig};

use crate::ledger::{
    LedgerError, NewPayment, NewRefund, Payment, PollId, ReferralReward, ReferralStats, Refund,
    RefundStatus, UserId, VoteGrant,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub type StoreResult<T> = Result<T, StoreError>;

/// Side effects of a payment's first transition to `completed`.
#[derive(Debug, Clone)]
pub struct CompletionUnit {
    pub payment_id: Uuid,
    /// Merged into the stored provider metadata.
    pub provider_metadata: JsonValue,
    pub completed_at: DateTime<Utc>,
    /// Created only when no grant exists for (user, poll).
    pub vote_grant: VoteGrant,
    /// Inserted together with the referrer's aggregate increments.
    pub referral_reward: Option<ReferralReward>,
}

#[derive(Debug, Clone)]
pub struct FailureUnit {
    pub payment_id: Uuid,
    pub provider_metadata: JsonValue,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Applied(Payment),
    /// The payment was no longer `pending`; nothing was written.
    StatusChanged(Payment),
}

#[derive(Debug, Clone)]
pub struct RefundCompletion {
    pub refund_id: Uuid,
    pub provider_reference: String,
    pub provider_data: JsonValue,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefundCommitOutcome {
    Applied { refund: Refund, payment: Payment },
    /// Ledger rejected the refund inside the unit of work; nothing was written.
    Rejected(LedgerError),
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_payment(&self, new: NewPayment) -> StoreResult<Payment>;

    async fn get_payment(&self, id: Uuid) -> StoreResult<Option<Payment>>;

    async fn find_payment_by_reference(&self, reference: &str) -> StoreResult<Option<Payment>>;

    /// Fails with `UniqueViolation` when another payment already owns `reference`.
    async fn assign_provider_reference(
        &self,
        id: Uuid,
        reference: &str,
        provider_metadata: JsonValue,
    ) -> StoreResult<Payment>;

    async fn commit_completion(&self, unit: CompletionUnit) -> StoreResult<CommitOutcome>;

    async fn commit_failure(&self, unit: FailureUnit) -> StoreResult<CommitOutcome>;

    /// Pending payments with a provider reference, not updated since `older_than`
    /// and not flagged for review.
    async fn list_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Payment>>;

    /// Hands a pending payment over to an operator. `None` when it is no longer
    /// pending. Settling the payment later clears the flag.
    async fn flag_for_review(
        &self,
        id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Payment>>;

    async fn insert_refund(&self, new: NewRefund) -> StoreResult<Refund>;

    async fn get_refund(&self, id: Uuid) -> StoreResult<Option<Refund>>;

    async fn find_refund_by_provider_reference(
        &self,
        reference: &str,
    ) -> StoreResult<Option<Refund>>;

    async fn completed_refund_total(&self, payment_id: Uuid) -> StoreResult<Decimal>;

    /// Sum of `processing` refunds: approved, provider call not yet settled.
    async fn in_flight_refund_total(&self, payment_id: Uuid) -> StoreResult<Decimal>;

    /// Compare-and-set on refund status. `None` when the refund was not in `from`.
    async fn transition_refund(
        &self,
        id: Uuid,
        from: RefundStatus,
        to: RefundStatus,
        reviewed_by: Option<UserId>,
    ) -> StoreResult<Option<Refund>>;

    /// Completes a `processing` refund and moves the payment to
    /// `partially_refunded` or `refunded`, re-validating the amount.
    async fn commit_refund(&self, completion: RefundCompletion)
        -> StoreResult<RefundCommitOutcome>;

    async fn vote_grant(&self, user_id: UserId, poll_id: PollId)
        -> StoreResult<Option<VoteGrant>>;

    async fn reward_for_payment(&self, payment_id: Uuid) -> StoreResult<Option<ReferralReward>>;

    async fn rewards_for_user(&self, user_id: UserId) -> StoreResult<Vec<ReferralReward>>;

    /// Marks the unpaid rewards among `ids` as paid; returns how many changed.
    async fn mark_rewards_paid(&self, ids: &[Uuid], paid_at: DateTime<Utc>) -> StoreResult<u64>;

    async fn referral_stats(&self, user_id: UserId) -> StoreResult<ReferralStats>;

    async fn health_check(&self) -> StoreResult<()>;
}

/// Read-only view of the user and poll collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct UserAccount {
    pub id: UserId,
    pub email: String,
    pub is_staff: bool,
    pub referral_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollPricing {
    pub id: PollId,
    pub is_active: bool,
    pub is_paid: bool,
    pub vote_price: Decimal,
    pub currency: String,
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn find_user(&self, user_id: UserId) -> StoreResult<Option<UserAccount>>;

    async fn find_user_by_referral_code(&self, code: &str) -> StoreResult<Option<UserAccount>>;

    async fn find_poll(&self, poll_id: PollId) -> StoreResult<Option<PollPricing>>;
}

/// Shallow JSON object merge, the same semantics as Postgres `jsonb || jsonb`.
pub(crate) fn merge_metadata(existing: &mut JsonValue, extra: JsonValue) {
    match (existing, extra) {
        (JsonValue::Object(target), JsonValue::Object(source)) => {
            for (key, value) in source {
                target.insert(key, value);
            }
        }
        (_, JsonValue::Null) => {}
        (target, other) => *target = other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_metadata_overwrites_keys_shallowly() {
        let mut existing = serde_json::json!({"a": 1, "nested": {"x": 1}});
        merge_metadata(&mut existing, serde_json::json!({"b": 2, "nested": {"y": 2}}));
        assert_eq!(
            existing,
            serde_json::json!({"a": 1, "b": 2, "nested": {"y": 2}})
        );

        merge_metadata(&mut existing, JsonValue::Null);
        assert_eq!(existing["a"], 1);
    }
}
