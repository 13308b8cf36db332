use super::{
    merge_metadata, AccountDirectory, CommitOutcome, CompletionUnit, FailureUnit, LedgerStore,
    PollPricing, RefundCommitOutcome, RefundCompletion, StoreError, StoreErrorKind, StoreResult,
    UserAccount,
};
use crate::ledger::{
    apply_refund, LedgerError, NewPayment, NewRefund, Payment, PaymentStatus, PollId, ReferralReward,
    ReferralStats, Refund, RefundStatus, UserId, VoteGrant,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Default)]
struct LedgerState {
    payments: HashMap<Uuid, Payment>,
    refunds: HashMap<Uuid, Refund>,
    rewards: HashMap<Uuid, ReferralReward>,
    grants: HashMap<(UserId, PollId), VoteGrant>,
    stats: HashMap<UserId, ReferralStats>,
}

impl LedgerState {
    fn payment(&self, id: Uuid) -> StoreResult<&Payment> {
        self.payments
            .get(&id)
            .ok_or_else(|| StoreError::not_found("payment", id))
    }

    fn refund_total(&self, payment_id: Uuid, status: RefundStatus) -> Decimal {
        self.refunds
            .values()
            .filter(|r| r.payment_id == payment_id && r.status == status)
            .map(|r| r.amount)
            .sum()
    }

    fn completed_refund_total(&self, payment_id: Uuid) -> Decimal {
        self.refund_total(payment_id, RefundStatus::Completed)
    }
}

/// Ledger store held in process memory. A single mutex makes every method one
/// atomic unit of work.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the referral aggregates of a profile.
    pub async fn seed_referral_stats(&self, stats: ReferralStats) {
        self.state.lock().await.stats.insert(stats.user_id, stats);
    }

    /// Backdates a payment so the pending sweeper considers it stale.
    pub async fn touch_payment(&self, id: Uuid, updated_at: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("payment", id))?;
        payment.updated_at = updated_at;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert_payment(&self, new: NewPayment) -> StoreResult<Payment> {
        let payment = new.into_payment(Uuid::new_v4(), Utc::now());
        self.state
            .lock()
            .await
            .payments
            .insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get_payment(&self, id: Uuid) -> StoreResult<Option<Payment>> {
        Ok(self.state.lock().await.payments.get(&id).cloned())
    }

    async fn find_payment_by_reference(&self, reference: &str) -> StoreResult<Option<Payment>> {
        Ok(self
            .state
            .lock()
            .await
            .payments
            .values()
            .find(|p| p.provider_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn assign_provider_reference(
        &self,
        id: Uuid,
        reference: &str,
        provider_metadata: JsonValue,
    ) -> StoreResult<Payment> {
        let mut state = self.state.lock().await;
        let taken = state
            .payments
            .values()
            .any(|p| p.id != id && p.provider_reference.as_deref() == Some(reference));
        if taken {
            return Err(StoreError::new(StoreErrorKind::UniqueViolation {
                constraint: "payments_provider_reference_key".to_string(),
            }));
        }

        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("payment", id))?;
        payment.provider_reference = Some(reference.to_string());
        merge_metadata(&mut payment.provider_metadata, provider_metadata);
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn commit_completion(&self, unit: CompletionUnit) -> StoreResult<CommitOutcome> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let current = state.payment(unit.payment_id)?.clone();
        if current.status != PaymentStatus::Pending {
            return Ok(CommitOutcome::StatusChanged(current));
        }

        // Validate everything before the first write so a failure leaves no trace.
        if let Some(reward) = &unit.referral_reward {
            if state
                .rewards
                .values()
                .any(|r| r.payment_id == reward.payment_id)
            {
                return Err(StoreError::new(StoreErrorKind::UniqueViolation {
                    constraint: "referral_rewards_payment_id_key".to_string(),
                }));
            }
        }

        let grant = unit.vote_grant;
        state
            .grants
            .entry((grant.user_id, grant.poll_id))
            .or_insert(grant);

        if let Some(reward) = unit.referral_reward {
            let stats = state
                .stats
                .entry(reward.user_id)
                .or_insert_with(|| ReferralStats {
                    user_id: reward.user_id,
                    ..ReferralStats::default()
                });
            stats.referral_earnings += reward.amount;
            stats.total_referrals += 1;
            state.rewards.insert(reward.id, reward);
        }

        let payment = state
            .payments
            .get_mut(&unit.payment_id)
            .ok_or_else(|| StoreError::not_found("payment", unit.payment_id))?;
        payment.status = PaymentStatus::Completed;
        payment.completed_at = Some(unit.completed_at);
        payment.updated_at = unit.completed_at;
        payment.needs_review_at = None;
        payment.review_reason = None;
        merge_metadata(&mut payment.provider_metadata, unit.provider_metadata);
        Ok(CommitOutcome::Applied(payment.clone()))
    }

    async fn commit_failure(&self, unit: FailureUnit) -> StoreResult<CommitOutcome> {
        let mut state = self.state.lock().await;
        let payment = state
            .payments
            .get_mut(&unit.payment_id)
            .ok_or_else(|| StoreError::not_found("payment", unit.payment_id))?;
        if payment.status != PaymentStatus::Pending {
            return Ok(CommitOutcome::StatusChanged(payment.clone()));
        }
        payment.status = PaymentStatus::Failed;
        payment.updated_at = unit.failed_at;
        payment.needs_review_at = None;
        payment.review_reason = None;
        merge_metadata(&mut payment.provider_metadata, unit.provider_metadata);
        Ok(CommitOutcome::Applied(payment.clone()))
    }

    async fn list_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut stale: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| {
                p.status == PaymentStatus::Pending
                    && p.provider_reference.is_some()
                    && p.needs_review_at.is_none()
                    && p.updated_at < older_than
            })
            .cloned()
            .collect();
        stale.sort_by_key(|p| p.updated_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn flag_for_review(
        &self,
        id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Payment>> {
        let mut state = self.state.lock().await;
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("payment", id))?;
        if payment.status != PaymentStatus::Pending {
            return Ok(None);
        }
        payment.needs_review_at = Some(at);
        payment.review_reason = Some(reason.to_string());
        payment.updated_at = at;
        Ok(Some(payment.clone()))
    }

    async fn insert_refund(&self, new: NewRefund) -> StoreResult<Refund> {
        let mut state = self.state.lock().await;
        state.payment(new.payment_id)?;
        let refund = new.into_refund(Uuid::new_v4(), Utc::now());
        state.refunds.insert(refund.id, refund.clone());
        Ok(refund)
    }

    async fn get_refund(&self, id: Uuid) -> StoreResult<Option<Refund>> {
        Ok(self.state.lock().await.refunds.get(&id).cloned())
    }

    async fn find_refund_by_provider_reference(
        &self,
        reference: &str,
    ) -> StoreResult<Option<Refund>> {
        Ok(self
            .state
            .lock()
            .await
            .refunds
            .values()
            .find(|r| r.provider_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn completed_refund_total(&self, payment_id: Uuid) -> StoreResult<Decimal> {
        Ok(self.state.lock().await.completed_refund_total(payment_id))
    }

    async fn in_flight_refund_total(&self, payment_id: Uuid) -> StoreResult<Decimal> {
        Ok(self
            .state
            .lock()
            .await
            .refund_total(payment_id, RefundStatus::Processing))
    }

    async fn transition_refund(
        &self,
        id: Uuid,
        from: RefundStatus,
        to: RefundStatus,
        reviewed_by: Option<UserId>,
    ) -> StoreResult<Option<Refund>> {
        let mut state = self.state.lock().await;
        let refund = state
            .refunds
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("refund", id))?;
        if refund.status != from {
            return Ok(None);
        }
        refund.status = to;
        refund.updated_at = Utc::now();
        if reviewed_by.is_some() {
            refund.reviewed_by = reviewed_by;
        }
        Ok(Some(refund.clone()))
    }

    async fn commit_refund(
        &self,
        completion: RefundCompletion,
    ) -> StoreResult<RefundCommitOutcome> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let refund = state
            .refunds
            .get(&completion.refund_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("refund", completion.refund_id))?;
        if refund.status != RefundStatus::Processing {
            return Ok(RefundCommitOutcome::Rejected(
                LedgerError::RefundNotProcessing {
                    refund_id: refund.id,
                    status: refund.status,
                },
            ));
        }
        let payment = state.payment(refund.payment_id)?.clone();
        let completed_total = state.completed_refund_total(payment.id);

        let transition = match apply_refund(&payment, completed_total, refund.amount) {
            Ok(t) => t,
            Err(e) => return Ok(RefundCommitOutcome::Rejected(e)),
        };

        let refund = {
            let stored = state
                .refunds
                .get_mut(&completion.refund_id)
                .ok_or_else(|| StoreError::not_found("refund", completion.refund_id))?;
            stored.status = RefundStatus::Completed;
            stored.provider_reference = Some(completion.provider_reference);
            stored.completed_at = Some(completion.completed_at);
            stored.updated_at = completion.completed_at;
            stored.clone()
        };

        let payment = state
            .payments
            .get_mut(&refund.payment_id)
            .ok_or_else(|| StoreError::not_found("payment", refund.payment_id))?;
        payment.status = transition.status;
        payment.updated_at = completion.completed_at;
        merge_metadata(
            &mut payment.provider_metadata,
            serde_json::json!({ "last_refund": completion.provider_data }),
        );

        Ok(RefundCommitOutcome::Applied {
            refund,
            payment: payment.clone(),
        })
    }

    async fn vote_grant(
        &self,
        user_id: UserId,
        poll_id: PollId,
    ) -> StoreResult<Option<VoteGrant>> {
        Ok(self
            .state
            .lock()
            .await
            .grants
            .get(&(user_id, poll_id))
            .cloned())
    }

    async fn reward_for_payment(&self, payment_id: Uuid) -> StoreResult<Option<ReferralReward>> {
        Ok(self
            .state
            .lock()
            .await
            .rewards
            .values()
            .find(|r| r.payment_id == payment_id)
            .cloned())
    }

    async fn rewards_for_user(&self, user_id: UserId) -> StoreResult<Vec<ReferralReward>> {
        let state = self.state.lock().await;
        let mut rewards: Vec<ReferralReward> = state
            .rewards
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        rewards.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rewards)
    }

    async fn mark_rewards_paid(&self, ids: &[Uuid], paid_at: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let mut updated = 0;
        for id in ids {
            if let Some(reward) = state.rewards.get_mut(id) {
                if !reward.is_paid {
                    reward.is_paid = true;
                    reward.paid_at = Some(paid_at);
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn referral_stats(&self, user_id: UserId) -> StoreResult<ReferralStats> {
        Ok(self
            .state
            .lock()
            .await
            .stats
            .get(&user_id)
            .cloned()
            .unwrap_or(ReferralStats {
                user_id,
                ..ReferralStats::default()
            }))
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// User and poll directory held in memory.
#[derive(Default)]
pub struct InMemoryAccountDirectory {
    users: RwLock<HashMap<UserId, UserAccount>>,
    polls: RwLock<HashMap<PollId, PollPricing>>,
}

impl InMemoryAccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: UserAccount) {
        self.users.write().await.insert(user.id, user);
    }

    pub async fn insert_poll(&self, poll: PollPricing) {
        self.polls.write().await.insert(poll.id, poll);
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccountDirectory {
    async fn find_user(&self, user_id: UserId) -> StoreResult<Option<UserAccount>> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }

    async fn find_user_by_referral_code(&self, code: &str) -> StoreResult<Option<UserAccount>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.referral_code.as_deref() == Some(code))
            .cloned())
    }

    async fn find_poll(&self, poll_id: PollId) -> StoreResult<Option<PollPricing>> {
        Ok(self.polls.read().await.get(&poll_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::ProviderName;

    fn new_payment(amount: Decimal) -> NewPayment {
        NewPayment {
            user_id: 1,
            poll_id: 7,
            amount,
            currency: "NGN".to_string(),
            votes_purchased: 2,
            provider: ProviderName::Paystack,
            referred_by: Some(2),
        }
    }

    fn completion(payment: &Payment, reward: Option<ReferralReward>) -> CompletionUnit {
        let now = Utc::now();
        CompletionUnit {
            payment_id: payment.id,
            provider_metadata: serde_json::json!({"id": 99}),
            completed_at: now,
            vote_grant: VoteGrant {
                user_id: payment.user_id,
                poll_id: payment.poll_id,
                votes_available: payment.votes_purchased,
                created_at: now,
            },
            referral_reward: reward,
        }
    }

    fn reward_for(payment: &Payment) -> ReferralReward {
        ReferralReward {
            id: Uuid::new_v4(),
            user_id: 2,
            payment_id: payment.id,
            amount: Decimal::new(1000, 2),
            is_paid: false,
            created_at: Utc::now(),
            paid_at: None,
        }
    }

    #[tokio::test]
    async fn completion_is_applied_once() {
        let store = InMemoryLedgerStore::new();
        let payment = store
            .insert_payment(new_payment(Decimal::new(10000, 2)))
            .await
            .unwrap();

        let first = store
            .commit_completion(completion(&payment, Some(reward_for(&payment))))
            .await
            .unwrap();
        assert!(matches!(first, CommitOutcome::Applied(ref p) if p.status == PaymentStatus::Completed));

        let second = store
            .commit_completion(completion(&payment, Some(reward_for(&payment))))
            .await
            .unwrap();
        assert!(matches!(second, CommitOutcome::StatusChanged(_)));

        assert_eq!(store.rewards_for_user(2).await.unwrap().len(), 1);
        let stats = store.referral_stats(2).await.unwrap();
        assert_eq!(stats.referral_earnings, Decimal::new(1000, 2));
        assert_eq!(stats.total_referrals, 1);
    }

    #[tokio::test]
    async fn existing_grant_is_never_lowered() {
        let store = InMemoryLedgerStore::new();
        let first = store
            .insert_payment(NewPayment {
                votes_purchased: 5,
                ..new_payment(Decimal::new(25000, 2))
            })
            .await
            .unwrap();
        let mut unit = completion(&first, None);
        unit.vote_grant.votes_available = 5;
        store.commit_completion(unit).await.unwrap();

        let second = store
            .insert_payment(new_payment(Decimal::new(10000, 2)))
            .await
            .unwrap();
        store
            .commit_completion(completion(&second, None))
            .await
            .unwrap();

        let grant = store.vote_grant(1, 7).await.unwrap().unwrap();
        assert_eq!(grant.votes_available, 5);
    }

    #[tokio::test]
    async fn duplicate_provider_reference_is_rejected() {
        let store = InMemoryLedgerStore::new();
        let a = store
            .insert_payment(new_payment(Decimal::new(100, 0)))
            .await
            .unwrap();
        let b = store
            .insert_payment(new_payment(Decimal::new(100, 0)))
            .await
            .unwrap();
        store
            .assign_provider_reference(a.id, "ref-1", JsonValue::Null)
            .await
            .unwrap();
        let err = store
            .assign_provider_reference(b.id, "ref-1", JsonValue::Null)
            .await
            .unwrap_err();
        assert!(matches!(err.kind, StoreErrorKind::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn refund_commit_rejects_overdraw() {
        let store = InMemoryLedgerStore::new();
        let payment = store
            .insert_payment(new_payment(Decimal::new(10000, 2)))
            .await
            .unwrap();
        store
            .commit_completion(completion(&payment, None))
            .await
            .unwrap();

        let mut ids = Vec::new();
        for amount in [Decimal::new(6000, 2), Decimal::new(5000, 2)] {
            let refund = store
                .insert_refund(NewRefund {
                    payment_id: payment.id,
                    amount,
                    reason: crate::ledger::RefundReason::UserRequest,
                    reason_description: String::new(),
                    requested_by: Some(1),
                })
                .await
                .unwrap();
            store
                .transition_refund(refund.id, RefundStatus::Pending, RefundStatus::Processing, Some(9))
                .await
                .unwrap();
            ids.push(refund.id);
        }

        let first = store
            .commit_refund(RefundCompletion {
                refund_id: ids[0],
                provider_reference: "rf-1".to_string(),
                provider_data: JsonValue::Null,
                completed_at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(matches!(
            first,
            RefundCommitOutcome::Applied { ref payment, .. } if payment.status == PaymentStatus::PartiallyRefunded
        ));

        let second = store
            .commit_refund(RefundCompletion {
                refund_id: ids[1],
                provider_reference: "rf-2".to_string(),
                provider_data: JsonValue::Null,
                completed_at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(matches!(second, RefundCommitOutcome::Rejected(_)));
        assert_eq!(
            store.completed_refund_total(payment.id).await.unwrap(),
            Decimal::new(6000, 2)
        );
    }

    fn refund_completion(refund_id: Uuid, reference: &str) -> RefundCompletion {
        RefundCompletion {
            refund_id,
            provider_reference: reference.to_string(),
            provider_data: JsonValue::Null,
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn refund_commit_requires_processing_status() {
        let store = InMemoryLedgerStore::new();
        let payment = store
            .insert_payment(new_payment(Decimal::new(10000, 2)))
            .await
            .unwrap();
        store
            .commit_completion(completion(&payment, None))
            .await
            .unwrap();
        let refund = store
            .insert_refund(NewRefund {
                payment_id: payment.id,
                amount: Decimal::new(2500, 2),
                reason: crate::ledger::RefundReason::Duplicate,
                reason_description: String::new(),
                requested_by: Some(1),
            })
            .await
            .unwrap();

        // Still pending: never approved.
        let outcome = store
            .commit_refund(refund_completion(refund.id, "rf-early"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RefundCommitOutcome::Rejected(LedgerError::RefundNotProcessing {
                refund_id: refund.id,
                status: RefundStatus::Pending,
            })
        );
        assert_eq!(store.completed_refund_total(payment.id).await.unwrap(), Decimal::ZERO);

        store
            .transition_refund(refund.id, RefundStatus::Pending, RefundStatus::Processing, Some(9))
            .await
            .unwrap();
        let applied = store
            .commit_refund(refund_completion(refund.id, "rf-1"))
            .await
            .unwrap();
        assert!(matches!(applied, RefundCommitOutcome::Applied { .. }));

        // Completing twice must not count the amount twice.
        let replay = store
            .commit_refund(refund_completion(refund.id, "rf-2"))
            .await
            .unwrap();
        assert!(matches!(
            replay,
            RefundCommitOutcome::Rejected(LedgerError::RefundNotProcessing {
                status: RefundStatus::Completed,
                ..
            })
        ));
        assert_eq!(
            store.completed_refund_total(payment.id).await.unwrap(),
            Decimal::new(2500, 2)
        );
        let stored = store.get_refund(refund.id).await.unwrap().unwrap();
        assert_eq!(stored.provider_reference.as_deref(), Some("rf-1"));
    }

    #[tokio::test]
    async fn flagged_payments_leave_the_stale_list_until_settled() {
        let store = InMemoryLedgerStore::new();
        let payment = store
            .insert_payment(new_payment(Decimal::new(10000, 2)))
            .await
            .unwrap();
        store
            .assign_provider_reference(payment.id, "ref-review", JsonValue::Null)
            .await
            .unwrap();
        let hour_ago = Utc::now() - chrono::Duration::hours(1);
        store.touch_payment(payment.id, hour_ago).await.unwrap();
        assert_eq!(store.list_stale_pending(Utc::now(), 10).await.unwrap().len(), 1);

        let flagged = store
            .flag_for_review(payment.id, "retries exhausted", hour_ago)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(flagged.review_reason.as_deref(), Some("retries exhausted"));
        assert!(store.list_stale_pending(Utc::now(), 10).await.unwrap().is_empty());

        let settled = store
            .commit_completion(completion(&payment, None))
            .await
            .unwrap();
        match settled {
            CommitOutcome::Applied(p) => {
                assert_eq!(p.status, PaymentStatus::Completed);
                assert!(p.needs_review_at.is_none());
                assert!(p.review_reason.is_none());
            }
            other => panic!("expected completion, got {:?}", other),
        }

        // Settled payments cannot be flagged.
        assert!(store
            .flag_for_review(payment.id, "late", Utc::now())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn mark_rewards_paid_counts_only_unpaid() {
        let store = InMemoryLedgerStore::new();
        let payment = store
            .insert_payment(new_payment(Decimal::new(10000, 2)))
            .await
            .unwrap();
        let reward = reward_for(&payment);
        let reward_id = reward.id;
        store
            .commit_completion(completion(&payment, Some(reward)))
            .await
            .unwrap();

        let now = Utc::now();
        assert_eq!(
            store
                .mark_rewards_paid(&[reward_id, Uuid::new_v4()], now)
                .await
                .unwrap(),
            1
        );
        assert_eq!(store.mark_rewards_paid(&[reward_id], now).await.unwrap(), 0);
    }
}
