//! Referral rewards: the commission calculator used by the reconciliation
//! engine and the read/mark-paid service behind the referral endpoints.

use crate::error::{AppError, AppResult, DomainError, ValidationError};
use crate::ledger::{Payment, ReferralReward, UserId};
use crate::services::Caller;
use crate::store::{AccountDirectory, LedgerStore};
use chrono::{DateTime, Datelike, TimeZone, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Default commission on a referred payment.
pub const DEFAULT_COMMISSION_RATE: Decimal = Decimal::from_parts(10, 0, 0, false, 2);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferralRewardCalculator {
    commission_rate: Decimal,
}

impl Default for ReferralRewardCalculator {
    fn default() -> Self {
        Self {
            commission_rate: DEFAULT_COMMISSION_RATE,
        }
    }
}

impl ReferralRewardCalculator {
    pub fn new(commission_rate: Decimal) -> Self {
        Self { commission_rate }
    }

    pub fn commission_rate(&self) -> Decimal {
        self.commission_rate
    }

    /// `amount × rate`, rounded half away from zero to cents.
    pub fn reward_amount(&self, payment_amount: Decimal) -> Decimal {
        (payment_amount * self.commission_rate)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Reward owed for the first completion of `payment`, if any.
    pub fn reward_for(&self, payment: &Payment, now: DateTime<Utc>) -> Option<ReferralReward> {
        let referrer = payment.referred_by?;
        if referrer == payment.user_id {
            warn!(
                payment_id = %payment.id,
                user_id = payment.user_id,
                "self-referral on payment, no reward created"
            );
            return None;
        }

        let amount = self.reward_amount(payment.amount);
        if amount <= Decimal::ZERO {
            return None;
        }

        Some(ReferralReward {
            id: Uuid::new_v4(),
            user_id: referrer,
            payment_id: payment.id,
            amount,
            is_paid: false,
            created_at: now,
            paid_at: None,
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReferralSummary {
    pub total_earnings: Decimal,
    pub pending_earnings: Decimal,
    pub paid_earnings: Decimal,
    pub this_month_earnings: Decimal,
    pub total_referrals: i64,
    pub referral_code: Option<String>,
}

pub struct ReferralService {
    store: Arc<dyn LedgerStore>,
    directory: Arc<dyn AccountDirectory>,
}

impl ReferralService {
    pub fn new(store: Arc<dyn LedgerStore>, directory: Arc<dyn AccountDirectory>) -> Self {
        Self { store, directory }
    }

    pub async fn summary(&self, caller: &Caller) -> AppResult<ReferralSummary> {
        self.summary_at(caller, Utc::now()).await
    }

    pub async fn summary_at(
        &self,
        caller: &Caller,
        now: DateTime<Utc>,
    ) -> AppResult<ReferralSummary> {
        let user = self
            .directory
            .find_user(caller.user_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::UserNotFound {
                    user_id: caller.user_id,
                })
            })?;

        let rewards = self.store.rewards_for_user(user.id).await?;
        let stats = self.store.referral_stats(user.id).await?;
        let month_start = month_start(now);

        let total = sum_rewards(rewards.iter())?;
        let pending = sum_rewards(rewards.iter().filter(|r| !r.is_paid))?;
        let paid = sum_rewards(rewards.iter().filter(|r| r.is_paid))?;
        let this_month = sum_rewards(rewards.iter().filter(|r| r.created_at >= month_start))?;

        Ok(ReferralSummary {
            total_earnings: total,
            pending_earnings: pending,
            paid_earnings: paid,
            this_month_earnings: this_month,
            total_referrals: stats.total_referrals,
            referral_code: user.referral_code,
        })
    }

    /// Staff only. Returns how many rewards flipped from unpaid to paid.
    pub async fn mark_paid(&self, caller: &Caller, reward_ids: &[Uuid]) -> AppResult<u64> {
        caller.require_staff("mark referral rewards as paid")?;
        if reward_ids.is_empty() {
            return Err(AppError::validation(ValidationError::MissingField {
                field: "reward_ids".to_string(),
            }));
        }

        let updated = self.store.mark_rewards_paid(reward_ids, Utc::now()).await?;
        info!(
            staff_id = caller.user_id,
            requested = reward_ids.len(),
            updated,
            "referral rewards marked as paid"
        );
        Ok(updated)
    }

    pub async fn rewards(&self, user_id: UserId) -> AppResult<Vec<ReferralReward>> {
        Ok(self.store.rewards_for_user(user_id).await?)
    }
}

fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

fn sum_rewards<'a>(mut rewards: impl Iterator<Item = &'a ReferralReward>) -> AppResult<Decimal> {
    rewards.try_fold(Decimal::ZERO, |acc, reward| {
        acc.checked_add(reward.amount).ok_or_else(|| {
            AppError::validation(ValidationError::InvalidAmount {
                amount: reward.amount.to_string(),
                reason: "referral earnings overflow".to_string(),
            })
        })
    })
}
