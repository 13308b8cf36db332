//! Payment ledger: entities and the state machine that governs them

pub mod models;
pub mod state_machine;

pub use models::{
    NewPayment, NewRefund, Payment, PaymentStatus, PollId, ReferralReward, ReferralStats, Refund,
    RefundReason, RefundStatus, UserId, VoteGrant, MAX_VOTES_PER_PAYMENT, MIN_VOTES_PER_PAYMENT,
};
pub use state_machine::{
    apply_refund, apply_verification_result, can_transition, ensure_minor_unit_precision,
    remaining_refundable, validate_refund_amount, LedgerError, RefundTransition, Transition,
    MONEY_SCALE,
};
