#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use votepay_backend::config::ReconciliationConfig;
use votepay_backend::health::HealthChecker;
use votepay_backend::ledger::{Payment, PollId, UserId};
use votepay_backend::payments::providers::paystack::{PaystackConfig, PaystackProvider};
use votepay_backend::payments::utils::sign_hmac_sha512_hex;
use votepay_backend::payments::{
    InitializeTransaction, InitializedTransaction, PaymentError, PaymentGateway,
    PaymentGatewayFactory, PaymentResult, ProviderName, ProviderOutcome, RefundIssued,
    VerificationResult, WebhookEvent,
};
use votepay_backend::services::{Caller, InitializePaymentRequest, Services};
use votepay_backend::store::{
    InMemoryAccountDirectory, InMemoryLedgerStore, LedgerStore, PollPricing, UserAccount,
};
use votepay_backend::workers::reconciliation_retry::{RetryJob, RetryPolicy};

pub const WEBHOOK_SECRET: &str = "whsec_test_votepay";
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

pub const PAYER: UserId = 1;
pub const REFERRER: UserId = 2;
pub const STAFF: UserId = 99;
pub const REFERRER_CODE: &str = "REF002";
pub const PAYER_CODE: &str = "PAY001";

/// Paid poll at 50.00 NGN per vote.
pub const PAID_POLL: PollId = 7;
pub const CLOSED_POLL: PollId = 8;
pub const FREE_POLL: PollId = 9;
/// Priced at 0.125 per vote, so only even vote counts land on whole kobo.
pub const FRACTIONAL_POLL: PollId = 10;

pub fn dec(value: &str) -> Decimal {
    value.parse().expect("valid decimal literal")
}

/// Gateway double: webhook authentication and parsing go through the real
/// Paystack adapter, provider API calls are scripted.
pub struct ScriptedGateway {
    paystack: PaystackProvider,
    amounts: Mutex<HashMap<String, Decimal>>,
    verify_script: Mutex<VecDeque<PaymentResult<ProviderOutcome>>>,
    reported_amount: Mutex<Option<Decimal>>,
    fail_initialize: AtomicBool,
    fail_refunds: AtomicBool,
    hold_refunds: AtomicBool,
    /// Signalled when a held refund call reaches the provider.
    pub refund_started: Notify,
    refund_release: Notify,
    pub verify_calls: AtomicUsize,
    pub refund_calls: Mutex<Vec<(String, Option<i64>)>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        let paystack = PaystackProvider::new(PaystackConfig {
            secret_key: "sk_test_votepay".to_string(),
            webhook_secret: Some(WEBHOOK_SECRET.to_string()),
            ..PaystackConfig::default()
        })
        .expect("paystack adapter builds");

        Self {
            paystack,
            amounts: Mutex::new(HashMap::new()),
            verify_script: Mutex::new(VecDeque::new()),
            reported_amount: Mutex::new(None),
            fail_initialize: AtomicBool::new(false),
            fail_refunds: AtomicBool::new(false),
            hold_refunds: AtomicBool::new(false),
            refund_started: Notify::new(),
            refund_release: Notify::new(),
            verify_calls: AtomicUsize::new(0),
            refund_calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue verification answers; once drained, verification reports success.
    pub fn script_verify(&self, outcomes: Vec<PaymentResult<ProviderOutcome>>) {
        self.verify_script.lock().unwrap().extend(outcomes);
    }

    /// Overrides the amount reported by verification.
    pub fn report_amount(&self, amount: Decimal) {
        *self.reported_amount.lock().unwrap() = Some(amount);
    }

    pub fn fail_initialize(&self, fail: bool) {
        self.fail_initialize.store(fail, Ordering::SeqCst);
    }

    pub fn fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }

    /// Park refund calls until [`ScriptedGateway::release_refund`].
    pub fn hold_refunds(&self, hold: bool) {
        self.hold_refunds.store(hold, Ordering::SeqCst);
    }

    pub fn release_refund(&self) {
        self.refund_release.notify_one();
    }

    pub fn verify_count(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }
}

pub fn provider_unavailable() -> PaymentError {
    PaymentError::NetworkError {
        message: "connection reset by peer".to_string(),
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn initialize_transaction(
        &self,
        request: InitializeTransaction,
    ) -> PaymentResult<InitializedTransaction> {
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(PaymentError::ProviderError {
                provider: "paystack".to_string(),
                message: "Invalid key".to_string(),
                provider_code: None,
                retryable: false,
            });
        }
        let reference = request.reference.unwrap_or_else(|| Uuid::new_v4().to_string());
        self.amounts
            .lock()
            .unwrap()
            .insert(reference.clone(), request.amount);
        Ok(InitializedTransaction {
            external_reference: reference.clone(),
            redirect_url: format!("https://checkout.paystack.com/{}", reference),
            provider_data: json!({"access_code": "ac_test"}),
        })
    }

    async fn verify_transaction(&self, external_reference: &str) -> PaymentResult<VerificationResult> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .verify_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(ProviderOutcome::Success))?;
        let reported = *self.reported_amount.lock().unwrap();
        let amount =
            reported.or_else(|| self.amounts.lock().unwrap().get(external_reference).copied());
        Ok(VerificationResult {
            provider: ProviderName::Paystack,
            reference: external_reference.to_string(),
            outcome,
            amount,
            currency: Some("NGN".to_string()),
            transaction_id: Some("4099260516".to_string()),
            gateway_response: Some("Approved".to_string()),
            raw: json!({"id": 4099260516u64, "reference": external_reference}),
        })
    }

    async fn issue_refund(
        &self,
        external_transaction_id: &str,
        amount_minor_units: Option<i64>,
    ) -> PaymentResult<RefundIssued> {
        self.refund_calls
            .lock()
            .unwrap()
            .push((external_transaction_id.to_string(), amount_minor_units));
        if self.hold_refunds.load(Ordering::SeqCst) {
            self.refund_started.notify_one();
            self.refund_release.notified().await;
        }
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(PaymentError::ProviderError {
                provider: "paystack".to_string(),
                message: "Transaction has been fully reversed".to_string(),
                provider_code: None,
                retryable: false,
            });
        }
        Ok(RefundIssued {
            external_refund_reference: format!("rf_{}", Uuid::new_v4().simple()),
            status: "pending".to_string(),
            provider_data: json!({"transaction": external_transaction_id}),
        })
    }

    fn name(&self) -> ProviderName {
        ProviderName::Paystack
    }

    fn signature_header(&self) -> &'static str {
        self.paystack.signature_header()
    }

    fn verify_signature(&self, raw_body: &[u8], signature: &str) -> bool {
        self.paystack.verify_signature(raw_body, signature)
    }

    fn parse_webhook_event(&self, raw_body: &[u8]) -> PaymentResult<WebhookEvent> {
        self.paystack.parse_webhook_event(raw_body)
    }
}

pub struct TestApp {
    pub services: Services,
    pub store: Arc<InMemoryLedgerStore>,
    pub directory: Arc<InMemoryAccountDirectory>,
    pub gateway: Arc<ScriptedGateway>,
    pub gateways: Arc<PaymentGatewayFactory>,
    pub retry_rx: mpsc::Receiver<RetryJob>,
}

pub fn test_config() -> ReconciliationConfig {
    ReconciliationConfig {
        lock_timeout: Duration::from_secs(2),
        retry: fast_retry_policy(3),
        ..ReconciliationConfig::default()
    }
}

pub fn fast_retry_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    }
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: ReconciliationConfig) -> Self {
        let store = Arc::new(InMemoryLedgerStore::new());
        let directory = Arc::new(InMemoryAccountDirectory::new());
        seed_directory(&directory).await;

        let gateway = Arc::new(ScriptedGateway::new());
        let gateways = Arc::new(
            PaymentGatewayFactory::new(ProviderName::Paystack).with_gateway(gateway.clone()),
        );

        let (services, retry_rx) = Services::build(
            store.clone(),
            directory.clone(),
            gateways.clone(),
            &config,
            Some("https://votepay.test/payments/callback".to_string()),
        );

        Self {
            services,
            store,
            directory,
            gateway,
            gateways,
            retry_rx,
        }
    }

    pub fn health(&self) -> HealthChecker {
        let store: Arc<dyn LedgerStore> = self.store.clone();
        HealthChecker::new(store, self.gateways.clone())
    }

    /// Initialize a payment on the paid poll and return it as stored.
    pub async fn initialize(&self, votes: i32, referral_code: Option<&str>) -> Payment {
        let initialized = self
            .services
            .payments
            .initialize_payment(
                &Caller::user(PAYER),
                InitializePaymentRequest {
                    poll_id: PAID_POLL,
                    votes_count: votes,
                    referral_code: referral_code.map(str::to_string),
                    provider: None,
                },
            )
            .await
            .expect("payment initializes");
        self.payment(initialized.payment_id).await
    }

    /// Initialize and complete a payment through a verification call.
    pub async fn completed_payment(&self, votes: i32, referral_code: Option<&str>) -> Payment {
        let payment = self.initialize(votes, referral_code).await;
        self.services
            .engine
            .verify_payment(payment.id)
            .await
            .expect("verification succeeds");
        self.payment(payment.id).await
    }

    pub async fn payment(&self, id: Uuid) -> Payment {
        self.store
            .get_payment(id)
            .await
            .expect("store read")
            .expect("payment exists")
    }
}

async fn seed_directory(directory: &InMemoryAccountDirectory) {
    for (id, email, is_staff, code) in [
        (PAYER, "payer@votepay.test", false, Some(PAYER_CODE)),
        (REFERRER, "referrer@votepay.test", false, Some(REFERRER_CODE)),
        (STAFF, "ops@votepay.test", true, None),
    ] {
        directory
            .insert_user(UserAccount {
                id,
                email: email.to_string(),
                is_staff,
                referral_code: code.map(str::to_string),
            })
            .await;
    }

    for (id, is_active, is_paid, price) in [
        (PAID_POLL, true, true, "50.00"),
        (CLOSED_POLL, false, true, "50.00"),
        (FREE_POLL, true, false, "0"),
        (FRACTIONAL_POLL, true, true, "0.125"),
    ] {
        directory
            .insert_poll(PollPricing {
                id,
                is_active,
                is_paid,
                vote_price: dec(price),
                currency: "NGN".to_string(),
            })
            .await;
    }
}

/// Paystack-shaped charge event body.
pub fn charge_event(event: &str, reference: &str, amount_minor: i64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "event": event,
        "data": {
            "id": 4099260516u64,
            "reference": reference,
            "amount": amount_minor,
            "currency": "NGN",
            "status": if event == "charge.success" { "success" } else { "failed" },
        }
    }))
    .expect("serializable event")
}

pub fn sign(body: &[u8]) -> String {
    sign_hmac_sha512_hex(body, WEBHOOK_SECRET)
}
