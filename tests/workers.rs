mod common;

use std::time::Duration;

use chrono::Utc;
use common::*;
use tokio::sync::watch;
use votepay_backend::ledger::PaymentStatus;
use votepay_backend::error::ErrorCode;
use votepay_backend::payments::{PaymentError, ProviderName, ProviderOutcome};
use votepay_backend::services::ReconcileOutcome;
use votepay_backend::store::LedgerStore;
use votepay_backend::workers::{
    PendingPaymentSweeper, PendingSweeperConfig, ReconciliationRetryWorker, RetryJob,
    RetryPolicy, RetryResolution,
};

fn worker(app: &TestApp, max_attempts: u32) -> ReconciliationRetryWorker {
    ReconciliationRetryWorker::new(app.services.engine.clone(), fast_retry_policy(max_attempts))
}

fn sweeper(app: &TestApp) -> PendingPaymentSweeper {
    PendingPaymentSweeper::new(
        app.services.store.clone(),
        app.services.retry_queue.clone(),
        PendingSweeperConfig {
            interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(15 * 60),
            batch_size: 10,
        },
    )
}

#[tokio::test]
async fn retry_settles_payment_after_transient_failures() {
    let app = TestApp::new().await;
    let payment = app.initialize(2, Some(REFERRER_CODE)).await;
    app.gateway
        .script_verify(vec![Err(provider_unavailable()), Err(provider_unavailable())]);

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let job = RetryJob::new(payment.provider_reference.clone().unwrap(), ProviderName::Paystack);
    let resolution = worker(&app, 3).process(job, shutdown_rx).await;

    match resolution {
        RetryResolution::Settled(ReconcileOutcome::Completed(completed)) => {
            assert_eq!(completed.id, payment.id);
        }
        other => panic!("unexpected resolution: {:?}", other),
    }
    assert_eq!(app.gateway.verify_count(), 3);
    assert_eq!(app.payment(payment.id).await.status, PaymentStatus::Completed);
    assert!(app
        .store
        .reward_for_payment(payment.id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn retry_gives_up_after_max_attempts() {
    let app = TestApp::new().await;
    let payment = app.initialize(1, None).await;
    app.gateway.script_verify(vec![
        Ok(ProviderOutcome::Pending),
        Err(provider_unavailable()),
        Ok(ProviderOutcome::Pending),
    ]);

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let job = RetryJob::new(payment.provider_reference.clone().unwrap(), ProviderName::Paystack);
    let resolution = worker(&app, 3).process(job, shutdown_rx).await;

    assert_eq!(resolution, RetryResolution::Exhausted { attempts: 3 });
    assert_eq!(app.gateway.verify_count(), 3);
    assert_eq!(app.payment(payment.id).await.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn retry_skips_payments_settled_in_the_meantime() {
    let app = TestApp::new().await;
    let payment = app.completed_payment(1, None).await;
    let verified = app.gateway.verify_count();

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let job = RetryJob::new(payment.provider_reference.clone().unwrap(), ProviderName::Paystack);
    let resolution = worker(&app, 3).process(job, shutdown_rx).await;

    assert!(matches!(
        resolution,
        RetryResolution::Settled(ReconcileOutcome::AlreadyApplied(_))
    ));
    assert_eq!(app.gateway.verify_count(), verified);
}

#[tokio::test]
async fn retry_abandons_unknown_references_and_hard_errors() {
    let app = TestApp::new().await;

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let resolution = worker(&app, 3)
        .process(
            RetryJob::new("never-issued", ProviderName::Paystack),
            shutdown_rx.clone(),
        )
        .await;
    assert!(matches!(resolution, RetryResolution::Abandoned { .. }));

    let payment = app.initialize(1, None).await;
    app.gateway.script_verify(vec![Err(PaymentError::MalformedResponse {
        provider: "paystack".to_string(),
        message: "missing data".to_string(),
    })]);
    let resolution = worker(&app, 3)
        .process(
            RetryJob::new(payment.provider_reference.clone().unwrap(), ProviderName::Paystack),
            shutdown_rx,
        )
        .await;
    assert!(matches!(resolution, RetryResolution::Abandoned { .. }));
    assert_eq!(app.gateway.verify_count(), 1);

    let stored = app.payment(payment.id).await;
    assert_eq!(stored.status, PaymentStatus::Pending);
    assert!(stored.needs_review_at.is_some());
}

#[tokio::test]
async fn exhausted_payment_is_not_swept_again() {
    let mut app = TestApp::new().await;
    let payment = app.initialize(1, None).await;
    app.gateway.script_verify(vec![
        Ok(ProviderOutcome::Pending),
        Ok(ProviderOutcome::Pending),
        Ok(ProviderOutcome::Pending),
    ]);

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let job = RetryJob::new(payment.provider_reference.clone().unwrap(), ProviderName::Paystack);
    let resolution = worker(&app, 3).process(job, shutdown_rx).await;
    assert_eq!(resolution, RetryResolution::Exhausted { attempts: 3 });

    let flagged = app.payment(payment.id).await;
    assert_eq!(flagged.status, PaymentStatus::Pending);
    assert!(flagged.needs_review_at.is_some());
    assert!(flagged
        .review_reason
        .as_deref()
        .unwrap_or_default()
        .contains("exhausted"));

    let an_hour_ago = Utc::now() - chrono::Duration::hours(1);
    app.store.touch_payment(payment.id, an_hour_ago).await.unwrap();
    assert_eq!(sweeper(&app).sweep_once().await.unwrap(), 0);
    assert!(app.retry_rx.try_recv().is_err());

    // An operator-triggered verification still settles it and clears the flag.
    let outcome = app.services.engine.verify_payment(payment.id).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Completed(_)));
    let settled = app.payment(payment.id).await;
    assert_eq!(settled.status, PaymentStatus::Completed);
    assert!(settled.needs_review_at.is_none());
    assert!(settled.review_reason.is_none());
}

#[tokio::test]
async fn amount_mismatch_is_held_for_review_instead_of_swept() {
    let mut app = TestApp::new().await;
    let payment = app.initialize(2, None).await;
    app.gateway.report_amount(dec("1.00"));

    let err = app
        .services
        .engine
        .verify_payment(payment.id)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::AmountMismatch);

    let held = app.payment(payment.id).await;
    assert_eq!(held.status, PaymentStatus::Pending);
    assert!(held.needs_review_at.is_some());
    assert!(held.review_reason.as_deref().unwrap_or_default().contains("1.00"));

    let an_hour_ago = Utc::now() - chrono::Duration::hours(1);
    app.store.touch_payment(payment.id, an_hour_ago).await.unwrap();
    assert_eq!(sweeper(&app).sweep_once().await.unwrap(), 0);
    assert!(app.retry_rx.try_recv().is_err());
}

#[tokio::test]
async fn retry_stops_on_shutdown() {
    let app = TestApp::new().await;
    let payment = app.initialize(1, None).await;
    let slow = ReconciliationRetryWorker::new(
        app.services.engine.clone(),
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(60),
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let job = RetryJob::new(payment.provider_reference.clone().unwrap(), ProviderName::Paystack);
    let handle = tokio::spawn(async move { slow.process(job, shutdown_rx).await });
    shutdown_tx.send(true).unwrap();

    let resolution = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker honours shutdown")
        .unwrap();
    assert_eq!(resolution, RetryResolution::Cancelled);
    assert_eq!(app.gateway.verify_count(), 0);
}

#[tokio::test]
async fn queued_job_is_settled_by_running_worker() {
    let mut app = TestApp::new().await;
    let payment = app.initialize(1, None).await;
    let reference = payment.provider_reference.clone().unwrap();
    let retry_rx = std::mem::replace(&mut app.retry_rx, tokio::sync::mpsc::channel(1).1);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(worker(&app, 3).run(retry_rx, shutdown_rx));

    assert!(app
        .services
        .retry_queue
        .enqueue(RetryJob::new(reference.clone(), ProviderName::Paystack)));

    let mut settled = false;
    for _ in 0..100 {
        if app.payment(payment.id).await.status == PaymentStatus::Completed {
            settled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(settled, "retry worker did not settle the payment");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker stops")
        .unwrap();
}

#[tokio::test]
async fn sweeper_queues_only_stale_pending_payments() {
    let mut app = TestApp::new().await;
    let stale = app.initialize(1, None).await;
    let _fresh = app.initialize(1, None).await;
    let settled = app.completed_payment(1, None).await;

    let an_hour_ago = Utc::now() - chrono::Duration::hours(1);
    app.store.touch_payment(stale.id, an_hour_ago).await.unwrap();
    app.store.touch_payment(settled.id, an_hour_ago).await.unwrap();

    assert_eq!(sweeper(&app).sweep_once().await.unwrap(), 1);

    let job = app.retry_rx.try_recv().expect("stale payment queued");
    assert_eq!(Some(job.reference), stale.provider_reference);
    assert_eq!(job.provider, ProviderName::Paystack);
    assert!(app.retry_rx.try_recv().is_err());
}

#[tokio::test]
async fn sweeper_stops_on_shutdown() {
    let app = TestApp::new().await;
    let sweeper = PendingPaymentSweeper::new(
        app.services.store.clone(),
        app.services.retry_queue.clone(),
        PendingSweeperConfig::default(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(sweeper.run(shutdown_rx));
    shutdown_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("sweeper stops")
        .unwrap();
}
