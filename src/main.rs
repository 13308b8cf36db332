use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use votepay_backend::api::{self, AppState};
use votepay_backend::config::AppConfig;
use votepay_backend::health::HealthChecker;
use votepay_backend::logging::init_tracing;
use votepay_backend::payments::PaymentGatewayFactory;
use votepay_backend::services::Services;
use votepay_backend::store::{
    AccountDirectory, InMemoryAccountDirectory, InMemoryLedgerStore, LedgerStore,
};
use votepay_backend::workers::{PendingPaymentSweeper, ReconciliationRetryWorker};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[cfg(feature = "database")]
async fn build_stores(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn LedgerStore>, Arc<dyn AccountDirectory>)> {
    use votepay_backend::store::{init_pool_from_config, PgAccountDirectory, PgLedgerStore};

    match &config.database.url {
        Some(url) => {
            info!("Initializing database connection pool");
            let pool = init_pool_from_config(&config.database, url)
                .await
                .map_err(|e| anyhow::anyhow!("database pool: {}", e))?;
            info!(
                max_connections = pool.options().get_max_connections(),
                "Database connection pool initialized"
            );
            Ok((
                Arc::new(PgLedgerStore::new(
                    pool.clone(),
                    config.reconciliation.lock_timeout,
                )),
                Arc::new(PgAccountDirectory::new(pool)),
            ))
        }
        None => Ok(in_memory_stores()),
    }
}

#[cfg(not(feature = "database"))]
async fn build_stores(
    _config: &AppConfig,
) -> anyhow::Result<(Arc<dyn LedgerStore>, Arc<dyn AccountDirectory>)> {
    Ok(in_memory_stores())
}

fn in_memory_stores() -> (Arc<dyn LedgerStore>, Arc<dyn AccountDirectory>) {
    warn!("DATABASE_URL not set, using the in-memory ledger store; data is lost on restart");
    (
        Arc::new(InMemoryLedgerStore::new()),
        Arc::new(InMemoryAccountDirectory::new()),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting votepay backend service"
    );

    let (store, directory) = build_stores(&config).await?;
    let gateways = Arc::new(PaymentGatewayFactory::from_config(&config.payments.providers)?);
    info!(
        providers = ?gateways.list_available_providers(),
        default_provider = %gateways.default_provider(),
        "Payment gateways configured"
    );

    let (services, retry_rx) = Services::build(
        store.clone(),
        directory,
        gateways.clone(),
        &config.reconciliation,
        config.payments.callback_url.clone(),
    );

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);

    let retry_worker =
        ReconciliationRetryWorker::new(services.engine.clone(), config.reconciliation.retry);
    let retry_handle = tokio::spawn(retry_worker.run(retry_rx, worker_shutdown_rx.clone()));

    let sweeper = PendingPaymentSweeper::new(
        store.clone(),
        services.retry_queue.clone(),
        config.reconciliation.sweeper.clone(),
    );
    let sweeper_handle = tokio::spawn(sweeper.run(worker_shutdown_rx));

    let app = api::router(AppState {
        services,
        health: HealthChecker::new(store, gateways),
    });

    let addr: SocketAddr = config.server.bind_address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    for (name, handle) in [("retry", retry_handle), ("sweeper", sweeper_handle)] {
        if tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .is_err()
        {
            error!(worker = name, "Timed out waiting for worker shutdown");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
