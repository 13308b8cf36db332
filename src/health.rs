//! Health check module
//! Reports the ledger store and the configured payment providers

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

use crate::payments::PaymentGatewayFactory;
use crate::store::LedgerStore;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub providers: Vec<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            providers: Vec::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn LedgerStore>,
    gateways: Arc<PaymentGatewayFactory>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn LedgerStore>, gateways: Arc<PaymentGatewayFactory>) -> Self {
        Self { store, gateways }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        health_status.providers = self
            .gateways
            .list_available_providers()
            .iter()
            .map(|p| p.to_string())
            .collect();

        let start = Instant::now();
        let store_health = match timeout(Duration::from_secs(5), self.store.health_check()).await {
            Ok(Ok(())) => {
                let elapsed = start.elapsed().as_millis();
                info!("Ledger store health check: OK ({}ms)", elapsed);
                ComponentHealth::up(Some(elapsed))
            }
            Ok(Err(e)) => {
                error!("Ledger store health check failed: {}", e);
                ComponentHealth::down(Some(e.to_string()))
            }
            Err(_) => {
                error!("Ledger store health check timed out");
                ComponentHealth::down(Some("Timeout".to_string()))
            }
        };

        if store_health.status == ComponentState::Down {
            health_status.status = HealthState::Unhealthy;
        }
        health_status
            .checks
            .insert("ledger_store".to_string(), store_health);

        health_status
    }
}
