use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::{
    FlutterwaveConfig, FlutterwaveProvider, PaystackConfig, PaystackProvider,
};
use crate::payments::types::ProviderName;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct PaymentFactoryConfig {
    pub default_provider: ProviderName,
    pub enabled_providers: Vec<ProviderName>,
    pub paystack: Option<PaystackConfig>,
    pub flutterwave: Option<FlutterwaveConfig>,
}

impl PaymentFactoryConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let default_provider =
            std::env::var("DEFAULT_PAYMENT_PROVIDER").unwrap_or_else(|_| "paystack".to_string());
        let default_provider = ProviderName::from_str(&default_provider)?;

        let enabled_raw =
            std::env::var("ENABLED_PAYMENT_PROVIDERS").unwrap_or_else(|_| "paystack".to_string());
        let mut enabled_providers = Vec::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            let provider = ProviderName::from_str(value)?;
            if !enabled_providers.contains(&provider) {
                enabled_providers.push(provider);
            }
        }

        let paystack = if enabled_providers.contains(&ProviderName::Paystack) {
            Some(PaystackConfig::from_env()?)
        } else {
            None
        };
        let flutterwave = if enabled_providers.contains(&ProviderName::Flutterwave) {
            Some(FlutterwaveConfig::from_env()?)
        } else {
            None
        };

        let config = Self {
            default_provider,
            enabled_providers,
            paystack,
            flutterwave,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PaymentResult<()> {
        if !self.enabled_providers.contains(&self.default_provider) {
            return Err(PaymentError::ValidationError {
                message: "default provider must be enabled".to_string(),
                field: Some("DEFAULT_PAYMENT_PROVIDER".to_string()),
            });
        }
        Ok(())
    }
}

/// Registry of live gateways, built once at startup and shared by `Arc`.
pub struct PaymentGatewayFactory {
    default_provider: ProviderName,
    gateways: HashMap<ProviderName, Arc<dyn PaymentGateway>>,
}

impl PaymentGatewayFactory {
    pub fn new(default_provider: ProviderName) -> Self {
        Self {
            default_provider,
            gateways: HashMap::new(),
        }
    }

    pub fn from_config(config: &PaymentFactoryConfig) -> PaymentResult<Self> {
        config.validate()?;
        let mut factory = Self::new(config.default_provider);

        for provider in &config.enabled_providers {
            let gateway: Arc<dyn PaymentGateway> = match provider {
                ProviderName::Paystack => {
                    let cfg = config.paystack.clone().ok_or(PaymentError::ValidationError {
                        message: "paystack is enabled but not configured".to_string(),
                        field: Some("PAYSTACK_SECRET_KEY".to_string()),
                    })?;
                    Arc::new(PaystackProvider::new(cfg)?)
                }
                ProviderName::Flutterwave => {
                    let cfg = config
                        .flutterwave
                        .clone()
                        .ok_or(PaymentError::ValidationError {
                            message: "flutterwave is enabled but not configured".to_string(),
                            field: Some("FLUTTERWAVE_SECRET_KEY".to_string()),
                        })?;
                    Arc::new(FlutterwaveProvider::new(cfg)?)
                }
            };
            factory = factory.with_gateway(gateway);
        }

        info!(
            providers = ?factory.list_available_providers(),
            default = %factory.default_provider,
            "payment gateways registered"
        );
        Ok(factory)
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.name(), gateway);
        self
    }

    pub fn get(&self, provider: ProviderName) -> PaymentResult<Arc<dyn PaymentGateway>> {
        self.gateways
            .get(&provider)
            .cloned()
            .ok_or(PaymentError::ValidationError {
                message: format!("provider {} is disabled", provider),
                field: Some("provider".to_string()),
            })
    }

    pub fn default_provider(&self) -> ProviderName {
        self.default_provider
    }

    pub fn get_default(&self) -> PaymentResult<Arc<dyn PaymentGateway>> {
        self.get(self.default_provider)
    }

    pub fn list_available_providers(&self) -> Vec<ProviderName> {
        let mut providers: Vec<ProviderName> = self.gateways.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());
        providers
    }
}
