//! Provider gateway: adapters over the payment providers' HTTP APIs.

pub mod error;
pub mod factory;
pub mod provider;
pub mod providers;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use factory::{PaymentFactoryConfig, PaymentGatewayFactory};
pub use provider::PaymentGateway;
pub use types::{
    InitializeTransaction, InitializedTransaction, ProviderName, ProviderOutcome, RefundIssued,
    VerificationResult, WebhookEvent, WebhookEventKind,
};
