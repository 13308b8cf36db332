use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Provider request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Webhook verification failed: {message}")]
    WebhookVerificationError { message: String },

    #[error("Malformed provider response: provider={provider}, message={message}")]
    MalformedResponse { provider: String, message: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::Timeout { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::WebhookVerificationError { .. } => false,
            PaymentError::MalformedResponse { .. } => false,
            PaymentError::ProviderError { retryable, .. } => *retryable,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::Timeout { .. } => 504,
            PaymentError::RateLimitError { .. } => 429,
            PaymentError::WebhookVerificationError { .. } => 401,
            PaymentError::MalformedResponse { .. } => 502,
            PaymentError::ProviderError { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::NetworkError { .. } | PaymentError::Timeout { .. } => {
                "Payment provider is temporarily unavailable".to_string()
            }
            PaymentError::RateLimitError { .. } => {
                "Too many requests to payment provider. Please retry shortly".to_string()
            }
            PaymentError::WebhookVerificationError { .. } => {
                "Invalid webhook signature".to_string()
            }
            PaymentError::MalformedResponse { .. } | PaymentError::ProviderError { .. } => {
                "Payment provider returned an error".to_string()
            }
        }
    }

    pub(crate) fn provider_rejected(provider: &str, message: impl Into<String>) -> Self {
        PaymentError::ProviderError {
            provider: provider.to_string(),
            message: message.into(),
            provider_code: None,
            retryable: false,
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};

        match err {
            PaymentError::ValidationError { message, field } => {
                AppError::validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "payment".to_string()),
                    reason: message,
                })
            }
            PaymentError::Timeout { timeout_secs } => {
                AppError::new(AppErrorKind::External(ExternalError::Timeout {
                    service: "payment provider".to_string(),
                    timeout_secs,
                }))
            }
            PaymentError::WebhookVerificationError { .. } => {
                AppError::new(AppErrorKind::External(ExternalError::InvalidSignature {
                    provider: "payments".to_string(),
                }))
            }
            other => {
                let provider = match &other {
                    PaymentError::ProviderError { provider, .. }
                    | PaymentError::MalformedResponse { provider, .. } => provider.clone(),
                    _ => "payments".to_string(),
                };
                AppError::new(AppErrorKind::External(ExternalError::PaymentProvider {
                    provider,
                    message: other.to_string(),
                    is_retryable: other.is_retryable(),
                }))
            }
        }
    }
}
