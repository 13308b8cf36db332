//! Unified error handling for the votepay backend
//!
//! Every failure that can reach an API caller is expressed as an [`AppError`]
//! with an HTTP status, a machine-readable [`ErrorCode`], a user-facing message
//! and a retryability flag.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Domain errors (4xx)
    PaymentNotFound,
    RefundNotFound,
    PollNotFound,
    UserNotFound,
    InvalidRefundAmount,
    InvalidStateTransition,
    AmountMismatch,
    DuplicateReference,
    Forbidden,

    // Infrastructure errors (5xx)
    DatabaseError,
    LockTimeout,
    ConfigurationError,

    // External errors (401, 502, 504)
    PaymentProviderError,
    InvalidSignature,
    ExternalServiceTimeout,

    // Generic
    InternalError,
    ValidationError,
}

/// Business-rule errors raised by the ledger and the reconciliation engine
#[derive(Debug, Clone)]
pub enum DomainError {
    PaymentNotFound { reference: String },
    RefundNotFound { refund_id: String },
    PollNotFound { poll_id: i64 },
    UserNotFound { user_id: i64 },
    /// Refund would push the completed refund total above the payment amount
    InvalidRefundAmount { requested: String, remaining: String },
    /// The reported outcome contradicts the state the payment already reached
    InvalidTransition {
        payment_id: String,
        from: String,
        to: String,
    },
    /// Provider confirmed a different amount than the one we charged for
    AmountMismatch {
        payment_id: String,
        expected: String,
        reported: String,
    },
    DuplicateReference { reference: String },
    Forbidden { action: String },
}

/// Infrastructure-level errors (database, locks, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    /// The per-payment lock could not be acquired in time
    LockTimeout { payment_id: String, waited_ms: u64 },
    Configuration { message: String },
}

/// External service errors (payment providers, webhook authenticity)
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    InvalidSignature { provider: String },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors, always raised before any mutation
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidAmount { amount: String, reason: String },
    MissingField { field: String },
    OutOfRange {
        field: String,
        min: Option<String>,
        max: Option<String>,
    },
    InvalidField { field: String, reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    pub fn forbidden(action: impl Into<String>) -> Self {
        Self::domain(DomainError::Forbidden {
            action: action.into(),
        })
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => 404,
                DomainError::RefundNotFound { .. } => 404,
                DomainError::PollNotFound { .. } => 404,
                DomainError::UserNotFound { .. } => 404,
                DomainError::InvalidRefundAmount { .. } => 409,
                DomainError::InvalidTransition { .. } => 409,
                DomainError::AmountMismatch { .. } => 409,
                DomainError::DuplicateReference { .. } => 409,
                DomainError::Forbidden { .. } => 403,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => 500,
                InfrastructureError::LockTimeout { .. } => 503,
                InfrastructureError::Configuration { .. } => 500,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502,
                ExternalError::InvalidSignature { .. } => 401,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::RefundNotFound { .. } => ErrorCode::RefundNotFound,
                DomainError::PollNotFound { .. } => ErrorCode::PollNotFound,
                DomainError::UserNotFound { .. } => ErrorCode::UserNotFound,
                DomainError::InvalidRefundAmount { .. } => ErrorCode::InvalidRefundAmount,
                DomainError::InvalidTransition { .. } => ErrorCode::InvalidStateTransition,
                DomainError::AmountMismatch { .. } => ErrorCode::AmountMismatch,
                DomainError::DuplicateReference { .. } => ErrorCode::DuplicateReference,
                DomainError::Forbidden { .. } => ErrorCode::Forbidden,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::LockTimeout { .. } => ErrorCode::LockTimeout,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::InvalidSignature { .. } => ErrorCode::InvalidSignature,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { reference } => {
                    format!("Payment '{}' not found", reference)
                }
                DomainError::RefundNotFound { refund_id } => {
                    format!("Refund '{}' not found", refund_id)
                }
                DomainError::PollNotFound { poll_id } => {
                    format!("Poll {} not found or inactive", poll_id)
                }
                DomainError::UserNotFound { user_id } => format!("User {} not found", user_id),
                DomainError::InvalidRefundAmount {
                    requested,
                    remaining,
                } => format!(
                    "Refund amount {} exceeds the refundable balance of {}",
                    requested, remaining
                ),
                DomainError::InvalidTransition {
                    payment_id,
                    from,
                    to,
                } => format!(
                    "Payment '{}' cannot move from {} to {}",
                    payment_id, from, to
                ),
                DomainError::AmountMismatch {
                    payment_id,
                    expected,
                    reported,
                } => format!(
                    "Payment '{}' expected {} but the provider reported {}",
                    payment_id, expected, reported
                ),
                DomainError::DuplicateReference { reference } => {
                    format!("Provider reference '{}' is already in use", reference)
                }
                DomainError::Forbidden { action } => {
                    format!("You are not allowed to {}", action)
                }
            },
            AppErrorKind::Infrastructure(InfrastructureError::LockTimeout { .. }) => {
                "Payment is busy being processed. Please try again shortly".to_string()
            }
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::InvalidSignature { .. } => "Invalid webhook signature".to_string(),
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::OutOfRange { field, min, max } => match (min, max) {
                    (Some(min), Some(max)) => {
                        format!("Field '{}' must be between {} and {}", field, min, max)
                    }
                    (Some(min), None) => format!("Field '{}' must be at least {}", field, min),
                    (None, Some(max)) => format!("Field '{}' must be at most {}", field, max),
                    (None, None) => format!("Field '{}' is out of acceptable range", field),
                },
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::LockTimeout { .. } => true,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::InvalidSignature { .. } => false,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self.kind,
            AppErrorKind::Domain(
                DomainError::PaymentNotFound { .. }
                    | DomainError::RefundNotFound { .. }
                    | DomainError::PollNotFound { .. }
                    | DomainError::UserNotFound { .. }
            )
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{} ({})", self.user_message(), context),
            None => write!(f, "{}", self.user_message()),
        }
    }
}

impl std::error::Error for AppError {}

// From<StoreError> lives in store/error.rs, From<PaymentError> in payments/error.rs

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
