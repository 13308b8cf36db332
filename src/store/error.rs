use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreErrorKind {
    NotFound { entity: String, id: String },
    UniqueViolation { constraint: String },
    /// Row lock not granted before `lock_timeout` elapsed.
    LockNotAvailable,
    Connection { message: String },
    Unknown { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreError {
    pub kind: StoreErrorKind,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::new(StoreErrorKind::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            StoreErrorKind::LockNotAvailable | StoreErrorKind::Connection { .. }
        )
    }

    #[cfg(feature = "database")]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::new(StoreErrorKind::NotFound {
                entity: "row".to_string(),
                id: "unknown".to_string(),
            }),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some("23505") => Self::new(StoreErrorKind::UniqueViolation {
                    constraint: db.constraint().unwrap_or("unknown").to_string(),
                }),
                // lock_not_available
                Some("55P03") => Self::new(StoreErrorKind::LockNotAvailable),
                _ => Self::new(StoreErrorKind::Unknown {
                    message: db.message().to_string(),
                }),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::new(StoreErrorKind::Connection {
                    message: err.to_string(),
                })
            }
            _ => Self::new(StoreErrorKind::Unknown {
                message: err.to_string(),
            }),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StoreErrorKind::NotFound { entity, id } => write!(f, "{} not found: {}", entity, id),
            StoreErrorKind::UniqueViolation { constraint } => {
                write!(f, "unique constraint violated: {}", constraint)
            }
            StoreErrorKind::LockNotAvailable => write!(f, "row lock not available"),
            StoreErrorKind::Connection { message } => write!(f, "connection error: {}", message),
            StoreErrorKind::Unknown { message } => write!(f, "database error: {}", message),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match &err.kind {
            StoreErrorKind::NotFound { entity, id } if entity == "refund" => {
                AppError::domain(DomainError::RefundNotFound {
                    refund_id: id.clone(),
                })
            }
            StoreErrorKind::NotFound { entity, id } if entity == "payment" => {
                AppError::domain(DomainError::PaymentNotFound {
                    reference: id.clone(),
                })
            }
            _ => AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn lock_and_connection_errors_are_retryable() {
        assert!(StoreError::new(StoreErrorKind::LockNotAvailable).is_retryable());
        assert!(StoreError::new(StoreErrorKind::Connection {
            message: "reset".to_string()
        })
        .is_retryable());
        assert!(!StoreError::not_found("payment", "x").is_retryable());
    }

    #[test]
    fn not_found_maps_to_domain_errors() {
        let app: AppError = StoreError::not_found("refund", "r1").into();
        assert_eq!(app.error_code(), ErrorCode::RefundNotFound);
        assert_eq!(app.status_code(), 404);

        let app: AppError = StoreError::new(StoreErrorKind::UniqueViolation {
            constraint: "payments_provider_reference_key".to_string(),
        })
        .into();
        assert_eq!(app.error_code(), ErrorCode::DatabaseError);
    }
}
