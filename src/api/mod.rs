//! HTTP boundary

pub mod identity;
pub mod payments;
pub mod referrals;
pub mod refunds;
pub mod webhooks;

use crate::error::{AppError, ValidationError};
use crate::health::{HealthChecker, HealthStatus};
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::Services;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub health: HealthChecker,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/payments/initialize", post(payments::initialize_payment))
        .route("/api/v1/payments/{id}", get(payments::get_payment))
        .route("/api/v1/payments/{id}/verify", post(payments::verify_payment))
        .route("/api/v1/refunds", post(refunds::create_refund))
        .route("/api/v1/refunds/{id}", get(refunds::get_refund))
        .route("/api/v1/refunds/{id}/approve", post(refunds::approve_refund))
        .route("/api/v1/refunds/{id}/reject", post(refunds::reject_refund))
        .route("/api/v1/referrals/summary", get(referrals::summary))
        .route("/api/v1/referrals/mark-paid", post(referrals::mark_paid))
        .route("/webhooks/{provider}", post(webhooks::handle_webhook))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let status = state.health.check_health().await;
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

/// Turn a JSON extraction failure into the standard error payload.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        AppError::validation(ValidationError::InvalidField {
            field: "body".to_string(),
            reason: rejection.body_text(),
        })
    })
}
