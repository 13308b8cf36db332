use crate::api::identity::CallerIdentity;
use crate::api::{json_body, AppState};
use crate::error::AppError;
use crate::ledger::{Payment, PaymentStatus};
use crate::middleware::error::with_request_id;
use crate::services::{InitializePaymentRequest, InitializedPayment};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub result: &'static str,
}

/// POST /api/v1/payments/initialize
pub async fn initialize_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    CallerIdentity(caller): CallerIdentity,
    payload: Result<Json<InitializePaymentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<InitializedPayment>), AppError> {
    let request = json_body(payload).map_err(|e| with_request_id(e, &headers))?;
    let initialized = state
        .services
        .payments
        .initialize_payment(&caller, request)
        .await
        .map_err(|e| with_request_id(e, &headers))?;
    Ok((StatusCode::CREATED, Json(initialized)))
}

/// GET /api/v1/payments/{id}
pub async fn get_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    CallerIdentity(caller): CallerIdentity,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    state
        .services
        .payments
        .get_payment(&caller, payment_id)
        .await
        .map(Json)
        .map_err(|e| with_request_id(e, &headers))
}

/// POST /api/v1/payments/{id}/verify
pub async fn verify_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    CallerIdentity(caller): CallerIdentity,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<VerifyResponse>, AppError> {
    let outcome = state
        .services
        .payments
        .verify_payment(&caller, payment_id)
        .await
        .map_err(|e| with_request_id(e, &headers))?;

    let status = outcome
        .payment()
        .map(|p| p.status)
        .unwrap_or(PaymentStatus::Pending);
    Ok(Json(VerifyResponse {
        payment_id,
        status,
        result: outcome.label(),
    }))
}
