use crate::api::identity::CallerIdentity;
use crate::api::{json_body, AppState};
use crate::error::AppError;
use crate::ledger::Refund;
use crate::middleware::error::with_request_id;
use crate::services::{CreateRefundRequest, ProcessedRefund};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use uuid::Uuid;

/// POST /api/v1/refunds
pub async fn create_refund(
    State(state): State<AppState>,
    headers: HeaderMap,
    CallerIdentity(caller): CallerIdentity,
    payload: Result<Json<CreateRefundRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Refund>), AppError> {
    let request = json_body(payload).map_err(|e| with_request_id(e, &headers))?;
    let refund = state
        .services
        .refunds
        .create_refund(&caller, request)
        .await
        .map_err(|e| with_request_id(e, &headers))?;
    Ok((StatusCode::CREATED, Json(refund)))
}

/// GET /api/v1/refunds/{id}
pub async fn get_refund(
    State(state): State<AppState>,
    headers: HeaderMap,
    CallerIdentity(caller): CallerIdentity,
    Path(refund_id): Path<Uuid>,
) -> Result<Json<Refund>, AppError> {
    state
        .services
        .refunds
        .get_refund(&caller, refund_id)
        .await
        .map(Json)
        .map_err(|e| with_request_id(e, &headers))
}

/// POST /api/v1/refunds/{id}/approve
pub async fn approve_refund(
    State(state): State<AppState>,
    headers: HeaderMap,
    CallerIdentity(caller): CallerIdentity,
    Path(refund_id): Path<Uuid>,
) -> Result<Json<ProcessedRefund>, AppError> {
    state
        .services
        .refunds
        .approve_refund(&caller, refund_id)
        .await
        .map(Json)
        .map_err(|e| with_request_id(e, &headers))
}

/// POST /api/v1/refunds/{id}/reject
pub async fn reject_refund(
    State(state): State<AppState>,
    headers: HeaderMap,
    CallerIdentity(caller): CallerIdentity,
    Path(refund_id): Path<Uuid>,
) -> Result<Json<Refund>, AppError> {
    state
        .services
        .refunds
        .reject_refund(&caller, refund_id)
        .await
        .map(Json)
        .map_err(|e| with_request_id(e, &headers))
}
