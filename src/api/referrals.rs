use crate::api::identity::CallerIdentity;
use crate::api::{json_body, AppState};
use crate::error::AppError;
use crate::middleware::error::with_request_id;
use crate::services::ReferralSummary;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct MarkPaidRequest {
    pub reward_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct MarkPaidResponse {
    pub updated: u64,
}

/// GET /api/v1/referrals/summary
pub async fn summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    CallerIdentity(caller): CallerIdentity,
) -> Result<Json<ReferralSummary>, AppError> {
    state
        .services
        .referrals
        .summary(&caller)
        .await
        .map(Json)
        .map_err(|e| with_request_id(e, &headers))
}

/// POST /api/v1/referrals/mark-paid
pub async fn mark_paid(
    State(state): State<AppState>,
    headers: HeaderMap,
    CallerIdentity(caller): CallerIdentity,
    payload: Result<Json<MarkPaidRequest>, JsonRejection>,
) -> Result<Json<MarkPaidResponse>, AppError> {
    let request = json_body(payload).map_err(|e| with_request_id(e, &headers))?;
    let updated = state
        .services
        .referrals
        .mark_paid(&caller, &request.reward_ids)
        .await
        .map_err(|e| with_request_id(e, &headers))?;
    Ok(Json(MarkPaidResponse { updated }))
}
