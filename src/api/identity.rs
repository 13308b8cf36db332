//! Caller identity from trusted upstream headers.
//!
//! Authentication happens in front of this service; the gateway forwards the
//! authenticated user id in `x-user-id` and the staff flag in `x-user-staff`.

use crate::error::{AppError, ValidationError};
use crate::middleware::error::get_request_id_from_headers;
use crate::services::Caller;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const STAFF_HEADER: &str = "x-user-staff";

pub struct CallerIdentity(pub Caller);

impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let attach = |err: AppError| match get_request_id_from_headers(&parts.headers) {
            Some(request_id) => err.with_request_id(request_id),
            None => err,
        };

        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                attach(AppError::validation(ValidationError::MissingField {
                    field: USER_ID_HEADER.to_string(),
                }))
            })?;
        let user_id = raw.trim().parse::<i64>().map_err(|_| {
            attach(AppError::validation(ValidationError::InvalidField {
                field: USER_ID_HEADER.to_string(),
                reason: "must be a numeric user id".to_string(),
            }))
        })?;

        let is_staff = parts
            .headers
            .get(STAFF_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1"))
            .unwrap_or(false);

        Ok(CallerIdentity(Caller { user_id, is_staff }))
    }
}
