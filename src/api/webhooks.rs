use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{info, warn};

use crate::api::AppState;
use crate::services::webhook_processor::WebhookProcessorError;

/// POST /webhooks/{provider}
///
/// The body is taken as raw bytes; signatures are computed over exactly what
/// the provider sent. Every authenticated delivery is answered with 200.
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let processor = &state.services.webhooks;

    let signature_header = match processor.signature_header(&provider) {
        Ok(header) => header,
        Err(e) => return rejection(&provider, e),
    };
    let signature = headers
        .get(signature_header)
        .and_then(|v| v.to_str().ok());

    match processor
        .process_webhook(&provider, signature, &body)
        .await
    {
        Ok(ack) => {
            info!(provider = %provider, result = ack.label(), "Webhook acknowledged");
            (
                StatusCode::OK,
                Json(json!({"status": "ok", "result": ack.label()})),
            )
                .into_response()
        }
        Err(e) => rejection(&provider, e),
    }
}

fn rejection(provider: &str, err: WebhookProcessorError) -> Response {
    let status = match err {
        WebhookProcessorError::InvalidSignature => StatusCode::UNAUTHORIZED,
        WebhookProcessorError::UnknownProvider(_) => StatusCode::NOT_FOUND,
    };
    warn!(provider = %provider, error = %err, status = status.as_u16(), "Webhook rejected");
    (
        status,
        Json(json!({"status": "error", "message": err.to_string()})),
    )
        .into_response()
}
