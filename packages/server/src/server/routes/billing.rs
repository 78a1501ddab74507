//! Billing webhook intake.
//!
//! The raw body must reach the reconciler untouched; the signature covers
//! the exact bytes the provider sent. Duplicate deliveries are acknowledged
//! with 200 so the provider stops retrying.

use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::domains::billing::reconciler::WebhookError;
use crate::server::app::AppState;

pub const SIGNATURE_HEADER: &str = "x-billing-signature";

pub async fn billing_events_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match state.reconciler.handle(&body, signature).await {
        Ok(disposition) => Json(json!({
            "received": true,
            "disposition": disposition.as_str(),
        }))
        .into_response(),
        Err(err) => {
            let status = match &err {
                WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
                WebhookError::MalformedEvent(_) => StatusCode::BAD_REQUEST,
                WebhookError::Internal(e) => {
                    tracing::error!(error = %e, "billing event processing failed");
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            (
                status,
                Json(json!({
                    "received": false,
                    "error": err.kind(),
                })),
            )
                .into_response()
        }
    }
}
