//! The public extraction endpoint: the front door of the admission pipeline.

use axum::{
    extract::Extension,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::domains::admission::coordinator::{AdmissionRequest, RequestContext};
use crate::domains::admission::error::AdmissionError;
use crate::server::app::AppState;
use crate::server::middleware::ClientIp;

#[derive(Debug, Deserialize)]
pub struct ExtractBody {
    pub url: String,
    #[serde(default)]
    pub include_metadata: bool,
    #[serde(default)]
    pub detect_region: bool,
}

/// Pull the caller's credential from `Authorization: Bearer` or `x-api-key`.
/// Absence yields an empty string, which the validator rejects; that keeps
/// the one-usage-record-per-attempt rule intact for credential-less calls.
pub(crate) fn presented_credential(headers: &HeaderMap) -> String {
    if let Some(auth) = headers.get(header::AUTHORIZATION) {
        if let Ok(value) = auth.to_str() {
            return value.strip_prefix("Bearer ").unwrap_or(value).to_string();
        }
    }
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Structured rejection envelope with the kind-specific hint fields.
pub(crate) fn admission_rejection(err: &AdmissionError) -> Response {
    let status = StatusCode::from_u16(err.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut body = json!({
        "success": false,
        "error": err.kind(),
        "message": err.to_string(),
    });

    match err {
        AdmissionError::AccountBlocked { reason } => {
            body["reason"] = json!(reason);
        }
        AdmissionError::RateLimited { retry_after_secs } => {
            body["retry_after_secs"] = json!(retry_after_secs);
        }
        AdmissionError::QuotaExceeded { resets_at, .. } => {
            body["remaining"] = json!(0);
            body["resets_at"] = json!(resets_at);
        }
        _ => {}
    }

    let mut response = (status, Json(body)).into_response();
    if let AdmissionError::RateLimited { retry_after_secs } = err {
        if let Ok(value) = retry_after_secs.to_string().parse() {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

pub async fn extract_handler(
    Extension(state): Extension<AppState>,
    client_ip: Option<Extension<ClientIp>>,
    headers: HeaderMap,
    Json(body): Json<ExtractBody>,
) -> Response {
    let credential = presented_credential(&headers);
    let ctx = RequestContext {
        endpoint: "/api/v1/extract".to_string(),
        client_ip: client_ip.map(|Extension(ClientIp(ip))| ip.to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };
    let request = AdmissionRequest {
        url: body.url,
        include_metadata: body.include_metadata,
        detect_region: body.detect_region,
    };

    match state.coordinator.admit(&credential, &request, &ctx).await {
        Ok(success) => Json(json!({
            "success": true,
            "payload": success.payload,
            "cached": success.cached,
            "requests_remaining": success.requests_remaining,
            "duration_ms": success.duration_ms,
        }))
        .into_response(),
        Err(err) => admission_rejection(&err),
    }
}
