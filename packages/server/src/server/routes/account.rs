//! Self-service account endpoints: profile, usage stats, credential
//! rotation. All are credentialed but consume no rate or quota budget.

use axum::{
    extract::Extension,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;

use crate::domains::accounts::credentials::{
    digest_credential, display_prefix, generate_credential,
};
use crate::domains::accounts::models::account::AccountView;
use crate::server::app::AppState;
use crate::server::routes::extract::{admission_rejection, presented_credential};

pub async fn account_profile_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
) -> Response {
    let account = match state.validator.validate(&presented_credential(&headers)).await {
        Ok(account) => account,
        Err(err) => return admission_rejection(&err),
    };

    Json(json!({
        "success": true,
        "account": AccountView::from(&account),
    }))
    .into_response()
}

pub async fn account_usage_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
) -> Response {
    let account = match state.validator.validate(&presented_credential(&headers)).await {
        Ok(account) => account,
        Err(err) => return admission_rejection(&err),
    };

    let since = Utc::now() - chrono::Duration::days(30);
    let stats = match state.usage.account_stats(&account.email, since).await {
        Ok(stats) => stats,
        Err(err) => {
            tracing::error!(error = %err, "usage aggregation failed");
            return (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "error": "internal_error"})),
            )
                .into_response();
        }
    };

    Json(json!({
        "success": true,
        "last_30_days": stats,
        "current_period": {
            "quota_used": account.quota_used,
            "quota_limit": account.quota_limit,
            "quota_remaining": account.quota_remaining(),
            "period_end": account.period_end,
        },
    }))
    .into_response()
}

/// Rotate the caller's credential. The new secret appears in this response
/// and nowhere else, ever again.
pub async fn rotate_credential_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
) -> Response {
    let account = match state.validator.validate(&presented_credential(&headers)).await {
        Ok(account) => account,
        Err(err) => return admission_rejection(&err),
    };

    let secret = generate_credential();
    let digest = digest_credential(&state.credential_salt, &secret);
    let prefix = display_prefix(&secret);

    if let Err(err) = state
        .accounts
        .rotate_credential(account.id, &digest, &prefix)
        .await
    {
        tracing::error!(error = %err, account_id = %account.id, "credential rotation failed");
        return (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "error": "internal_error"})),
        )
            .into_response();
    }

    Json(json!({
        "success": true,
        "credential": secret,
        "credential_prefix": prefix,
    }))
    .into_response()
}
