//! Operator console API.
//!
//! The session rides an HttpOnly cookie; mutations additionally carry the
//! CSRF token in `x-csrf-token`. The token is handed out once at login and
//! never appears in a cookie, so a forged cross-site request cannot present
//! both halves.

use axum::{
    extract::{Extension, Path, Query},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::common::plans::PlanTier;
use crate::domains::accounts::credentials::{
    digest_credential, display_prefix, generate_credential,
};
use crate::domains::accounts::models::account::{Account, AccountStatus, AccountView};
use crate::domains::accounts::store::AccountFilter;
use crate::domains::admin::error::AdminGateError;
use crate::server::app::AppState;

pub const SESSION_COOKIE: &str = "admin_session";
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Pull the admin session id out of the Cookie header.
fn session_cookie(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

fn csrf_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn gate_rejection(err: &AdminGateError) -> Response {
    let status = StatusCode::from_u16(err.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut body = json!({
        "success": false,
        "error": err.kind(),
        "message": err.to_string(),
    });
    if let AdminGateError::AdminRateLimited { retry_after_secs } = err {
        body["retry_after_secs"] = json!(retry_after_secs);
    }

    let mut response = (status, Json(body)).into_response();
    if let AdminGateError::AdminRateLimited { retry_after_secs } = err {
        if let Ok(value) = retry_after_secs.to_string().parse() {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

fn internal_error(context: &str, err: &anyhow::Error) -> Response {
    tracing::error!(error = %err, "{context}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"success": false, "error": "internal_error"})),
    )
        .into_response()
}

async fn require_read(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let session_id = session_cookie(headers).unwrap_or_default();
    state
        .admin
        .authorize_read(&session_id)
        .await
        .map(|_| ())
        .map_err(|err| gate_rejection(&err))
}

async fn require_mutation(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let session_id = session_cookie(headers).unwrap_or_default();
    state
        .admin
        .authorize_mutation(&session_id, csrf_header(headers).as_deref())
        .await
        .map(|_| ())
        .map_err(|err| gate_rejection(&err))
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

pub async fn login_handler(
    Extension(state): Extension<AppState>,
    Json(body): Json<LoginBody>,
) -> Response {
    let session = match state.admin.login(&body.username, &body.password).await {
        Ok(session) => session,
        Err(err) => return gate_rejection(&err),
    };

    let cookie = format!(
        "{SESSION_COOKIE}={}; HttpOnly; Path=/; SameSite=Strict",
        session.id
    );
    let mut response = Json(json!({
        "success": true,
        "csrf_token": session.csrf_token,
    }))
    .into_response();
    if let Ok(value) = cookie.parse() {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

pub async fn logout_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
) -> Response {
    if let Some(session_id) = session_cookie(&headers) {
        state.admin.logout(&session_id).await;
    }

    let cookie = format!("{SESSION_COOKIE}=; HttpOnly; Path=/; Max-Age=0; SameSite=Strict");
    let mut response = Json(json!({"success": true})).into_response();
    if let Ok(value) = cookie.parse() {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
    pub plan: Option<PlanTier>,
    pub status: Option<AccountStatus>,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    50
}

pub async fn list_accounts_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    if let Err(rejection) = require_read(&state, &headers).await {
        return rejection;
    }

    let filter = AccountFilter {
        plan: query.plan,
        status: query.status,
    };
    let page = query.page.max(1);
    let per_page = query.per_page.clamp(1, 200);

    match state.accounts.list(&filter, page, per_page).await {
        Ok(result) => Json(json!({
            "success": true,
            "accounts": result
                .accounts
                .iter()
                .map(AccountView::from)
                .collect::<Vec<_>>(),
            "total": result.total,
            "page": page,
            "per_page": per_page,
        }))
        .into_response(),
        Err(err) => internal_error("account listing failed", &err),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountBody {
    pub email: String,
    #[serde(default)]
    pub plan: Option<PlanTier>,
}

pub async fn create_account_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateAccountBody>,
) -> Response {
    if let Err(rejection) = require_mutation(&state, &headers).await {
        return rejection;
    }

    let email = body.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "error": "invalid_email"})),
        )
            .into_response();
    }

    match state.accounts.find_by_email(&email).await {
        Ok(Some(_)) => {
            return (
                StatusCode::CONFLICT,
                Json(json!({"success": false, "error": "email_taken"})),
            )
                .into_response();
        }
        Ok(None) => {}
        Err(err) => return internal_error("account lookup failed", &err),
    }

    let secret = generate_credential();
    let account = Account::provision(
        email,
        body.plan.unwrap_or(PlanTier::Free),
        digest_credential(&state.credential_salt, &secret),
        display_prefix(&secret),
        Utc::now(),
    );

    match state.accounts.insert(&account).await {
        Ok(created) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "account": AccountView::from(&created),
                "credential": secret,
            })),
        )
            .into_response(),
        Err(err) => internal_error("account creation failed", &err),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct BlockBody {
    pub reason: Option<String>,
}

pub async fn block_account_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    body: Option<Json<BlockBody>>,
) -> Response {
    if let Err(rejection) = require_mutation(&state, &headers).await {
        return rejection;
    }

    let reason = body.and_then(|Json(b)| b.reason);
    set_status(&state, id, AccountStatus::Blocked, reason.as_deref()).await
}

pub async fn unblock_account_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    if let Err(rejection) = require_mutation(&state, &headers).await {
        return rejection;
    }

    set_status(&state, id, AccountStatus::Active, None).await
}

async fn set_status(
    state: &AppState,
    id: Uuid,
    status: AccountStatus,
    reason: Option<&str>,
) -> Response {
    match state.accounts.find_by_id(id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"success": false, "error": "account_not_found"})),
            )
                .into_response();
        }
        Err(err) => return internal_error("account lookup failed", &err),
    }

    match state.accounts.set_status(id, status, reason).await {
        Ok(account) => Json(json!({
            "success": true,
            "account": AccountView::from(&account),
        }))
        .into_response(),
        Err(err) => internal_error("account status change failed", &err),
    }
}

pub async fn delete_account_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    if let Err(rejection) = require_mutation(&state, &headers).await {
        return rejection;
    }

    match state.accounts.delete(id).await {
        Ok(true) => Json(json!({"success": true})).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "error": "account_not_found"})),
        )
            .into_response(),
        Err(err) => internal_error("account deletion failed", &err),
    }
}

pub async fn stats_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = require_read(&state, &headers).await {
        return rejection;
    }

    let since = Utc::now() - chrono::Duration::days(30);
    let stats = match state.usage.system_stats(since).await {
        Ok(stats) => stats,
        Err(err) => return internal_error("system stats aggregation failed", &err),
    };
    let total_accounts = match state.accounts.count(&AccountFilter::default()).await {
        Ok(count) => count,
        Err(err) => return internal_error("account count failed", &err),
    };

    Json(json!({
        "success": true,
        "last_30_days": stats.stats,
        "active_accounts": stats.active_accounts,
        "total_accounts": total_accounts,
    }))
    .into_response()
}
