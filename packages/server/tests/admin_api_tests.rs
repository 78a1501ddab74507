//! Operator console tests: login, CSRF pairing, and account management.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::json;

use server_core::common::plans::PlanTier;
use server_core::domains::accounts::models::account::AccountStatus;
use server_core::domains::accounts::store::AccountStore;

use common::*;

struct Operator {
    cookie: String,
    csrf_token: String,
}

async fn login(h: &Harness) -> Operator {
    let response = send(
        &h.app,
        request("POST", "/admin/api/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"username": ADMIN_USER, "password": ADMIN_PASS}).to_string(),
            ))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();
    let body = body_json(response).await;
    Operator {
        cookie,
        csrf_token: body["csrf_token"].as_str().unwrap().to_string(),
    }
}

fn admin_get(op: &Operator, uri: &str) -> Request<Body> {
    request("GET", uri)
        .header(header::COOKIE, op.cookie.as_str())
        .body(Body::empty())
        .unwrap()
}

fn admin_post(op: &Operator, uri: &str, body: serde_json::Value, with_csrf: bool) -> Request<Body> {
    let mut builder = request("POST", uri)
        .header(header::COOKIE, op.cookie.as_str())
        .header(header::CONTENT_TYPE, "application/json");
    if with_csrf {
        builder = builder.header("x-csrf-token", op.csrf_token.as_str());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn wrong_operator_credentials_are_refused() {
    let h = harness();

    let response = send(
        &h.app,
        request("POST", "/admin/api/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"username": ADMIN_USER, "password": "guess"}).to_string(),
            ))
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_login");
}

#[tokio::test]
async fn reads_require_a_live_session() {
    let h = harness();

    let response = send(
        &h.app,
        request("GET", "/admin/api/accounts").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "session_expired");
}

#[tokio::test]
async fn operator_can_provision_and_list_accounts() {
    let h = harness();
    let op = login(&h).await;

    let created = send(
        &h.app,
        admin_post(
            &op,
            "/admin/api/accounts",
            json!({"email": "new@example.com", "plan": "basic"}),
            true,
        ),
    )
    .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let body = body_json(created).await;
    let credential = body["credential"].as_str().unwrap().to_string();
    assert!(credential.starts_with("cg_"));
    assert_eq!(body["account"]["plan"], "basic");

    // The fresh credential admits immediately.
    let response = send(&h.app, extract_request(&credential, "https://media.example/clip/1")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let listed = send(&h.app, admin_get(&op, "/admin/api/accounts")).await;
    assert_eq!(listed.status(), StatusCode::OK);
    let body = body_json(listed).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["accounts"][0]["email"], "new@example.com");
    // The credential digest never leaves the store.
    assert!(body["accounts"][0].get("credential_hash").is_none());
}

#[tokio::test]
async fn mutations_without_the_csrf_token_change_nothing() {
    let h = harness();
    let (account, _) = h.seed_account("alice@example.com", PlanTier::Pro).await;
    let op = login(&h).await;

    let response = send(
        &h.app,
        admin_post(
            &op,
            &format!("/admin/api/accounts/{}/block", account.id),
            json!({"reason": "abuse"}),
            false,
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"], "csrf_mismatch");

    let untouched = h.accounts.find_by_id(account.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, AccountStatus::Active);
}

#[tokio::test]
async fn block_and_unblock_round_trip_through_admission() {
    let h = harness();
    let (account, credential) = h.seed_account("alice@example.com", PlanTier::Pro).await;
    let op = login(&h).await;

    let blocked = send(
        &h.app,
        admin_post(
            &op,
            &format!("/admin/api/accounts/{}/block", account.id),
            json!({"reason": "abuse"}),
            true,
        ),
    )
    .await;
    assert_eq!(blocked.status(), StatusCode::OK);

    let refused = send(&h.app, extract_request(&credential, "https://media.example/clip/1")).await;
    assert_eq!(refused.status(), StatusCode::FORBIDDEN);

    let unblocked = send(
        &h.app,
        admin_post(
            &op,
            &format!("/admin/api/accounts/{}/unblock", account.id),
            json!({}),
            true,
        ),
    )
    .await;
    assert_eq!(unblocked.status(), StatusCode::OK);

    let admitted = send(&h.app, extract_request(&credential, "https://media.example/clip/1")).await;
    assert_eq!(admitted.status(), StatusCode::OK);
}

#[tokio::test]
async fn deleting_an_account_revokes_its_credential() {
    let h = harness();
    let (account, credential) = h.seed_account("alice@example.com", PlanTier::Pro).await;
    let op = login(&h).await;

    let response = send(
        &h.app,
        request("DELETE", &format!("/admin/api/accounts/{}", account.id))
            .header(header::COOKIE, op.cookie.as_str())
            .header("x-csrf-token", op.csrf_token.as_str())
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let refused = send(&h.app, extract_request(&credential, "https://media.example/clip/1")).await;
    assert_eq!(refused.status(), StatusCode::UNAUTHORIZED);

    let again = send(
        &h.app,
        request("DELETE", &format!("/admin/api/accounts/{}", account.id))
            .header(header::COOKIE, op.cookie.as_str())
            .header("x-csrf-token", op.csrf_token.as_str())
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn logout_closes_the_session() {
    let h = harness();
    let op = login(&h).await;

    let response = send(&h.app, admin_post(&op, "/admin/api/logout", json!({}), false)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let listed = send(&h.app, admin_get(&op, "/admin/api/accounts")).await;
    assert_eq!(listed.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn stats_aggregate_traffic_and_accounts() {
    let h = harness();
    let (_, credential) = h.seed_account("alice@example.com", PlanTier::Pro).await;
    send(&h.app, extract_request(&credential, "https://media.example/clip/1")).await;
    send(&h.app, extract_request(&credential, "https://media.example/clip/1")).await;

    let op = login(&h).await;
    let response = send(&h.app, admin_get(&op, "/admin/api/stats")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["last_30_days"]["total_requests"], 2);
    assert_eq!(body["last_30_days"]["cached_requests"], 1);
    assert_eq!(body["active_accounts"], 1);
    assert_eq!(body["total_accounts"], 1);
}
