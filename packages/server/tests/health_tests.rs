mod common;

use axum::body::Body;
use axum::http::StatusCode;

use common::*;

#[tokio::test]
async fn health_is_green_without_a_database() {
    let h = harness();

    let response = send(&h.app, request("GET", "/health").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "disabled");
}
