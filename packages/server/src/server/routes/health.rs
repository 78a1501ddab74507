use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::time::Duration;

use crate::server::app::AppState;

/// Health check endpoint that verifies database connectivity.
///
/// Returns 200 when healthy, 503 when the database is unreachable. Router
/// instances wired without Postgres report the database as disabled and
/// stay healthy.
pub async fn health_check(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let Some(pool) = &state.db_pool else {
        return (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "database": "disabled",
            })),
        );
    };

    let db_check = tokio::time::timeout(
        Duration::from_secs(5),
        sqlx::query("SELECT 1").fetch_one(pool),
    )
    .await;

    match db_check {
        Ok(Ok(_)) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "database": "connected",
                "pool_size": pool.size(),
                "pool_idle": pool.num_idle(),
            })),
        ),
        Ok(Err(e)) => {
            tracing::error!("Health check database error: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "database": "error",
                    "error": e.to_string(),
                })),
            )
        }
        Err(_) => {
            tracing::error!("Health check database timeout");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "database": "timeout",
                })),
            )
        }
    }
}
