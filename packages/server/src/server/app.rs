//! Application setup and router assembly.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Extension,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method,
    },
    middleware,
    routing::{delete, get, post},
    Router,
};
use sqlx::PgPool;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::domains::accounts::credentials::CredentialValidator;
use crate::domains::accounts::store::AccountStore;
use crate::domains::admin::gate::AdminGate;
use crate::domains::admission::coordinator::AdmissionCoordinator;
use crate::domains::admission::quota::QuotaLedger;
use crate::domains::billing::reconciler::EntitlementReconciler;
use crate::domains::usage::store::UsageStore;
use crate::kernel::GatewayDeps;
use crate::server::middleware::extract_client_ip;
use crate::server::routes::{account, admin, billing, extract, health};
use crate::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db_pool: Option<PgPool>,
    pub coordinator: Arc<AdmissionCoordinator>,
    pub reconciler: Arc<EntitlementReconciler>,
    pub admin: Arc<AdminGate>,
    pub accounts: Arc<dyn AccountStore>,
    pub usage: Arc<dyn UsageStore>,
    pub validator: Arc<CredentialValidator>,
    pub credential_salt: String,
}

/// Build the gateway router over an already-wired dependency set.
///
/// `db_pool` feeds the health check only; stores arrive through `deps` so
/// tests can hand in the in-memory wiring with no database at all.
pub fn build_app(config: &Config, db_pool: Option<PgPool>, deps: GatewayDeps) -> Router {
    let coordinator = Arc::new(AdmissionCoordinator::new(
        CredentialValidator::new(deps.accounts.clone(), config.credential_salt.clone()),
        deps.rate_limiter.clone(),
        QuotaLedger::new(deps.accounts.clone()),
        deps.cache.clone(),
        deps.origin.clone(),
        deps.usage.clone(),
        Duration::from_secs(config.cache_ttl_secs),
    ));

    let reconciler = Arc::new(EntitlementReconciler::new(
        deps.accounts.clone(),
        deps.billing_events.clone(),
        deps.notifier.clone(),
        config.billing_webhook_secret.clone(),
    ));

    let admin_gate = Arc::new(AdminGate::new(
        deps.sessions.clone(),
        config.admin_username.clone(),
        config.admin_password.clone(),
    ));

    let state = AppState {
        db_pool,
        coordinator,
        reconciler,
        admin: admin_gate,
        accounts: deps.accounts.clone(),
        usage: deps.usage.clone(),
        validator: Arc::new(CredentialValidator::new(
            deps.accounts.clone(),
            config.credential_salt.clone(),
        )),
        credential_salt: config.credential_salt.clone(),
    };

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    // Per-IP pre-gate in front of the credentialed endpoints: 10/sec with
    // burst of 20, keyed off X-Forwarded-For behind the proxy.
    let rate_limit_config = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .use_headers()
            .finish()
            .expect("Rate limiter configuration is valid and should never fail"),
    );
    let rate_limit_layer = GovernorLayer {
        config: rate_limit_config,
    };

    let api = Router::new()
        .route("/api/v1/extract", post(extract::extract_handler))
        .route("/api/v1/account", get(account::account_profile_handler))
        .route(
            "/api/v1/account/usage",
            get(account::account_usage_handler),
        )
        .route(
            "/api/v1/account/credential/rotate",
            post(account::rotate_credential_handler),
        )
        .layer(rate_limit_layer);

    let admin_api = Router::new()
        .route("/admin/api/login", post(admin::login_handler))
        .route("/admin/api/logout", post(admin::logout_handler))
        .route(
            "/admin/api/accounts",
            get(admin::list_accounts_handler).post(admin::create_account_handler),
        )
        .route(
            "/admin/api/accounts/:id",
            delete(admin::delete_account_handler),
        )
        .route(
            "/admin/api/accounts/:id/block",
            post(admin::block_account_handler),
        )
        .route(
            "/admin/api/accounts/:id/unblock",
            post(admin::unblock_account_handler),
        )
        .route("/admin/api/stats", get(admin::stats_handler));

    api.merge(admin_api)
        // Webhook and health bypass the per-IP pre-gate; the provider
        // retries on 429 and that churn helps nobody.
        .route("/api/v1/billing/events", post(billing::billing_events_handler))
        .route("/health", get(health::health_check))
        // Middleware layers (applied in reverse order - last added runs first)
        .layer(middleware::from_fn(extract_client_ip))
        .layer(Extension(state))
        .layer(cors)
        .layer(TimeoutLayer::new(Duration::from_secs(60)))
        .layer(TraceLayer::new_for_http())
}
