//! Shared harness for router-level tests: in-memory wiring, a stubbed
//! origin, and request builders that speak the gateway's dialect.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, Response};
use axum::Router;
use chrono::Utc;
use serde_json::Value;
use tower::ServiceExt;

use origin_client::models::{ExtractRequest, ExtractionPayload};
use origin_client::OriginError;
use server_core::common::plans::PlanTier;
use server_core::domains::accounts::credentials::{digest_credential, display_prefix};
use server_core::domains::accounts::models::account::{Account, AccountStatus};
use server_core::domains::accounts::store::{AccountStore, MemoryAccountStore};
use server_core::domains::admin::session::AdminSessionStore;
use server_core::domains::admission::rate_limiter::RateLimiter;
use server_core::domains::billing::store::MemoryBillingEventStore;
use server_core::domains::usage::store::MemoryUsageStore;
use server_core::kernel::{GatewayDeps, MemoryCacheStore, OriginFetcher, TracingNotifier};
use server_core::server::build_app;
use server_core::Config;

pub const SALT: &str = "test-salt";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";
pub const ADMIN_USER: &str = "ops";
pub const ADMIN_PASS: &str = "correct horse battery";

/// Origin stub that serves the same payload for every fetch and counts
/// how often it was reached.
pub struct StubOrigin {
    fetches: AtomicUsize,
    failure: Option<OriginError>,
}

impl StubOrigin {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            fetches: AtomicUsize::new(0),
            failure: None,
        })
    }

    pub fn failing(error: OriginError) -> Arc<Self> {
        Arc::new(Self {
            fetches: AtomicUsize::new(0),
            failure: Some(error),
        })
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OriginFetcher for StubOrigin {
    async fn fetch(&self, request: &ExtractRequest) -> Result<ExtractionPayload, OriginError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(ExtractionPayload {
                media_id: "clip-123".to_string(),
                title: Some("a clip".to_string()),
                author: Some("someone".to_string()),
                duration_secs: Some(42),
                download_url: format!("https://cdn.example/{}", request.url.len()),
                thumbnail_url: None,
                region: request.detect_region.then(|| "US".to_string()),
                metadata: None,
            }),
        }
    }
}

pub fn test_config() -> Config {
    Config {
        database_url: String::new(),
        port: 0,
        credential_salt: SALT.to_string(),
        origin_base_url: "http://origin.invalid".to_string(),
        origin_service_token: "svc-token".to_string(),
        origin_timeout_secs: 5,
        cache_ttl_secs: 3600,
        cache_capacity: 128,
        billing_webhook_secret: WEBHOOK_SECRET.to_string(),
        billing_retention_days: 30,
        usage_retention_days: 90,
        admin_username: ADMIN_USER.to_string(),
        admin_password: ADMIN_PASS.to_string(),
        admin_session_timeout_mins: 30,
    }
}

pub struct Harness {
    pub app: Router,
    pub deps: GatewayDeps,
    pub accounts: Arc<MemoryAccountStore>,
    pub usage: Arc<MemoryUsageStore>,
    pub origin: Arc<StubOrigin>,
}

pub fn harness_with_origin(origin: Arc<StubOrigin>) -> Harness {
    let config = test_config();
    let accounts = Arc::new(MemoryAccountStore::new());
    let usage = Arc::new(MemoryUsageStore::new());

    let deps = GatewayDeps {
        accounts: accounts.clone(),
        usage: usage.clone(),
        billing_events: Arc::new(MemoryBillingEventStore::new()),
        cache: Arc::new(MemoryCacheStore::new(config.cache_capacity)),
        origin: origin.clone(),
        notifier: Arc::new(TracingNotifier),
        rate_limiter: RateLimiter::new(),
        sessions: Arc::new(AdminSessionStore::new(std::time::Duration::from_secs(
            30 * 60,
        ))),
    };

    let app = build_app(&config, None, deps.clone());
    Harness {
        app,
        deps,
        accounts,
        usage,
        origin,
    }
}

pub fn harness() -> Harness {
    harness_with_origin(StubOrigin::ok())
}

impl Harness {
    /// Seed an account on `plan` and return it with its raw credential.
    pub async fn seed_account(&self, email: &str, plan: PlanTier) -> (Account, String) {
        self.seed_account_with(email, plan, |_| {}).await
    }

    /// Like [`seed_account`], with a hook to adjust the account before it
    /// is stored (tight quota limits, pre-spent quota, and so on).
    pub async fn seed_account_with(
        &self,
        email: &str,
        plan: PlanTier,
        adjust: impl FnOnce(&mut Account),
    ) -> (Account, String) {
        let secret = format!("cg_{}_0000000000000000000", email.replace(['@', '.'], "-"));
        let mut account = Account::provision(
            email.to_string(),
            plan,
            digest_credential(SALT, &secret),
            display_prefix(&secret),
            Utc::now(),
        );
        adjust(&mut account);
        let stored = self.accounts.insert(&account).await.unwrap();
        (stored, secret)
    }

    pub async fn block_account(&self, account: &Account, reason: &str) {
        self.accounts
            .set_status(account.id, AccountStatus::Blocked, Some(reason))
            .await
            .unwrap();
    }
}

/// Every request carries a forwarded IP so the per-IP pre-gate has a key.
pub fn request(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", "127.0.0.1")
}

pub fn extract_request(credential: &str, url: &str) -> Request<Body> {
    request("POST", "/api/v1/extract")
        .header(header::AUTHORIZATION, format!("Bearer {credential}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::json!({ "url": url }).to_string()))
        .unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
