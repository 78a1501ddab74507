// Main entry point for the clipgate admission gateway

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use server_core::kernel::{start_scheduler, GatewayDeps, OriginServiceFetcher, RetentionPolicy};
use server_core::server::build_app;
use server_core::Config;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting clipgate admission gateway");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Wire the upstream extractor client
    let origin = origin_client::OriginService::new(origin_client::OriginOptions {
        base_url: config.origin_base_url.clone(),
        service_token: config.origin_service_token.clone(),
        timeout: Duration::from_secs(config.origin_timeout_secs),
    })
    .context("Failed to build origin client")?;

    let deps = GatewayDeps::postgres(
        pool.clone(),
        &config,
        Arc::new(OriginServiceFetcher::new(origin)),
    );

    // Hourly maintenance: retention pruning plus in-process housekeeping
    let _scheduler = start_scheduler(
        deps.clone(),
        RetentionPolicy {
            usage_days: config.usage_retention_days,
            billing_days: config.billing_retention_days,
        },
    )
    .await
    .context("Failed to start maintenance scheduler")?;

    // Build application
    let app = build_app(&config, Some(pool), deps);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}
