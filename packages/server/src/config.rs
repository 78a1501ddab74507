use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub credential_salt: String,
    pub origin_base_url: String,
    pub origin_service_token: String,
    pub origin_timeout_secs: u64,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
    pub billing_webhook_secret: String,
    pub billing_retention_days: i64,
    pub usage_retention_days: i64,
    pub admin_username: String,
    pub admin_password: String,
    pub admin_session_timeout_mins: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            credential_salt: env::var("CREDENTIAL_SALT")
                .context("CREDENTIAL_SALT must be set")?,
            origin_base_url: env::var("ORIGIN_BASE_URL")
                .context("ORIGIN_BASE_URL must be set")?,
            origin_service_token: env::var("ORIGIN_SERVICE_TOKEN")
                .context("ORIGIN_SERVICE_TOKEN must be set")?,
            origin_timeout_secs: env::var("ORIGIN_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("ORIGIN_TIMEOUT_SECS must be a valid number")?,
            cache_ttl_secs: env::var("CACHE_TTL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .context("CACHE_TTL_SECS must be a valid number")?,
            cache_capacity: env::var("CACHE_CAPACITY")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .context("CACHE_CAPACITY must be a valid number")?,
            billing_webhook_secret: env::var("BILLING_WEBHOOK_SECRET")
                .context("BILLING_WEBHOOK_SECRET must be set")?,
            billing_retention_days: env::var("BILLING_RETENTION_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("BILLING_RETENTION_DAYS must be a valid number")?,
            usage_retention_days: env::var("USAGE_RETENTION_DAYS")
                .unwrap_or_else(|_| "90".to_string())
                .parse()
                .context("USAGE_RETENTION_DAYS must be a valid number")?,
            admin_username: env::var("ADMIN_USERNAME")
                .context("ADMIN_USERNAME must be set")?,
            admin_password: env::var("ADMIN_PASSWORD")
                .context("ADMIN_PASSWORD must be set")?,
            admin_session_timeout_mins: env::var("ADMIN_SESSION_TIMEOUT_MINS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("ADMIN_SESSION_TIMEOUT_MINS must be a valid number")?,
        })
    }
}
