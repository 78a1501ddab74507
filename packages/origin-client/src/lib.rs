//! Client for the upstream media-extraction service.
//!
//! The gateway never talks to the extractor directly. [`OriginService`] owns
//! the base URL, the service token, and the request timeout, and classifies
//! failures into the small set of outcomes the admission pipeline acts on.

pub mod models;

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

use crate::models::{ExtractRequest, ExtractionPayload};

/// Connection settings for the upstream extractor.
#[derive(Debug, Clone)]
pub struct OriginOptions {
    pub base_url: String,
    pub service_token: String,
    pub timeout: Duration,
}

/// Errors raised while constructing the client.
#[derive(Debug, Error)]
pub enum OriginSetupError {
    #[error("invalid origin base url: {0}")]
    BaseUrl(#[from] url::ParseError),
    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
}

/// A single extraction failure, classified for the caller.
///
/// `Transient` is the only variant worth retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OriginError {
    #[error("target not found: {0}")]
    NotFound(String),
    #[error("target not accessible: {0}")]
    Forbidden(String),
    #[error("transient extraction failure: {0}")]
    Transient(String),
    #[error("extraction rejected: {0}")]
    Permanent(String),
}

/// HTTP client for the extraction service.
#[derive(Debug, Clone)]
pub struct OriginService {
    extract_url: Url,
    service_token: String,
    client: reqwest::Client,
}

impl OriginService {
    pub fn new(options: OriginOptions) -> Result<Self, OriginSetupError> {
        let base = Url::parse(&options.base_url)?;
        let extract_url = base.join("v2/extract")?;
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()?;

        Ok(Self {
            extract_url,
            service_token: options.service_token,
            client,
        })
    }

    /// Run one extraction attempt against the upstream service.
    pub async fn extract(
        &self,
        request: &ExtractRequest,
    ) -> Result<ExtractionPayload, OriginError> {
        let response = self
            .client
            .post(self.extract_url.clone())
            .bearer_auth(&self.service_token)
            .json(request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        response
            .json::<ExtractionPayload>()
            .await
            .map_err(|e| OriginError::Permanent(format!("malformed extraction payload: {e}")))
    }
}

fn classify_transport(err: reqwest::Error) -> OriginError {
    if err.is_timeout() || err.is_connect() {
        OriginError::Transient(format!("origin unreachable: {err}"))
    } else {
        OriginError::Permanent(format!("origin request failed: {err}"))
    }
}

fn classify_status(status: StatusCode, body: &str) -> OriginError {
    let detail = models::error_detail(body);
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => OriginError::NotFound(detail),
        StatusCode::FORBIDDEN | StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS => {
            OriginError::Forbidden(detail)
        }
        StatusCode::TOO_MANY_REQUESTS => OriginError::Transient(detail),
        s if s.is_server_error() => OriginError::Transient(detail),
        _ => OriginError::Permanent(detail),
    }
}
