//! Seam between the admission pipeline and the upstream extractor.
//!
//! The coordinator only ever sees [`OriginFetcher`]; the shipped
//! implementation wraps the `origin-client` crate. Tests substitute their
//! own fetchers.

use std::sync::Arc;

use async_trait::async_trait;
use origin_client::models::{ExtractRequest, ExtractionPayload};
use origin_client::{OriginError, OriginService};

#[async_trait]
pub trait OriginFetcher: Send + Sync {
    /// One extraction attempt. Retry policy belongs to the caller.
    async fn fetch(&self, request: &ExtractRequest) -> Result<ExtractionPayload, OriginError>;
}

/// Adapter over the real extraction-service client.
pub struct OriginServiceFetcher(Arc<OriginService>);

impl OriginServiceFetcher {
    pub fn new(service: OriginService) -> Self {
        Self(Arc::new(service))
    }
}

#[async_trait]
impl OriginFetcher for OriginServiceFetcher {
    async fn fetch(&self, request: &ExtractRequest) -> Result<ExtractionPayload, OriginError> {
        self.0.extract(request).await
    }
}
